//! Buffer names
//!
//! Editor buffers are named after what they show:
//!
//! - `misskey://{origin}/timeline/{timeline}` for a live timeline
//! - `misskey://{origin}/note/create` for a compose buffer

use std::fmt;
use std::str::FromStr;

use crate::channel::{Timeline, UnknownTimeline};
use crate::registry::{ChannelKey, Origin};

/// Scheme prefix shared by every buffer name
pub const BUFFER_SCHEME: &str = "misskey://";

/// A parsed buffer name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferName {
    Timeline { origin: Origin, timeline: Timeline },
    NoteCreate { origin: Origin },
}

impl BufferName {
    pub fn origin(&self) -> &Origin {
        match self {
            BufferName::Timeline { origin, .. } | BufferName::NoteCreate { origin } => origin,
        }
    }

    /// Subscription a timeline buffer consumes
    pub fn channel_key(&self) -> Option<ChannelKey> {
        match self {
            BufferName::Timeline { origin, timeline } => {
                Some(ChannelKey::new(origin.clone(), timeline.channel()))
            }
            BufferName::NoteCreate { .. } => None,
        }
    }
}

impl fmt::Display for BufferName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferName::Timeline { origin, timeline } => {
                write!(f, "{}{}/timeline/{}", BUFFER_SCHEME, origin, timeline)
            }
            BufferName::NoteCreate { origin } => {
                write!(f, "{}{}/note/create", BUFFER_SCHEME, origin)
            }
        }
    }
}

/// Buffer name parse failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferNameError {
    /// Not a `misskey://` buffer
    ForeignScheme(String),
    /// Empty origin segment
    MissingOrigin(String),
    /// Neither a timeline nor a compose buffer
    UnknownKind(String),
    UnknownTimeline(UnknownTimeline),
}

impl fmt::Display for BufferNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferNameError::ForeignScheme(name) => write!(f, "'{}' is not a Misskey buffer", name),
            BufferNameError::MissingOrigin(name) => write!(f, "'{}' has no origin", name),
            BufferNameError::UnknownKind(name) => {
                write!(f, "'{}' is neither a timeline nor a note buffer", name)
            }
            BufferNameError::UnknownTimeline(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BufferNameError {}

impl FromStr for BufferName {
    type Err = BufferNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let rest = name
            .strip_prefix(BUFFER_SCHEME)
            .ok_or_else(|| BufferNameError::ForeignScheme(name.to_string()))?;

        let mut segments = rest.split('/');
        let origin = match segments.next() {
            Some(host) if !host.is_empty() => Origin::new(host),
            _ => return Err(BufferNameError::MissingOrigin(name.to_string())),
        };

        match (segments.next(), segments.next(), segments.next()) {
            (Some("timeline"), Some(timeline), None) => Ok(BufferName::Timeline {
                origin,
                timeline: timeline.parse().map_err(BufferNameError::UnknownTimeline)?,
            }),
            (Some("note"), Some("create"), None) => Ok(BufferName::NoteCreate { origin }),
            _ => Err(BufferNameError::UnknownKind(name.to_string())),
        }
    }
}
