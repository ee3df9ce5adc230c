//! Channel and timeline names
//!
//! A [`Channel`] is the name the streaming API uses for a logical
//! subscription. A [`Timeline`] is the user-facing name that appears in
//! buffer names; each timeline maps to exactly one channel.

use std::fmt;
use std::str::FromStr;

/// Streaming channels exposed by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Every public note the server knows about
    GlobalTimeline,
    /// Notes from followed accounts
    HomeTimeline,
    /// Home plus local ("social")
    HybridTimeline,
    /// Notes from accounts on this server
    LocalTimeline,
}

impl Channel {
    /// All channels, in declaration order
    pub const ALL: [Channel; 4] = [
        Channel::GlobalTimeline,
        Channel::HomeTimeline,
        Channel::HybridTimeline,
        Channel::LocalTimeline,
    ];

    /// Name used on the wire when subscribing
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::GlobalTimeline => "globalTimeline",
            Channel::HomeTimeline => "homeTimeline",
            Channel::HybridTimeline => "hybridTimeline",
            Channel::LocalTimeline => "localTimeline",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Timeline> for Channel {
    fn from(timeline: Timeline) -> Self {
        timeline.channel()
    }
}

/// User-facing timeline names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeline {
    Global,
    Home,
    Social,
    Local,
}

impl Timeline {
    /// All timelines, in declaration order
    pub const ALL: [Timeline; 4] = [
        Timeline::Global,
        Timeline::Home,
        Timeline::Social,
        Timeline::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeline::Global => "global",
            Timeline::Home => "home",
            Timeline::Social => "social",
            Timeline::Local => "local",
        }
    }

    /// Channel backing this timeline
    pub fn channel(&self) -> Channel {
        match self {
            Timeline::Global => Channel::GlobalTimeline,
            Timeline::Home => Channel::HomeTimeline,
            Timeline::Social => Channel::HybridTimeline,
            Timeline::Local => Channel::LocalTimeline,
        }
    }
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown timeline name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTimeline(pub String);

impl fmt::Display for UnknownTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a known timeline", self.0)
    }
}

impl std::error::Error for UnknownTimeline {}

impl FromStr for Timeline {
    type Err = UnknownTimeline;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeline::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTimeline(s.to_string()))
    }
}
