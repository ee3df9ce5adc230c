//! Keys for registry state
//!
//! Identifiers for servers, subscriptions and the consumers sharing them.

use std::fmt;

use crate::channel::Channel;

/// A remote server, identified by host name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Origin(String);

impl Origin {
    /// Create an origin from a host name (e.g., "misskey.io")
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Origin {
    fn from(host: &str) -> Self {
        Self::new(host)
    }
}

impl From<String> for Origin {
    fn from(host: String) -> Self {
        Self(host)
    }
}

/// Unique identifier for a subscription (origin + channel)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub origin: Origin,
    pub channel: Channel,
}

impl ChannelKey {
    pub fn new(origin: impl Into<Origin>, channel: Channel) -> Self {
        Self {
            origin: origin.into(),
            channel,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.channel)
    }
}

/// Opaque identity of a consumer (an editor buffer number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ConsumerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
