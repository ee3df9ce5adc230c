//! Error types
//!
//! Each external concern has its own error enum. They all fold into [`Error`]
//! so registry and submitter operations can propagate with `?`.

use std::fmt;
use std::time::Duration;

use crate::channel::Channel;
use crate::registry::Origin;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Credential store missing or malformed
    Config(ConfigError),
    /// Opening the streaming connection failed
    Connection(ConnectionError),
    /// Opening or disposing a channel subscription failed
    Subscription(SubscriptionError),
    /// A one-shot request failed
    Request(RequestError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config error: {}", e),
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::Subscription(e) => write!(f, "subscription error: {}", e),
            Error::Request(e) => write!(f, "request error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Connection(e) => Some(e),
            Error::Subscription(e) => Some(e),
            Error::Request(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Error::Connection(e)
    }
}

impl From<SubscriptionError> for Error {
    fn from(e: SubscriptionError) -> Self {
        Error::Subscription(e)
    }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Error::Request(e)
    }
}

/// Credential resolution failures
#[derive(Debug)]
pub enum ConfigError {
    /// The credential file could not be read
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    /// The credential file is not valid JSON of the expected shape
    Malformed(String),
    /// No credential stored for the origin
    MissingCredential(Origin),
    /// Neither `XDG_CONFIG_HOME` nor `HOME` is set
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Malformed(msg) => write!(f, "invalid credential store: {}", msg),
            ConfigError::MissingCredential(origin) => {
                write!(f, "no credential stored for {}", origin)
            }
            ConfigError::NoConfigDir => write!(f, "cannot locate the config directory"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Streaming connection failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport refused or failed the open
    Open { origin: Origin, reason: String },
    /// The open did not complete in time
    Timeout { origin: Origin, after: Duration },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Open { origin, reason } => {
                write!(f, "failed to connect to {}: {}", origin, reason)
            }
            ConnectionError::Timeout { origin, after } => {
                write!(f, "connecting to {} timed out after {:?}", origin, after)
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Channel subscription failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The server rejected the channel subscription
    Subscribe { channel: Channel, reason: String },
    /// The subscribe call did not complete in time
    Timeout { channel: Channel, after: Duration },
    /// Disposing the subscription failed
    Dispose { channel: Channel, reason: String },
    /// The runtime shut down before the subscribe finished
    Interrupted { channel: Channel },
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionError::Subscribe { channel, reason } => {
                write!(f, "failed to subscribe to {}: {}", channel, reason)
            }
            SubscriptionError::Timeout { channel, after } => {
                write!(f, "subscribing to {} timed out after {:?}", channel, after)
            }
            SubscriptionError::Dispose { channel, reason } => {
                write!(f, "failed to dispose {}: {}", channel, reason)
            }
            SubscriptionError::Interrupted { channel } => {
                write!(f, "subscribing to {} was interrupted", channel)
            }
        }
    }
}

impl std::error::Error for SubscriptionError {}

/// One-shot request failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The server answered with an error
    Api { endpoint: String, message: String },
    /// The payload could not be encoded
    Encode { endpoint: String, reason: String },
    /// The request never reached the server or the reply was lost
    Transport { endpoint: String, reason: String },
    /// The reply did not have the expected shape
    InvalidResponse { endpoint: String, reason: String },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Api { endpoint, message } => write!(f, "{}: {}", endpoint, message),
            RequestError::Encode { endpoint, reason } => {
                write!(f, "{}: cannot encode payload: {}", endpoint, reason)
            }
            RequestError::Transport { endpoint, reason } => {
                write!(f, "{}: transport failure: {}", endpoint, reason)
            }
            RequestError::InvalidResponse { endpoint, reason } => {
                write!(f, "{}: invalid response: {}", endpoint, reason)
            }
        }
    }
}

impl std::error::Error for RequestError {}
