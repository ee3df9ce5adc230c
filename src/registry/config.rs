//! Registry configuration

use std::time::Duration;

/// Configuration for the stream and subscription registries
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long opening a connection may take
    pub open_timeout: Duration,

    /// How long a channel subscribe may take
    pub subscribe_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Set the connection open timeout
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the channel subscribe timeout
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }
}
