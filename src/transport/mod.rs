//! Transport seam
//!
//! The streaming and REST wire protocols live outside this crate. A
//! [`Transport`] opens one duplex [`Connection`] per origin and issues
//! one-shot authenticated requests; a connection hands out channel
//! [`Subscription`]s that push inbound notes into an [`EventSink`].
//!
//! Connections and subscriptions are owned by the registries; nothing else
//! should hold or close them.

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::config::Token;
use crate::error::{ConnectionError, RequestError, SubscriptionError};
use crate::registry::{EventSink, Origin};

pub use loopback::LoopbackTransport;

/// Client primitives for talking to a server
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the streaming connection to `origin`
    async fn open(
        &self,
        origin: &Origin,
        token: &Token,
    ) -> Result<Arc<dyn Connection>, ConnectionError>;

    /// Issue a one-shot authenticated API request
    async fn request(
        &self,
        origin: &Origin,
        token: &Token,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, RequestError>;
}

/// A live streaming connection to one origin
#[async_trait]
pub trait Connection: Send + Sync {
    /// Subscribe to `channel`; inbound notes go to `sink` in arrival order
    async fn subscribe(
        &self,
        channel: Channel,
        sink: EventSink,
    ) -> Result<Box<dyn Subscription>, SubscriptionError>;

    /// Close the connection
    async fn close(&self);
}

/// A channel subscription on a connection
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Unsubscribe from the channel
    async fn dispose(&self) -> Result<(), SubscriptionError>;
}
