//! In-memory transport
//!
//! Keeps connections and subscriptions in process and lets the caller push
//! notes into live subscriptions. Counts every open, close, subscribe and
//! dispose so registry behaviour can be observed, and can be told to fail
//! any of them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::channel::Channel;
use crate::config::Token;
use crate::error::{ConnectionError, RequestError, SubscriptionError};
use crate::note::Note;
use crate::registry::{ChannelKey, EventSink, Origin};

use super::{Connection, Subscription, Transport};

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub opens: usize,
    pub closes: usize,
    pub subscribes: usize,
    pub disposes: usize,
}

/// A request seen by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub origin: Origin,
    pub token: Token,
    pub endpoint: String,
    pub payload: serde_json::Value,
}

struct LiveSubscription {
    connection: u64,
    key: ChannelKey,
    sink: EventSink,
}

#[derive(Default)]
struct LoopbackState {
    stats: LoopbackStats,
    connections: HashMap<u64, Origin>,
    subscriptions: HashMap<u64, LiveSubscription>,
    failing_origins: HashSet<Origin>,
    failing_channels: HashSet<Channel>,
    failing_dispose: bool,
    open_delay: Option<Duration>,
    subscribe_delay: Option<Duration>,
    requests: Vec<RecordedRequest>,
    responses: VecDeque<Result<serde_json::Value, RequestError>>,
}

/// In-memory [`Transport`]
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make opens to `origin` fail
    pub fn fail_open(&self, origin: impl Into<Origin>) {
        self.state().failing_origins.insert(origin.into());
    }

    /// Make subscribes to `channel` fail, on every origin
    pub fn fail_subscribe(&self, channel: Channel) {
        self.state().failing_channels.insert(channel);
    }

    /// Make disposes fail (the subscription is still dropped)
    pub fn fail_dispose(&self, fail: bool) {
        self.state().failing_dispose = fail;
    }

    /// Clear every injected failure
    pub fn heal(&self) {
        let mut state = self.state();
        state.failing_origins.clear();
        state.failing_channels.clear();
        state.failing_dispose = false;
    }

    /// Delay every open by `delay`
    pub fn open_delay(&self, delay: Duration) {
        self.state().open_delay = Some(delay);
    }

    /// Delay every subscribe by `delay`
    pub fn subscribe_delay(&self, delay: Duration) {
        self.state().subscribe_delay = Some(delay);
    }

    /// Queue the reply for the next request
    pub fn respond_with(&self, reply: Result<serde_json::Value, RequestError>) {
        self.state().responses.push_back(reply);
    }

    pub fn stats(&self) -> LoopbackStats {
        self.state().stats
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// Number of open connections to `origin`
    pub fn live_connections(&self, origin: &Origin) -> usize {
        self.state()
            .connections
            .values()
            .filter(|o| *o == origin)
            .count()
    }

    /// Number of live subscriptions for `key`
    pub fn live_subscriptions(&self, key: &ChannelKey) -> usize {
        self.state()
            .subscriptions
            .values()
            .filter(|s| s.key == *key)
            .count()
    }

    fn sinks(&self, key: &ChannelKey) -> Vec<EventSink> {
        self.state()
            .subscriptions
            .values()
            .filter(|s| s.key == *key)
            .map(|s| s.sink.clone())
            .collect()
    }

    /// Push a note into every live subscription for `key`
    ///
    /// Returns the number of handler invocations.
    pub fn emit(&self, key: &ChannelKey, note: Note) -> usize {
        self.sinks(key)
            .into_iter()
            .map(|sink| sink.deliver(note.clone()))
            .sum()
    }

    /// Push a raw JSON frame into every live subscription for `key`
    pub fn emit_raw(&self, key: &ChannelKey, frame: Bytes) -> usize {
        self.sinks(key)
            .into_iter()
            .map(|sink| sink.deliver_raw(frame.clone()))
            .sum()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(
        &self,
        origin: &Origin,
        _token: &Token,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        let delay = self.state().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.failing_origins.contains(origin) {
            return Err(ConnectionError::Open {
                origin: origin.clone(),
                reason: "connection refused".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.stats.opens += 1;
        state.connections.insert(id, origin.clone());

        Ok(Arc::new(LoopbackConnection {
            id,
            origin: origin.clone(),
            transport: self.clone(),
        }))
    }

    async fn request(
        &self,
        origin: &Origin,
        token: &Token,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, RequestError> {
        let mut state = self.state();
        state.requests.push(RecordedRequest {
            origin: origin.clone(),
            token: token.clone(),
            endpoint: endpoint.to_string(),
            payload,
        });

        state.responses.pop_front().unwrap_or_else(|| {
            Err(RequestError::Transport {
                endpoint: endpoint.to_string(),
                reason: "no reply queued".into(),
            })
        })
    }
}

struct LoopbackConnection {
    id: u64,
    origin: Origin,
    transport: LoopbackTransport,
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn subscribe(
        &self,
        channel: Channel,
        sink: EventSink,
    ) -> Result<Box<dyn Subscription>, SubscriptionError> {
        let delay = self.transport.state().subscribe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.transport.state();
        if state.failing_channels.contains(&channel) {
            return Err(SubscriptionError::Subscribe {
                channel,
                reason: "channel rejected".into(),
            });
        }

        let id = self.transport.next_id.fetch_add(1, Ordering::Relaxed);
        state.stats.subscribes += 1;
        state.subscriptions.insert(
            id,
            LiveSubscription {
                connection: self.id,
                key: ChannelKey::new(self.origin.clone(), channel),
                sink,
            },
        );

        Ok(Box::new(LoopbackSubscription {
            id,
            channel,
            transport: self.transport.clone(),
        }))
    }

    async fn close(&self) {
        let mut state = self.transport.state();
        state.stats.closes += 1;
        state.connections.remove(&self.id);
        state.subscriptions.retain(|_, s| s.connection != self.id);
    }
}

struct LoopbackSubscription {
    id: u64,
    channel: Channel,
    transport: LoopbackTransport,
}

#[async_trait]
impl Subscription for LoopbackSubscription {
    async fn dispose(&self) -> Result<(), SubscriptionError> {
        let mut state = self.transport.state();
        state.stats.disposes += 1;
        state.subscriptions.remove(&self.id);

        if state.failing_dispose {
            return Err(SubscriptionError::Dispose {
                channel: self.channel,
                reason: "socket closed".into(),
            });
        }
        Ok(())
    }
}
