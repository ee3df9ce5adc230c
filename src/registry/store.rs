//! Subscription registry implementation
//!
//! Shares one channel subscription per (origin, channel) across any number
//! of consumers, and cascades teardown: the last consumer to detach disposes
//! the subscription, and the last subscription on an origin closes its
//! connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::channel::Channel;
use crate::config::CredentialProvider;
use crate::error::{Result, SubscriptionError};
use crate::note::Note;
use crate::submit::NoteSubmitter;
use crate::transport::{Connection, Subscription, Transport};

use super::config::RegistryConfig;
use super::entry::{ChannelEntry, OriginEntry};
use super::key::{ChannelKey, ConsumerId, Origin};
use super::refset::Attached;
use super::router::{EventSink, NoteHandler, Router};
use super::stream::StreamRegistry;

type OriginSlot = Arc<Mutex<OriginEntry>>;
type OriginGuard = OwnedMutexGuard<OriginEntry>;

/// Central registry for every channel subscription
///
/// Each origin's state sits behind its own async mutex, held for the whole
/// of an attach or detach including the network calls. Operations on one
/// origin are serialized; different origins proceed independently.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    /// Map of origin to its subscription state
    origins: Arc<Mutex<HashMap<Origin, OriginSlot>>>,

    /// Connection owner
    streams: Arc<StreamRegistry>,
}

impl SubscriptionRegistry {
    /// Create a registry with default configuration
    pub fn new(credentials: impl CredentialProvider, transport: impl Transport) -> Self {
        Self::with_config(credentials, transport, RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(
        credentials: impl CredentialProvider,
        transport: impl Transport,
        config: RegistryConfig,
    ) -> Self {
        Self {
            origins: Arc::new(Mutex::new(HashMap::new())),
            streams: Arc::new(StreamRegistry::new(
                Arc::new(credentials),
                Arc::new(transport),
                config,
            )),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        self.streams.config()
    }

    /// Note submitter sharing this registry's credentials and transport
    pub fn submitter(&self) -> NoteSubmitter {
        NoteSubmitter::from_shared(
            Arc::clone(self.streams.credentials()),
            Arc::clone(self.streams.transport()),
        )
    }

    /// Attach a consumer to a channel
    ///
    /// Opens the origin's connection and the channel subscription if this is
    /// the first consumer. Attaching a consumer that is already attached
    /// replaces its handler. On failure the registry is left as it was.
    ///
    /// Once started, the open and subscribe run to completion even if the
    /// returned future is dropped; a later detach then applies as usual.
    pub async fn attach<F>(
        &self,
        origin: &Origin,
        channel: Channel,
        consumer: ConsumerId,
        on_note: F,
    ) -> Result<()>
    where
        F: Fn(Arc<Note>) + Send + Sync + 'static,
    {
        let handler: NoteHandler = Arc::new(on_note);
        let key = ChannelKey::new(origin.clone(), channel);
        let entry = self.lock_or_create(origin).await;

        let registry = self.clone();
        let task = tokio::spawn(async move {
            registry.attach_owned(entry, key, consumer, handler).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SubscriptionError::Interrupted { channel }.into()),
        }
    }

    async fn attach_owned(
        &self,
        mut entry: OriginGuard,
        key: ChannelKey,
        consumer: ConsumerId,
        handler: NoteHandler,
    ) -> Result<()> {
        let result = self.attach_locked(&mut entry, &key, consumer, handler).await;
        if let Err(ref e) = result {
            tracing::warn!(key = %key, consumer = %consumer, error = %e, "Attach failed");
            self.retire_if_drained(&key.origin, &mut entry).await;
        }
        result
    }

    async fn attach_locked(
        &self,
        entry: &mut OriginEntry,
        key: &ChannelKey,
        consumer: ConsumerId,
        handler: NoteHandler,
    ) -> Result<()> {
        let connection = self.streams.ensure_connection(&key.origin).await?;

        if let Some(active) = entry.channels.get(&key.channel) {
            match active.router.register(consumer, handler) {
                Attached::New => tracing::info!(
                    key = %key,
                    consumer = %consumer,
                    consumers = active.router.consumer_count(),
                    "Consumer attached (existing subscription)"
                ),
                Attached::Replaced => tracing::debug!(
                    key = %key,
                    consumer = %consumer,
                    "Consumer re-attached, handler replaced"
                ),
            }
            return Ok(());
        }

        let fresh_origin = entry.channels.is_empty();
        let router = Arc::new(Router::new(key.clone()));
        router.register(consumer, handler);

        let sink = EventSink::new(Arc::clone(&router));
        match self.open_subscription(connection.as_ref(), key, sink).await {
            Ok(subscription) => {
                entry.channels.attach(
                    key.channel,
                    ChannelEntry {
                        subscription,
                        router,
                    },
                );
                tracing::info!(
                    key = %key,
                    consumer = %consumer,
                    channels = entry.channels.len(),
                    "Consumer attached (new subscription)"
                );
                Ok(())
            }
            Err(e) => {
                // Only a connection opened for this attach is rolled back
                if fresh_origin {
                    self.streams.release_connection(&key.origin).await;
                }
                Err(e.into())
            }
        }
    }

    async fn open_subscription(
        &self,
        connection: &dyn Connection,
        key: &ChannelKey,
        sink: EventSink,
    ) -> std::result::Result<Box<dyn Subscription>, SubscriptionError> {
        let timeout = self.config().subscribe_timeout;
        tokio::time::timeout(timeout, connection.subscribe(key.channel, sink))
            .await
            .map_err(|_| SubscriptionError::Timeout {
                channel: key.channel,
                after: timeout,
            })?
    }

    /// Detach a consumer from a channel
    ///
    /// Detaching something that is not attached is a no-op. The last
    /// consumer out disposes the subscription, and the last subscription on
    /// the origin closes the connection.
    pub async fn detach(&self, origin: &Origin, channel: Channel, consumer: ConsumerId) {
        let key = ChannelKey::new(origin.clone(), channel);
        let Some(mut entry) = self.lock_existing(origin).await else {
            tracing::trace!(key = %key, consumer = %consumer, "Detach from idle origin ignored");
            return;
        };

        let drained = match entry.channels.get(&channel) {
            Some(active) if active.router.unregister(&consumer).is_some() => {
                tracing::info!(
                    key = %key,
                    consumer = %consumer,
                    consumers = active.router.consumer_count(),
                    "Consumer detached"
                );
                active.router.is_empty()
            }
            _ => {
                tracing::trace!(
                    key = %key,
                    consumer = %consumer,
                    "Detach of absent consumer ignored"
                );
                return;
            }
        };

        if drained {
            if let Some(active) = entry.channels.detach(&channel) {
                self.dispose(&key, active).await;
            }
        }

        self.release_if_drained(origin, &mut entry).await;
    }

    /// Detach every consumer from every channel of `origin` not in `keep`
    pub async fn detach_all(&self, origin: &Origin, keep: &[Channel]) {
        let Some(mut entry) = self.lock_existing(origin).await else {
            return;
        };

        let stale = entry.channels.drain_unless(|channel| keep.contains(channel));
        for (channel, active) in stale {
            let key = ChannelKey::new(origin.clone(), channel);
            tracing::info!(
                key = %key,
                consumers = active.router.consumer_count(),
                "Detaching every consumer"
            );
            self.dispose(&key, active).await;
        }

        self.release_if_drained(origin, &mut entry).await;
    }

    /// Drop every subscription not backed by one of `live`
    ///
    /// `live` lists every (origin, channel) some consumer still legitimately
    /// uses. Origins that do not appear at all are released entirely.
    pub async fn reconcile<I>(&self, live: I)
    where
        I: IntoIterator<Item = ChannelKey>,
    {
        let mut keep: HashMap<Origin, Vec<Channel>> = HashMap::new();
        for key in live {
            keep.entry(key.origin).or_default().push(key.channel);
        }

        let origins: Vec<Origin> = self.origins.lock().await.keys().cloned().collect();
        for origin in origins {
            let channels = keep.get(&origin).map(Vec::as_slice).unwrap_or(&[]);
            self.detach_all(&origin, channels).await;
        }
    }

    /// Dispose every subscription and close every connection
    pub async fn close_all(&self) {
        self.reconcile(std::iter::empty()).await;
    }

    async fn dispose(&self, key: &ChannelKey, active: ChannelEntry) {
        // A subscription the transport failed to dispose may still deliver
        active.router.clear();

        match active.subscription.dispose().await {
            Ok(()) => tracing::info!(key = %key, "Subscription disposed"),
            Err(e) => tracing::warn!(
                key = %key,
                error = %e,
                "Subscription dispose failed, dropping it"
            ),
        }
    }

    async fn release_if_drained(&self, origin: &Origin, entry: &mut OriginGuard) {
        if !entry.channels.is_empty() {
            return;
        }

        self.streams.release_connection(origin).await;
        self.retire_if_drained(origin, entry).await;
    }

    async fn retire_if_drained(&self, origin: &Origin, entry: &mut OriginGuard) {
        if !entry.channels.is_empty() {
            return;
        }

        entry.retired = true;

        let mut origins = self.origins.lock().await;
        let current = origins
            .get(origin)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(entry)));
        if current {
            origins.remove(origin);
        }
    }

    async fn slot(&self, origin: &Origin, create: bool) -> Option<OriginSlot> {
        let mut origins = self.origins.lock().await;
        match origins.get(origin) {
            Some(slot) => Some(Arc::clone(slot)),
            None if create => {
                let slot = OriginSlot::default();
                origins.insert(origin.clone(), Arc::clone(&slot));
                Some(slot)
            }
            None => None,
        }
    }

    // The table lock is never held while waiting on an entry lock. A retired
    // entry has already been removed from the table, so the retry makes
    // progress.
    async fn lock_existing(&self, origin: &Origin) -> Option<OriginGuard> {
        loop {
            let slot = self.slot(origin, false).await?;
            let entry = slot.lock_owned().await;
            if !entry.retired {
                return Some(entry);
            }
        }
    }

    async fn lock_or_create(&self, origin: &Origin) -> OriginGuard {
        loop {
            let Some(slot) = self.slot(origin, true).await else {
                continue;
            };
            let entry = slot.lock_owned().await;
            if !entry.retired {
                return entry;
            }
        }
    }

    /// Check if a connection to `origin` is open
    pub async fn is_connected(&self, origin: &Origin) -> bool {
        self.streams.is_connected(origin).await
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.streams.connection_count().await
    }

    /// Channels with at least one consumer on `origin`
    pub async fn active_channels(&self, origin: &Origin) -> Vec<Channel> {
        match self.lock_existing(origin).await {
            Some(entry) => entry.active_channels(),
            None => Vec::new(),
        }
    }

    /// Consumers attached to `channel` on `origin`, in attach order
    pub async fn consumers(&self, origin: &Origin, channel: Channel) -> Vec<ConsumerId> {
        let Some(entry) = self.lock_existing(origin).await else {
            return Vec::new();
        };

        entry
            .channels
            .get(&channel)
            .map(|active| active.router.consumers())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::config::StaticCredentials;
    use crate::error::Error;
    use crate::note::User;
    use crate::transport::loopback::{LoopbackStats, LoopbackTransport};

    const MISSKEY: &str = "misskey.io";
    const OTHER: &str = "other.example";

    fn setup() -> (SubscriptionRegistry, LoopbackTransport) {
        let transport = LoopbackTransport::new();
        let credentials = StaticCredentials::new()
            .with_token(MISSKEY, "token-a")
            .with_token(OTHER, "token-b");
        let registry = SubscriptionRegistry::new(credentials, transport.clone());
        (registry, transport)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Arc<Note>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_note: Arc<Note>| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn note(text: &str) -> Note {
        Note::new(User::new("ann").name("Ann")).text(text)
    }

    #[tokio::test]
    async fn test_attach_opens_connection_and_subscription() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (count, handler) = counter();

        assert_ok!(
            registry
                .attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler)
                .await
        );

        assert!(registry.is_connected(&origin).await);
        assert_eq!(registry.active_channels(&origin).await, vec![Channel::LocalTimeline]);
        assert_eq!(
            transport.stats(),
            LoopbackStats {
                opens: 1,
                subscribes: 1,
                ..Default::default()
            }
        );

        let key = ChannelKey::new(MISSKEY, Channel::LocalTimeline);
        assert_eq!(transport.emit(&key, note("hi")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fan_out_to_every_consumer() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (a, handler_a) = counter();
        let (b, handler_b) = counter();

        assert_ok!(registry.attach(&origin, Channel::HomeTimeline, ConsumerId(1), handler_a).await);
        assert_ok!(registry.attach(&origin, Channel::HomeTimeline, ConsumerId(2), handler_b).await);

        let key = ChannelKey::new(MISSKEY, Channel::HomeTimeline);
        transport.emit(&key, note("hello"));

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(transport.stats().subscribes, 1);
        assert_eq!(transport.live_subscriptions(&key), 1);
    }

    #[tokio::test]
    async fn test_reattach_is_idempotent_and_replaces_handler() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (first, handler_first) = counter();
        let (second, handler_second) = counter();

        assert_ok!(
            registry
                .attach(&origin, Channel::GlobalTimeline, ConsumerId(7), handler_first)
                .await
        );
        assert_ok!(
            registry
                .attach(&origin, Channel::GlobalTimeline, ConsumerId(7), handler_second)
                .await
        );

        assert_eq!(registry.consumers(&origin, Channel::GlobalTimeline).await, vec![ConsumerId(7)]);
        assert_eq!(transport.stats().opens, 1);
        assert_eq!(transport.stats().subscribes, 1);

        transport.emit(&ChannelKey::new(MISSKEY, Channel::GlobalTimeline), note("x"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_unknown_is_noop() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);

        registry.detach(&origin, Channel::LocalTimeline, ConsumerId(1)).await;

        let (_, handler) = counter();
        assert_ok!(registry.attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler).await);
        let before = transport.stats();

        registry.detach(&origin, Channel::HomeTimeline, ConsumerId(1)).await;
        registry.detach(&origin, Channel::LocalTimeline, ConsumerId(2)).await;
        registry.detach(&Origin::new(OTHER), Channel::LocalTimeline, ConsumerId(1)).await;

        assert_eq!(transport.stats(), before);
        assert_eq!(registry.consumers(&origin, Channel::LocalTimeline).await, vec![ConsumerId(1)]);
        assert!(registry.is_connected(&origin).await);
    }

    #[tokio::test]
    async fn test_cascading_teardown() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let key = ChannelKey::new(MISSKEY, Channel::HybridTimeline);
        let (_, handler_x) = counter();
        let (y, handler_y) = counter();

        assert_ok!(registry.attach(&origin, key.channel, ConsumerId(1), handler_x).await);
        assert_ok!(registry.attach(&origin, key.channel, ConsumerId(2), handler_y).await);

        registry.detach(&origin, key.channel, ConsumerId(1)).await;
        assert!(registry.is_connected(&origin).await);
        assert_eq!(transport.live_subscriptions(&key), 1);
        assert_eq!(transport.stats().disposes, 0);

        // Detached consumers no longer receive notes
        transport.emit(&key, note("still here"));
        assert_eq!(y.load(Ordering::SeqCst), 1);

        registry.detach(&origin, key.channel, ConsumerId(2)).await;
        assert!(!registry.is_connected(&origin).await);
        assert_eq!(transport.live_subscriptions(&key), 0);
        assert_eq!(transport.live_connections(&origin), 0);
        assert_eq!(transport.stats().disposes, 1);
        assert_eq!(transport.stats().closes, 1);
        assert!(registry.active_channels(&origin).await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_shared_across_channels() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);

        for channel in [Channel::LocalTimeline, Channel::GlobalTimeline] {
            let (_, handler) = counter();
            assert_ok!(registry.attach(&origin, channel, ConsumerId(1), handler).await);
        }
        assert_eq!(transport.stats().opens, 1);
        assert_eq!(transport.stats().subscribes, 2);

        registry.detach(&origin, Channel::LocalTimeline, ConsumerId(1)).await;
        assert!(registry.is_connected(&origin).await);

        registry.detach(&origin, Channel::GlobalTimeline, ConsumerId(1)).await;
        assert!(!registry.is_connected(&origin).await);
        assert_eq!(transport.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_rolls_back_fresh_connection() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        transport.fail_subscribe(Channel::HomeTimeline);

        let (_, handler) = counter();
        let err = assert_err!(
            registry
                .attach(&origin, Channel::HomeTimeline, ConsumerId(1), handler)
                .await
        );

        assert!(matches!(err, Error::Subscription(SubscriptionError::Subscribe { .. })));
        assert!(!registry.is_connected(&origin).await);
        assert_eq!(transport.stats().opens, 1);
        assert_eq!(transport.stats().closes, 1);
        assert!(registry.active_channels(&origin).await.is_empty());
        assert!(registry.origins.lock().await.is_empty());

        transport.heal();
        let (_, handler) = counter();
        assert_ok!(registry.attach(&origin, Channel::HomeTimeline, ConsumerId(1), handler).await);
        assert!(registry.is_connected(&origin).await);
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_shared_connection() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (_, handler) = counter();
        assert_ok!(registry.attach(&origin, Channel::GlobalTimeline, ConsumerId(1), handler).await);

        transport.fail_subscribe(Channel::LocalTimeline);
        let (_, handler) = counter();
        assert_err!(registry.attach(&origin, Channel::LocalTimeline, ConsumerId(2), handler).await);

        assert!(registry.is_connected(&origin).await);
        assert_eq!(transport.stats().closes, 0);
        assert_eq!(registry.active_channels(&origin).await, vec![Channel::GlobalTimeline]);
        assert!(registry.consumers(&origin, Channel::LocalTimeline).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_timeout_rolls_back() {
        let transport = LoopbackTransport::new();
        transport.subscribe_delay(Duration::from_secs(30));
        let registry = SubscriptionRegistry::with_config(
            StaticCredentials::new().with_token(MISSKEY, "token-a"),
            transport.clone(),
            RegistryConfig::default().subscribe_timeout(Duration::from_secs(1)),
        );
        let origin = Origin::new(MISSKEY);

        let (_, handler) = counter();
        let err = assert_err!(
            registry
                .attach(&origin, Channel::HomeTimeline, ConsumerId(1), handler)
                .await
        );

        assert!(matches!(err, Error::Subscription(SubscriptionError::Timeout { .. })));
        assert!(!registry.is_connected(&origin).await);
        assert_eq!(transport.stats().subscribes, 0);
        assert_eq!(transport.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_missing_credential_leaves_no_state() {
        let (registry, transport) = setup();
        let origin = Origin::new("unknown.example");

        let (_, handler) = counter();
        let err = assert_err!(
            registry
                .attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler)
                .await
        );

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(transport.stats(), LoopbackStats::default());
        assert!(registry.origins.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_detach_all_keeps_listed_channels() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let attachments = [
            (Channel::GlobalTimeline, 1),
            (Channel::GlobalTimeline, 2),
            (Channel::HomeTimeline, 1),
            (Channel::LocalTimeline, 3),
        ];
        for (channel, id) in attachments {
            let (_, handler) = counter();
            assert_ok!(registry.attach(&origin, channel, ConsumerId(id), handler).await);
        }

        registry.detach_all(&origin, &[Channel::HomeTimeline]).await;

        assert_eq!(registry.active_channels(&origin).await, vec![Channel::HomeTimeline]);
        assert_eq!(transport.stats().disposes, 2);
        assert!(registry.is_connected(&origin).await);

        registry.detach_all(&origin, &[]).await;
        assert!(!registry.is_connected(&origin).await);
        assert_eq!(transport.stats().closes, 1);

        // Redundant sweeps are harmless
        registry.detach_all(&origin, &[]).await;
        assert_eq!(transport.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_reconcile_releases_unlisted_origins() {
        let (registry, transport) = setup();
        let misskey = Origin::new(MISSKEY);
        let other = Origin::new(OTHER);
        for (origin, channel) in [
            (&misskey, Channel::LocalTimeline),
            (&misskey, Channel::HomeTimeline),
            (&other, Channel::GlobalTimeline),
        ] {
            let (_, handler) = counter();
            assert_ok!(registry.attach(origin, channel, ConsumerId(1), handler).await);
        }
        assert_eq!(registry.connection_count().await, 2);

        registry
            .reconcile([ChannelKey::new(MISSKEY, Channel::LocalTimeline)])
            .await;

        assert_eq!(registry.active_channels(&misskey).await, vec![Channel::LocalTimeline]);
        assert!(!registry.is_connected(&other).await);
        assert_eq!(registry.connection_count().await, 1);

        registry.close_all().await;
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(transport.stats().closes, 2);
    }

    #[tokio::test]
    async fn test_dispose_failure_still_drops_state() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (_, handler) = counter();
        assert_ok!(registry.attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler).await);

        transport.fail_dispose(true);
        registry.detach(&origin, Channel::LocalTimeline, ConsumerId(1)).await;

        assert!(!registry.is_connected(&origin).await);
        assert!(registry.active_channels(&origin).await.is_empty());
        assert_eq!(transport.stats().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_during_inflight_attach() {
        let (registry, transport) = setup();
        let registry = Arc::new(registry);
        let origin = Origin::new(MISSKEY);
        transport.open_delay(Duration::from_millis(50));

        let attach = {
            let registry = Arc::clone(&registry);
            let origin = origin.clone();
            let (_, handler) = counter();
            tokio::spawn(async move {
                registry
                    .attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler)
                    .await
            })
        };

        // Let the attach reach the open call
        tokio::task::yield_now().await;
        registry.detach(&origin, Channel::LocalTimeline, ConsumerId(1)).await;

        assert_ok!(assert_ok!(attach.await));
        assert!(!registry.is_connected(&origin).await);
        assert_eq!(
            transport.stats(),
            LoopbackStats {
                opens: 1,
                closes: 1,
                subscribes: 1,
                disposes: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_attach_still_honours_detach() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        transport.subscribe_delay(Duration::from_secs(5));

        let (_, handler) = counter();
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            registry.attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler),
        )
        .await;
        assert!(abandoned.is_err());

        registry.detach(&origin, Channel::LocalTimeline, ConsumerId(1)).await;

        assert!(!registry.is_connected(&origin).await);
        assert!(registry.active_channels(&origin).await.is_empty());
        assert_eq!(transport.live_connections(&origin), 0);
        assert_eq!(
            transport.stats(),
            LoopbackStats {
                opens: 1,
                closes: 1,
                subscribes: 1,
                disposes: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_attach_completes_in_background() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        transport.subscribe_delay(Duration::from_secs(5));

        let (_, handler) = counter();
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            registry.attach(&origin, Channel::LocalTimeline, ConsumerId(1), handler),
        )
        .await;
        assert!(abandoned.is_err());

        // Queued behind the in-flight attach on the origin lock
        assert_eq!(
            registry.consumers(&origin, Channel::LocalTimeline).await,
            vec![ConsumerId(1)]
        );
        assert!(registry.is_connected(&origin).await);
        let key = ChannelKey::new(MISSKEY, Channel::LocalTimeline);
        assert_eq!(transport.live_subscriptions(&key), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_origin_does_not_stall_connected_origin() {
        let (registry, transport) = setup();
        let fast = Origin::new(OTHER);
        let (_, handler) = counter();
        assert_ok!(registry.attach(&fast, Channel::HomeTimeline, ConsumerId(1), handler).await);

        transport.open_delay(Duration::from_secs(8));
        let slow = {
            let registry = registry.clone();
            let (_, handler) = counter();
            tokio::spawn(async move {
                registry
                    .attach(&Origin::new(MISSKEY), Channel::LocalTimeline, ConsumerId(1), handler)
                    .await
            })
        };

        // The slow open is now parked in the transport
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        let (_, handler) = counter();
        assert_ok!(registry.attach(&fast, Channel::LocalTimeline, ConsumerId(2), handler).await);
        assert_eq!(registry.connection_count().await, 1);
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_ok!(assert_ok!(slow.await));
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_attaches_share_subscription() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (_, handler_a) = counter();
        let (_, handler_b) = counter();

        let (a, b) = tokio::join!(
            registry.attach(&origin, Channel::GlobalTimeline, ConsumerId(1), handler_a),
            registry.attach(&origin, Channel::GlobalTimeline, ConsumerId(2), handler_b)
        );

        assert_ok!(a);
        assert_ok!(b);
        assert_eq!(transport.stats().opens, 1);
        assert_eq!(transport.stats().subscribes, 1);
        assert_eq!(registry.consumers(&origin, Channel::GlobalTimeline).await.len(), 2);
    }

    #[tokio::test]
    async fn test_notes_arrive_in_order() {
        let (registry, transport) = setup();
        let origin = Origin::new(MISSKEY);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        assert_ok!(
            registry
                .attach(&origin, Channel::LocalTimeline, ConsumerId(1), move |note| {
                    let _ = tx.send(note.text.clone());
                })
                .await
        );

        let key = ChannelKey::new(MISSKEY, Channel::LocalTimeline);
        for text in ["one", "two", "three"] {
            transport.emit(&key, note(text));
        }
        transport.emit_raw(
            &key,
            Bytes::from_static(br#"{"user": {"username": "bob"}, "text": "four"}"#),
        );

        for expected in ["one", "two", "three", "four"] {
            assert_eq!(rx.recv().await.flatten().as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_invariants_hold_over_mixed_sequence() {
        let (registry, transport) = setup();
        let origins = [Origin::new(MISSKEY), Origin::new(OTHER)];
        let mut model: HashMap<ChannelKey, Vec<ConsumerId>> = HashMap::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..400 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            let origin = &origins[(seed % 2) as usize];
            let channel = Channel::ALL[((seed >> 8) % 4) as usize];
            let consumer = ConsumerId((seed >> 16) % 3);
            let consumers = model
                .entry(ChannelKey::new(origin.clone(), channel))
                .or_default();

            if (seed >> 24) % 2 == 0 {
                let (_, handler) = counter();
                assert_ok!(registry.attach(origin, channel, consumer, handler).await);
                if !consumers.contains(&consumer) {
                    consumers.push(consumer);
                }
            } else {
                registry.detach(origin, channel, consumer).await;
                consumers.retain(|c| *c != consumer);
            }

            for origin in &origins {
                let mut any_active = false;
                for channel in Channel::ALL {
                    let key = ChannelKey::new(origin.clone(), channel);
                    let expected = model.get(&key).cloned().unwrap_or_default();
                    any_active |= !expected.is_empty();

                    assert_eq!(registry.consumers(origin, channel).await, expected);
                    assert_eq!(
                        transport.live_subscriptions(&key),
                        usize::from(!expected.is_empty())
                    );
                }
                assert_eq!(transport.live_connections(origin), usize::from(any_active));
                assert_eq!(registry.is_connected(origin).await, any_active);
            }
        }
    }
}
