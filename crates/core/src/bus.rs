// Event bus: publish pipeline and subscription streams
//
// publish():   frame -> session handles -> tenant handles -> durable upsert -> notice
// subscribe(): register -> open -> replay (newest first) -> live frames + pings
//
// Only input validation can fail a publish. Every later step is best-effort
// and reported individually in PublishReport.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::events::{open_frame, ping_frame, ChannelKey, DashboardEvent, EventNotice, StoredEvent};
use crate::registry::{ChannelRegistry, ClientHandle, Fanout, Registration};
use crate::traits::{EventNotifier, EventStore};

pub const DEFAULT_REPLAY_LIMIT: usize = 20;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_CLIENT_BUFFER: usize = 64;

/// Event bus configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    /// Stored events replayed to a new subscriber
    pub replay_limit: usize,
    /// Interval between liveness frames
    pub ping_interval: Duration,
    /// Frames buffered per connection before writes start failing
    pub client_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            replay_limit: DEFAULT_REPLAY_LIMIT,
            ping_interval: DEFAULT_PING_INTERVAL,
            client_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }
}

/// Outcome of a best-effort pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

/// What a publish call actually achieved, step by step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PublishReport {
    pub session: Fanout,
    pub tenant: Fanout,
    pub persisted: StepOutcome,
    pub notified: StepOutcome,
}

impl PublishReport {
    /// Frames accepted by local handles across both channels
    pub fn delivered(&self) -> usize {
        self.session.delivered + self.tenant.delivered
    }
}

pub struct EventBus {
    instance_id: Uuid,
    registry: Arc<ChannelRegistry>,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn EventNotifier>,
    config: BusConfig,
    /// Ends every open stream when cancelled
    shutdown: CancellationToken,
}

impl EventBus {
    /// Zero values for `ping_interval` or `client_buffer` are replaced by the defaults.
    pub fn new(
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn EventNotifier>,
        mut config: BusConfig,
    ) -> Self {
        if config.ping_interval.is_zero() {
            tracing::warn!("Ping interval must be positive, using default");
            config.ping_interval = DEFAULT_PING_INTERVAL;
        }
        if config.client_buffer == 0 {
            tracing::warn!("Client buffer must be positive, using default");
            config.client_buffer = DEFAULT_CLIENT_BUFFER;
        }

        Self {
            instance_id: Uuid::now_v7(),
            registry: Arc::new(ChannelRegistry::new()),
            store,
            notifier,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Identity stamped on outgoing notices
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// End every open stream, including ones opened from now on.
    /// Publishing keeps working for the store and other instances.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(
                channels = self.registry.channel_count(),
                "Closing event streams"
            );
            self.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Publish an event to live handles, the durable store and other instances
    pub async fn publish(&self, event: DashboardEvent) -> Result<PublishReport> {
        event.validate()?;

        let frame = event.frame();
        let (session, tenant) = self.fan_out(&event.tenant_id, &event.session_id, &frame);

        let persisted = match self.store.upsert(&event).await {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    topic = %event.topic,
                    error = %e,
                    "Failed to persist event, continuing with live delivery only"
                );
                StepOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        let notified = match self.notifier.notify(&event.notice(self.instance_id)).await {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    topic = %event.topic,
                    error = %e,
                    "Failed to notify other instances"
                );
                StepOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        tracing::debug!(
            tenant_id = %event.tenant_id,
            session_id = %event.session_id,
            topic = %event.topic,
            session_delivered = session.delivered,
            tenant_delivered = tenant.delivered,
            "Published event"
        );

        Ok(PublishReport {
            session,
            tenant,
            persisted,
            notified,
        })
    }

    /// Write a stored event to local handles only (no persistence, no notice)
    pub fn deliver_local(&self, event: &StoredEvent) -> (Fanout, Fanout) {
        self.fan_out(&event.tenant_id, &event.session_id, &event.frame())
    }

    /// React to a notice from another instance by re-fetching the payload
    /// and delivering it to this instance's handles. Own notices are skipped,
    /// and so are notices whose write has since been overwritten: the newer
    /// write announces itself, so every write is delivered at most once.
    pub async fn handle_notice(&self, notice: &EventNotice) -> Result<Option<(Fanout, Fanout)>> {
        if notice.origin == self.instance_id {
            return Ok(None);
        }

        let session_key = ChannelKey::session(notice.session_id.as_str());
        let tenant_key = ChannelKey::tenant(notice.tenant_id.as_str());
        if self.registry.handle_count(&session_key) == 0 && self.registry.handle_count(&tenant_key) == 0
        {
            return Ok(None);
        }

        let row = self
            .store
            .latest(&notice.tenant_id, &notice.session_id, &notice.topic)
            .await?;
        match row {
            Some(row) if notice.announces(&row) => Ok(Some(self.deliver_local(&row))),
            Some(row) => {
                tracing::debug!(
                    topic = %notice.topic,
                    session_id = %notice.session_id,
                    announced_at = %notice.created_at,
                    stored_at = %row.created_at,
                    "Skipping superseded event notice"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn fan_out(&self, tenant_id: &str, session_id: &str, frame: &str) -> (Fanout, Fanout) {
        let session = self
            .registry
            .broadcast(&ChannelKey::session(session_id), frame);
        let tenant = if tenant_id.is_empty() {
            Fanout::default()
        } else {
            self.registry.broadcast(&ChannelKey::tenant(tenant_id), frame)
        };
        (session, tenant)
    }

    /// Open a live stream for a channel.
    ///
    /// The stream yields the `open` frame, then the replay, then live frames
    /// and pings. Dropping it (client disconnect), closing its handle or
    /// shutting the bus down stops the ping timer and unregisters the handle
    /// exactly once.
    pub async fn subscribe(&self, key: ChannelKey) -> EventStream {
        let (tx, rx) = mpsc::channel(self.config.client_buffer);
        let handle = ClientHandle::new(tx);

        // Registered before the replay read so an event published meanwhile is
        // queued live. Such an event can also show up in the replay.
        let registration = self.registry.register(key.clone(), handle.clone());

        let mut pending = VecDeque::from([open_frame()]);

        let replay = match &key {
            ChannelKey::Session(id) => self.store.replay_session(id, self.config.replay_limit).await,
            ChannelKey::Tenant(id) => self.store.replay_tenant(id, self.config.replay_limit).await,
        };
        match replay {
            Ok(rows) => {
                tracing::debug!(channel = %key, count = rows.len(), "Replaying stored events");
                pending.extend(rows.iter().map(StoredEvent::frame));
            }
            Err(e) => {
                tracing::warn!(channel = %key, error = %e, "Replay failed, continuing live");
            }
        }

        let period = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(channel = %key, handle_id = %handle.id(), "Client subscribed");

        let state = LiveState {
            pending,
            rx,
            ping,
            closed: handle.close_signal(),
            shutdown: self.shutdown.clone(),
            registration,
        };
        let inner = stream::unfold(state, |mut state| async move {
            let frame = if state.closed.is_cancelled() || state.shutdown.is_cancelled() {
                None
            } else if let Some(frame) = state.pending.pop_front() {
                Some(frame)
            } else {
                tokio::select! {
                    biased;
                    _ = state.closed.cancelled() => None,
                    _ = state.shutdown.cancelled() => None,
                    frame = state.rx.recv() => frame,
                    _ = state.ping.tick() => Some(ping_frame()),
                }
            };
            match frame {
                Some(frame) => Some((frame, state)),
                None => {
                    tracing::info!(
                        channel = %state.registration.key(),
                        handle_id = %state.registration.handle_id(),
                        "Client stream closed"
                    );
                    None
                }
            }
        });

        EventStream {
            key,
            handle,
            inner: Box::pin(inner.fuse()),
        }
    }
}

struct LiveState {
    /// Open frame and replay, written before anything from `rx`
    pending: VecDeque<String>,
    rx: mpsc::Receiver<String>,
    ping: Interval,
    closed: CancellationToken,
    shutdown: CancellationToken,
    // Dropped together with the stream state, which unregisters the handle
    registration: Registration,
}

/// Frames for one connected client
pub struct EventStream {
    key: ChannelKey,
    handle: ClientHandle,
    inner: Pin<Box<dyn Stream<Item = String> + Send>>,
}

impl EventStream {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn handle_id(&self) -> Uuid {
        self.handle.id()
    }

    /// End the stream; the next poll returns `None`
    pub fn close(&self) {
        self.handle.close();
    }
}

impl Stream for EventStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;
    use crate::events::format_frame;
    use crate::memory::{InMemoryEventStore, RecordingNotifier};
    use crate::traits::NoopNotifier;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn upsert(&self, _event: &DashboardEvent) -> Result<()> {
            Err(DashboardError::store("connection refused"))
        }
        async fn replay_session(&self, _session_id: &str, _limit: usize) -> Result<Vec<StoredEvent>> {
            Err(DashboardError::store("connection refused"))
        }
        async fn replay_tenant(&self, _tenant_id: &str, _limit: usize) -> Result<Vec<StoredEvent>> {
            Err(DashboardError::store("connection refused"))
        }
        async fn latest(
            &self,
            _tenant_id: &str,
            _session_id: &str,
            _topic: &str,
        ) -> Result<Option<StoredEvent>> {
            Err(DashboardError::store("connection refused"))
        }
    }

    /// Returns its replay snapshot only after the test releases it
    struct GatedStore {
        inner: InMemoryEventStore,
        entered: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
        release: parking_lot::Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl EventStore for GatedStore {
        async fn upsert(&self, event: &DashboardEvent) -> Result<()> {
            self.inner.upsert(event).await
        }
        async fn replay_session(&self, session_id: &str, limit: usize) -> Result<Vec<StoredEvent>> {
            let snapshot = self.inner.replay_session(session_id, limit).await;
            if let Some(entered) = self.entered.lock().take() {
                let _ = entered.send(());
            }
            let release = self.release.lock().take();
            if let Some(release) = release {
                let _ = release.await;
            }
            snapshot
        }
        async fn replay_tenant(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredEvent>> {
            self.inner.replay_tenant(tenant_id, limit).await
        }
        async fn latest(
            &self,
            tenant_id: &str,
            session_id: &str,
            topic: &str,
        ) -> Result<Option<StoredEvent>> {
            self.inner.latest(tenant_id, session_id, topic).await
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl EventNotifier for FailingNotifier {
        async fn notify(&self, _notice: &EventNotice) -> Result<()> {
            Err(DashboardError::notify("listener gone"))
        }
    }

    fn bus_with(
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn EventNotifier>,
    ) -> EventBus {
        EventBus::new(store, notifier, BusConfig::default())
    }

    fn handle(registry: &ChannelRegistry, key: ChannelKey) -> (Registration, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (registry.register(key, ClientHandle::new(tx)), rx)
    }

    #[tokio::test]
    async fn test_publish_runs_every_step() {
        let store = Arc::new(InMemoryEventStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = bus_with(store.clone(), notifier.clone());
        let (_rs, mut session_rx) = handle(bus.registry(), ChannelKey::session("s1"));
        let (_rt, mut tenant_rx) = handle(bus.registry(), ChannelKey::tenant("t1"));

        let report = bus
            .publish(DashboardEvent::new("t1", "s1", "payment_done", json!({"amount": 1500})))
            .await
            .unwrap();

        let expected = format_frame("payment_done", &json!({"amount": 1500}));
        assert_eq!(session_rx.try_recv().unwrap(), expected);
        assert_eq!(tenant_rx.try_recv().unwrap(), expected);
        assert_eq!(report.session, Fanout { attempted: 1, delivered: 1 });
        assert_eq!(report.tenant, Fanout { attempted: 1, delivered: 1 });
        assert_eq!(report.persisted, StepOutcome::Succeeded);
        assert_eq!(report.notified, StepOutcome::Succeeded);
        assert_eq!(report.delivered(), 2);

        assert_eq!(store.len(), 1);
        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].origin, bus.instance_id());
        assert_eq!(notices[0].topic, "payment_done");
    }

    #[tokio::test]
    async fn test_publish_without_session_has_no_side_effects() {
        let store = Arc::new(InMemoryEventStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = bus_with(store.clone(), notifier.clone());
        let (_rt, mut tenant_rx) = handle(bus.registry(), ChannelKey::tenant("t1"));

        let err = bus
            .publish(DashboardEvent::new("t1", "", "payment_done", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, DashboardError::InvalidEvent(_)));
        assert!(tenant_rx.try_recv().is_err());
        assert!(store.is_empty());
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_empty_tenant_skips_tenant_channel() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier));
        let (_rt, mut tenant_rx) = handle(bus.registry(), ChannelKey::tenant(""));

        let report = bus
            .publish(DashboardEvent::new("", "s1", "note", json!({})))
            .await
            .unwrap();
        assert_eq!(report.tenant, Fanout::default());
        assert!(tenant_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_delivery() {
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = bus_with(Arc::new(FailingStore), notifier.clone());
        let (_rs, mut session_rx) = handle(bus.registry(), ChannelKey::session("s1"));

        let report = bus
            .publish(DashboardEvent::new("t1", "s1", "reserve_summary", json!({})))
            .await
            .unwrap();

        assert!(session_rx.try_recv().is_ok());
        assert!(matches!(report.persisted, StepOutcome::Failed { ref error } if error.contains("connection refused")));
        assert_eq!(report.notified, StepOutcome::Succeeded);
        assert_eq!(notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_notify_failure_is_reported() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(FailingNotifier));
        let report = bus
            .publish(DashboardEvent::new("t1", "s1", "reserve_summary", json!({})))
            .await
            .unwrap();
        assert!(report.persisted.is_success());
        assert!(!report.notified.is_success());
    }

    #[tokio::test]
    async fn test_dead_handle_does_not_abort_publish() {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = bus_with(store.clone(), Arc::new(NoopNotifier));
        let (_dead, dead_rx) = handle(bus.registry(), ChannelKey::session("s1"));
        let (_live, mut live_rx) = handle(bus.registry(), ChannelKey::session("s1"));
        drop(dead_rx);

        let report = bus
            .publish(DashboardEvent::new("t1", "s1", "reserve_summary", json!({})))
            .await
            .unwrap();

        assert_eq!(report.session, Fanout { attempted: 2, delivered: 1 });
        assert!(live_rx.try_recv().is_ok());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_republish_same_topic_keeps_latest_payload() {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = bus_with(store.clone(), Arc::new(NoopNotifier));

        bus.publish(DashboardEvent::new("t1", "s1", "reserve_summary", json!({"rooms": 3})))
            .await
            .unwrap();
        let second = DashboardEvent::new("t1", "s1", "reserve_summary", json!({"rooms": 4}));
        let second_at = second.created_at;
        bus.publish(second).await.unwrap();

        assert_eq!(store.len(), 1);
        let row = store
            .latest("t1", "s1", "reserve_summary")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.payload, json!({"rooms": 4}));
        assert_eq!(row.created_at, second_at);
    }

    #[tokio::test]
    async fn test_subscribe_opens_then_replays_newest_first() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier));
        for topic in ["a", "b", "c"] {
            bus.publish(DashboardEvent::new("t1", "s1", topic, json!({ "topic": topic })))
                .await
                .unwrap();
        }

        let mut stream = bus.subscribe(ChannelKey::session("s1")).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());
        assert_eq!(stream.next().await.unwrap(), format_frame("c", &json!({"topic": "c"})));
        assert_eq!(stream.next().await.unwrap(), format_frame("b", &json!({"topic": "b"})));
        assert_eq!(stream.next().await.unwrap(), format_frame("a", &json!({"topic": "a"})));

        bus.publish(DashboardEvent::new("t1", "s1", "live", json!({})))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap(), format_frame("live", &json!({})));
    }

    #[tokio::test]
    async fn test_replay_failure_still_goes_live() {
        let bus = bus_with(Arc::new(FailingStore), Arc::new(NoopNotifier));
        let mut stream = bus.subscribe(ChannelKey::session("s1")).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());
        assert_eq!(bus.registry().handle_count(&ChannelKey::session("s1")), 1);

        bus.publish(DashboardEvent::new("t1", "s1", "live", json!({})))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap(), format_frame("live", &json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_after_interval() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier));
        let mut stream = bus.subscribe(ChannelKey::session("s1")).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());

        let started = Instant::now();
        assert_eq!(stream.next().await.unwrap(), ping_frame());
        assert!(started.elapsed() >= DEFAULT_PING_INTERVAL);

        assert_eq!(stream.next().await.unwrap(), ping_frame());
        assert!(started.elapsed() >= DEFAULT_PING_INTERVAL * 2);
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier));
        let key = ChannelKey::session("s1");
        let first = bus.subscribe(key.clone()).await;
        let second = bus.subscribe(key.clone()).await;
        assert_eq!(bus.registry().handle_count(&key), 2);

        drop(first);
        assert_eq!(bus.registry().handle_count(&key), 1);
        drop(second);
        assert_eq!(bus.registry().channel_count(), 0);

        let report = bus
            .publish(DashboardEvent::new("t1", "s1", "after", json!({})))
            .await
            .unwrap();
        assert_eq!(report.session.attempted, 0);
    }

    #[tokio::test]
    async fn test_close_ends_stream_and_unregisters() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier));
        let key = ChannelKey::tenant("t1");
        let mut stream = bus.subscribe(key.clone()).await;

        stream.close();
        stream.close();
        assert!(stream.next().await.is_none());
        assert_eq!(bus.registry().channel_count(), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_foreign_notice_is_delivered_locally() {
        let store = Arc::new(InMemoryEventStore::new());
        let publisher = bus_with(store.clone(), Arc::new(NoopNotifier));
        let receiver = bus_with(store.clone(), Arc::new(NoopNotifier));
        let (_rs, mut rx) = handle(receiver.registry(), ChannelKey::session("s1"));

        let event = DashboardEvent::new("t1", "s1", "payment_done", json!({"ok": 1}));
        publisher.publish(event.clone()).await.unwrap();

        let delivered = receiver
            .handle_notice(&event.notice(publisher.instance_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.0.delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), event.frame());

        let own = receiver
            .handle_notice(&event.notice(receiver.instance_id()))
            .await
            .unwrap();
        assert!(own.is_none());
    }

    #[tokio::test]
    async fn test_notices_for_one_topic_deliver_each_write_once() {
        let store = Arc::new(InMemoryEventStore::new());
        let publisher = bus_with(store.clone(), Arc::new(NoopNotifier));
        let receiver = bus_with(store.clone(), Arc::new(NoopNotifier));
        let (_rs, mut rx) = handle(receiver.registry(), ChannelKey::session("s1"));

        let first = DashboardEvent::new("t1", "s1", "payment_done", json!({"v": 1}));
        let mut second = DashboardEvent::new("t1", "s1", "payment_done", json!({"v": 2}));
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);
        publisher.publish(first.clone()).await.unwrap();
        publisher.publish(second.clone()).await.unwrap();

        // Both notices are handled after the second write landed
        let superseded = receiver
            .handle_notice(&first.notice(publisher.instance_id()))
            .await
            .unwrap();
        assert!(superseded.is_none());

        let delivered = receiver
            .handle_notice(&second.notice(publisher.instance_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.0.delivered, 1);

        assert_eq!(rx.try_recv().unwrap(), second.frame());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_closed_and_catches_up_on_reconnect() {
        let config = BusConfig {
            replay_limit: 5,
            client_buffer: 1,
            ..BusConfig::default()
        };
        let bus = EventBus::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier), config);
        let key = ChannelKey::session("s1");

        let mut stream = bus.subscribe(key.clone()).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());

        for i in 0..3 {
            bus.publish(DashboardEvent::new("t1", "s1", "tick", json!({ "i": i })))
                .await
                .unwrap();
        }
        assert_eq!(bus.registry().handle_count(&key), 0);
        assert!(stream.next().await.is_none());

        let mut stream = bus.subscribe(key).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());
        assert_eq!(stream.next().await.unwrap(), format_frame("tick", &json!({"i": 2})));
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_and_later_streams() {
        let bus = bus_with(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier));
        let key = ChannelKey::session("s1");
        let mut stream = bus.subscribe(key.clone()).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());

        bus.shutdown();
        assert!(bus.is_shut_down());
        assert!(stream.next().await.is_none());
        assert_eq!(bus.registry().channel_count(), 0);

        let mut late = bus.subscribe(key).await;
        assert!(late.next().await.is_none());
        assert_eq!(bus.registry().channel_count(), 0);

        // Publishing still reaches the store
        let report = bus
            .publish(DashboardEvent::new("t1", "s1", "after", json!({})))
            .await
            .unwrap();
        assert!(report.persisted.is_success());
    }

    #[tokio::test]
    async fn test_event_published_during_replay_read_is_delivered() {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let store = Arc::new(GatedStore {
            inner: InMemoryEventStore::new(),
            entered: parking_lot::Mutex::new(Some(entered_tx)),
            release: parking_lot::Mutex::new(Some(release_rx)),
        });
        let bus = Arc::new(bus_with(store, Arc::new(NoopNotifier)));

        let subscriber = tokio::spawn({
            let bus = bus.clone();
            async move { bus.subscribe(ChannelKey::session("s1")).await }
        });
        entered_rx.await.unwrap();

        // The replay snapshot is already taken and does not contain this event
        let event = DashboardEvent::new("t1", "s1", "payment_done", json!({"v": 1}));
        bus.publish(event.clone()).await.unwrap();
        release_tx.send(()).unwrap();

        let mut stream = subscriber.await.unwrap();
        assert_eq!(stream.next().await.unwrap(), open_frame());
        assert_eq!(stream.next().await.unwrap(), event.frame());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_config_values_fall_back() {
        let config = BusConfig {
            replay_limit: usize::MAX,
            ping_interval: Duration::ZERO,
            client_buffer: 0,
        };
        let bus = EventBus::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoopNotifier), config);
        assert_eq!(bus.config().ping_interval, DEFAULT_PING_INTERVAL);
        assert_eq!(bus.config().client_buffer, DEFAULT_CLIENT_BUFFER);

        let mut stream = bus.subscribe(ChannelKey::session("s1")).await;
        assert_eq!(stream.next().await.unwrap(), open_frame());
        assert_eq!(stream.next().await.unwrap(), ping_frame());
    }
}
