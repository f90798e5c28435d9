// Local subscriber registry
//
// Process-local map from a channel key to the live handles currently
// connected to it. Cross-instance delivery never goes through here; it goes
// through the durable store and the notifier.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::ChannelKey;

type Channels = Mutex<HashMap<ChannelKey, HashMap<Uuid, ClientHandle>>>;

/// Why a write to a handle did not go through
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The connection behind the handle is gone
    #[error("client disconnected")]
    Closed,
    /// The client is not draining its buffer
    #[error("client buffer full")]
    Full,
}

/// Write/close capability of one open streaming connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: Uuid,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a chunk for the connection without waiting
    pub fn write(&self, chunk: &str) -> Result<(), WriteError> {
        if self.closed.is_cancelled() {
            return Err(WriteError::Closed);
        }
        self.tx.try_send(chunk.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WriteError::Full,
            mpsc::error::TrySendError::Closed(_) => WriteError::Closed,
        })
    }

    /// Ask the connection to end its stream
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    pub(crate) fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Result of writing one frame to every handle of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Fanout {
    /// Handles registered when the frame was written
    pub attempted: usize,
    /// Handles that accepted the frame
    pub delivered: usize,
}

impl Fanout {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Injectable registry of live handles keyed by channel
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Arc<Channels>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle to a channel; the returned registration removes it again
    pub fn register(&self, key: ChannelKey, handle: ClientHandle) -> Registration {
        let handle_id = handle.id();
        self.channels
            .lock()
            .entry(key.clone())
            .or_default()
            .insert(handle_id, handle);

        tracing::debug!(channel = %key, handle_id = %handle_id, "Registered client handle");

        Registration {
            channels: Arc::downgrade(&self.channels),
            key,
            handle_id,
            active: true,
        }
    }

    /// Write a frame to every handle of a channel. A failing handle never
    /// prevents delivery to its siblings.
    ///
    /// A handle whose buffer is full is closed and removed: its stream ends,
    /// and the client reconnects and catches up through replay instead of
    /// silently missing the frame.
    pub fn broadcast(&self, key: &ChannelKey, frame: &str) -> Fanout {
        // Snapshot outside the lock so slow bookkeeping cannot block registration
        let handles: Vec<ClientHandle> = match self.channels.lock().get(key) {
            Some(set) => set.values().cloned().collect(),
            None => return Fanout::default(),
        };

        let mut fanout = Fanout {
            attempted: handles.len(),
            delivered: 0,
        };
        let mut lagging = Vec::new();
        for handle in &handles {
            match handle.write(frame) {
                Ok(()) => fanout.delivered += 1,
                Err(WriteError::Full) => {
                    tracing::warn!(
                        channel = %key,
                        handle_id = %handle.id(),
                        "Client buffer full, closing stream so it reconnects"
                    );
                    handle.close();
                    lagging.push(handle.id());
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %key,
                        handle_id = %handle.id(),
                        error = %e,
                        "Dropped frame for client handle"
                    );
                }
            }
        }

        if !lagging.is_empty() {
            let mut channels = self.channels.lock();
            if let Some(set) = channels.get_mut(key) {
                for id in &lagging {
                    set.remove(id);
                }
                if set.is_empty() {
                    channels.remove(key);
                }
            }
        }
        fanout
    }

    /// Number of channels with at least one handle
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Number of handles registered on a channel
    pub fn handle_count(&self, key: &ChannelKey) -> usize {
        self.channels.lock().get(key).map_or(0, |set| set.len())
    }
}

/// Unregister capability returned by [`ChannelRegistry::register`].
///
/// Removes exactly the registered handle, deletes the channel entry once it
/// is empty, and runs at most once (explicitly or on drop).
#[derive(Debug)]
pub struct Registration {
    channels: Weak<Channels>,
    key: ChannelKey,
    handle_id: Uuid,
    active: bool,
}

impl Registration {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn unregister(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.lock();
        if let Some(set) = channels.get_mut(&self.key) {
            set.remove(&self.handle_id);
            if set.is_empty() {
                channels.remove(&self.key);
            }
        }
        tracing::debug!(channel = %self.key, handle_id = %self.handle_id, "Unregistered client handle");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (ClientHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientHandle::new(tx), rx)
    }

    #[test]
    fn test_fanout_isolation_between_channels() {
        let registry = ChannelRegistry::new();
        let (a, mut rx_a) = handle(8);
        let (b, mut rx_b) = handle(8);
        let _ra = registry.register(ChannelKey::session("s1"), a);
        let _rb = registry.register(ChannelKey::session("s2"), b);

        let fanout = registry.broadcast(&ChannelKey::session("s1"), "frame-1");
        assert_eq!(fanout, Fanout { attempted: 1, delivered: 1 });

        assert_eq!(rx_a.try_recv().unwrap(), "frame-1");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_same_channel_handles_all_receive() {
        let registry = ChannelRegistry::new();
        let (a, mut rx_a) = handle(8);
        let (b, mut rx_b) = handle(8);
        let key = ChannelKey::session("s1");
        let _ra = registry.register(key.clone(), a);
        let _rb = registry.register(key.clone(), b);

        let fanout = registry.broadcast(&key, "frame");
        assert_eq!(fanout.delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap(), "frame");
        assert_eq!(rx_b.try_recv().unwrap(), "frame");
    }

    #[test]
    fn test_session_and_tenant_keys_do_not_collide() {
        let registry = ChannelRegistry::new();
        let (a, mut rx_a) = handle(8);
        let _ra = registry.register(ChannelKey::tenant("same-id"), a);

        let fanout = registry.broadcast(&ChannelKey::session("same-id"), "frame");
        assert_eq!(fanout.attempted, 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_unregister_removes_handle_and_empty_channel() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::session("s1");
        let (a, mut rx_a) = handle(8);
        let (b, _rx_b) = handle(8);
        let mut ra = registry.register(key.clone(), a);
        let mut rb = registry.register(key.clone(), b);
        assert_eq!(registry.handle_count(&key), 2);

        ra.unregister();
        assert_eq!(registry.handle_count(&key), 1);
        assert_eq!(registry.channel_count(), 1);

        registry.broadcast(&key, "after");
        assert!(rx_a.try_recv().is_err());

        rb.unregister();
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_unregister_is_idempotent_and_runs_on_drop() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::session("s1");
        let (a, _rx_a) = handle(8);
        let (b, _rx_b) = handle(8);
        let mut ra = registry.register(key.clone(), a);
        let rb = registry.register(key.clone(), b);

        ra.unregister();
        ra.unregister();
        assert!(!ra.is_active());
        assert_eq!(registry.handle_count(&key), 1);

        drop(rb);
        assert_eq!(registry.channel_count(), 0);

        drop(ra);
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_failing_handle_does_not_block_siblings() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::session("s1");
        let (dead, rx_dead) = handle(8);
        let (full, _rx_full) = handle(1);
        let (live, mut rx_live) = handle(8);
        drop(rx_dead);
        full.write("fill").unwrap();

        let _r1 = registry.register(key.clone(), dead);
        let _r2 = registry.register(key.clone(), full);
        let _r3 = registry.register(key.clone(), live);

        let fanout = registry.broadcast(&key, "frame");
        assert_eq!(fanout.attempted, 3);
        assert_eq!(fanout.delivered, 1);
        assert_eq!(fanout.failed(), 2);
        assert_eq!(rx_live.try_recv().unwrap(), "frame");
    }

    #[test]
    fn test_full_handle_is_closed_and_evicted() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::session("s1");
        let (slow, _rx_slow) = handle(1);
        let (live, mut rx_live) = handle(8);
        let _r1 = registry.register(key.clone(), slow.clone());
        let _r2 = registry.register(key.clone(), live);

        registry.broadcast(&key, "first");
        assert!(!slow.is_closed());

        let fanout = registry.broadcast(&key, "second");
        assert_eq!(fanout, Fanout { attempted: 2, delivered: 1 });
        assert!(slow.is_closed());
        assert_eq!(registry.handle_count(&key), 1);

        let fanout = registry.broadcast(&key, "third");
        assert_eq!(fanout, Fanout { attempted: 1, delivered: 1 });
        assert_eq!(rx_live.try_recv().unwrap(), "first");
        assert_eq!(rx_live.try_recv().unwrap(), "second");
        assert_eq!(rx_live.try_recv().unwrap(), "third");
    }

    #[test]
    fn test_evicting_last_handle_removes_channel() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::tenant("t1");
        let (slow, _rx_slow) = handle(1);
        let mut registration = registry.register(key.clone(), slow);

        registry.broadcast(&key, "first");
        registry.broadcast(&key, "second");
        assert_eq!(registry.channel_count(), 0);

        // Unregistering after eviction is a no-op
        registration.unregister();
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_closed_handle_rejects_writes() {
        let (h, _rx) = handle(8);
        h.close();
        assert!(h.is_closed());
        assert_eq!(h.write("x"), Err(WriteError::Closed));
    }

    #[test]
    fn test_registration_outlives_registry() {
        let registry = ChannelRegistry::new();
        let (a, _rx) = handle(8);
        let mut reg = registry.register(ChannelKey::session("s1"), a);
        drop(registry);
        reg.unregister();
        assert!(!reg.is_active());
    }
}
