//! Connection registry: one channel per peer, deduplicated connects.
//!
//! `connect` attempts to the same destination coalesce onto a single
//! pending watch; only the first caller triggers the out-of-band bootstrap,
//! every caller awaits the same resolution. A connection attempt resolves
//! `true` when the peer's handshake lands and `false` on timeout; timing
//! out is an ordinary outcome, never an error. Established channels carry a
//! death hook that drops the registry entry when the peer goes away, so a
//! later `connect` starts a fresh attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;

use crate::channel::ChannelHandle;
use crate::error::Result;

/// Out-of-band connection bootstrap.
///
/// The registry knows nothing about how two processes first find each
/// other; an adapter owns that leg. `initiate` must arrange for the
/// destination to receive a handshake naming `self_key`, which in turn
/// resolves the pending attempt through [`ConnectionRegistry::establish`].
pub trait BootstrapAdapter: Send + Sync {
    /// Kick off one connection attempt from `self_key` to `dest_key`.
    fn initiate(&self, self_key: &str, dest_key: &str) -> Result<()>;
}

type PendingMap = HashMap<String, Arc<watch::Sender<Option<bool>>>>;

struct RegistryInner {
    self_key: String,
    connect_timeout: Duration,
    channels: Mutex<HashMap<String, ChannelHandle>>,
    pending: Mutex<PendingMap>,
    adapter: Mutex<Option<Arc<dyn BootstrapAdapter>>>,
}

impl RegistryInner {
    fn is_connected(&self, key: &str) -> bool {
        self.channels
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(ChannelHandle::is_alive)
    }

    /// Resolve and drop a pending attempt, but only the attempt `sender`
    /// belongs to; a fresh attempt under the same key stays untouched.
    fn finish_pending(&self, key: &str, sender: &Arc<watch::Sender<Option<bool>>>, value: bool) {
        sender.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value);
                true
            } else {
                false
            }
        });
        let mut pending = self.pending.lock().unwrap();
        if pending.get(key).is_some_and(|entry| Arc::ptr_eq(entry, sender)) {
            pending.remove(key);
        }
    }
}

/// Shared registry of peer channels and in-flight connection attempts.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a registry for the process identified by `self_key`.
    pub fn new(self_key: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                self_key: self_key.into(),
                connect_timeout,
                channels: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                adapter: Mutex::new(None),
            }),
        }
    }

    /// Install the out-of-band bootstrap used by [`Self::connect`].
    pub fn set_adapter(&self, adapter: Arc<dyn BootstrapAdapter>) {
        *self.inner.adapter.lock().unwrap() = Some(adapter);
    }

    /// The key this registry connects on behalf of.
    pub fn self_key(&self) -> &str {
        &self.inner.self_key
    }

    /// Whether a live channel to `key` is currently held.
    pub fn is_connected(&self, key: &str) -> bool {
        self.inner.is_connected(key)
    }

    /// The channel to `key`, if one is established and alive. A dead
    /// channel is never returned, so callers need no liveness re-check.
    pub fn channel(&self, key: &str) -> Option<ChannelHandle> {
        self.inner
            .channels
            .lock()
            .unwrap()
            .get(key)
            .filter(|channel| channel.is_alive())
            .cloned()
    }

    /// Whether a connection attempt to `key` is currently in flight.
    pub fn pending_contains(&self, key: &str) -> bool {
        self.inner.pending.lock().unwrap().contains_key(key)
    }

    /// Record the channel to a peer and resolve any pending attempt to it.
    ///
    /// A handshake for a peer that already has a live channel keeps the
    /// existing one; the incoming handle is dropped. Newly installed remote
    /// channels get a death hook that evicts the entry.
    pub fn establish(&self, key: impl Into<String>, channel: ChannelHandle) {
        let key = key.into();
        let installed = {
            let mut channels = self.inner.channels.lock().unwrap();
            match channels.get(&key) {
                Some(existing) if existing.is_alive() => {
                    tracing::debug!(%key, "duplicate handshake; keeping established channel");
                    false
                }
                _ => {
                    channels.insert(key.clone(), channel.clone());
                    true
                }
            }
        };

        if installed {
            tracing::info!(%key, ?channel, "peer channel established");
            let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
            let hook_key = key.clone();
            channel.link_to_death(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tracing::warn!(key = %hook_key, "peer channel died; dropping connection");
                    inner.channels.lock().unwrap().remove(&hook_key);
                }
            }));
        }

        let sender = self.inner.pending.lock().unwrap().remove(&key);
        if let Some(sender) = sender {
            sender.send_if_modified(|slot| {
                if slot.is_none() {
                    *slot = Some(true);
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Drop the channel to `key`, if any.
    pub fn drop_connection(&self, key: &str) {
        if self.inner.channels.lock().unwrap().remove(key).is_some() {
            tracing::info!(%key, "peer channel dropped");
        }
    }

    /// Ensure a live channel to `dest_key`.
    ///
    /// Returns `Ok(true)` once connected, `Ok(false)` if the attempt timed
    /// out. The self key counts as always connected. Errors are reserved
    /// for misconfiguration and bootstrap failures, never for timeouts.
    pub async fn connect(&self, dest_key: &str) -> Result<bool> {
        if dest_key == self.inner.self_key {
            return Ok(true);
        }
        if self.inner.is_connected(dest_key) {
            return Ok(true);
        }

        let (sender, is_initiator) = {
            let mut pending = self.inner.pending.lock().unwrap();
            match pending.get(dest_key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let sender = Arc::new(watch::Sender::new(None));
                    pending.insert(dest_key.to_string(), sender.clone());
                    (sender, true)
                }
            }
        };
        let mut receiver = sender.subscribe();

        if is_initiator {
            let adapter = self.inner.adapter.lock().unwrap().clone();
            let Some(adapter) = adapter else {
                self.inner.finish_pending(dest_key, &sender, false);
                return Err(crate::error::InterprocError::Configuration(
                    "no bootstrap adapter installed".into(),
                ));
            };
            tracing::debug!(%dest_key, "initiating connection");
            if let Err(error) = adapter.initiate(&self.inner.self_key, dest_key) {
                self.inner.finish_pending(dest_key, &sender, false);
                return Err(error);
            }
        }

        let resolved: Option<bool> = {
            let wait = receiver.wait_for(Option::is_some);
            match tokio::time::timeout(self.inner.connect_timeout, wait).await {
                Ok(Ok(value)) => Some((*value).unwrap_or(false)),
                // The attempt's sender went away without resolving.
                Ok(Err(_)) => None,
                Err(_) => {
                    tracing::warn!(
                        %dest_key,
                        timeout = ?self.inner.connect_timeout,
                        "connection attempt timed out"
                    );
                    self.inner.finish_pending(dest_key, &sender, false);
                    None
                }
            }
        };
        // An establish racing the timeout wins; read whatever landed last.
        Ok(resolved.unwrap_or_else(|| receiver.borrow().unwrap_or(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::interceptor::InterceptorChain;
    use crate::channel::{LocalChannel, RemoteChannel};
    use crate::error::InterprocError;
    use crate::transport::InProcessTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sink() -> ChannelHandle {
        ChannelHandle::Local(LocalChannel::from_chain(InterceptorChain::new()))
    }

    fn registry(timeout_ms: u64) -> ConnectionRegistry {
        ConnectionRegistry::new("self", Duration::from_millis(timeout_ms))
    }

    struct EstablishingAdapter {
        registry: ConnectionRegistry,
        initiated: AtomicUsize,
    }

    impl BootstrapAdapter for EstablishingAdapter {
        fn initiate(&self, _self_key: &str, dest_key: &str) -> Result<()> {
            self.initiated.fetch_add(1, Ordering::SeqCst);
            self.registry.establish(dest_key, sink());
            Ok(())
        }
    }

    struct SilentAdapter;

    impl BootstrapAdapter for SilentAdapter {
        fn initiate(&self, _self_key: &str, _dest_key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_resolves_on_establish() {
        let registry = registry(1_000);
        registry.set_adapter(Arc::new(EstablishingAdapter {
            registry: registry.clone(),
            initiated: AtomicUsize::new(0),
        }));

        assert!(registry.connect("peer").await.unwrap());
        assert!(registry.is_connected("peer"));
        assert!(registry.channel("peer").is_some());
    }

    #[tokio::test]
    async fn test_connect_timeout_is_false_not_error() {
        let registry = registry(50);
        registry.set_adapter(Arc::new(SilentAdapter));

        assert!(!registry.connect("peer").await.unwrap());
        assert!(!registry.is_connected("peer"));
        // The failed attempt leaves nothing pending.
        assert!(!registry.pending_contains("peer"));
    }

    #[tokio::test]
    async fn test_connect_without_adapter_is_configuration_error() {
        let registry = registry(50);
        assert!(matches!(
            registry.connect("peer").await,
            Err(InterprocError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_self_key_is_always_connected() {
        let registry = registry(50);
        assert!(registry.connect("self").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_connects_initiate_once() {
        let registry = registry(1_000);
        let adapter = Arc::new(EstablishingAdapter {
            registry: registry.clone(),
            initiated: AtomicUsize::new(0),
        });
        registry.set_adapter(adapter.clone());

        let mut joins = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            joins.push(tokio::spawn(async move { registry.connect("peer").await }));
        }
        for join in joins {
            assert!(join.await.unwrap().unwrap());
        }
        assert_eq!(adapter.initiated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_handshake_keeps_existing_channel() {
        let registry = registry(50);
        let first = sink();
        registry.establish("peer", first.clone());
        registry.establish("peer", sink());

        let held = registry.channel("peer").unwrap();
        match (&held, &first) {
            (ChannelHandle::Local(held), ChannelHandle::Local(first)) => {
                assert!(Arc::ptr_eq(held, first));
            }
            _ => panic!("expected local channels"),
        }
    }

    #[tokio::test]
    async fn test_dead_channel_is_evicted() {
        let registry = registry(50);
        let transport = InProcessTransport::new(sink());
        registry.establish("peer", ChannelHandle::Remote(RemoteChannel::new(transport.clone())));
        assert!(registry.is_connected("peer"));

        transport.sever();
        assert!(!registry.is_connected("peer"));
        assert!(registry.channel("peer").is_none());
    }
}
