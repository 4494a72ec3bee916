//! Lowest-level call transport over one physical channel.
//!
//! A [`CallTransport`] carries one envelope to the peer and back, reports
//! liveness, and fires death hooks when the channel becomes permanently
//! unusable. Everything above this layer (channels, dispatch, fallback)
//! is transport-agnostic.
//!
//! [`InProcessTransport`] is the reference implementation for endpoints that
//! share an address space; it doubles as the test harness for death
//! notification, which real transports signal when their peer goes away.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::ChannelHandle;
use crate::envelope::ParameterEnvelope;
use crate::error::{InterprocError, Result};

/// Callback fired once when a transport dies.
pub type DeathHook = Box<dyn FnOnce() + Send>;

/// Identifies one registered death hook for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Bidirectional invoke primitive plus liveness and death notification.
pub trait CallTransport: Send + Sync {
    /// Carry one envelope to the peer and back.
    ///
    /// The request slot is consumed; on success the response slot is filled.
    /// An `Err` means the call itself failed at the transport layer; the
    /// request may or may not have reached the peer.
    fn call(&self, envelope: &mut ParameterEnvelope) -> Result<()>;

    /// Whether the channel is still usable. Transitions alive→dead only.
    fn is_alive(&self) -> bool;

    /// Register a death hook. Fires immediately if the transport is already
    /// dead. Each hook fires at most once.
    fn link_to_death(&self, hook: DeathHook) -> HookId;

    /// Remove a previously registered death hook. Removing a hook that has
    /// already fired or was never registered is a no-op.
    fn unlink_to_death(&self, id: HookId);
}

/// Transport that forwards envelopes to a peer channel in the same address
/// space, with a severance switch standing in for peer death.
pub struct InProcessTransport {
    target: ChannelHandle,
    alive: AtomicBool,
    hooks: Mutex<Vec<(HookId, DeathHook)>>,
    next_hook_id: AtomicU64,
}

impl InProcessTransport {
    /// Create a transport delivering to `target`.
    pub fn new(target: ChannelHandle) -> Arc<Self> {
        Arc::new(Self {
            target,
            alive: AtomicBool::new(true),
            hooks: Mutex::new(Vec::new()),
            next_hook_id: AtomicU64::new(1),
        })
    }

    /// Permanently kill the transport and fire every registered death hook.
    ///
    /// Severing an already-dead transport is a no-op; aliveness never
    /// transitions back.
    pub fn sever(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::debug!("in-process transport severed");
            let hooks = std::mem::take(&mut *self.hooks.lock().unwrap());
            for (_, hook) in hooks {
                hook();
            }
        }
    }
}

impl CallTransport for InProcessTransport {
    fn call(&self, envelope: &mut ParameterEnvelope) -> Result<()> {
        if !self.is_alive() {
            return Err(InterprocError::Transport("transport severed".into()));
        }
        let request = envelope
            .take_request()
            .ok_or_else(|| InterprocError::Transport("envelope carries no request".into()))?;
        let response = self.target.dispatch(request);
        envelope.set_response(response);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn link_to_death(&self, hook: DeathHook) -> HookId {
        let id = HookId(self.next_hook_id.fetch_add(1, Ordering::Relaxed));
        if !self.is_alive() {
            hook();
            return id;
        }
        self.hooks.lock().unwrap().push((id, hook));
        id
    }

    fn unlink_to_death(&self, id: HookId) {
        self.hooks.lock().unwrap().retain(|(hook_id, _)| *hook_id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalChannel;
    use crate::message::{Request, Response};
    use std::sync::atomic::AtomicUsize;

    fn callback_sink() -> ChannelHandle {
        // A channel with an empty chain; any request resolves to not-found.
        ChannelHandle::Local(LocalChannel::from_chain(
            crate::channel::interceptor::InterceptorChain::new(),
        ))
    }

    #[test]
    fn test_call_forwards_to_target() {
        let transport = InProcessTransport::new(callback_sink());
        let pool = crate::envelope::ParameterPool::new();

        let mut envelope = pool.obtain();
        envelope.set_request(Request::AsyncCallback {
            data: None,
            error: None,
        });
        transport.call(&mut envelope).unwrap();

        match envelope.take_response().unwrap() {
            Response::InternalFailure { .. } => {}
            other => panic!("expected not-found from empty chain, got {:?}", other),
        }
    }

    #[test]
    fn test_call_on_severed_transport_fails() {
        let transport = InProcessTransport::new(callback_sink());
        transport.sever();

        let pool = crate::envelope::ParameterPool::new();
        let mut envelope = pool.obtain();
        envelope.set_request(Request::AsyncCallback {
            data: None,
            error: None,
        });
        assert!(matches!(
            transport.call(&mut envelope),
            Err(InterprocError::Transport(_))
        ));
    }

    #[test]
    fn test_sever_fires_hooks_exactly_once() {
        let transport = InProcessTransport::new(callback_sink());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = fired.clone();
            transport.link_to_death(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }

        transport.sever();
        transport.sever();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(!transport.is_alive());
    }

    #[test]
    fn test_link_after_death_fires_immediately() {
        let transport = InProcessTransport::new(callback_sink());
        transport.sever();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        transport.link_to_death(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unlink_prevents_firing() {
        let transport = InProcessTransport::new(callback_sink());
        let fired = Arc::new(AtomicBool::new(false));

        let fired_clone = fired.clone();
        let id = transport.link_to_death(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));
        transport.unlink_to_death(id);

        transport.sever();
        assert!(!fired.load(Ordering::SeqCst));
    }
}
