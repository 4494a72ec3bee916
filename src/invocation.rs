//! Call proxies with fallback and exception policy.
//!
//! An [`InvocationHandle`] binds one (destination, interface) pair and
//! resolves its target per call: the hub's own channel when the destination
//! is this process, otherwise the established peer channel, connecting
//! first if needed.
//!
//! Degradation follows the member's declared contract. Members are nullable
//! by default: when the destination is unreachable they resolve to no
//! value. A member marked non-null instead runs the configured fallback
//! implementation, whose outcome is returned verbatim; a non-null member
//! with no fallback surfaces a configuration error. A failure raised by the
//! callee's own member body is rethrown unchanged; fallback and exception
//! handlers never touch it. Local and transport failures are the only
//! category the call-site and hub-wide exception handlers rule on: either
//! may swallow one, which degrades the call like an unreachable peer.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use crate::channel::ChannelHandle;
use crate::error::{InterprocError, Result, UnreachableReason};
use crate::message::Value;
use crate::registry::ConnectionRegistry;
use crate::service::MethodResult;

/// Local substitute implementation run when a non-null member degrades.
pub type FallbackFn = dyn Fn(&str, &[Value]) -> MethodResult + Send + Sync;

/// Rules on a local or transport failure; returning `true` swallows it and
/// the call degrades through the fallback policy instead of erroring.
pub type ExceptionHandler = dyn Fn(&InterprocError) -> bool + Send + Sync;

/// Shared slot for the hub-wide root exception handler.
pub(crate) type HandlerSlot = Arc<Mutex<Option<Arc<ExceptionHandler>>>>;

/// A bound call proxy for one interface on one destination.
pub struct InvocationHandle {
    self_key: String,
    dest_key: String,
    interface: String,
    connections: ConnectionRegistry,
    local: ChannelHandle,
    runtime: Handle,
    prefer_direct: bool,
    non_null_members: HashSet<String>,
    fallback: Option<Arc<FallbackFn>>,
    call_site_handler: Option<Arc<ExceptionHandler>>,
    root_handler: HandlerSlot,
}

/// Configures and produces an [`InvocationHandle`].
pub struct ProxyBuilder {
    handle: InvocationHandle,
}

impl ProxyBuilder {
    pub(crate) fn new(
        self_key: String,
        dest_key: String,
        interface: String,
        connections: ConnectionRegistry,
        local: ChannelHandle,
        runtime: Handle,
        root_handler: HandlerSlot,
    ) -> Self {
        Self {
            handle: InvocationHandle {
                self_key,
                dest_key,
                interface,
                connections,
                local,
                runtime,
                prefer_direct: false,
                non_null_members: HashSet::new(),
                fallback: None,
                call_site_handler: None,
                root_handler,
            },
        }
    }

    /// Route calls through the destination's generated stub instead of its
    /// member table.
    pub fn direct(mut self) -> Self {
        self.handle.prefer_direct = true;
        self
    }

    /// Declare a member's return contract as non-null: resolving to no
    /// value degrades through the fallback instead of returning nothing.
    pub fn non_null_member(mut self, name: impl Into<String>) -> Self {
        self.handle.non_null_members.insert(name.into());
        self
    }

    /// Install the local substitute implementation for degraded calls.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&str, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        self.handle.fallback = Some(Arc::new(fallback));
        self
    }

    /// Install a call-site exception handler; combined with the hub's root
    /// handler by logical OR.
    pub fn exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InterprocError) -> bool + Send + Sync + 'static,
    {
        self.handle.call_site_handler = Some(Arc::new(handler));
        self
    }

    /// Finish the proxy.
    pub fn build(self) -> InvocationHandle {
        self.handle
    }
}

impl InvocationHandle {
    /// The interface this proxy is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The destination this proxy calls into.
    pub fn dest_key(&self) -> &str {
        &self.dest_key
    }

    /// Invoke a member asynchronously, suspending across the call boundary.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let policy_args = args.clone();
        let outcome = match self.resolve_target().await {
            Ok(target) => {
                if self.prefer_direct {
                    target
                        .invoke_direct_async(&self.interface, method, args)
                        .await
                } else {
                    target
                        .invoke_reflective_async(&self.interface, method, args)
                        .await
                }
            }
            Err(error) => Err(error),
        };
        self.apply_policy(method, &policy_args, outcome)
    }

    /// Invoke a member synchronously, blocking the calling thread.
    ///
    /// Connecting on demand parks the thread on the hub's runtime, so this
    /// must not be called from a single-threaded runtime worker.
    ///
    /// Only members registered synchronously are resolvable on this path.
    /// A member registered async-only reads as a missing dispatch target
    /// and degrades under its declared contract; call it through
    /// [`Self::invoke`] instead.
    pub fn invoke_blocking(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let policy_args = args.clone();
        let outcome = match self.resolve_target_blocking() {
            Ok(target) => {
                if self.prefer_direct {
                    target.invoke_direct(&self.interface, method, args)
                } else {
                    target.invoke_reflective(&self.interface, method, args)
                }
            }
            Err(error) => Err(error),
        };
        self.apply_policy(method, &policy_args, outcome)
    }

    async fn resolve_target(&self) -> Result<ChannelHandle> {
        if self.dest_key == self.self_key {
            return Ok(self.local.clone());
        }
        if !self.connections.connect(&self.dest_key).await? {
            return Err(InterprocError::Unreachable(UnreachableReason::NotConnected));
        }
        self.established_channel()
    }

    fn resolve_target_blocking(&self) -> Result<ChannelHandle> {
        if self.dest_key == self.self_key {
            return Ok(self.local.clone());
        }
        if let Ok(channel) = self.established_channel() {
            return Ok(channel);
        }
        let connected = tokio::task::block_in_place(|| {
            self.runtime
                .block_on(self.connections.connect(&self.dest_key))
        })?;
        if !connected {
            return Err(InterprocError::Unreachable(UnreachableReason::NotConnected));
        }
        self.established_channel()
    }

    fn established_channel(&self) -> Result<ChannelHandle> {
        self.connections
            .channel(&self.dest_key)
            .filter(ChannelHandle::is_alive)
            .ok_or(InterprocError::Unreachable(UnreachableReason::NotConnected))
    }

    fn is_nullable(&self, method: &str) -> bool {
        !self.non_null_members.contains(method)
    }

    fn apply_policy(
        &self,
        method: &str,
        args: &[Value],
        outcome: Result<Option<Value>>,
    ) -> Result<Option<Value>> {
        match outcome {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                if self.is_nullable(method) {
                    Ok(None)
                } else {
                    self.degrade(method, args, "member resolved to no value")
                }
            }
            // The callee ran and its own body failed: rethrown unchanged.
            Err(InterprocError::Execution(error)) => Err(InterprocError::Execution(error)),
            Err(InterprocError::Unreachable(reason)) => {
                tracing::warn!(
                    dest = %self.dest_key,
                    interface = %self.interface,
                    method,
                    %reason,
                    "destination unreachable; degrading locally"
                );
                if self.is_nullable(method) {
                    Ok(None)
                } else {
                    self.degrade(method, args, "destination unreachable")
                }
            }
            Err(error) => {
                if self.swallows(&error) {
                    tracing::warn!(
                        interface = %self.interface,
                        method,
                        %error,
                        "failure swallowed by exception handler; degrading locally"
                    );
                    if self.is_nullable(method) {
                        Ok(None)
                    } else {
                        self.degrade(method, args, "failure swallowed by handler")
                    }
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Call-site and root handlers combine by logical OR.
    fn swallows(&self, error: &InterprocError) -> bool {
        if let Some(handler) = &self.call_site_handler {
            if handler(error) {
                return true;
            }
        }
        let root = self.root_handler.lock().unwrap().clone();
        root.is_some_and(|handler| handler(error))
    }

    fn degrade(&self, method: &str, args: &[Value], cause: &str) -> Result<Option<Value>> {
        match &self.fallback {
            Some(fallback) => fallback(method, args).map_err(InterprocError::Execution),
            None => Err(InterprocError::Configuration(format!(
                "non-null member {}::{method} {cause} and no fallback implementation is configured",
                self.interface
            ))),
        }
    }
}
