//! Channel handles: the dual local/remote call target.
//!
//! A [`ChannelHandle`] is the single currency for "something I can send a
//! request to". The local flavor dispatches straight into an interceptor
//! chain in this process; the remote flavor carries the request over a
//! [`CallTransport`](crate::transport::CallTransport) in a pooled envelope.
//! Callers never branch on the flavor: invocation, handshake, and death
//! notification all go through the handle.

pub mod interceptor;

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::envelope::ParameterPool;
use crate::error::{InterprocError, Result, UnreachableReason};
use crate::message::{FailureKind, Request, Response, Value};
use crate::service::ServiceRegistry;
use crate::transport::{CallTransport, DeathHook, HookId};

use interceptor::{
    DirectAsyncCallInterceptor, DirectCallInterceptor, HandshakeInterceptor, InterceptorChain,
    ReflectiveAsyncCallInterceptor, ReflectiveCallInterceptor,
};

/// A call target in this process or behind a transport.
#[derive(Clone)]
pub enum ChannelHandle {
    /// Dispatches into an interceptor chain in this address space.
    Local(Arc<LocalChannel>),
    /// Dispatches over a transport to a peer.
    Remote(Arc<RemoteChannel>),
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => write!(f, "ChannelHandle::Local"),
            Self::Remote(channel) => {
                write!(f, "ChannelHandle::Remote(alive={})", channel.is_alive())
            }
        }
    }
}

impl ChannelHandle {
    /// Whether requests can still be delivered. Local channels never die.
    pub fn is_alive(&self) -> bool {
        match self {
            Self::Local(_) => true,
            Self::Remote(channel) => channel.is_alive(),
        }
    }

    /// Deliver one request and collect its immediate response.
    pub fn dispatch(&self, request: Request) -> Response {
        match self {
            Self::Local(channel) => channel.dispatch(request),
            Self::Remote(channel) => channel.dispatch(request),
        }
    }

    /// Register a death hook on the underlying transport.
    ///
    /// Returns `None` for local channels, which cannot die; the hook is
    /// dropped unfired.
    pub fn link_to_death(&self, hook: DeathHook) -> Option<HookId> {
        match self {
            Self::Local(_) => None,
            Self::Remote(channel) => Some(channel.transport.link_to_death(hook)),
        }
    }

    /// Remove a death hook registered through [`Self::link_to_death`].
    pub fn unlink_to_death(&self, id: HookId) {
        if let Self::Remote(channel) = self {
            channel.transport.unlink_to_death(id);
        }
    }

    /// Send a handshake announcing `process_key`, sharing `channel` as the
    /// way back. Handshake failures are logged, not surfaced: the connection
    /// attempt resolves through the pending-watch machinery, not this reply.
    pub fn send_handshake(&self, process_key: impl Into<String>, channel: ChannelHandle) {
        let process_key = process_key.into();
        let response = self.dispatch(Request::Handshake {
            process_key: process_key.clone(),
            channel,
        });
        if let Response::InternalFailure { notice } = response {
            tracing::warn!(
                %process_key,
                message = %notice.message,
                "handshake was not accepted by peer"
            );
        }
    }

    /// Invoke a named member synchronously through the peer's member table.
    pub fn invoke_reflective(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        map_response(self.dispatch(Request::ReflectiveInvoke {
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        }))
    }

    /// Invoke a named member synchronously through the peer's generated stub.
    pub fn invoke_direct(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        map_response(self.dispatch(Request::DirectInvoke {
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        }))
    }

    /// Invoke a named async member through the peer's member table,
    /// suspending until the peer re-enters through the carried callback.
    pub async fn invoke_reflective_async(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let interface = interface.to_string();
        let method = method.to_string();
        crate::bridge::invoke_with_callback(self, move |callback| Request::ReflectiveAsyncInvoke {
            interface,
            method,
            args,
            callback,
        })
        .await
    }

    /// Invoke a named async member through the peer's generated stub.
    pub async fn invoke_direct_async(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let interface = interface.to_string();
        let method = method.to_string();
        crate::bridge::invoke_with_callback(self, move |callback| Request::DirectAsyncInvoke {
            interface,
            method,
            args,
            callback,
        })
        .await
    }
}

/// Map an immediate response onto the caller-facing result.
///
/// Internal failures collapse onto unreachability: a request that never
/// reached a member body is indistinguishable, to the caller, from a peer
/// that cannot be reached at all.
pub(crate) fn map_response(response: Response) -> Result<Option<Value>> {
    match response {
        Response::Invocation {
            result,
            error: None,
        } => Ok(result),
        Response::Invocation {
            error: Some(error), ..
        } => Err(InterprocError::Execution(error)),
        Response::InternalFailure { notice } => {
            tracing::debug!(message = %notice.message, "request did not reach a member body");
            match notice.kind {
                FailureKind::DispatchNotFound => Err(InterprocError::Unreachable(
                    UnreachableReason::DispatchNotFound,
                )),
                FailureKind::Transport => {
                    Err(InterprocError::Unreachable(UnreachableReason::ChannelDead))
                }
            }
        }
    }
}

/// In-process call target backed by an interceptor chain.
pub struct LocalChannel {
    chain: InterceptorChain,
}

impl LocalChannel {
    /// Build a fully equipped endpoint channel: handshake handler plus all
    /// four invocation handlers over the implementation registry.
    pub fn new<F>(services: Arc<ServiceRegistry>, runtime: Handle, on_handshake: F) -> Arc<Self>
    where
        F: Fn(String, ChannelHandle) + Send + Sync + 'static,
    {
        Arc::new(Self::assemble(services, runtime, on_handshake))
    }

    /// Endpoint channel construction without the `Arc` wrapper, for callers
    /// that need a cyclic self-handle.
    pub(crate) fn assemble<F>(
        services: Arc<ServiceRegistry>,
        runtime: Handle,
        on_handshake: F,
    ) -> Self
    where
        F: Fn(String, ChannelHandle) + Send + Sync + 'static,
    {
        let chain = InterceptorChain::new();
        chain.add(Arc::new(HandshakeInterceptor::new(on_handshake)));
        chain.add(Arc::new(ReflectiveCallInterceptor::new(services.clone())));
        chain.add(Arc::new(ReflectiveAsyncCallInterceptor::new(
            services.clone(),
            runtime.clone(),
        )));
        chain.add(Arc::new(DirectCallInterceptor::new(services.clone())));
        chain.add(Arc::new(DirectAsyncCallInterceptor::new(services, runtime)));
        Self { chain }
    }

    /// Wrap a pre-built chain. Used for special-purpose channels such as
    /// bridge reply targets that carry a single handler.
    pub fn from_chain(chain: InterceptorChain) -> Arc<Self> {
        Arc::new(Self { chain })
    }

    /// Dispatch a request through the chain.
    pub fn dispatch(&self, request: Request) -> Response {
        self.chain.dispatch(request)
    }
}

/// Call target behind a transport, with a pooled envelope per dispatch.
pub struct RemoteChannel {
    transport: Arc<dyn CallTransport>,
    pool: ParameterPool,
}

impl RemoteChannel {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn CallTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            pool: ParameterPool::new(),
        })
    }

    /// Whether the underlying transport is still usable.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    fn dispatch(&self, request: Request) -> Response {
        if !self.is_alive() {
            return Response::transport_failure("channel is dead");
        }
        let mut envelope = self.pool.obtain();
        envelope.set_request(request);
        let response = match self.transport.call(&mut envelope) {
            Ok(()) => envelope
                .take_response()
                .unwrap_or_else(|| Response::transport_failure("peer returned no response")),
            Err(error) => Response::transport_failure(error.to_string()),
        };
        self.pool.recycle(envelope);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceTable;
    use crate::transport::InProcessTransport;
    use serde_json::json;

    fn endpoint() -> Arc<LocalChannel> {
        let services = Arc::new(ServiceRegistry::new());
        services.put(
            ServiceTable::builder("demo.Calc")
                .sync_method("double", |args| {
                    let n = args
                        .first()
                        .and_then(Value::as_i64)
                        .ok_or_else(|| crate::error::ExecutionError::new("missing operand"))?;
                    Ok(Some(json!(n * 2)))
                })
                .build(),
        );
        LocalChannel::new(services, Handle::current(), |_, _| {})
    }

    #[tokio::test]
    async fn test_local_invoke_reflective() {
        let handle = ChannelHandle::Local(endpoint());
        let result = handle
            .invoke_reflective("demo.Calc", "double", vec![json!(21)])
            .unwrap();
        assert_eq!(result, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_remote_invoke_through_transport() {
        let transport = InProcessTransport::new(ChannelHandle::Local(endpoint()));
        let handle = ChannelHandle::Remote(RemoteChannel::new(transport));

        let result = handle
            .invoke_reflective("demo.Calc", "double", vec![json!(4)])
            .unwrap();
        assert_eq!(result, Some(json!(8)));
    }

    #[tokio::test]
    async fn test_dead_channel_is_unreachable() {
        let transport = InProcessTransport::new(ChannelHandle::Local(endpoint()));
        let handle = ChannelHandle::Remote(RemoteChannel::new(transport.clone()));
        transport.sever();

        assert!(!handle.is_alive());
        let error = handle
            .invoke_reflective("demo.Calc", "double", vec![json!(1)])
            .unwrap_err();
        assert!(matches!(
            error,
            InterprocError::Unreachable(UnreachableReason::ChannelDead)
        ));
    }

    #[tokio::test]
    async fn test_unknown_interface_is_unreachable() {
        let handle = ChannelHandle::Local(endpoint());
        let error = handle
            .invoke_reflective("demo.Missing", "nope", vec![])
            .unwrap_err();
        assert!(matches!(
            error,
            InterprocError::Unreachable(UnreachableReason::DispatchNotFound)
        ));
    }

    #[tokio::test]
    async fn test_member_failure_is_execution_error() {
        let handle = ChannelHandle::Local(endpoint());
        let error = handle
            .invoke_reflective("demo.Calc", "double", vec![])
            .unwrap_err();
        match error {
            InterprocError::Execution(execution) => {
                assert_eq!(execution.message, "missing operand");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
