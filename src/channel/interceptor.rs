//! Request interceptor chain for local channels.
//!
//! Handlers register a predicate and a body; dispatch is a linear scan that
//! invokes the first match. Ordering is irrelevant for correctness because
//! request variants are disjoint; the scan is a simplicity choice over a
//! fixed, small handler set. Failures raised inside a handler (including
//! panics) are caught at the chain boundary and carried in the response;
//! nothing crosses the call boundary unobserved.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use crate::bridge::ResumptionToken;
use crate::channel::ChannelHandle;
use crate::error::ExecutionError;
use crate::message::{Request, Response};
use crate::service::ServiceRegistry;

/// How a handler concluded.
pub enum HandlerError {
    /// The handler accepted the request kind but found no dispatch target.
    NotFound(String),
    /// The member body failed; carried back to the caller.
    Execution(ExecutionError),
}

/// Result of one handler body.
pub type HandlerResult = std::result::Result<Option<crate::message::Value>, HandlerError>;

/// One handler installed on a local channel.
pub trait BridgeInterceptor: Send + Sync {
    /// Whether this handler serves the given request.
    fn accepts(&self, request: &Request) -> bool;

    /// Handle an accepted request.
    fn handle(&self, request: Request) -> HandlerResult;
}

/// First-match handler list for one local channel.
pub struct InterceptorChain {
    handlers: Mutex<Vec<Arc<dyn BridgeInterceptor>>>,
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Append a handler.
    pub fn add(&self, handler: Arc<dyn BridgeInterceptor>) {
        self.handlers.lock().unwrap().push(handler);
    }

    /// Dispatch a request to the first accepting handler.
    ///
    /// The handler body runs outside the list lock.
    pub fn dispatch(&self, request: Request) -> Response {
        let handler = {
            let handlers = self.handlers.lock().unwrap();
            handlers.iter().find(|h| h.accepts(&request)).cloned()
        };
        let Some(handler) = handler else {
            return Response::not_found(format!("no handler accepts {} request", request.kind()));
        };

        let kind = request.kind();
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(Ok(result)) => Response::ok(result),
            Ok(Err(HandlerError::Execution(error))) => Response::failed(error),
            Ok(Err(HandlerError::NotFound(message))) => Response::not_found(message),
            Err(payload) => {
                let message = panic_message(payload);
                tracing::warn!(kind, %message, "handler panicked; carrying failure in response");
                Response::failed(ExecutionError::new(message))
            }
        }
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Run an async member body and complete the callback with its outcome.
///
/// The body runs in its own task so a panic is observed as a join error
/// and carried back as an execution failure; the suspended caller is
/// resumed no matter how the member ends.
fn spawn_member_body(
    runtime: &Handle,
    future: crate::service::BoxFuture<'static, crate::service::MethodResult>,
    callback: crate::bridge::CallbackRef,
) {
    let body = runtime.spawn(future);
    runtime.spawn(async move {
        let outcome = match body.await {
            Ok(result) => result,
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "member body was cancelled".to_string()
                };
                tracing::warn!(%message, "async member body did not finish; carrying failure");
                Err(ExecutionError::new(message))
            }
        };
        match outcome {
            Ok(data) => callback.complete(data, None),
            Err(error) => callback.complete(None, Some(error)),
        }
    });
}

/// Handshake handler: hands the peer's key and channel to a closure.
pub(crate) struct HandshakeInterceptor<F> {
    on_receive: F,
}

impl<F> HandshakeInterceptor<F>
where
    F: Fn(String, ChannelHandle) + Send + Sync,
{
    pub(crate) fn new(on_receive: F) -> Self {
        Self { on_receive }
    }
}

impl<F> BridgeInterceptor for HandshakeInterceptor<F>
where
    F: Fn(String, ChannelHandle) + Send + Sync,
{
    fn accepts(&self, request: &Request) -> bool {
        matches!(request, Request::Handshake { .. })
    }

    fn handle(&self, request: Request) -> HandlerResult {
        let Request::Handshake {
            process_key,
            channel,
        } = request
        else {
            return Err(HandlerError::NotFound("not a handshake".into()));
        };
        (self.on_receive)(process_key, channel);
        Ok(None)
    }
}

/// Synchronous member invocation through the implementation registry's
/// per-interface tables.
pub(crate) struct ReflectiveCallInterceptor {
    services: Arc<ServiceRegistry>,
}

impl ReflectiveCallInterceptor {
    pub(crate) fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl BridgeInterceptor for ReflectiveCallInterceptor {
    fn accepts(&self, request: &Request) -> bool {
        matches!(request, Request::ReflectiveInvoke { .. })
    }

    fn handle(&self, request: Request) -> HandlerResult {
        let Request::ReflectiveInvoke {
            interface,
            method,
            args,
        } = request
        else {
            return Err(HandlerError::NotFound("not a reflective invoke".into()));
        };
        let table = self.services.table(&interface).ok_or_else(|| {
            HandlerError::NotFound(format!("no implementation registered for {interface}"))
        })?;
        let result = table
            .invoke_sync(&method, &args)
            .ok_or_else(|| HandlerError::NotFound(format!("no member {interface}::{method}")))?;
        result.map_err(HandlerError::Execution)
    }
}

/// Asynchronous member invocation: the member body is spawned on the
/// runtime and completion re-enters the caller through the carried
/// callback. The immediate response only acknowledges acceptance.
pub(crate) struct ReflectiveAsyncCallInterceptor {
    services: Arc<ServiceRegistry>,
    runtime: Handle,
}

impl ReflectiveAsyncCallInterceptor {
    pub(crate) fn new(services: Arc<ServiceRegistry>, runtime: Handle) -> Self {
        Self { services, runtime }
    }
}

impl BridgeInterceptor for ReflectiveAsyncCallInterceptor {
    fn accepts(&self, request: &Request) -> bool {
        matches!(request, Request::ReflectiveAsyncInvoke { .. })
    }

    fn handle(&self, request: Request) -> HandlerResult {
        let Request::ReflectiveAsyncInvoke {
            interface,
            method,
            args,
            callback,
        } = request
        else {
            return Err(HandlerError::NotFound("not an async invoke".into()));
        };
        // Resolve the target before spawning so "not found" reaches the
        // caller in the immediate response instead of leaving it suspended.
        let table = self.services.table(&interface).ok_or_else(|| {
            HandlerError::NotFound(format!("no implementation registered for {interface}"))
        })?;
        let sync_args = args.clone();
        let future = match table.prepare_async(&method, args) {
            Some(future) => future,
            // Sync members answer async invocations too; the result still
            // travels through the callback.
            None => {
                let result = table.invoke_sync(&method, &sync_args).ok_or_else(|| {
                    HandlerError::NotFound(format!("no member {interface}::{method}"))
                })?;
                match result {
                    Ok(data) => callback.complete(data, None),
                    Err(error) => callback.complete(None, Some(error)),
                }
                return Ok(None);
            }
        };
        spawn_member_body(&self.runtime, future, callback);
        Ok(None)
    }
}

/// Synchronous member invocation through the generated direct stub.
pub(crate) struct DirectCallInterceptor {
    services: Arc<ServiceRegistry>,
}

impl DirectCallInterceptor {
    pub(crate) fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl BridgeInterceptor for DirectCallInterceptor {
    fn accepts(&self, request: &Request) -> bool {
        matches!(request, Request::DirectInvoke { .. })
    }

    fn handle(&self, request: Request) -> HandlerResult {
        let Request::DirectInvoke {
            interface,
            method,
            args,
        } = request
        else {
            return Err(HandlerError::NotFound("not a direct invoke".into()));
        };
        let stub = self.services.direct_stub(&interface).ok_or_else(|| {
            HandlerError::NotFound(format!("no generated stub registered for {interface}"))
        })?;
        let result = stub
            .invoke_sync(&method, &args)
            .ok_or_else(|| HandlerError::NotFound(format!("no member {interface}::{method}")))?;
        result.map_err(HandlerError::Execution)
    }
}

/// Asynchronous member invocation through the generated direct stub.
pub(crate) struct DirectAsyncCallInterceptor {
    services: Arc<ServiceRegistry>,
    runtime: Handle,
}

impl DirectAsyncCallInterceptor {
    pub(crate) fn new(services: Arc<ServiceRegistry>, runtime: Handle) -> Self {
        Self { services, runtime }
    }
}

impl BridgeInterceptor for DirectAsyncCallInterceptor {
    fn accepts(&self, request: &Request) -> bool {
        matches!(request, Request::DirectAsyncInvoke { .. })
    }

    fn handle(&self, request: Request) -> HandlerResult {
        let Request::DirectAsyncInvoke {
            interface,
            method,
            args,
            callback,
        } = request
        else {
            return Err(HandlerError::NotFound("not a direct async invoke".into()));
        };
        let stub = self.services.direct_stub(&interface).ok_or_else(|| {
            HandlerError::NotFound(format!("no generated stub registered for {interface}"))
        })?;
        let sync_args = args.clone();
        let future = match stub.invoke_async(&method, args) {
            Some(future) => future,
            None => {
                let result = stub.invoke_sync(&method, &sync_args).ok_or_else(|| {
                    HandlerError::NotFound(format!("no member {interface}::{method}"))
                })?;
                match result {
                    Ok(data) => callback.complete(data, None),
                    Err(error) => callback.complete(None, Some(error)),
                }
                return Ok(None);
            }
        };
        spawn_member_body(&self.runtime, future, callback);
        Ok(None)
    }
}

/// Callback handler installed on bridge reply channels: resumes the token
/// with the carried outcome. Losing a completion race is a no-op.
pub(crate) struct CallbackInterceptor {
    token: Arc<ResumptionToken>,
}

impl CallbackInterceptor {
    pub(crate) fn new(token: Arc<ResumptionToken>) -> Self {
        Self { token }
    }
}

impl BridgeInterceptor for CallbackInterceptor {
    fn accepts(&self, request: &Request) -> bool {
        matches!(request, Request::AsyncCallback { .. })
    }

    fn handle(&self, request: Request) -> HandlerResult {
        let Request::AsyncCallback { data, error } = request else {
            return Err(HandlerError::NotFound("not a callback".into()));
        };
        let resumed = self
            .token
            .complete(crate::bridge::CallOutcome::Completed {
                result: data,
                error,
            });
        if !resumed {
            tracing::debug!("late async callback dropped; token already resolved");
        }
        Ok(None)
    }
}
