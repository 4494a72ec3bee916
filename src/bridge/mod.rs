//! Async bridging: suspends a caller until the peer re-enters with the
//! outcome.
//!
//! An async invoke is two one-way trips. The outbound request carries a
//! [`CallbackRef`], a channel whose only handler resumes the suspended
//! caller, and the immediate response merely acknowledges acceptance. The
//! peer runs the member body on its own runtime and completes the call by
//! dispatching back through the callback. A death hook on the outbound
//! channel covers the window where the peer dies mid-call; the
//! [`ResumptionToken`] guarantees the two resolution paths land exactly
//! once.

pub mod token;

pub use token::{CallOutcome, ResumptionToken};

use std::sync::Arc;

use crate::channel::interceptor::{CallbackInterceptor, InterceptorChain};
use crate::channel::{ChannelHandle, LocalChannel};
use crate::error::{ExecutionError, InterprocError, Result, UnreachableReason};
use crate::message::{FailureKind, Request, Response, Value};

/// Re-entry handle carried inside an async request.
///
/// The callee completes the call by dispatching the outcome back through
/// this reference. Cloning shares the same resumption target.
#[derive(Debug, Clone)]
pub struct CallbackRef {
    channel: ChannelHandle,
}

impl CallbackRef {
    pub(crate) fn new(channel: ChannelHandle) -> Self {
        Self { channel }
    }

    /// Deliver the outcome of the member body to the suspended caller.
    ///
    /// Arriving after the call was already resolved (peer death won the
    /// race) is a silent no-op on the caller's side.
    pub fn complete(&self, data: Option<Value>, error: Option<ExecutionError>) {
        let response = self.channel.dispatch(Request::AsyncCallback { data, error });
        if let Response::InternalFailure { notice } = response {
            tracing::warn!(message = %notice.message, "async completion could not be delivered");
        }
    }
}

/// Run one async invocation against `target`.
///
/// `build` receives the freshly minted callback and produces the outbound
/// request. The future resolves when the peer completes the call, when the
/// channel dies, or immediately if the peer answered without suspending.
pub(crate) async fn invoke_with_callback<F>(
    target: &ChannelHandle,
    build: F,
) -> Result<Option<Value>>
where
    F: FnOnce(CallbackRef) -> Request,
{
    let (token, receiver) = ResumptionToken::new();
    let token = Arc::new(token);

    let reply_chain = InterceptorChain::new();
    reply_chain.add(Arc::new(CallbackInterceptor::new(token.clone())));
    let callback = CallbackRef::new(ChannelHandle::Local(LocalChannel::from_chain(reply_chain)));

    let response = target.dispatch(build(callback));
    match response {
        // Acceptance: the member body is running on the peer; suspend until
        // the callback or a death hook resolves the token.
        Response::Invocation {
            result: None,
            error: None,
        } => {}
        // A transport-level failure says nothing about whether the peer
        // received the request; stay suspended and let death notification
        // resolve the call instead of guessing.
        Response::InternalFailure { notice } if notice.kind == FailureKind::Transport => {
            tracing::debug!(
                message = %notice.message,
                "transport failed mid-call; awaiting death notification"
            );
        }
        // Anything else resolved the call in the immediate response; seal
        // the token so a stray late callback cannot fire into a dead slot.
        other => {
            token.complete(CallOutcome::ChannelDied);
            return crate::channel::map_response(other);
        }
    }

    let hook_token = token.clone();
    let hook_id = target.link_to_death(Box::new(move || {
        hook_token.complete(CallOutcome::ChannelDied);
    }));

    let outcome = receiver.await;

    if let Some(id) = hook_id {
        target.unlink_to_death(id);
    }

    match outcome {
        Ok(CallOutcome::Completed {
            result,
            error: None,
        }) => Ok(result),
        Ok(CallOutcome::Completed {
            error: Some(error), ..
        }) => Err(InterprocError::Execution(error)),
        Ok(CallOutcome::ChannelDied) => {
            Err(InterprocError::Unreachable(UnreachableReason::ChannelDead))
        }
        // The peer dropped the callback without completing it.
        Err(_) => Err(InterprocError::Unreachable(UnreachableReason::ChannelDead)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RemoteChannel;
    use crate::service::{ServiceRegistry, ServiceTable};
    use crate::transport::InProcessTransport;
    use serde_json::json;
    use tokio::runtime::Handle;

    fn endpoint(services: Arc<ServiceRegistry>) -> ChannelHandle {
        ChannelHandle::Local(LocalChannel::new(services, Handle::current(), |_, _| {}))
    }

    fn async_services() -> Arc<ServiceRegistry> {
        let services = Arc::new(ServiceRegistry::new());
        services.put(
            ServiceTable::builder("demo.Async")
                .async_method("shout", |args| async move {
                    let word = args
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| ExecutionError::new("missing word"))?
                        .to_uppercase();
                    Ok(Some(json!(word)))
                })
                .async_method("stall", |_| async {
                    std::future::pending::<()>().await;
                    Ok(None)
                })
                .async_method("explode", |_| async { panic!("kaboom") })
                .build(),
        );
        services
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_invoke_completes_through_callback() {
        let target = endpoint(async_services());
        let result = target
            .invoke_reflective_async("demo.Async", "shout", vec![json!("hey")])
            .await
            .unwrap();
        assert_eq!(result, Some(json!("HEY")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_member_panic_resolves_with_execution_error() {
        let target = endpoint(async_services());
        let error = target
            .invoke_reflective_async("demo.Async", "explode", vec![])
            .await
            .unwrap_err();
        match error {
            InterprocError::Execution(execution) => assert_eq!(execution.message, "kaboom"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_invoke_missing_member_resolves_immediately() {
        let target = endpoint(async_services());
        let error = target
            .invoke_reflective_async("demo.Async", "absent", vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            InterprocError::Unreachable(UnreachableReason::DispatchNotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_invoke_over_dying_channel_resolves_as_dead() {
        let target_local = endpoint(async_services());
        let transport = InProcessTransport::new(target_local);
        let target = ChannelHandle::Remote(RemoteChannel::new(transport.clone()));

        let call = tokio::spawn({
            let target = target.clone();
            async move {
                target
                    .invoke_reflective_async("demo.Async", "stall", vec![])
                    .await
            }
        });

        // Let the call suspend before killing the channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        transport.sever();

        let error = call.await.unwrap().unwrap_err();
        assert!(matches!(
            error,
            InterprocError::Unreachable(UnreachableReason::ChannelDead)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_invoke_on_dead_channel_resolves_via_death_hook() {
        let transport = InProcessTransport::new(endpoint(async_services()));
        transport.sever();
        let target = ChannelHandle::Remote(RemoteChannel::new(transport));

        // The immediate response is a transport failure; the already-fired
        // death state resolves the suspension instead of hanging it.
        let error = target
            .invoke_reflective_async("demo.Async", "shout", vec![json!("x")])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            InterprocError::Unreachable(UnreachableReason::ChannelDead)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_late_callback_is_dropped() {
        let (token, receiver) = ResumptionToken::new();
        let token = Arc::new(token);
        let chain = InterceptorChain::new();
        chain.add(Arc::new(CallbackInterceptor::new(token.clone())));
        let callback = CallbackRef::new(ChannelHandle::Local(LocalChannel::from_chain(chain)));

        token.complete(CallOutcome::ChannelDied);
        // Must not panic and must not override the first resolution.
        callback.complete(Some(json!("late")), None);
        assert!(matches!(receiver.await.unwrap(), CallOutcome::ChannelDied));
    }
}
