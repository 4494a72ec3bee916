//! Request and response variant sets for the call boundary.
//!
//! Both sets are closed: every request kind a channel can carry is listed
//! here, variants are disjoint by construction, and dispatch never needs
//! tie-breaking. Handshake requests carry a live channel handle and async
//! requests carry a callback reference, mirroring how the out-of-band
//! bootstrap hands object references across the boundary.

use crate::bridge::CallbackRef;
use crate::channel::ChannelHandle;
use crate::error::ExecutionError;

/// Dynamic argument/result value carried in envelopes.
pub type Value = serde_json::Value;

/// A request understood by a channel's interceptor chain.
#[derive(Debug, Clone)]
pub enum Request {
    /// Handle sharing: the sender's key plus a channel calling back into it.
    /// Receipt triggers immediate return of the receiver's own handle,
    /// completing a bound pair in one exchange.
    Handshake {
        process_key: String,
        channel: ChannelHandle,
    },
    /// Invoke a named member through the receiver's member table.
    ReflectiveInvoke {
        interface: String,
        method: String,
        args: Vec<Value>,
    },
    /// Asynchronous flavor of [`Request::ReflectiveInvoke`]; completion
    /// arrives through `callback`, not through the immediate response.
    ReflectiveAsyncInvoke {
        interface: String,
        method: String,
        args: Vec<Value>,
        callback: CallbackRef,
    },
    /// Invoke a named member through the receiver's generated stub,
    /// bypassing the member table on hot call sites.
    DirectInvoke {
        interface: String,
        method: String,
        args: Vec<Value>,
    },
    /// Asynchronous flavor of [`Request::DirectInvoke`].
    DirectAsyncInvoke {
        interface: String,
        method: String,
        args: Vec<Value>,
        callback: CallbackRef,
    },
    /// Resumes one in-flight asynchronous call on the caller's side.
    AsyncCallback {
        data: Option<Value>,
        error: Option<ExecutionError>,
    },
}

impl Request {
    /// Short name of the request kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::ReflectiveInvoke { .. } => "reflective_invoke",
            Self::ReflectiveAsyncInvoke { .. } => "reflective_async_invoke",
            Self::DirectInvoke { .. } => "direct_invoke",
            Self::DirectAsyncInvoke { .. } => "direct_async_invoke",
            Self::AsyncCallback { .. } => "async_callback",
        }
    }
}

/// What went wrong below the callee's member body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No handler or member matched the request. Callers treat this
    /// identically to "peer unreachable".
    DispatchNotFound,
    /// The transport itself failed before the request reached a handler.
    Transport,
}

/// Detail attached to an internal failure response.
#[derive(Debug, Clone)]
pub struct FailureNotice {
    pub kind: FailureKind,
    pub message: String,
}

/// A response to one request.
#[derive(Debug, Clone)]
pub enum Response {
    /// The request reached a handler. `error` carries a callee-side failure;
    /// it is never used for transport-level problems.
    Invocation {
        result: Option<Value>,
        error: Option<ExecutionError>,
    },
    /// The request never reached a handler. Kept structurally distinct from
    /// a carried execution error so callers never confuse "never reached the
    /// callee" with "callee ran and failed".
    InternalFailure { notice: FailureNotice },
}

impl Response {
    /// Successful invocation carrying an optional result.
    pub fn ok(result: Option<Value>) -> Self {
        Self::Invocation {
            result,
            error: None,
        }
    }

    /// Invocation whose member body failed.
    pub fn failed(error: ExecutionError) -> Self {
        Self::Invocation {
            result: None,
            error: Some(error),
        }
    }

    /// No dispatch target matched.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::InternalFailure {
            notice: FailureNotice {
                kind: FailureKind::DispatchNotFound,
                message: message.into(),
            },
        }
    }

    /// The transport failed before the request reached the peer.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::InternalFailure {
            notice: FailureNotice {
                kind: FailureKind::Transport,
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_kind_names() {
        let req = Request::ReflectiveInvoke {
            interface: "svc".into(),
            method: "m".into(),
            args: vec![json!(1)],
        };
        assert_eq!(req.kind(), "reflective_invoke");

        let req = Request::AsyncCallback {
            data: None,
            error: None,
        };
        assert_eq!(req.kind(), "async_callback");
    }

    #[test]
    fn test_response_constructors() {
        match Response::ok(Some(json!("hi"))) {
            Response::Invocation { result, error } => {
                assert_eq!(result, Some(json!("hi")));
                assert!(error.is_none());
            }
            _ => panic!("expected invocation"),
        }

        match Response::not_found("no handler") {
            Response::InternalFailure { notice } => {
                assert_eq!(notice.kind, FailureKind::DispatchNotFound);
            }
            _ => panic!("expected internal failure"),
        }

        match Response::transport_failure("severed") {
            Response::InternalFailure { notice } => {
                assert_eq!(notice.kind, FailureKind::Transport);
            }
            _ => panic!("expected internal failure"),
        }
    }
}
