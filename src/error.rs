//! Error types for interproc.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error carried back from a callee whose member body failed.
///
/// This is the only error that crosses the call boundary as data: the callee
/// ran, its implementation raised, and the caller observes the same failure.
/// It is structurally distinct from "the callee was never reached".
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionError {
    /// Human-readable description of the callee-side failure.
    pub message: String,
}

impl ExecutionError {
    /// Create a new execution error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a destination could not serve a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    /// No live connection could be established to the destination.
    NotConnected,
    /// The channel died before or during the call.
    ChannelDead,
    /// The peer's dispatch table had no match for the request.
    DispatchNotFound,
}

impl std::fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no live connection"),
            Self::ChannelDead => write!(f, "channel dead"),
            Self::DispatchNotFound => write!(f, "no dispatch target"),
        }
    }
}

/// Main error type for all interproc operations.
#[derive(Debug, Error)]
pub enum InterprocError {
    /// The callee ran and its member body failed. Rethrown verbatim to the
    /// caller; never swallowed by fallback.
    #[error("remote execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// The destination could not serve the call. Recovered locally through
    /// the fallback policy wherever one exists.
    #[error("destination unreachable: {0}")]
    Unreachable(UnreachableReason),

    /// The call failed inside the transport before reaching the callee.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A non-null member contract was broken with no fallback available, or
    /// the runtime was configured incompletely.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using InterprocError.
pub type Result<T> = std::result::Result<T, InterprocError>;
