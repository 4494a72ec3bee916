//! One-shot resumption token for suspended calls.
//!
//! Several parties may race to resolve one suspended call: the peer's
//! completion callback, a death hook, and a late duplicate callback. The
//! token serializes them: whoever takes the sender first wins, everyone
//! else observes a no-op.

use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::ExecutionError;
use crate::message::Value;

/// How a suspended call ended.
#[derive(Debug)]
pub enum CallOutcome {
    /// The peer's member body ran to completion (possibly with a carried
    /// failure).
    Completed {
        result: Option<Value>,
        error: Option<ExecutionError>,
    },
    /// The channel died while the call was suspended.
    ChannelDied,
}

/// Resolves one suspended call exactly once.
pub struct ResumptionToken {
    sender: Mutex<Option<oneshot::Sender<CallOutcome>>>,
}

impl ResumptionToken {
    /// Create a token and the receiver its outcome arrives on.
    pub fn new() -> (Self, oneshot::Receiver<CallOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }

    /// Resolve the call. Returns `true` if this call won the race; `false`
    /// if the token was already resolved.
    pub fn complete(&self, outcome: CallOutcome) -> bool {
        let sender = self.sender.lock().unwrap().take();
        match sender {
            // A dropped receiver means the caller is gone; resolution still
            // counts, the outcome just has no audience.
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Whether the token has already been resolved.
    pub fn is_resolved(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }
}
