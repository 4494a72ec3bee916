//! Inter-process interface-call runtime.
//!
//! `interproc` lets a process register interface implementations and call
//! interfaces hosted by other processes through ordinary-looking proxies.
//! Each process owns a [`Hub`]; hubs find each other through a pluggable
//! out-of-band bootstrap, exchange channel handles in a single handshake,
//! and deduplicate concurrent connection attempts so each peer pair holds
//! exactly one channel.
//!
//! Calls resolve against a dual target: the hub's own endpoint when the
//! destination is the calling process, an established remote channel
//! otherwise. Synchronous members return in the immediate response; async
//! members suspend the caller until the peer re-enters through a callback
//! channel, with peer death resolving the call instead of leaving it
//! hanging. Unreachable destinations can be served a configured fallback
//! value, while callee-side execution failures are rethrown to the caller
//! unless the hub's root exception handler swallows them.
//!
//! # Example
//!
//! ```no_run
//! use interproc::{Hub, HubConfig, ServiceTable};
//! use serde_json::json;
//!
//! # async fn run() -> interproc::Result<()> {
//! let hub = Hub::new(HubConfig::builder("app").build()?)?;
//! hub.register_service(
//!     ServiceTable::builder("demo.Greeter")
//!         .sync_method("greet", |_| Ok(Some(json!("hello"))))
//!         .build(),
//! );
//!
//! let greeter = hub.proxy("app", "demo.Greeter").build();
//! let greeting = greeter.invoke("greet", vec![]).await?;
//! assert_eq!(greeting, Some(json!("hello")));
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod invocation;
pub mod message;
pub mod registry;
pub mod service;
pub mod transport;

pub use bridge::{CallOutcome, CallbackRef, ResumptionToken};
pub use channel::{ChannelHandle, LocalChannel, RemoteChannel};
pub use config::{HubConfig, HubConfigBuilder, ProcessIdentity, DEFAULT_CONNECT_TIMEOUT};
pub use envelope::{ParameterEnvelope, ParameterPool};
pub use error::{ExecutionError, InterprocError, Result, UnreachableReason};
pub use hub::{Hub, ProxyAdapter};
pub use invocation::{ExceptionHandler, FallbackFn, InvocationHandle, ProxyBuilder};
pub use message::{FailureKind, FailureNotice, Request, Response, Value};
pub use registry::{BootstrapAdapter, ConnectionRegistry};
pub use service::{
    BoxFuture, DirectStub, MethodResult, ServiceRegistry, ServiceTable, ServiceTableBuilder,
};
pub use transport::{CallTransport, DeathHook, HookId, InProcessTransport};
