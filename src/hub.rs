//! The per-process hub: one identity, one endpoint channel, one
//! implementation registry, one connection registry.
//!
//! A hub is created from a validated [`HubConfig`] and hands out
//! [`InvocationHandle`] proxies through [`Hub::proxy`]. Its endpoint
//! channel answers handshakes by recording the peer's channel and, when
//! this side did not initiate the exchange, replying with its own handle so
//! both directions end up bound.

use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;

use crate::channel::{ChannelHandle, LocalChannel};
use crate::config::HubConfig;
use crate::error::{InterprocError, Result};
use crate::invocation::{HandlerSlot, InvocationHandle, ProxyBuilder};
use crate::registry::ConnectionRegistry;
use crate::service::{DirectStub, ServiceRegistry, ServiceTable};

/// Generated typed-proxy contract.
///
/// A code generator (or a hand-written adapter) implements this per
/// interface: a thin wrapper whose methods delegate to the carried
/// [`InvocationHandle`] with the right member names and argument encoding.
pub trait ProxyAdapter: Sized {
    /// The interface name this proxy speaks for.
    const INTERFACE: &'static str;

    /// Wrap a configured invocation handle.
    fn from_handle(handle: InvocationHandle) -> Self;
}

struct HubInner {
    self_key: String,
    services: Arc<ServiceRegistry>,
    connections: ConnectionRegistry,
    runtime: Handle,
    local: ChannelHandle,
    exception_handler: HandlerSlot,
}

/// Entry point for one process's interface-call runtime.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub from a validated configuration.
    ///
    /// Fails with a configuration error when no runtime handle was supplied
    /// and the caller is not inside one.
    pub fn new(config: HubConfig) -> Result<Self> {
        let runtime = match config.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                InterprocError::Configuration(
                    "hub requires a runtime handle or creation inside a runtime".into(),
                )
            })?,
        };

        let services = Arc::new(ServiceRegistry::new());
        let connections = ConnectionRegistry::new(config.process_key.clone(), config.connect_timeout);
        if let Some(adapter) = config.adapter {
            connections.set_adapter(adapter);
        }

        let local = {
            let connections = connections.clone();
            let reply_key = config.process_key.clone();
            let services = services.clone();
            let runtime = runtime.clone();
            Arc::new_cyclic(move |weak: &Weak<LocalChannel>| {
                let weak = weak.clone();
                LocalChannel::assemble(services, runtime, move |peer_key, channel| {
                    let initiated = connections.pending_contains(&peer_key);
                    let already = connections.is_connected(&peer_key);
                    connections.establish(peer_key.clone(), channel.clone());
                    // Reply with our own handle only when the peer started
                    // this exchange and neither side was bound yet; anything
                    // else would ping-pong handshakes forever.
                    if !initiated && !already {
                        if let Some(me) = weak.upgrade() {
                            channel.send_handshake(reply_key.clone(), ChannelHandle::Local(me));
                        }
                    }
                })
            })
        };

        tracing::info!(process_key = %config.process_key, "hub initialized");
        Ok(Self {
            inner: Arc::new(HubInner {
                self_key: config.process_key,
                services,
                connections,
                runtime,
                local: ChannelHandle::Local(local),
                exception_handler: Arc::new(Mutex::new(None)),
            }),
        })
    }

    /// The key identifying this process.
    pub fn process_key(&self) -> &str {
        &self.inner.self_key
    }

    /// This hub's endpoint channel, for bootstrap adapters and transports
    /// that need to deliver requests into the hub.
    pub fn local_channel(&self) -> ChannelHandle {
        self.inner.local.clone()
    }

    /// Register (or replace) an interface implementation.
    pub fn register_service(&self, table: ServiceTable) {
        tracing::debug!(interface = table.interface(), "service registered");
        self.inner.services.put(table);
    }

    /// Register an implementation together with its generated direct stub.
    pub fn register_service_with_direct(&self, table: ServiceTable, stub: Arc<dyn DirectStub>) {
        tracing::debug!(interface = table.interface(), "service registered with direct stub");
        self.inner.services.put_with_direct(table, stub);
    }

    /// Install the hub-wide root exception handler, ruling on local and
    /// transport failures for every proxy. Returning `true` swallows the
    /// failure and the call degrades through its fallback policy.
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&InterprocError) -> bool + Send + Sync + 'static,
    {
        *self.inner.exception_handler.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Record a peer channel directly, bypassing the handshake path. Meant
    /// for adapters that complete the bootstrap themselves.
    pub fn establish(&self, peer_key: impl Into<String>, channel: ChannelHandle) {
        self.inner.connections.establish(peer_key, channel);
    }

    /// Ensure a connection to `dest_key`; `Ok(false)` means the attempt
    /// timed out.
    pub async fn connect(&self, dest_key: &str) -> Result<bool> {
        self.inner.connections.connect(dest_key).await
    }

    /// Whether a live channel to `dest_key` is currently held.
    pub fn is_connected(&self, dest_key: &str) -> bool {
        self.inner.connections.is_connected(dest_key)
    }

    /// Produce a generated typed proxy for its interface on `dest_key`.
    ///
    /// `configure` receives the underlying builder for fallback, dispatch,
    /// and handler options; pass `|b| b` for defaults.
    pub fn get_service<P, F>(&self, dest_key: impl Into<String>, configure: F) -> P
    where
        P: ProxyAdapter,
        F: FnOnce(ProxyBuilder) -> ProxyBuilder,
    {
        P::from_handle(configure(self.proxy(dest_key, P::INTERFACE)).build())
    }

    /// Start building a call proxy for `interface` on `dest_key`.
    pub fn proxy(&self, dest_key: impl Into<String>, interface: impl Into<String>) -> ProxyBuilder {
        ProxyBuilder::new(
            self.inner.self_key.clone(),
            dest_key.into(),
            interface.into(),
            self.inner.connections.clone(),
            self.inner.local.clone(),
            self.inner.runtime.clone(),
            self.inner.exception_handler.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hub(key: &str) -> Hub {
        Hub::new(HubConfig::builder(key).build().unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_proxy_round_trip() {
        let hub = hub("app");
        hub.register_service(
            ServiceTable::builder("demo.Greeter")
                .sync_method("greet", |_| Ok(Some(json!("hello"))))
                .build(),
        );

        let proxy = hub.proxy("app", "demo.Greeter").build();
        assert_eq!(
            proxy.invoke("greet", vec![]).await.unwrap(),
            Some(json!("hello"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handshake_binds_and_replies() {
        let a = hub("a");
        let b = hub("b");

        // Deliver b's handshake into a's endpoint; a should bind b and
        // reply, binding itself on b's side too.
        a.local_channel()
            .send_handshake("b", b.local_channel());

        assert!(a.is_connected("b"));
        assert!(b.is_connected("a"));
    }

    struct GreeterProxy {
        handle: InvocationHandle,
    }

    impl ProxyAdapter for GreeterProxy {
        const INTERFACE: &'static str = "demo.Greeter";

        fn from_handle(handle: InvocationHandle) -> Self {
            Self { handle }
        }
    }

    impl GreeterProxy {
        async fn greet(&self) -> crate::error::Result<Option<crate::message::Value>> {
            self.handle.invoke("greet", vec![]).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generated_proxy_adapter() {
        let hub = hub("app");
        hub.register_service(
            ServiceTable::builder("demo.Greeter")
                .sync_method("greet", |_| Ok(Some(json!("hi"))))
                .build(),
        );

        let greeter: GreeterProxy = hub.get_service("app", |builder| builder);
        assert_eq!(greeter.greet().await.unwrap(), Some(json!("hi")));
    }

    #[test]
    fn test_hub_outside_runtime_needs_handle() {
        assert!(matches!(
            Hub::new(HubConfig::builder("app").build().unwrap()),
            Err(InterprocError::Configuration(_))
        ));
    }
}
