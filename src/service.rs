//! Implementation registry and per-interface member tables.
//!
//! Member resolution happens against a table built once at registration
//! time, not by reflecting over anything at call time. A registered
//! interface carries a [`ServiceTable`] (named sync and async members bound
//! to the implementation) and optionally a generated [`DirectStub`] used by
//! the direct dispatch path.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::error::ExecutionError;
use crate::message::Value;

/// Boxed future for async member results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of invoking one member: an optional value, or the callee-side
/// failure carried back to the caller.
pub type MethodResult = std::result::Result<Option<Value>, ExecutionError>;

type SyncMethod = Box<dyn Fn(&[Value]) -> MethodResult + Send + Sync>;
type AsyncMethod = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// Per-interface member dispatch table.
///
/// Built once per interface; the registered closures capture the
/// implementation instance.
pub struct ServiceTable {
    interface: String,
    sync_methods: HashMap<String, SyncMethod>,
    async_methods: HashMap<String, AsyncMethod>,
}

impl ServiceTable {
    /// Start building a table for the named interface.
    pub fn builder(interface: impl Into<String>) -> ServiceTableBuilder {
        ServiceTableBuilder {
            table: ServiceTable {
                interface: interface.into(),
                sync_methods: HashMap::new(),
                async_methods: HashMap::new(),
            },
        }
    }

    /// The interface name this table serves.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Invoke a named sync member. `None` means the member is unknown.
    pub fn invoke_sync(&self, method: &str, args: &[Value]) -> Option<MethodResult> {
        self.sync_methods.get(method).map(|member| member(args))
    }

    /// Build the future for a named async member without running it.
    /// `None` means the member is unknown.
    pub fn prepare_async(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Option<BoxFuture<'static, MethodResult>> {
        self.async_methods.get(method).map(|member| member(args))
    }
}

/// Fluent builder for [`ServiceTable`].
pub struct ServiceTableBuilder {
    table: ServiceTable,
}

impl ServiceTableBuilder {
    /// Register a synchronous member.
    pub fn sync_method<F>(mut self, name: impl Into<String>, member: F) -> Self
    where
        F: Fn(&[Value]) -> MethodResult + Send + Sync + 'static,
    {
        self.table.sync_methods.insert(name.into(), Box::new(member));
        self
    }

    /// Register an asynchronous single-result member.
    pub fn async_method<F, Fut>(mut self, name: impl Into<String>, member: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.table
            .async_methods
            .insert(name.into(), Box::new(move |args| Box::pin(member(args))));
        self
    }

    /// Finish the table.
    pub fn build(self) -> ServiceTable {
        self.table
    }
}

/// Generated direct-dispatch stub contract.
///
/// A code generator (or a hand-written adapter) implements this per
/// interface over the registered implementation instance; the local channel
/// uses it for direct requests, trading generality for a table-free hot
/// path. `None` means the member is unknown to the stub and the caller
/// treats it identically to an unreachable peer.
pub trait DirectStub: Send + Sync {
    /// Invoke a synchronous member by name.
    fn invoke_sync(&self, method: &str, args: &[Value]) -> Option<MethodResult>;

    /// Build the future for an asynchronous member by name.
    fn invoke_async(&self, method: &str, args: Vec<Value>)
        -> Option<BoxFuture<'static, MethodResult>>;
}

struct ServiceEntry {
    table: Arc<ServiceTable>,
    direct: Option<Arc<dyn DirectStub>>,
}

/// Interface name → implementation map.
///
/// Shared by every local channel of one hub; lookups are lock-scoped to the
/// map access, member bodies run outside the lock.
pub struct ServiceRegistry {
    entries: Mutex<HashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) an implementation table.
    pub fn put(&self, table: ServiceTable) {
        self.put_entry(table, None);
    }

    /// Register an implementation table together with its generated stub.
    pub fn put_with_direct(&self, table: ServiceTable, stub: Arc<dyn DirectStub>) {
        self.put_entry(table, Some(stub));
    }

    fn put_entry(&self, table: ServiceTable, direct: Option<Arc<dyn DirectStub>>) {
        let interface = table.interface().to_string();
        self.entries.lock().unwrap().insert(
            interface,
            ServiceEntry {
                table: Arc::new(table),
                direct,
            },
        );
    }

    /// Look up the member table for an interface.
    pub fn table(&self, interface: &str) -> Option<Arc<ServiceTable>> {
        self.entries
            .lock()
            .unwrap()
            .get(interface)
            .map(|entry| entry.table.clone())
    }

    /// Look up the generated stub for an interface, if one was registered.
    pub fn direct_stub(&self, interface: &str) -> Option<Arc<dyn DirectStub>> {
        self.entries
            .lock()
            .unwrap()
            .get(interface)
            .and_then(|entry| entry.direct.clone())
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
