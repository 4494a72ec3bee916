//! Hub initialization configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{InterprocError, Result};
use crate::registry::BootstrapAdapter;

/// How long a connection attempt waits for the peer's handshake before
/// resolving as not-connected.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supplies the key naming the current process.
///
/// For most deployments the key is a literal handed to
/// [`HubConfig::builder`]; platforms that derive it at runtime (from the OS
/// process table, a manifest, an environment contract) plug in here.
pub trait ProcessIdentity: Send + Sync {
    /// The key naming the current process.
    fn process_key(&self) -> String;
}

impl ProcessIdentity for String {
    fn process_key(&self) -> String {
        self.clone()
    }
}

/// Validated configuration for one [`Hub`](crate::hub::Hub).
pub struct HubConfig {
    pub(crate) process_key: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) adapter: Option<Arc<dyn BootstrapAdapter>>,
    pub(crate) runtime: Option<Handle>,
}

impl HubConfig {
    /// Start building a configuration for the process named `process_key`.
    pub fn builder(process_key: impl Into<String>) -> HubConfigBuilder {
        HubConfigBuilder {
            process_key: process_key.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            adapter: None,
            runtime: None,
        }
    }

    /// The key identifying this process.
    pub fn process_key(&self) -> &str {
        &self.process_key
    }

    /// The configured connection attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Builder for [`HubConfig`].
pub struct HubConfigBuilder {
    process_key: String,
    connect_timeout: Duration,
    adapter: Option<Arc<dyn BootstrapAdapter>>,
    runtime: Option<Handle>,
}

impl HubConfigBuilder {
    /// Override the connection attempt timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Install the out-of-band bootstrap adapter.
    pub fn bootstrap_adapter(mut self, adapter: Arc<dyn BootstrapAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Take the process key from an identity provider instead of the
    /// literal handed to [`HubConfig::builder`].
    pub fn process_identity(mut self, identity: &dyn ProcessIdentity) -> Self {
        self.process_key = identity.process_key();
        self
    }

    /// Pin the runtime async member bodies are spawned onto. Defaults to
    /// the runtime the hub is created inside.
    pub fn runtime_handle(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<HubConfig> {
        if self.process_key.is_empty() {
            return Err(InterprocError::Configuration(
                "process key must not be empty".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(InterprocError::Configuration(
                "connect timeout must be positive".into(),
            ));
        }
        Ok(HubConfig {
            process_key: self.process_key,
            connect_timeout: self.connect_timeout,
            adapter: self.adapter,
            runtime: self.runtime,
        })
    }
}
