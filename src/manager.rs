use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::dispatcher::ReadyLatch;
use crate::error::{HostError, RelayError};
use crate::host::CommandHost;
use crate::protocol::AppInfo;
use crate::registry::CatalogBuilder;
use crate::sources::RemoteSource;

// ── Command manager ─────────────────────────────────────────────

/// Process-wide façade over the host. Owns the catalog builder (and with it
/// the skip-set) and the registry of named transport sources.
pub struct RemoteCommandManager {
    host: Arc<dyn CommandHost>,
    catalog: CatalogBuilder,
    sources: Mutex<IndexMap<String, Arc<dyn RemoteSource>>>,
    ready: ReadyLatch,
}

impl RemoteCommandManager {
    /// Create the manager and start waiting for the host in the background.
    /// Must be called from within a tokio runtime. A failed start is logged
    /// and leaves the manager permanently not ready.
    pub fn new(host: Arc<dyn CommandHost>) -> Arc<Self> {
        let manager = Arc::new(Self {
            host,
            catalog: CatalogBuilder::new(),
            sources: Mutex::new(IndexMap::new()),
            ready: ReadyLatch::new(),
        });

        let host = manager.host.clone();
        let ready = manager.ready.clone();
        tokio::spawn(async move {
            match host.started().await {
                Ok(()) => {
                    info!(app = %host.name(), "Host started");
                    ready.resolve();
                }
                Err(e) => error!(app = %host.name(), error = %e, "Host failed to start"),
            }
        });

        manager
    }

    pub fn host(&self) -> &Arc<dyn CommandHost> {
        &self.host
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Resolves once the host has started.
    pub async fn wait_ready(&self) {
        self.ready.wait().await;
    }

    // ── Sources ─────────────────────────────────────────────────

    /// Register a transport under `name`. A name can only be registered
    /// once; the existing registration is left untouched on conflict.
    pub fn add_source(&self, name: &str, source: Arc<dyn RemoteSource>) -> Result<(), RelayError> {
        let mut sources = self.sources.lock();
        if sources.contains_key(name) {
            return Err(RelayError::DuplicateSource(name.to_string()));
        }
        info!(source = name, kind = %source.kind(), "Registered source");
        sources.insert(name.to_string(), source);
        Ok(())
    }

    /// Unregister and close a source. Returns whether one was registered.
    pub fn remove_source(&self, name: &str) -> bool {
        let removed = self.sources.lock().shift_remove(name);
        match removed {
            Some(source) => {
                source.close();
                info!(source = name, "Removed source");
                true
            }
            None => false,
        }
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn RemoteSource>> {
        self.sources.lock().get(name).cloned()
    }

    /// Registered source names, in registration order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.lock().keys().cloned().collect()
    }

    // ── Operations ──────────────────────────────────────────────

    /// Identity plus a freshly probed catalog. Never cached.
    pub fn get_app_info(&self) -> AppInfo {
        AppInfo {
            name: self.host.name(),
            title: self.host.title(),
            version: self.host.version(),
            url: self.host.url(),
            plugins: self.host.plugins(),
            commands: self.catalog.build(self.host.as_ref()),
        }
    }

    /// Execute a host command. Host failures are returned untranslated.
    pub async fn run(&self, command_id: &str, args: Map<String, Value>) -> Result<Value, HostError> {
        self.host.execute(command_id, args).await
    }
}
