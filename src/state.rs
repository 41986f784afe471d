//! Top-level wiring of the service's shared components.

use crate::cache::invalidation::CacheIntegrator;
use crate::cache::storage::StorageBackend;
use crate::cache::store::CacheStore;
use crate::chain::client::RpcConnector;
use crate::chain::listener::EventFilter;
use crate::chain::registry::{GlobalListeners, ListenerRegistry, RegistryError};
use crate::config::Config;
use crate::updates::UpdateDispatcher;
use std::sync::Arc;
use tracing::info;

/// Shared application state: the cache, the per-chain listener registry, and
/// the two event-stream consumers. All ownership is explicit; dropping the
/// state tears everything down.
pub struct AppState {
    pub config: Config,
    pub cache: Arc<CacheStore<serde_json::Value>>,
    pub registry: Arc<ListenerRegistry>,
    pub listeners: Arc<GlobalListeners>,
    pub invalidation: CacheIntegrator,
    pub updates: UpdateDispatcher,
}

impl AppState {
    pub fn new(
        config: Config,
        connector: Arc<dyn RpcConnector>,
        storage: Option<Arc<dyn StorageBackend>>,
    ) -> Arc<Self> {
        let cache = CacheStore::new(config.cache_config(), storage);
        let registry = ListenerRegistry::new(&config, connector);
        let listeners = GlobalListeners::new(registry.clone(), config.default_chain_id);
        let invalidation =
            CacheIntegrator::new(cache.clone(), config.strategy(), config.default_chain_id);
        let updates = UpdateDispatcher::new();
        Arc::new(Self {
            config,
            cache,
            registry,
            listeners,
            invalidation,
            updates,
        })
    }

    /// Subscribe the cache integrator and the update dispatcher to the active
    /// chain's event stream.
    pub async fn start(&self) -> Result<(), RegistryError> {
        self.listeners
            .add_listener(
                CacheIntegrator::LISTENER_ID,
                self.invalidation.callback(),
                EventFilter::default(),
            )
            .await?;
        self.listeners
            .add_listener(
                UpdateDispatcher::LISTENER_ID,
                self.updates.callback(),
                EventFilter::default(),
            )
            .await?;
        let chain = self.listeners.active_chain().await;
        info!(chain, "event pipeline started");
        Ok(())
    }

    /// Move every registration to `new_chain` and drop the old chain's cached
    /// data.
    pub async fn switch_chain(&self, new_chain: u64) -> Result<(), RegistryError> {
        let old_chain = self.listeners.active_chain().await;
        if old_chain == new_chain {
            return Ok(());
        }
        self.listeners.switch_chain(new_chain).await?;
        self.invalidation
            .handle_network_switch(old_chain, new_chain)
            .await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.registry.destroy_all().await;
        self.invalidation.shutdown().await;
        self.cache.destroy().await;
        info!("event pipeline shut down");
    }
}
