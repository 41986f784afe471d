//! Listener registry: one listener service per chain.
//!
//! The registry owns every per-chain [`ListenerService`] explicitly; nothing
//! here is process-global, so tests construct and drop registries freely.
//! [`GlobalListeners`] sits on top and keeps subscriptions attached to the
//! active chain across network switches.

use crate::chain::client::{ClientError, RpcConnector};
use crate::chain::listener::{EventCallback, EventFilter, ListenerService};
use crate::config::{ChainConfig, Config};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unsupported chain id: {0}")]
    UnsupportedChain(u64),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A listener registration that can be carried across chain switches.
#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub callback: EventCallback,
    pub filter: EventFilter,
}

/// Aggregated status of one chain's listener service.
#[derive(Debug, Clone)]
pub struct ListenerStatus {
    pub chain_id: u64,
    pub listening: bool,
    pub listener_count: usize,
    pub last_processed_block: u64,
}

pub struct ListenerRegistry {
    chains: HashMap<u64, ChainConfig>,
    connector: Arc<dyn RpcConnector>,
    poll_interval: Duration,
    services: RwLock<HashMap<u64, Arc<ListenerService>>>,
}

impl ListenerRegistry {
    pub fn new(config: &Config, connector: Arc<dyn RpcConnector>) -> Arc<Self> {
        let chains = config
            .chains
            .iter()
            .map(|chain| (chain.chain_id, chain.clone()))
            .collect();
        Arc::new(Self {
            chains,
            connector,
            poll_interval: config.poll_interval,
            services: RwLock::new(HashMap::new()),
        })
    }

    /// The listener service for a chain, created lazily on first use.
    /// Unknown chain ids fail synchronously and leave no shared state behind.
    pub async fn service(&self, chain_id: u64) -> Result<Arc<ListenerService>, RegistryError> {
        if let Some(service) = self.services.read().await.get(&chain_id) {
            return Ok(service.clone());
        }

        let chain = self
            .chains
            .get(&chain_id)
            .ok_or(RegistryError::UnsupportedChain(chain_id))?;
        let rpc = self.connector.connect(chain)?;

        let mut services = self.services.write().await;
        // Another caller may have created it while we connected.
        if let Some(service) = services.get(&chain_id) {
            return Ok(service.clone());
        }
        let service = ListenerService::new(chain_id, chain.contract_address, rpc, self.poll_interval);
        services.insert(chain_id, service.clone());
        debug!(chain = chain_id, "created listener service");
        Ok(service)
    }

    pub async fn add_listener(
        &self,
        chain_id: u64,
        id: &str,
        callback: EventCallback,
        filter: EventFilter,
    ) -> Result<(), RegistryError> {
        let service = self.service(chain_id).await?;
        service.add_listener(id, callback, filter).await;
        Ok(())
    }

    /// Remove a listener from a chain; when it was the last one, the chain's
    /// service is torn down and dropped from the registry.
    pub async fn remove_listener(&self, chain_id: u64, id: &str) -> bool {
        let service = match self.services.read().await.get(&chain_id) {
            Some(service) => service.clone(),
            None => return false,
        };
        let removed = service.remove_listener(id).await;
        if removed && service.listener_count().await == 0 {
            self.destroy(chain_id).await;
        }
        removed
    }

    /// Tear down one chain's service: stop its timer and clear subscribers.
    pub async fn destroy(&self, chain_id: u64) -> bool {
        let service = self.services.write().await.remove(&chain_id);
        match service {
            Some(service) => {
                service.destroy().await;
                debug!(chain = chain_id, "destroyed listener service");
                true
            }
            None => false,
        }
    }

    pub async fn destroy_all(&self) {
        let services: Vec<_> = self.services.write().await.drain().collect();
        for (_, service) in services {
            service.destroy().await;
        }
    }

    /// Tear down the old chain's service and re-register the given
    /// subscriptions against a fresh service on the new chain. Cursor state
    /// does not carry over: the new service starts from the new chain's head,
    /// so there is no backfill across switches.
    pub async fn handle_network_switch(
        &self,
        old_chain: u64,
        new_chain: u64,
        subscriptions: Vec<Subscription>,
    ) -> Result<Arc<ListenerService>, RegistryError> {
        self.destroy(old_chain).await;
        let service = self.service(new_chain).await?;
        for sub in subscriptions {
            service.add_listener(&sub.id, sub.callback, sub.filter).await;
        }
        info!(from = old_chain, to = new_chain, "migrated listeners to new chain");
        Ok(service)
    }

    pub async fn status(&self) -> Vec<ListenerStatus> {
        let services: Vec<_> = self
            .services
            .read()
            .await
            .iter()
            .map(|(id, service)| (*id, service.clone()))
            .collect();
        let mut statuses = Vec::with_capacity(services.len());
        for (chain_id, service) in services {
            statuses.push(ListenerStatus {
                chain_id,
                listening: service.is_listening().await,
                listener_count: service.listener_count().await,
                last_processed_block: service.last_processed_block().await,
            });
        }
        statuses.sort_by_key(|status| status.chain_id);
        statuses
    }
}

/// Chain-following subscriptions. Registrations made here are remembered and
/// automatically re-registered when the active chain changes, so call sites
/// never manage re-subscription themselves.
pub struct GlobalListeners {
    registry: Arc<ListenerRegistry>,
    active_chain: RwLock<u64>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl GlobalListeners {
    pub fn new(registry: Arc<ListenerRegistry>, initial_chain: u64) -> Arc<Self> {
        Arc::new(Self {
            registry,
            active_chain: RwLock::new(initial_chain),
            subscriptions: RwLock::new(Vec::new()),
        })
    }

    pub async fn active_chain(&self) -> u64 {
        *self.active_chain.read().await
    }

    pub async fn add_listener(
        &self,
        id: &str,
        callback: EventCallback,
        filter: EventFilter,
    ) -> Result<(), RegistryError> {
        let chain = self.active_chain().await;
        self.registry
            .add_listener(chain, id, callback.clone(), filter.clone())
            .await?;

        let mut subs = self.subscriptions.write().await;
        match subs.iter_mut().find(|sub| sub.id == id) {
            Some(existing) => {
                existing.callback = callback;
                existing.filter = filter;
            }
            None => subs.push(Subscription {
                id: id.to_string(),
                callback,
                filter,
            }),
        }
        Ok(())
    }

    pub async fn remove_listener(&self, id: &str) -> bool {
        self.subscriptions.write().await.retain(|sub| sub.id != id);
        let chain = self.active_chain().await;
        self.registry.remove_listener(chain, id).await
    }

    /// Switch every remembered subscription over to `new_chain`.
    pub async fn switch_chain(&self, new_chain: u64) -> Result<(), RegistryError> {
        let old_chain = {
            let mut active = self.active_chain.write().await;
            let old = *active;
            *active = new_chain;
            old
        };
        if old_chain == new_chain {
            return Ok(());
        }
        let subscriptions = self.subscriptions.read().await.clone();
        self.registry
            .handle_network_switch(old_chain, new_chain, subscriptions)
            .await?;
        Ok(())
    }
}
