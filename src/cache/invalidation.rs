//! Event-driven cache invalidation.
//!
//! Maps each contract event type to the cache tags and entry keys it makes
//! stale, and applies them through one of three strategies: immediately,
//! debounced per (chain, organizer) key, or batched with a size/time flush.

use crate::cache::keys::{chain_tag, event_tag, organizer_tag, CacheKey};
use crate::cache::store::{CacheStore, InvalidationRequest};
use crate::chain::events::{ContractEventData, EventKind};
use crate::chain::listener::EventCallback;
use alloy_primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

/// Capability to drop cache entries. The integrator depends on this rather
/// than on a concrete store so tests can observe invalidations directly.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Delete entries matching the request; returns distinct keys removed.
    async fn invalidate(&self, request: InvalidationRequest) -> usize;
}

#[async_trait]
impl<V> CacheInvalidator for CacheStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn invalidate(&self, request: InvalidationRequest) -> usize {
        CacheStore::invalidate(self, request).await
    }
}

/// What one event type makes stale.
#[derive(Debug, Clone, Copy)]
pub struct InvalidationRule {
    pub tags: &'static [&'static str],
    pub organizer_scoped: bool,
    pub event_scoped: bool,
}

/// Static event-type → invalidation mapping.
pub fn invalidation_rule(kind: EventKind) -> InvalidationRule {
    match kind {
        EventKind::EventCreated => InvalidationRule {
            tags: &["events", "organizer-events"],
            organizer_scoped: true,
            event_scoped: false,
        },
        EventKind::TicketPurchased => InvalidationRule {
            tags: &["events", "tickets"],
            organizer_scoped: true,
            event_scoped: true,
        },
        EventKind::EventStatusChanged => InvalidationRule {
            tags: &["events"],
            organizer_scoped: true,
            event_scoped: true,
        },
        EventKind::RevenueWithdrawn => InvalidationRule {
            tags: &["revenue", "organizer-profile"],
            organizer_scoped: true,
            event_scoped: false,
        },
    }
}

/// When invalidations are applied relative to the triggering event.
#[derive(Debug, Clone)]
pub enum InvalidationStrategy {
    /// Apply synchronously on every event.
    Immediate,
    /// Coalesce rapid-fire events; apply once the key has been quiet for
    /// `delay`.
    Debounced { delay: Duration },
    /// Accumulate per key and flush at `max_batch_size` events or after
    /// `flush_interval`, whichever comes first.
    Batched {
        max_batch_size: usize,
        flush_interval: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlushKey {
    chain_id: u64,
    organizer: Option<Address>,
}

/// Accumulated invalidation work for one flush key.
#[derive(Debug, Clone, Default)]
struct PendingInvalidation {
    tags: HashSet<String>,
    keys: HashSet<String>,
    events: usize,
}

impl PendingInvalidation {
    fn merge(&mut self, other: PendingInvalidation) {
        self.tags.extend(other.tags);
        self.keys.extend(other.keys);
    }

    fn into_request(self) -> InvalidationRequest {
        InvalidationRequest {
            keys: self.keys.into_iter().collect(),
            tags: self.tags.into_iter().collect(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct PendingFlush {
    pending: PendingInvalidation,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

type PendingMap = Arc<Mutex<HashMap<FlushKey, PendingFlush>>>;

/// Subscribes to the event stream and turns contract events into cache
/// invalidations under the configured strategy. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct CacheIntegrator {
    cache: Arc<dyn CacheInvalidator>,
    strategy: InvalidationStrategy,
    chain_id: Arc<RwLock<u64>>,
    pending: PendingMap,
}

impl CacheIntegrator {
    pub const LISTENER_ID: &'static str = "cache-invalidation";

    pub fn new(
        cache: Arc<dyn CacheInvalidator>,
        strategy: InvalidationStrategy,
        initial_chain: u64,
    ) -> Self {
        Self {
            cache,
            strategy,
            chain_id: Arc::new(RwLock::new(initial_chain)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The callback to register on the event listener.
    pub fn callback(&self) -> EventCallback {
        let integrator = self.clone();
        Arc::new(move |event| {
            let integrator = integrator.clone();
            Box::pin(async move {
                integrator.handle_event(&event).await;
                Ok(())
            })
        })
    }

    pub async fn handle_event(&self, event: &ContractEventData) {
        let chain_id = *self.chain_id.read().await;
        let rule = invalidation_rule(event.kind());
        let target = Self::target_for(chain_id, event, &rule);
        let key = FlushKey {
            chain_id,
            organizer: rule.organizer_scoped.then(|| event.organizer()),
        };

        match self.strategy.clone() {
            InvalidationStrategy::Immediate => self.apply(target).await,
            InvalidationStrategy::Debounced { delay } => {
                self.schedule_debounced(key, target, delay).await
            }
            InvalidationStrategy::Batched {
                max_batch_size,
                flush_interval,
            } => {
                self.schedule_batched(key, target, max_batch_size, flush_interval)
                    .await
            }
        }
    }

    fn target_for(
        chain_id: u64,
        event: &ContractEventData,
        rule: &InvalidationRule,
    ) -> PendingInvalidation {
        let mut target = PendingInvalidation::default();
        target
            .tags
            .extend(rule.tags.iter().map(|tag| tag.to_string()));
        if rule.organizer_scoped {
            let organizer = format!("{:?}", event.organizer());
            target.tags.insert(organizer_tag(&organizer));
            target
                .keys
                .insert(CacheKey::organizer_profile(chain_id, &organizer).to_string());
            target
                .keys
                .insert(CacheKey::organizer_events(chain_id, &organizer).to_string());
        }
        if rule.event_scoped {
            target.tags.insert(event_tag(event.event_id()));
            target
                .keys
                .insert(CacheKey::event_details(chain_id, event.event_id()).to_string());
        }
        target
    }

    async fn apply(&self, target: PendingInvalidation) {
        let removed = self.cache.invalidate(target.into_request()).await;
        debug!(removed, "applied cache invalidation");
    }

    async fn schedule_debounced(&self, key: FlushKey, target: PendingInvalidation, delay: Duration) {
        let mut pending = self.pending.lock().await;
        let state = pending.entry(key.clone()).or_default();
        state.pending.merge(target);
        state.generation += 1;
        // Every new event restarts the quiet-period timer.
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let generation = state.generation;
        let cache = self.cache.clone();
        let map = self.pending.clone();
        state.timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            Self::flush_if_current(cache, map, key, generation).await;
        }));
    }

    async fn schedule_batched(
        &self,
        key: FlushKey,
        target: PendingInvalidation,
        max_batch_size: usize,
        flush_interval: Duration,
    ) {
        let flush_now = {
            let mut pending = self.pending.lock().await;
            {
                let state = pending.entry(key.clone()).or_default();
                state.pending.merge(target);
                state.pending.events += 1;
            }
            let reached_limit = pending
                .get(&key)
                .is_some_and(|state| state.pending.events >= max_batch_size);
            if reached_limit {
                pending.remove(&key).map(|mut state| {
                    if let Some(timer) = state.timer.take() {
                        timer.abort();
                    }
                    state.pending
                })
            } else {
                if let Some(state) = pending.get_mut(&key) {
                    if state.timer.is_none() {
                        state.generation += 1;
                        let generation = state.generation;
                        let cache = self.cache.clone();
                        let map = self.pending.clone();
                        let key = key.clone();
                        state.timer = Some(tokio::spawn(async move {
                            sleep(flush_interval).await;
                            Self::flush_if_current(cache, map, key, generation).await;
                        }));
                    }
                }
                None
            }
        };
        if let Some(target) = flush_now {
            self.apply(target).await;
        }
    }

    /// Timer body: apply the key's pending work unless a newer schedule took
    /// over since this timer was armed.
    async fn flush_if_current(
        cache: Arc<dyn CacheInvalidator>,
        pending: PendingMap,
        key: FlushKey,
        generation: u64,
    ) {
        let target = {
            let mut pending = pending.lock().await;
            match pending.get(&key) {
                Some(state) if state.generation == generation => {
                    pending.remove(&key).map(|state| state.pending)
                }
                _ => None,
            }
        };
        if let Some(target) = target {
            let removed = cache.invalidate(target.into_request()).await;
            debug!(removed, "applied cache invalidation");
        }
    }

    /// Drop pending work for the old chain (its entries are about to go
    /// wholesale) and invalidate everything tagged for it. Re-subscription on
    /// the new chain is the registry's job; this keeps the cache consistent
    /// with the switch.
    pub async fn handle_network_switch(&self, old_chain: u64, new_chain: u64) {
        *self.chain_id.write().await = new_chain;
        {
            let mut pending = self.pending.lock().await;
            pending.retain(|key, state| {
                if key.chain_id == old_chain {
                    if let Some(timer) = state.timer.take() {
                        timer.abort();
                    }
                    false
                } else {
                    true
                }
            });
        }
        let removed = self
            .cache
            .invalidate(InvalidationRequest::by_tags([chain_tag(old_chain)]))
            .await;
        info!(
            from = old_chain,
            to = new_chain,
            removed,
            "invalidated old-chain cache entries after network switch"
        );
    }

    /// Apply everything still pending and cancel the timers. Staleness
    /// information is never dropped on shutdown.
    pub async fn shutdown(&self) {
        let states: Vec<PendingFlush> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, state)| state).collect()
        };
        let mut merged = PendingInvalidation::default();
        for mut state in states {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            merged.merge(state.pending);
        }
        if !merged.tags.is_empty() || !merged.keys.is_empty() {
            self.apply(merged).await;
        }
    }
}
