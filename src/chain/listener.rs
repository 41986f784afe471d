//! Per-chain contract event listener.
//!
//! A [`ListenerService`] is idle until its first subscriber arrives, polls the
//! chain on a fixed interval while it has subscribers, and goes idle again
//! when the last one leaves. Each poll cycle reads the head block, fetches the
//! four event types over the unseen range, orders the logs by
//! `(block, log_index)`, decodes them, and fans each event out to every
//! registered listener whose filter matches. The cursor only advances after
//! the whole batch has been dispatched, so a cycle abandoned mid-way is
//! replayed rather than skipped.

use crate::chain::client::{ChainRpc, ClientError, LogQuery};
use crate::chain::events::{decode_log, ChainLog, ContractEventData, EventKind};
use alloy_primitives::Address;
use futures::future::{join_all, BoxFuture};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback. May suspend; failures are isolated per invocation.
pub type EventCallback =
    Arc<dyn Fn(ContractEventData) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Wrap an async closure into an [`EventCallback`].
pub fn event_callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(ContractEventData) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Predicate over decoded events, combined per listener registration.
/// An unset field matches everything.
#[derive(Clone, Default)]
pub struct EventFilter {
    pub event_kinds: Option<HashSet<EventKind>>,
    pub organizer: Option<Address>,
    pub event_ids: Option<HashSet<u64>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl EventFilter {
    pub fn matches(&self, event: &ContractEventData) -> bool {
        if let Some(kinds) = &self.event_kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        // Address comparison is over parsed bytes, so hex casing never matters.
        if let Some(organizer) = &self.organizer {
            if event.organizer() != *organizer {
                return false;
            }
        }
        if let Some(ids) = &self.event_ids {
            if !ids.contains(&event.event_id()) {
                return false;
            }
        }
        if let Some(from) = self.from_block {
            if event.block_number() < from {
                return false;
            }
        }
        if let Some(to) = self.to_block {
            if event.block_number() > to {
                return false;
            }
        }
        true
    }
}

#[derive(Clone)]
struct RegisteredListener {
    id: String,
    callback: EventCallback,
    filter: EventFilter,
}

struct ListenerState {
    listeners: Vec<RegisteredListener>,
    listening: bool,
    last_processed_block: u64,
    cancel: Option<CancellationToken>,
}

/// Polling event listener for one chain.
pub struct ListenerService {
    chain_id: u64,
    contract: Address,
    rpc: Arc<dyn ChainRpc>,
    poll_interval: Duration,
    state: RwLock<ListenerState>,
    // Non-reentrant poll guard: a cycle that would overlap a running one is
    // skipped, never run concurrently.
    poll_gate: Mutex<()>,
    // Handle back to the owning Arc so the poll task can be spawned from
    // &self methods.
    self_ref: Weak<ListenerService>,
}

impl ListenerService {
    pub fn new(
        chain_id: u64,
        contract: Address,
        rpc: Arc<dyn ChainRpc>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            chain_id,
            contract,
            rpc,
            poll_interval,
            state: RwLock::new(ListenerState {
                listeners: Vec::new(),
                listening: false,
                last_processed_block: 0,
                cancel: None,
            }),
            poll_gate: Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Register a listener. Re-registering an existing id replaces its
    /// callback and filter in place. The first registration captures the
    /// current head block as the polling cursor and starts the poll timer.
    pub async fn add_listener(&self, id: &str, callback: EventCallback, filter: EventFilter) {
        let starting = !self.state.read().await.listening;

        // Read the head before taking the write lock; a failure here starts
        // the cursor at 0 and the first cycle catches up.
        let head = if starting {
            match self.rpc.block_number().await {
                Ok(block) => block,
                Err(e) => {
                    warn!(chain = self.chain_id, "failed to read head block, starting from 0: {}", e);
                    0
                }
            }
        } else {
            0
        };

        let mut state = self.state.write().await;
        match state.listeners.iter_mut().find(|l| l.id == id) {
            Some(existing) => {
                existing.callback = callback;
                existing.filter = filter;
                debug!(chain = self.chain_id, listener = id, "replaced listener registration");
            }
            None => state.listeners.push(RegisteredListener {
                id: id.to_string(),
                callback,
                filter,
            }),
        }

        if !state.listening {
            state.listening = true;
            state.last_processed_block = head;
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            if let Some(service) = self.self_ref.upgrade() {
                tokio::spawn(async move {
                    service.run_poll_loop(token).await;
                });
            }
            info!(chain = self.chain_id, block = head, "event listener started");
        }
    }

    /// Remove a listener. Removal takes effect for all future dispatches
    /// immediately; removing the last listener stops the poll timer.
    pub async fn remove_listener(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != id);
        let removed = state.listeners.len() != before;
        if removed && state.listeners.is_empty() {
            self.stop_locked(&mut state);
        }
        removed
    }

    /// Stop polling and drop all subscribers.
    pub async fn destroy(&self) {
        let mut state = self.state.write().await;
        state.listeners.clear();
        if state.listening {
            self.stop_locked(&mut state);
        }
    }

    fn stop_locked(&self, state: &mut ListenerState) {
        state.listening = false;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        info!(chain = self.chain_id, "event listener stopped");
    }

    pub async fn is_listening(&self) -> bool {
        self.state.read().await.listening
    }

    pub async fn listener_count(&self) -> usize {
        self.state.read().await.listeners.len()
    }

    pub async fn last_processed_block(&self) -> u64 {
        self.state.read().await.last_processed_block
    }

    /// Run one poll cycle on demand. No-op (and no chain reads) when idle or
    /// when a cycle is already in flight. Returns the number of events
    /// dispatched.
    pub async fn trigger_poll(&self) -> usize {
        match self.poll_cycle().await {
            Ok(count) => count,
            Err(e) => {
                error!(chain = self.chain_id, "poll cycle failed: {}", e);
                0
            }
        }
    }

    async fn run_poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(chain = self.chain_id, "poll loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_cycle().await {
                        error!(chain = self.chain_id, "poll cycle failed: {}", e);
                    }
                }
            }
        }
    }

    async fn poll_cycle(&self) -> Result<usize, ClientError> {
        let _gate = match self.poll_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(chain = self.chain_id, "poll already in progress, skipping cycle");
                return Ok(0);
            }
        };

        let (listening, cursor) = {
            let state = self.state.read().await;
            (state.listening, state.last_processed_block)
        };
        if !listening {
            return Ok(0);
        }

        let head = self.rpc.block_number().await?;
        if head <= cursor {
            return Ok(0);
        }
        let from = cursor + 1;
        debug!(chain = self.chain_id, from, to = head, "polling for contract events");

        // One fetch per event type; a failed fetch yields nothing for that
        // type without aborting the cycle.
        let fetches = EventKind::ALL.map(|kind| {
            let query = LogQuery {
                address: self.contract,
                topic0: kind.topic(),
                from_block: from,
                to_block: head,
            };
            async move { (kind, self.rpc.logs(&query).await) }
        });

        let mut logs: Vec<ChainLog> = Vec::new();
        for (kind, result) in join_all(fetches).await {
            match result {
                Ok(mut fetched) => logs.append(&mut fetched),
                Err(e) => {
                    warn!(chain = self.chain_id, event = kind.as_str(), "log fetch failed: {}", e)
                }
            }
        }

        // Dispatch order: ascending block, then log index within a block.
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut dispatched = 0;
        for log in &logs {
            let event = match decode_log(log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        chain = self.chain_id,
                        block = log.block_number,
                        index = log.log_index,
                        "skipping undecodable log: {}",
                        e
                    );
                    continue;
                }
            };

            // Snapshot per event so a removal mid-batch stops deliveries to
            // that id from the next event on.
            let listeners = self.state.read().await.listeners.clone();
            for listener in &listeners {
                if !listener.filter.matches(&event) {
                    continue;
                }
                if let Err(e) = (listener.callback)(event.clone()).await {
                    warn!(
                        chain = self.chain_id,
                        listener = %listener.id,
                        "listener callback failed: {}",
                        e
                    );
                }
            }
            dispatched += 1;
        }

        // Advance only after the full batch was handed out; the cursor never
        // moves past events that were not dispatched.
        self.state.write().await.last_processed_block = head;
        if dispatched > 0 {
            debug!(chain = self.chain_id, from, to = head, events = dispatched, "poll cycle complete");
        }
        Ok(dispatched)
    }
}
