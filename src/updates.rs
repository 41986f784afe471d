//! Update notification dispatcher.
//!
//! An independent consumer of the event stream that fans contract events out
//! to registered notification callbacks. Each event kind raises an
//! [`UpdateTrigger`]; a registration picks the triggers it cares about (or
//! all of them) and one of three delivery policies. None of this shares
//! state with the cache invalidation path.

use crate::chain::events::{ContractEventData, EventKind};
use crate::chain::listener::EventCallback;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Notification callback; receives the events accumulated since the last
/// delivery (a single event under the immediate policy).
pub type UpdateCallback =
    Arc<dyn Fn(Vec<ContractEventData>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into an [`UpdateCallback`].
pub fn update_callback<F, Fut>(f: F) -> UpdateCallback
where
    F: Fn(Vec<ContractEventData>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |events| Box::pin(f(events)))
}

/// What a contract event means to the UI: the slice of displayed data it
/// makes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTrigger {
    EventList,
    TicketSales,
    EventStatus,
    Revenue,
}

impl UpdateTrigger {
    /// The trigger raised by each contract event type.
    pub fn for_kind(kind: EventKind) -> Self {
        match kind {
            EventKind::EventCreated => UpdateTrigger::EventList,
            EventKind::TicketPurchased => UpdateTrigger::TicketSales,
            EventKind::EventStatusChanged => UpdateTrigger::EventStatus,
            EventKind::RevenueWithdrawn => UpdateTrigger::Revenue,
        }
    }
}

/// Which triggers a registration is notified about.
#[derive(Debug, Clone)]
pub enum TriggerSet {
    All,
    Only(HashSet<UpdateTrigger>),
}

impl TriggerSet {
    pub fn only<I: IntoIterator<Item = UpdateTrigger>>(triggers: I) -> Self {
        Self::Only(triggers.into_iter().collect())
    }

    fn matches(&self, kind: EventKind) -> bool {
        match self {
            TriggerSet::All => true,
            TriggerSet::Only(triggers) => triggers.contains(&UpdateTrigger::for_kind(kind)),
        }
    }
}

/// Per-registration delivery timing.
#[derive(Debug, Clone)]
pub enum DeliveryPolicy {
    Immediate,
    Debounced {
        delay: Duration,
    },
    Batched {
        max_batch_size: usize,
        flush_interval: Duration,
    },
}

struct Registration {
    triggers: TriggerSet,
    policy: DeliveryPolicy,
    callback: UpdateCallback,
    pending: Vec<ContractEventData>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

type RegistrationMap = Arc<Mutex<HashMap<String, Registration>>>;

/// Fans decoded events out to notification callbacks. Cheap to clone; clones
/// share state.
#[derive(Clone, Default)]
pub struct UpdateDispatcher {
    registrations: RegistrationMap,
}

impl UpdateDispatcher {
    pub const LISTENER_ID: &'static str = "update-dispatch";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Re-registering an id replaces its triggers,
    /// policy, and callback; pending events for the old registration are
    /// dropped.
    pub async fn register(
        &self,
        id: &str,
        triggers: TriggerSet,
        policy: DeliveryPolicy,
        callback: UpdateCallback,
    ) {
        let mut registrations = self.registrations.lock().await;
        if let Some(old) = registrations.insert(
            id.to_string(),
            Registration {
                triggers,
                policy,
                callback,
                pending: Vec::new(),
                generation: 0,
                timer: None,
            },
        ) {
            if let Some(timer) = old.timer {
                timer.abort();
            }
        }
    }

    pub async fn unregister(&self, id: &str) -> bool {
        match self.registrations.lock().await.remove(id) {
            Some(registration) => {
                if let Some(timer) = registration.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    pub async fn registration_count(&self) -> usize {
        self.registrations.lock().await.len()
    }

    /// The callback to register on the event listener.
    pub fn callback(&self) -> EventCallback {
        let dispatcher = self.clone();
        Arc::new(move |event| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                dispatcher.handle_event(&event).await;
                Ok(())
            })
        })
    }

    pub async fn handle_event(&self, event: &ContractEventData) {
        let mut deliveries: Vec<(UpdateCallback, Vec<ContractEventData>)> = Vec::new();
        {
            let mut registrations = self.registrations.lock().await;
            for (id, registration) in registrations.iter_mut() {
                if !registration.triggers.matches(event.kind()) {
                    continue;
                }
                match registration.policy.clone() {
                    DeliveryPolicy::Immediate => {
                        deliveries.push((registration.callback.clone(), vec![event.clone()]));
                    }
                    DeliveryPolicy::Debounced { delay } => {
                        registration.pending.push(event.clone());
                        registration.generation += 1;
                        if let Some(timer) = registration.timer.take() {
                            timer.abort();
                        }
                        let map = self.registrations.clone();
                        let id = id.clone();
                        let generation = registration.generation;
                        registration.timer = Some(tokio::spawn(async move {
                            sleep(delay).await;
                            Self::flush_registration(map, id, generation).await;
                        }));
                    }
                    DeliveryPolicy::Batched {
                        max_batch_size,
                        flush_interval,
                    } => {
                        registration.pending.push(event.clone());
                        if registration.pending.len() >= max_batch_size {
                            registration.generation += 1;
                            if let Some(timer) = registration.timer.take() {
                                timer.abort();
                            }
                            deliveries.push((
                                registration.callback.clone(),
                                std::mem::take(&mut registration.pending),
                            ));
                        } else if registration.timer.is_none() {
                            registration.generation += 1;
                            let map = self.registrations.clone();
                            let id = id.clone();
                            let generation = registration.generation;
                            registration.timer = Some(tokio::spawn(async move {
                                sleep(flush_interval).await;
                                Self::flush_registration(map, id, generation).await;
                            }));
                        }
                    }
                }
            }
        }
        for (callback, events) in deliveries {
            callback(events).await;
        }
    }

    /// Timer body: deliver a registration's accumulated events unless a newer
    /// schedule or a size-triggered flush got there first.
    async fn flush_registration(registrations: RegistrationMap, id: String, generation: u64) {
        let delivery = {
            let mut registrations = registrations.lock().await;
            match registrations.get_mut(&id) {
                Some(registration)
                    if registration.generation == generation
                        && !registration.pending.is_empty() =>
                {
                    registration.timer = None;
                    debug!(registration = %id, events = registration.pending.len(), "flushing update batch");
                    Some((
                        registration.callback.clone(),
                        std::mem::take(&mut registration.pending),
                    ))
                }
                _ => None,
            }
        };
        if let Some((callback, events)) = delivery {
            callback(events).await;
        }
    }
}
