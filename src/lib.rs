pub mod cache;
pub mod chain;
pub mod config;
pub mod models;
pub mod state;
pub mod updates;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience if desired
pub use cache::{CacheConfig, CacheKey, CacheStore, InvalidationRequest, InvalidationStrategy};
pub use chain::{
    event_callback, ContractEventData, EventFilter, EventKind, GlobalListeners, ListenerRegistry,
    ListenerService,
};
pub use config::Config;
pub use models::{OrganizerProfile, TicketEventDetails};
pub use state::AppState;
pub use updates::{update_callback, DeliveryPolicy, TriggerSet, UpdateDispatcher, UpdateTrigger};
