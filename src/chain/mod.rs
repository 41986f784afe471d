pub mod client;
pub mod events;
pub mod listener;
pub mod registry;

// Re-exports for convenience
pub use client::{ChainRpc, ClientError, HttpChainRpc, HttpConnector, LogQuery, RpcConnector};
pub use events::{decode_log, ChainLog, ContractEventData, DecodeError, EventKind, EventStatus};
pub use listener::{event_callback, EventCallback, EventFilter, ListenerService};
pub use registry::{GlobalListeners, ListenerRegistry, ListenerStatus, RegistryError, Subscription};
