pub mod invalidation;
pub mod keys;
pub mod storage;
pub mod store;

// Re-exports for convenience
pub use invalidation::{invalidation_rule, CacheIntegrator, CacheInvalidator, InvalidationStrategy};
pub use keys::{chain_tag, event_tag, organizer_tag, CacheKey};
pub use storage::{FileStorage, MemoryStorage, StorageBackend, StorageError};
pub use store::{
    CacheConfig, CacheEntry, CacheStats, CacheStore, CacheWriteOptions, InvalidationRequest,
};
