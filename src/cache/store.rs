//! Two-tier key/value cache with TTL, tags, and LRU eviction.
//!
//! The in-memory tier is authoritative; the optional persistent tier mirrors
//! entries as JSON through a [`StorageBackend`] and survives restarts. A miss
//! in memory probes the persistent tier and promotes a still-valid hit back.
//! Backend failures never surface to callers: the store logs them and keeps
//! operating memory-only.

use crate::cache::storage::StorageBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub max_size: usize,
    pub persistence_enabled: bool,
    pub storage_prefix: String,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_size: 500,
            persistence_enabled: true,
            storage_prefix: "tds-cache".to_string(),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// One cached record. Owned exclusively by the store; serialized as-is into
/// the persistent tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub data: V,
    /// Write time, epoch milliseconds.
    pub timestamp: u64,
    pub ttl_ms: u64,
    pub tags: HashSet<String>,
    pub access_count: u64,
    pub last_accessed: u64,
    /// Insertion order, breaks LRU ties.
    pub sequence: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: u64) -> bool {
        now > self.timestamp + self.ttl_ms
    }
}

/// Per-write overrides for [`CacheStore::set_with`].
#[derive(Debug, Clone, Default)]
pub struct CacheWriteOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl CacheWriteOptions {
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ttl: None,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Criteria for [`CacheStore::invalidate`]; an entry matching any supplied
/// criterion is deleted, and a key matched by several counts once.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRequest {
    pub keys: Vec<String>,
    pub tags: Vec<String>,
    pub pattern: Option<String>,
    /// Epoch milliseconds; entries written before this instant match.
    pub older_than: Option<u64>,
}

impl InvalidationRequest {
    pub fn by_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn by_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn by_pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }
}

/// Snapshot of cache effectiveness counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
    pub memory_usage_bytes: usize,
}

/// Match a cache key against an invalidation pattern: `*` wildcards match
/// glob-style (anchored), a pattern without `*` matches as a substring.
pub fn key_matches_pattern(key: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return key.contains(pattern);
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = key;

    let first = segments[0];
    if !first.is_empty() {
        match rest.strip_prefix(first) {
            Some(stripped) => rest = stripped,
            None => return false,
        }
    }

    let last = segments[segments.len() - 1];
    if !last.is_empty() {
        match rest.strip_suffix(last) {
            Some(stripped) => rest = stripped,
            None => return false,
        }
    }

    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    true
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generic namespaced cache store. See the module docs for tier semantics.
pub struct CacheStore<V> {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sequence: AtomicU64,
    storage: Option<Arc<dyn StorageBackend>>,
    cleanup_cancel: CancellationToken,
}

impl<V> CacheStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store and start its background cleanup sweep. The sweep stops
    /// when the store is destroyed or dropped.
    pub fn new(config: CacheConfig, storage: Option<Arc<dyn StorageBackend>>) -> Arc<Self> {
        let mut config = config;
        config.max_size = config.max_size.max(1);
        let storage = if config.persistence_enabled { storage } else { None };
        let cleanup_interval = config.cleanup_interval;

        let store = Arc::new(Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            storage,
            cleanup_cancel: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&store);
        let cancel = store.cleanup_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match weak.upgrade() {
                            Some(store) => {
                                store.cleanup().await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        store
    }

    /// Look up a key. Hits update access bookkeeping; a memory miss probes
    /// the persistent tier and promotes a still-valid entry.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = now_ms();
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(key) {
                if entry.is_expired(now) {
                    entries.remove(key);
                } else {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("cache hit for key: {}", key);
                    return Some(entry.data.clone());
                }
            }
        }

        if let Some(mut entry) = self.load_persistent(key) {
            if entry.is_expired(now) {
                self.remove_persistent(key);
            } else {
                entry.access_count += 1;
                entry.last_accessed = now;
                let value = entry.data.clone();
                self.entries.write().await.insert(key.to_string(), entry);
                self.enforce_limit().await;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("promoted persistent entry for key: {}", key);
                return Some(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("cache miss for key: {}", key);
        None
    }

    pub async fn set(&self, key: &str, value: V) {
        self.set_with(key, value, CacheWriteOptions::default()).await;
    }

    /// Write both tiers, then enforce the size limit.
    pub async fn set_with(&self, key: &str, value: V, options: CacheWriteOptions) {
        let now = now_ms();
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry {
            key: key.to_string(),
            data: value,
            timestamp: now,
            ttl_ms: ttl.as_millis() as u64,
            tags: options.tags.into_iter().collect(),
            access_count: 0,
            last_accessed: now,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.persist(&entry);
        self.entries.write().await.insert(key.to_string(), entry);
        self.enforce_limit().await;
    }

    pub async fn delete(&self, key: &str) -> bool {
        let in_memory = self.entries.write().await.remove(key).is_some();
        let in_storage = self.raw_persistent(key).is_some();
        if in_storage {
            self.remove_persistent(key);
        }
        in_memory || in_storage
    }

    /// Whether a live entry exists in either tier. Does not touch access
    /// statistics.
    pub async fn has(&self, key: &str) -> bool {
        let now = now_ms();
        if let Some(entry) = self.entries.read().await.get(key) {
            if !entry.is_expired(now) {
                return true;
            }
        }
        matches!(self.load_persistent(key), Some(entry) if !entry.is_expired(now))
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        for key in self.persistent_keys() {
            self.remove_persistent(&key);
        }
    }

    /// Stop the background cleanup sweep and clear both tiers.
    pub async fn destroy(&self) {
        self.cleanup_cancel.cancel();
        self.clear().await;
    }

    /// Delete every entry matching any of the request's criteria. Returns the
    /// number of distinct keys removed.
    pub async fn invalidate(&self, request: InvalidationRequest) -> usize {
        let mut matched: HashSet<String> = HashSet::new();
        {
            let entries = self.entries.read().await;
            for (key, entry) in entries.iter() {
                if Self::request_matches(&request, key, Some(entry)) {
                    matched.insert(key.clone());
                }
            }
        }

        // Persistent-only entries (left over from a previous session) still
        // have to honor the same criteria.
        for key in self.persistent_keys() {
            if matched.contains(&key) {
                continue;
            }
            if Self::request_matches::<V>(&request, &key, None) {
                matched.insert(key);
                continue;
            }
            if !request.tags.is_empty() || request.older_than.is_some() {
                if let Some(entry) = self.load_persistent(&key) {
                    if Self::request_matches(&request, &key, Some(&entry)) {
                        matched.insert(key);
                    }
                }
            }
        }

        {
            let mut entries = self.entries.write().await;
            for key in &matched {
                entries.remove(key);
            }
        }
        for key in &matched {
            self.remove_persistent(key);
        }
        if !matched.is_empty() {
            debug!("invalidated {} cache entries", matched.len());
        }
        matched.len()
    }

    fn request_matches<T>(
        request: &InvalidationRequest,
        key: &str,
        entry: Option<&CacheEntry<T>>,
    ) -> bool {
        if request.keys.iter().any(|k| k == key) {
            return true;
        }
        if let Some(pattern) = &request.pattern {
            if key_matches_pattern(key, pattern) {
                return true;
            }
        }
        if let Some(entry) = entry {
            if !request.tags.is_empty() && request.tags.iter().any(|t| entry.tags.contains(t)) {
                return true;
            }
            if let Some(cutoff) = request.older_than {
                if entry.timestamp < cutoff {
                    return true;
                }
            }
        }
        false
    }

    /// Sweep expired entries out of both tiers. Runs on the cleanup interval
    /// and may be invoked manually. Returns the number of keys removed.
    pub async fn cleanup(&self) -> usize {
        let now = now_ms();
        let mut removed: HashSet<String> = HashSet::new();
        {
            let mut entries = self.entries.write().await;
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                entries.remove(&key);
                removed.insert(key);
            }
        }

        for key in self.persistent_keys() {
            if removed.contains(&key) {
                self.remove_persistent(&key);
                continue;
            }
            // Corrupt records are dropped by load_persistent itself.
            if let Some(entry) = self.load_persistent(&key) {
                if entry.is_expired(now) {
                    self.remove_persistent(&key);
                    removed.insert(key);
                }
            }
        }

        if !removed.is_empty() {
            debug!("cleanup removed {} expired entries", removed.len());
        }
        removed.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let memory_usage_bytes = entries
            .values()
            .map(|entry| {
                entry.key.len()
                    + serde_json::to_vec(&entry.data).map(|v| v.len()).unwrap_or(0)
                    + std::mem::size_of::<CacheEntry<V>>()
            })
            .sum();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            hits,
            misses,
            size: entries.len(),
            hit_rate,
            memory_usage_bytes,
        }
    }

    /// Evict least-recently-accessed entries (insertion order breaks ties)
    /// until the store is back within its size limit.
    async fn enforce_limit(&self) {
        let mut evicted: Vec<String> = Vec::new();
        {
            let mut entries = self.entries.write().await;
            while entries.len() > self.config.max_size {
                let victim = entries
                    .values()
                    .min_by_key(|entry| (entry.last_accessed, entry.sequence))
                    .map(|entry| entry.key.clone());
                match victim {
                    Some(key) => {
                        entries.remove(&key);
                        evicted.push(key);
                    }
                    None => break,
                }
            }
        }
        for key in &evicted {
            self.remove_persistent(key);
        }
        if !evicted.is_empty() {
            debug!("evicted {} least-recently-used entries", evicted.len());
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.storage_prefix, key)
    }

    fn raw_persistent(&self, key: &str) -> Option<String> {
        let storage = self.storage.as_ref()?;
        match storage.get(&self.storage_key(key)) {
            Ok(value) => value,
            Err(e) => {
                warn!("persistent read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn load_persistent(&self, key: &str) -> Option<CacheEntry<V>> {
        let raw = self.raw_persistent(key)?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("dropping corrupt persistent entry for {}: {}", key, e);
                self.remove_persistent(key);
                None
            }
        }
    }

    fn persist(&self, entry: &CacheEntry<V>) {
        let Some(storage) = &self.storage else {
            return;
        };
        match serde_json::to_string(entry) {
            Ok(json) => {
                if let Err(e) = storage.set(&self.storage_key(&entry.key), &json) {
                    warn!("persistent write failed for {}: {}", entry.key, e);
                }
            }
            Err(e) => warn!("failed to serialize cache entry {}: {}", entry.key, e),
        }
    }

    fn remove_persistent(&self, key: &str) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove(&self.storage_key(key)) {
                warn!("persistent remove failed for {}: {}", key, e);
            }
        }
    }

    /// Cache keys (prefix stripped) present in the persistent tier.
    fn persistent_keys(&self) -> Vec<String> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        let prefix = format!("{}:", self.config.storage_prefix);
        match storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(&prefix).map(String::from))
                .collect(),
            Err(e) => {
                warn!("persistent key enumeration failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl<V> Drop for CacheStore<V> {
    fn drop(&mut self) {
        self.cleanup_cancel.cancel();
    }
}
