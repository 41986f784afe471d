//! Service configuration: chain table, polling cadence, cache sizing, and
//! invalidation strategy, loaded from environment variables with code
//! defaults.

use crate::cache::invalidation::InvalidationStrategy;
use crate::cache::store::CacheConfig;
use alloy_primitives::Address;
use dotenv::dotenv;
use std::env;
use std::time::Duration;

/// One supported chain deployment.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_address: Address,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    pub default_chain_id: u64,
    pub poll_interval: Duration,
    pub cache_default_ttl: Duration,
    pub cache_max_size: usize,
    pub cache_cleanup_interval: Duration,
    pub cache_persistence: bool,
    pub cache_storage_prefix: String,
    pub invalidation_strategy: String,
    pub debounce_delay: Duration,
    pub max_batch_size: usize,
    pub batch_flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: vec![
                ChainConfig {
                    chain_id: 1,
                    rpc_url: "https://eth.llamarpc.com".to_string(),
                    contract_address: Address::ZERO,
                },
                ChainConfig {
                    chain_id: 11155111,
                    rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                    contract_address: Address::ZERO,
                },
            ],
            default_chain_id: 1,
            poll_interval: Duration::from_millis(5000),
            cache_default_ttl: Duration::from_secs(300),
            cache_max_size: 500,
            cache_cleanup_interval: Duration::from_secs(60),
            cache_persistence: true,
            cache_storage_prefix: "tds-cache".to_string(),
            invalidation_strategy: "immediate".to_string(),
            debounce_delay: Duration::from_millis(500),
            max_batch_size: 100,
            batch_flush_interval: Duration::from_millis(2000),
        }
    }
}

/// Parse an `id=value` table like `1=https://...,11155111=https://...`.
fn parse_table(raw: &str) -> Vec<(u64, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (id, value) = pair.split_once('=')?;
            Some((id.trim().parse().ok()?, value.trim().to_string()))
        })
        .collect()
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();
        let defaults = Config::default();

        let chains = match env::var("CHAIN_RPC_URLS") {
            Ok(raw) => {
                let contracts: Vec<(u64, String)> = env::var("CHAIN_CONTRACTS")
                    .map(|raw| parse_table(&raw))
                    .unwrap_or_default();
                parse_table(&raw)
                    .into_iter()
                    .map(|(chain_id, rpc_url)| ChainConfig {
                        chain_id,
                        rpc_url,
                        contract_address: contracts
                            .iter()
                            .find(|(id, _)| *id == chain_id)
                            .and_then(|(_, addr)| addr.parse().ok())
                            .unwrap_or(Address::ZERO),
                    })
                    .collect()
            }
            Err(_) => defaults.chains.clone(),
        };

        let default_chain_id = env_u64(
            "DEFAULT_CHAIN_ID",
            chains.first().map(|c| c.chain_id).unwrap_or(1),
        );

        Self {
            chains,
            default_chain_id,
            poll_interval: Duration::from_millis(env_u64("POLL_INTERVAL_MS", 5000)),
            cache_default_ttl: Duration::from_secs(env_u64("CACHE_TTL_SECS", 300)),
            cache_max_size: env_u64("CACHE_MAX_SIZE", 500) as usize,
            cache_cleanup_interval: Duration::from_secs(env_u64("CACHE_CLEANUP_SECS", 60)),
            cache_persistence: env::var("CACHE_PERSISTENCE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            cache_storage_prefix: env::var("CACHE_STORAGE_PREFIX")
                .unwrap_or_else(|_| "tds-cache".to_string()),
            invalidation_strategy: env::var("INVALIDATION_STRATEGY")
                .unwrap_or_else(|_| "immediate".to_string()),
            debounce_delay: Duration::from_millis(env_u64("DEBOUNCE_DELAY_MS", 500)),
            max_batch_size: env_u64("MAX_BATCH_SIZE", 100) as usize,
            batch_flush_interval: Duration::from_millis(env_u64("BATCH_FLUSH_INTERVAL_MS", 2000)),
        }
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|chain| chain.chain_id == chain_id)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: self.cache_default_ttl,
            max_size: self.cache_max_size,
            persistence_enabled: self.cache_persistence,
            storage_prefix: self.cache_storage_prefix.clone(),
            cleanup_interval: self.cache_cleanup_interval,
        }
    }

    /// Resolve the configured strategy name; unrecognized names fall back to
    /// immediate invalidation.
    pub fn strategy(&self) -> InvalidationStrategy {
        match self.invalidation_strategy.as_str() {
            "debounced" => InvalidationStrategy::Debounced {
                delay: self.debounce_delay,
            },
            "batch" | "batched" => InvalidationStrategy::Batched {
                max_batch_size: self.max_batch_size,
                flush_interval: self.batch_flush_interval,
            },
            _ => InvalidationStrategy::Immediate,
        }
    }
}
