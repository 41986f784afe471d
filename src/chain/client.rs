//! Chain RPC capability and the HTTP implementation.
//!
//! The listener talks to the chain through the [`ChainRpc`] trait so tests can
//! substitute a scripted node. [`HttpChainRpc`] is the production
//! implementation over a JSON-RPC HTTP endpoint, with exponential retry on
//! reads.

use crate::chain::events::ChainLog;
use crate::config::ChainConfig;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),
}

/// A log query for one event type over an inclusive block range.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

/// Read capability against a chain node. All calls are fallible; callers
/// contain failures at the smallest scope the poll cycle allows.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, ClientError>;

    async fn logs(&self, query: &LogQuery) -> Result<Vec<ChainLog>, ClientError>;
}

pub struct HttpChainRpc {
    rpc_url: String,
}

impl HttpChainRpc {
    pub fn new(rpc_url: &str) -> Result<Self, ClientError> {
        // Validate eagerly so a bad URL fails at construction, not mid-poll.
        rpc_url
            .parse::<url::Url>()
            .map_err(|_| ClientError::InvalidRpcUrl(rpc_url.to_string()))?;
        info!("initializing chain RPC client for {}", rpc_url);
        Ok(Self {
            rpc_url: rpc_url.to_string(),
        })
    }

    fn provider(&self) -> Result<impl Provider, ClientError> {
        Ok(ProviderBuilder::new().connect_http(
            self.rpc_url
                .parse()
                .map_err(|_| ClientError::InvalidRpcUrl(self.rpc_url.clone()))?,
        ))
    }

    fn retry_policy() -> ExponentialBuilder {
        ExponentialBuilder::default().with_max_times(3)
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn block_number(&self) -> Result<u64, ClientError> {
        let provider = self.provider()?;
        (|| async { provider.get_block_number().await })
            .retry(Self::retry_policy())
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<ChainLog>, ClientError> {
        let provider = self.provider()?;
        let filter = Filter::new()
            .address(vec![query.address])
            .event_signature(query.topic0)
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = (|| async { provider.get_logs(&filter).await })
            .retry(Self::retry_policy())
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?;

        // Logs still pending inclusion carry no block position and cannot be
        // ordered, so they are not surfaced.
        Ok(logs
            .into_iter()
            .filter_map(|log| {
                Some(ChainLog {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.to_vec(),
                    block_number: log.block_number?,
                    log_index: log.log_index?,
                })
            })
            .collect())
    }
}

/// Builds a [`ChainRpc`] for a configured chain. Injected into the listener
/// registry so tests wire scripted nodes instead of HTTP.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, chain: &ChainConfig) -> Result<Arc<dyn ChainRpc>, ClientError>;
}

/// Default connector: one HTTP client per chain's configured endpoint.
pub struct HttpConnector;

impl RpcConnector for HttpConnector {
    fn connect(&self, chain: &ChainConfig) -> Result<Arc<dyn ChainRpc>, ClientError> {
        Ok(Arc::new(HttpChainRpc::new(&chain.rpc_url)?))
    }
}
