//! Shared test doubles: a scripted chain node, a recording invalidator, and
//! a recording event callback.

use crate::cache::invalidation::CacheInvalidator;
use crate::cache::store::InvalidationRequest;
use crate::chain::client::{ChainRpc, ClientError, LogQuery, RpcConnector};
use crate::chain::events::{ChainLog, ContractEventData};
use crate::chain::listener::{event_callback, EventCallback};
use crate::config::ChainConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted chain node: a settable head block and a bag of logs served back
/// through the same filtering the real node applies.
pub struct MockRpc {
    head: AtomicU64,
    logs: Mutex<Vec<ChainLog>>,
    pub block_number_calls: AtomicUsize,
    pub log_calls: AtomicUsize,
    block_delay: Option<Duration>,
}

impl MockRpc {
    pub fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            block_number_calls: AtomicUsize::new(0),
            log_calls: AtomicUsize::new(0),
            block_delay: None,
        })
    }

    /// A node whose head-block reads take `delay`, for overlap tests.
    pub fn with_block_delay(head: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            block_number_calls: AtomicUsize::new(0),
            log_calls: AtomicUsize::new(0),
            block_delay: Some(delay),
        })
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: ChainLog) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn block_number_calls(&self) -> usize {
        self.block_number_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn block_number(&self) -> Result<u64, ClientError> {
        self.block_number_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.block_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<ChainLog>, ClientError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.topics.first() == Some(&query.topic0)
                    && log.block_number >= query.from_block
                    && log.block_number <= query.to_block
            })
            .cloned()
            .collect())
    }
}

/// Connector handing out pre-built mock nodes by chain id.
pub struct MockConnector {
    rpcs: HashMap<u64, Arc<MockRpc>>,
}

impl MockConnector {
    pub fn new(rpcs: impl IntoIterator<Item = (u64, Arc<MockRpc>)>) -> Arc<Self> {
        Arc::new(Self {
            rpcs: rpcs.into_iter().collect(),
        })
    }
}

impl RpcConnector for MockConnector {
    fn connect(&self, chain: &ChainConfig) -> Result<Arc<dyn ChainRpc>, ClientError> {
        self.rpcs
            .get(&chain.chain_id)
            .map(|rpc| rpc.clone() as Arc<dyn ChainRpc>)
            .ok_or_else(|| ClientError::Rpc(format!("no mock for chain {}", chain.chain_id)))
    }
}

/// An event callback that appends everything it receives to a shared vec.
pub fn recording_callback() -> (EventCallback, Arc<Mutex<Vec<ContractEventData>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let callback = event_callback(move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });
    (callback, received)
}

/// Records invalidation requests instead of touching a store.
#[derive(Default)]
pub struct RecordingInvalidator {
    pub requests: Mutex<Vec<InvalidationRequest>>,
}

impl RecordingInvalidator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate(&self, request: InvalidationRequest) -> usize {
        let matched = request.keys.len() + request.tags.len();
        self.requests.lock().unwrap().push(request);
        matched
    }
}
