//! Cache invalidation integrator behavior: strategy timing, rule targets,
//! and network-switch flushes.

use crate::cache::invalidation::{CacheIntegrator, InvalidationStrategy};
use crate::cache::keys::{chain_tag, event_tag, organizer_tag, CacheKey};
use crate::cache::storage::MemoryStorage;
use crate::cache::store::{CacheConfig, CacheStore, CacheWriteOptions};
use crate::chain::events::{ContractEventData, EventMeta, EventStatus};
use crate::chain::listener::EventFilter;
use crate::config::{ChainConfig, Config};
use crate::state::AppState;
use crate::tests::support::{MockConnector, MockRpc, RecordingInvalidator};
use alloy_primitives::{Address, U256};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const ORGANIZER: Address = Address::repeat_byte(1);
const BUYER: Address = Address::repeat_byte(3);

fn purchase_event(event_id: u64, block: u64) -> ContractEventData {
    ContractEventData::TicketPurchased {
        event_id,
        organizer: ORGANIZER,
        buyer: BUYER,
        quantity: 1,
        total_price: U256::from(10u64),
        meta: EventMeta {
            block_number: block,
            log_index: 0,
            received_at: Utc::now(),
        },
    }
}

fn status_event(event_id: u64, block: u64) -> ContractEventData {
    ContractEventData::EventStatusChanged {
        event_id,
        organizer: ORGANIZER,
        status: EventStatus::SoldOut,
        meta: EventMeta {
            block_number: block,
            log_index: 0,
            received_at: Utc::now(),
        },
    }
}

fn plain_store() -> Arc<CacheStore<Value>> {
    CacheStore::new(
        CacheConfig {
            persistence_enabled: false,
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        },
        None,
    )
}

#[tokio::test]
async fn immediate_strategy_invalidates_tags_and_organizer_entries() {
    let cache = plain_store();
    let organizer = format!("{:?}", ORGANIZER);
    cache
        .set_with(
            &CacheKey::event_details(1, 5).to_string(),
            json!({"tickets_sold": 10}),
            CacheWriteOptions::tags(["events".to_string(), event_tag(5)]),
        )
        .await;
    cache
        .set_with(
            &CacheKey::organizer_profile(1, &organizer).to_string(),
            json!({"event_count": 2}),
            CacheWriteOptions::tags(["organizer-profile".to_string(), organizer_tag(&organizer)]),
        )
        .await;
    cache
        .set_with("unrelated", json!(1), CacheWriteOptions::tags(["settings"]))
        .await;

    let integrator =
        CacheIntegrator::new(cache.clone(), InvalidationStrategy::Immediate, 1);
    integrator.handle_event(&purchase_event(5, 100)).await;

    assert!(!cache.has(&CacheKey::event_details(1, 5).to_string()).await);
    assert!(
        !cache
            .has(&CacheKey::organizer_profile(1, &organizer).to_string())
            .await
    );
    assert!(cache.has("unrelated").await);
}

#[tokio::test]
async fn debounce_coalesces_rapid_events_into_one_flush() {
    let recorder = RecordingInvalidator::new();
    let integrator = CacheIntegrator::new(
        recorder.clone(),
        InvalidationStrategy::Debounced {
            delay: Duration::from_millis(50),
        },
        1,
    );

    for event_id in [5, 6, 7] {
        integrator.handle_event(&purchase_event(event_id, 100)).await;
        sleep(Duration::from_millis(10)).await;
    }
    // Still inside the quiet period: nothing applied yet.
    assert_eq!(recorder.request_count(), 0);

    sleep(Duration::from_millis(120)).await;
    let requests = recorder.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    for event_id in [5, 6, 7] {
        assert!(request.tags.contains(&event_tag(event_id)));
        assert!(request
            .keys
            .contains(&CacheKey::event_details(1, event_id).to_string()));
    }
}

#[tokio::test]
async fn debounce_timer_restarts_on_each_event() {
    let recorder = RecordingInvalidator::new();
    let integrator = CacheIntegrator::new(
        recorder.clone(),
        InvalidationStrategy::Debounced {
            delay: Duration::from_millis(60),
        },
        1,
    );

    integrator.handle_event(&purchase_event(5, 100)).await;
    sleep(Duration::from_millis(40)).await;
    integrator.handle_event(&purchase_event(6, 101)).await;
    sleep(Duration::from_millis(40)).await;
    // 80ms since the first event, but only 40ms since the last one.
    assert_eq!(recorder.request_count(), 0);

    sleep(Duration::from_millis(60)).await;
    assert_eq!(recorder.request_count(), 1);
}

#[tokio::test]
async fn batched_strategy_flushes_when_the_size_threshold_is_reached() {
    let recorder = RecordingInvalidator::new();
    let integrator = CacheIntegrator::new(
        recorder.clone(),
        InvalidationStrategy::Batched {
            max_batch_size: 2,
            flush_interval: Duration::from_secs(60),
        },
        1,
    );

    integrator.handle_event(&purchase_event(5, 100)).await;
    assert_eq!(recorder.request_count(), 0);

    // The second event for the same organizer trips the threshold and the
    // flush covers both events' tags.
    integrator.handle_event(&status_event(6, 101)).await;
    let requests = recorder.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.tags.contains(&event_tag(5)));
    assert!(request.tags.contains(&event_tag(6)));
    assert!(request.tags.contains(&"tickets".to_string()));
    assert!(request.tags.contains(&"events".to_string()));
}

#[tokio::test]
async fn batched_strategy_flushes_on_the_timer_when_under_threshold() {
    let recorder = RecordingInvalidator::new();
    let integrator = CacheIntegrator::new(
        recorder.clone(),
        InvalidationStrategy::Batched {
            max_batch_size: 100,
            flush_interval: Duration::from_millis(50),
        },
        1,
    );

    integrator.handle_event(&purchase_event(5, 100)).await;
    assert_eq!(recorder.request_count(), 0);

    sleep(Duration::from_millis(120)).await;
    assert_eq!(recorder.request_count(), 1);

    // The batch state was reset on flush; a later event starts a new batch.
    integrator.handle_event(&purchase_event(6, 101)).await;
    sleep(Duration::from_millis(120)).await;
    assert_eq!(recorder.request_count(), 2);
}

#[tokio::test]
async fn shutdown_applies_pending_work_instead_of_dropping_it() {
    let recorder = RecordingInvalidator::new();
    let integrator = CacheIntegrator::new(
        recorder.clone(),
        InvalidationStrategy::Debounced {
            delay: Duration::from_secs(60),
        },
        1,
    );

    integrator.handle_event(&purchase_event(5, 100)).await;
    integrator.shutdown().await;
    let requests = recorder.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tags.contains(&event_tag(5)));
}

#[tokio::test]
async fn network_switch_invalidates_the_old_chains_entries() {
    let cache = plain_store();
    cache
        .set_with(
            "mainnet-events",
            json!(1),
            CacheWriteOptions::tags([chain_tag(1)]),
        )
        .await;
    cache
        .set_with(
            "sepolia-events",
            json!(2),
            CacheWriteOptions::tags([chain_tag(11155111)]),
        )
        .await;

    let integrator =
        CacheIntegrator::new(cache.clone(), InvalidationStrategy::Immediate, 1);
    integrator.handle_network_switch(1, 11155111).await;

    assert!(!cache.has("mainnet-events").await);
    assert!(cache.has("sepolia-events").await);
}

/// End-to-end chain switch: one active global listener, polling moves to the
/// new chain's head, and the old chain's tagged cache entries are flushed.
#[tokio::test]
async fn app_state_switch_moves_polling_and_flushes_the_old_chain() {
    let config = Config {
        chains: vec![
            ChainConfig {
                chain_id: 1,
                rpc_url: "mock://1".to_string(),
                contract_address: Address::repeat_byte(9),
            },
            ChainConfig {
                chain_id: 11155111,
                rpc_url: "mock://11155111".to_string(),
                contract_address: Address::repeat_byte(9),
            },
        ],
        default_chain_id: 1,
        ..Default::default()
    };
    let mainnet = MockRpc::new(100);
    let sepolia = MockRpc::new(555);
    let connector = MockConnector::new([(1, mainnet.clone()), (11155111, sepolia.clone())]);
    let storage = Arc::new(MemoryStorage::new());
    let state = AppState::new(config, connector, Some(storage));

    state.start().await.unwrap();
    let (callback, _) = crate::tests::support::recording_callback();
    state
        .listeners
        .add_listener("ui", callback, EventFilter::default())
        .await
        .unwrap();

    state
        .cache
        .set_with(
            "mainnet-data",
            json!(1),
            CacheWriteOptions::tags([chain_tag(1)]),
        )
        .await;

    state.switch_chain(11155111).await.unwrap();

    assert!(sepolia.block_number_calls() > 0);
    let status = state.registry.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].chain_id, 11155111);
    assert_eq!(status[0].listener_count, 3);
    assert_eq!(status[0].last_processed_block, 555);
    assert!(!state.cache.has("mainnet-data").await);

    state.shutdown().await;
}
