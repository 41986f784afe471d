//! Update dispatcher behavior: trigger matching and delivery policies.

use crate::chain::events::{ContractEventData, EventKind, EventMeta, EventStatus};
use crate::updates::{
    update_callback, DeliveryPolicy, TriggerSet, UpdateCallback, UpdateDispatcher, UpdateTrigger,
};
use alloy_primitives::{Address, U256};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn status_event(event_id: u64) -> ContractEventData {
    ContractEventData::EventStatusChanged {
        event_id,
        organizer: Address::repeat_byte(1),
        status: EventStatus::Paused,
        meta: EventMeta {
            block_number: event_id,
            log_index: 0,
            received_at: Utc::now(),
        },
    }
}

fn created_event(event_id: u64) -> ContractEventData {
    ContractEventData::EventCreated {
        event_id,
        organizer: Address::repeat_byte(1),
        name: "Rust Conf".to_string(),
        ticket_price: U256::from(100u64),
        max_tickets: 50,
        meta: EventMeta {
            block_number: event_id,
            log_index: 0,
            received_at: Utc::now(),
        },
    }
}

/// Callback recording each delivery as the batch it arrived in.
fn recording() -> (UpdateCallback, Arc<Mutex<Vec<Vec<ContractEventData>>>>) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = batches.clone();
    let callback = update_callback(move |events| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(events);
        }
    });
    (callback, batches)
}

#[tokio::test]
async fn wildcard_registrations_receive_every_kind() {
    let dispatcher = UpdateDispatcher::new();
    let (callback, batches) = recording();
    dispatcher
        .register("all", TriggerSet::All, DeliveryPolicy::Immediate, callback)
        .await;

    dispatcher.handle_event(&created_event(1)).await;
    dispatcher.handle_event(&status_event(2)).await;

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 1);
}

#[tokio::test]
async fn trigger_sets_are_exact() {
    let dispatcher = UpdateDispatcher::new();
    let (callback, batches) = recording();
    dispatcher
        .register(
            "status-only",
            TriggerSet::only([UpdateTrigger::EventStatus]),
            DeliveryPolicy::Immediate,
            callback,
        )
        .await;

    dispatcher.handle_event(&created_event(1)).await;
    dispatcher.handle_event(&status_event(2)).await;

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].kind(), EventKind::EventStatusChanged);
}

#[tokio::test]
async fn debounced_registrations_coalesce_bursts() {
    let dispatcher = UpdateDispatcher::new();
    let (callback, batches) = recording();
    dispatcher
        .register(
            "debounced",
            TriggerSet::All,
            DeliveryPolicy::Debounced {
                delay: Duration::from_millis(50),
            },
            callback,
        )
        .await;

    dispatcher.handle_event(&status_event(1)).await;
    dispatcher.handle_event(&status_event(2)).await;
    assert!(batches.lock().unwrap().is_empty());

    sleep(Duration::from_millis(120)).await;
    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test]
async fn batched_registrations_flush_at_the_size_threshold() {
    let dispatcher = UpdateDispatcher::new();
    let (callback, batches) = recording();
    dispatcher
        .register(
            "batched",
            TriggerSet::All,
            DeliveryPolicy::Batched {
                max_batch_size: 2,
                flush_interval: Duration::from_secs(60),
            },
            callback,
        )
        .await;

    dispatcher.handle_event(&status_event(1)).await;
    assert!(batches.lock().unwrap().is_empty());

    dispatcher.handle_event(&status_event(2)).await;
    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test]
async fn batched_registrations_flush_on_the_timer() {
    let dispatcher = UpdateDispatcher::new();
    let (callback, batches) = recording();
    dispatcher
        .register(
            "batched",
            TriggerSet::All,
            DeliveryPolicy::Batched {
                max_batch_size: 100,
                flush_interval: Duration::from_millis(50),
            },
            callback,
        )
        .await;

    dispatcher.handle_event(&status_event(1)).await;
    sleep(Duration::from_millis(120)).await;
    assert_eq!(batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unregistered_callbacks_stop_receiving() {
    let dispatcher = UpdateDispatcher::new();
    let (callback, batches) = recording();
    dispatcher
        .register("gone", TriggerSet::All, DeliveryPolicy::Immediate, callback)
        .await;
    dispatcher.handle_event(&status_event(1)).await;

    assert!(dispatcher.unregister("gone").await);
    assert!(!dispatcher.unregister("gone").await);
    dispatcher.handle_event(&status_event(2)).await;

    assert_eq!(batches.lock().unwrap().len(), 1);
    assert_eq!(dispatcher.registration_count().await, 0);
}
