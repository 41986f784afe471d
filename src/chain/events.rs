//! Contract event types and log decoding.
//!
//! The ticketing contract emits four events. Raw logs are decoded into the
//! closed [`ContractEventData`] sum type so downstream routing can match
//! exhaustively on the event kind.

use alloy_primitives::{keccak256, Address, B256, U256};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static EVENT_CREATED_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("EventCreated(uint256,address,string,uint256,uint256)"));
static TICKET_PURCHASED_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("TicketPurchased(uint256,address,address,uint256,uint256)"));
static EVENT_STATUS_CHANGED_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("EventStatusChanged(uint256,address,uint8)"));
static REVENUE_WITHDRAWN_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("RevenueWithdrawn(address,uint256,uint256)"));

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("log has no topic{0}")]
    MissingTopic(usize),

    #[error("unrecognised event topic: {0}")]
    UnknownTopic(B256),

    #[error("log data truncated: need {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },

    #[error("event name is not valid UTF-8")]
    InvalidName,

    #[error("{0} does not fit in 64 bits")]
    ValueOutOfRange(&'static str),

    #[error("unknown event status code: {0}")]
    UnknownStatus(u8),
}

/// A raw log record as returned by the chain RPC, reduced to the fields the
/// decoder and the ordering contract need.
#[derive(Debug, Clone)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub log_index: u64,
}

/// The four event types emitted by the ticketing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    EventCreated,
    TicketPurchased,
    EventStatusChanged,
    RevenueWithdrawn,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::EventCreated,
        EventKind::TicketPurchased,
        EventKind::EventStatusChanged,
        EventKind::RevenueWithdrawn,
    ];

    /// The keccak topic0 hash identifying this event in a log.
    pub fn topic(&self) -> B256 {
        match self {
            EventKind::EventCreated => *EVENT_CREATED_TOPIC,
            EventKind::TicketPurchased => *TICKET_PURCHASED_TOPIC,
            EventKind::EventStatusChanged => *EVENT_STATUS_CHANGED_TOPIC,
            EventKind::RevenueWithdrawn => *REVENUE_WITHDRAWN_TOPIC,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EventCreated => "EventCreated",
            EventKind::TicketPurchased => "TicketPurchased",
            EventKind::EventStatusChanged => "EventStatusChanged",
            EventKind::RevenueWithdrawn => "RevenueWithdrawn",
        }
    }
}

/// Lifecycle status of a ticketed event, as encoded on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Active,
    Paused,
    Cancelled,
    SoldOut,
}

impl TryFrom<u8> for EventStatus {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventStatus::Active),
            1 => Ok(EventStatus::Paused),
            2 => Ok(EventStatus::Cancelled),
            3 => Ok(EventStatus::SoldOut),
            other => Err(DecodeError::UnknownStatus(other)),
        }
    }
}

/// Chain position and receipt time shared by every decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub block_number: u64,
    pub log_index: u64,
    pub received_at: DateTime<Utc>,
}

/// A decoded contract event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractEventData {
    EventCreated {
        event_id: u64,
        organizer: Address,
        name: String,
        ticket_price: U256,
        max_tickets: u64,
        meta: EventMeta,
    },
    TicketPurchased {
        event_id: u64,
        organizer: Address,
        buyer: Address,
        quantity: u64,
        total_price: U256,
        meta: EventMeta,
    },
    EventStatusChanged {
        event_id: u64,
        organizer: Address,
        status: EventStatus,
        meta: EventMeta,
    },
    RevenueWithdrawn {
        organizer: Address,
        event_id: u64,
        amount: U256,
        meta: EventMeta,
    },
}

impl ContractEventData {
    pub fn kind(&self) -> EventKind {
        match self {
            ContractEventData::EventCreated { .. } => EventKind::EventCreated,
            ContractEventData::TicketPurchased { .. } => EventKind::TicketPurchased,
            ContractEventData::EventStatusChanged { .. } => EventKind::EventStatusChanged,
            ContractEventData::RevenueWithdrawn { .. } => EventKind::RevenueWithdrawn,
        }
    }

    pub fn event_id(&self) -> u64 {
        match self {
            ContractEventData::EventCreated { event_id, .. }
            | ContractEventData::TicketPurchased { event_id, .. }
            | ContractEventData::EventStatusChanged { event_id, .. }
            | ContractEventData::RevenueWithdrawn { event_id, .. } => *event_id,
        }
    }

    pub fn organizer(&self) -> Address {
        match self {
            ContractEventData::EventCreated { organizer, .. }
            | ContractEventData::TicketPurchased { organizer, .. }
            | ContractEventData::EventStatusChanged { organizer, .. }
            | ContractEventData::RevenueWithdrawn { organizer, .. } => *organizer,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            ContractEventData::EventCreated { meta, .. }
            | ContractEventData::TicketPurchased { meta, .. }
            | ContractEventData::EventStatusChanged { meta, .. }
            | ContractEventData::RevenueWithdrawn { meta, .. } => meta,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.meta().block_number
    }

    /// Dispatch order within and across blocks.
    pub fn ordering_key(&self) -> (u64, u64) {
        let meta = self.meta();
        (meta.block_number, meta.log_index)
    }
}

fn topic(log: &ChainLog, index: usize) -> Result<B256, DecodeError> {
    log.topics
        .get(index)
        .copied()
        .ok_or(DecodeError::MissingTopic(index))
}

fn topic_address(log: &ChainLog, index: usize) -> Result<Address, DecodeError> {
    // Indexed addresses are left-padded to 32 bytes in the topic.
    Ok(Address::from_slice(&topic(log, index)?.0[12..]))
}

fn topic_u64(log: &ChainLog, index: usize, what: &'static str) -> Result<u64, DecodeError> {
    U256::from_be_bytes(topic(log, index)?.0)
        .try_into()
        .map_err(|_| DecodeError::ValueOutOfRange(what))
}

fn data_word(data: &[u8], index: usize) -> Result<[u8; 32], DecodeError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(DecodeError::TruncatedData {
            expected: end,
            actual: data.len(),
        });
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&data[start..end]);
    Ok(word)
}

fn data_u256(data: &[u8], index: usize) -> Result<U256, DecodeError> {
    Ok(U256::from_be_bytes(data_word(data, index)?))
}

fn data_u64(data: &[u8], index: usize, what: &'static str) -> Result<u64, DecodeError> {
    data_u256(data, index)?
        .try_into()
        .map_err(|_| DecodeError::ValueOutOfRange(what))
}

/// Decode a dynamic ABI string whose offset word sits at `head_index`.
fn data_string(data: &[u8], head_index: usize) -> Result<String, DecodeError> {
    let offset: usize = data_u256(data, head_index)?
        .try_into()
        .map_err(|_| DecodeError::ValueOutOfRange("string offset"))?;
    if data.len() < offset + 32 {
        return Err(DecodeError::TruncatedData {
            expected: offset + 32,
            actual: data.len(),
        });
    }
    let mut len_word = [0u8; 32];
    len_word.copy_from_slice(&data[offset..offset + 32]);
    let len: usize = U256::from_be_bytes(len_word)
        .try_into()
        .map_err(|_| DecodeError::ValueOutOfRange("string length"))?;
    let start = offset + 32;
    if data.len() < start + len {
        return Err(DecodeError::TruncatedData {
            expected: start + len,
            actual: data.len(),
        });
    }
    String::from_utf8(data[start..start + len].to_vec()).map_err(|_| DecodeError::InvalidName)
}

/// Decode a raw log into a typed event. Fails on unknown topics and malformed
/// payloads; the caller skips failed logs without aborting the batch.
pub fn decode_log(log: &ChainLog) -> Result<ContractEventData, DecodeError> {
    let topic0 = topic(log, 0)?;
    let meta = EventMeta {
        block_number: log.block_number,
        log_index: log.log_index,
        received_at: Utc::now(),
    };

    if topic0 == *EVENT_CREATED_TOPIC {
        // topics: [sig, eventId, organizer]; data: (string name, uint256 price, uint256 maxTickets)
        Ok(ContractEventData::EventCreated {
            event_id: topic_u64(log, 1, "event id")?,
            organizer: topic_address(log, 2)?,
            name: data_string(&log.data, 0)?,
            ticket_price: data_u256(&log.data, 1)?,
            max_tickets: data_u64(&log.data, 2, "max tickets")?,
            meta,
        })
    } else if topic0 == *TICKET_PURCHASED_TOPIC {
        // topics: [sig, eventId, organizer]; data: (address buyer, uint256 quantity, uint256 totalPrice)
        Ok(ContractEventData::TicketPurchased {
            event_id: topic_u64(log, 1, "event id")?,
            organizer: topic_address(log, 2)?,
            buyer: Address::from_slice(&data_word(&log.data, 0)?[12..]),
            quantity: data_u64(&log.data, 1, "quantity")?,
            total_price: data_u256(&log.data, 2)?,
            meta,
        })
    } else if topic0 == *EVENT_STATUS_CHANGED_TOPIC {
        // topics: [sig, eventId, organizer]; data: (uint8 status)
        let code = data_word(&log.data, 0)?[31];
        Ok(ContractEventData::EventStatusChanged {
            event_id: topic_u64(log, 1, "event id")?,
            organizer: topic_address(log, 2)?,
            status: EventStatus::try_from(code)?,
            meta,
        })
    } else if topic0 == *REVENUE_WITHDRAWN_TOPIC {
        // topics: [sig, organizer, eventId]; data: (uint256 amount)
        Ok(ContractEventData::RevenueWithdrawn {
            organizer: topic_address(log, 1)?,
            event_id: topic_u64(log, 2, "event id")?,
            amount: data_u256(&log.data, 0)?,
            meta,
        })
    } else {
        Err(DecodeError::UnknownTopic(topic0))
    }
}
