//! Domain payloads the application caches, plus the serde shim that carries
//! 256-bit amounts through JSON without precision loss.

use crate::chain::events::EventStatus;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Serde adapter for [`U256`] fields: serialized as
/// `{"__kind":"bigint","value":"<decimal string>"}` so the persistent cache
/// tier round-trips amounts exactly. The decoder also accepts a plain decimal
/// string.
pub mod bigint {
    use alloy_primitives::U256;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    struct Tagged<'a> {
        #[serde(rename = "__kind")]
        kind: &'static str,
        value: &'a str,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Tagged {
            #[serde(rename = "__kind")]
            kind: String,
            value: String,
        },
        Plain(String),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged {
            kind: "bigint",
            value: &value.to_string(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = match Repr::deserialize(deserializer)? {
            Repr::Tagged { kind, value } => {
                if kind != "bigint" {
                    return Err(D::Error::custom(format!("unexpected __kind: {}", kind)));
                }
                value
            }
            Repr::Plain(value) => value,
        };
        value
            .parse::<U256>()
            .map_err(|e| D::Error::custom(format!("invalid bigint value: {}", e)))
    }
}

/// Aggregated organizer data shown on dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizerProfile {
    pub address: String,
    pub event_count: u64,
    #[serde(with = "bigint")]
    pub total_revenue: U256,
    pub tickets_sold: u64,
}

/// One ticketed event's details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEventDetails {
    pub event_id: u64,
    pub organizer: String,
    pub name: String,
    #[serde(with = "bigint")]
    pub ticket_price: U256,
    pub max_tickets: u64,
    pub tickets_sold: u64,
    pub status: EventStatus,
}
