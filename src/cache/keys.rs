//! Cache key generation and management
//!
//! Keys are deterministic: addresses are lowercased before key construction
//! and filter fields are sorted by name, so equivalent inputs always produce
//! the same key regardless of casing or construction order.

use std::fmt;

/// A structured cache key that can be converted to a string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Key for an organizer's profile data
    OrganizerProfile { chain_id: u64, organizer: String },
    /// Key for the list of events run by an organizer
    OrganizerEvents { chain_id: u64, organizer: String },
    /// Key for one ticketed event's details
    EventDetails { chain_id: u64, event_id: u64 },
    /// Key for a filtered query over events
    FilteredQuery { chain_id: u64, filters: String },
}

impl CacheKey {
    pub fn organizer_profile(chain_id: u64, organizer: &str) -> Self {
        Self::OrganizerProfile {
            chain_id,
            organizer: organizer.to_lowercase(),
        }
    }

    pub fn organizer_events(chain_id: u64, organizer: &str) -> Self {
        Self::OrganizerEvents {
            chain_id,
            organizer: organizer.to_lowercase(),
        }
    }

    pub fn event_details(chain_id: u64, event_id: u64) -> Self {
        Self::EventDetails { chain_id, event_id }
    }

    /// Build a key from query filter fields. The fields are sorted by name so
    /// two equivalent filter sets built in different order yield the same key.
    pub fn filtered_query(chain_id: u64, filters: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = filters
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_lowercase()))
            .collect();
        sorted.sort();
        let filters = sorted
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");
        Self::FilteredQuery { chain_id, filters }
    }

    /// Get the chain id embedded in a key (for chain-scoped invalidation)
    pub fn chain_id(&self) -> u64 {
        match self {
            Self::OrganizerProfile { chain_id, .. }
            | Self::OrganizerEvents { chain_id, .. }
            | Self::EventDetails { chain_id, .. }
            | Self::FilteredQuery { chain_id, .. } => *chain_id,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrganizerProfile { chain_id, organizer } => {
                write!(f, "organizer:{}:{}", chain_id, organizer)
            }
            Self::OrganizerEvents { chain_id, organizer } => {
                write!(f, "organizer-events:{}:{}", chain_id, organizer)
            }
            Self::EventDetails { chain_id, event_id } => {
                write!(f, "event:{}:{}", chain_id, event_id)
            }
            Self::FilteredQuery { chain_id, filters } => {
                write!(f, "query:{}:{}", chain_id, filters)
            }
        }
    }
}

/// Tag applied to every entry belonging to a chain.
pub fn chain_tag(chain_id: u64) -> String {
    format!("chain:{}", chain_id)
}

/// Tag grouping every entry touching one organizer.
pub fn organizer_tag(organizer: &str) -> String {
    format!("organizer:{}", organizer.to_lowercase())
}

/// Tag grouping every entry touching one ticketed event.
pub fn event_tag(event_id: u64) -> String {
    format!("event:{}", event_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_lowercased() {
        let upper = CacheKey::organizer_profile(1, "0xAbCd00000000000000000000000000000000EF12");
        let lower = CacheKey::organizer_profile(1, "0xabcd00000000000000000000000000000000ef12");
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), lower.to_string());
        assert!(upper.to_string().contains("0xabcd"));
    }

    #[test]
    fn filter_order_does_not_change_the_key() {
        let a = CacheKey::filtered_query(1, &[("status", "Active"), ("organizer", "0xAB")]);
        let b = CacheKey::filtered_query(1, &[("organizer", "0xab"), ("status", "active")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "query:1:organizer=0xab&status=active");
    }

    #[test]
    fn key_display_is_namespaced_by_concept() {
        assert_eq!(
            CacheKey::event_details(11155111, 42).to_string(),
            "event:11155111:42"
        );
        assert_eq!(CacheKey::event_details(11155111, 42).chain_id(), 11155111);
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(chain_tag(1), "chain:1");
        assert_eq!(organizer_tag("0xAB"), "organizer:0xab");
        assert_eq!(event_tag(7), "event:7");
    }
}
