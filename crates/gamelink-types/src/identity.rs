//! Identity types for GameLink
//!
//! All identity types are strongly typed wrappers around the `u64` primary
//! keys of the backing tables, to prevent accidental mixing of ids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Create from a raw key
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw key
            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Convert to prefixed string
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

// Collaborator identities (owned elsewhere, passed through)
define_id_type!(OrderId, "order", "Identifier of an order owned by the order service");
define_id_type!(PlayerId, "player", "Identifier of a worker (player / companion)");
define_id_type!(GameId, "game", "Identifier of a game");

// Engine-owned identities
define_id_type!(RuleId, "rule", "Identifier of a commission rule");
define_id_type!(RecordId, "record", "Identifier of a per-order commission record");
define_id_type!(SettlementId, "settlement", "Identifier of a monthly settlement");
define_id_type!(RankingConfigId, "rankcfg", "Identifier of a ranking commission config");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_prefix() {
        let id = PlayerId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.to_prefixed_string(), "player_42");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&OrderId(7)).unwrap();
        assert_eq!(json, "7");
        let back: OrderId = serde_json::from_str("7").unwrap();
        assert_eq!(back, OrderId(7));
    }
}
