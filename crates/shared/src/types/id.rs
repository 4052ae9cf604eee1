//! Typed IDs for type-safe entity references.
//!
//! Using typed IDs prevents accidentally passing a `TransferId` where an `AccountId` is expected.
//! Ledger records use database serial keys; users come from an external identity system and
//! are referenced by UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to generate wrappers around storage-assigned serial keys.
macro_rules! serial_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wraps a raw key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw key.
            #[must_use]
            pub const fn into_inner(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

/// Macro to generate UUID-backed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random ID using UUID v7 (time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

serial_id!(AccountId, "Unique identifier for a stored-value account.");
serial_id!(TransferId, "Unique identifier for a transfer.");
serial_id!(LedgerEntryId, "Unique identifier for a ledger entry.");
typed_id!(UserId, "Unique identifier for a user in the external identity system.");

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_serial_id_display_is_bare_number() {
        assert_eq!(AccountId::new(42).to_string(), "42");
        assert_eq!(TransferId::from(7).to_string(), "7");
    }

    #[test]
    fn test_serial_id_from_str() {
        assert_eq!(AccountId::from_str(" 12 ").unwrap(), AccountId::new(12));
        assert!(TransferId::from_str("twelve").is_err());
    }

    #[test]
    fn test_serial_id_ordering() {
        assert!(AccountId::new(1) < AccountId::new(2));
        assert_eq!(i64::from(LedgerEntryId::new(9)), 9);
    }

    #[test]
    fn test_user_id_roundtrip() {
        let uuid = Uuid::new_v4();
        let id = UserId::from_uuid(uuid);
        assert_eq!(id.into_inner(), uuid);
        assert_eq!(UserId::from_str(&uuid.to_string()).unwrap(), id);
        assert!(UserId::from_str("invalid").is_err());
    }
}
