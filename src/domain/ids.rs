// Copyright (c) 2025 - Cowboy AI, Inc.
//! Strongly typed identifiers
//!
//! Every entity the referral core touches is addressed by a UUID wrapped in
//! its own newtype, so a `LinkId` can never be passed where a `PromoterId`
//! is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered id (UUID v7)
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Referral program
    ProgramId
);
uuid_id!(
    /// Promoter sharing referral links
    PromoterId
);
uuid_id!(
    /// Referred contact (the person who signs up or purchases)
    ContactId
);
uuid_id!(
    /// Referral link owned by a promoter
    LinkId
);
uuid_id!(
    /// Reward tier within a program
    CircleId
);
uuid_id!(
    /// Promoter-defined rule
    RuleId
);
uuid_id!(
    /// Referral event identity, the dedup key of the rule engine
    EventId
);
uuid_id!(
    /// Generated commission
    CommissionId
);
uuid_id!(
    /// Failed-effect record
    FailureId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrips_through_string() {
        let id = PromoterId::new();
        let parsed: PromoterId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_rejects_non_uuid() {
        assert!("not-a-uuid".parse::<LinkId>().is_err());
    }

    #[test]
    fn test_id_serializes_as_plain_uuid() {
        let uuid = Uuid::parse_str("01934f4a-1000-7000-8000-000000001000").unwrap();
        let json = serde_json::to_string(&EventId::from_uuid(uuid)).unwrap();
        assert_eq!(json, "\"01934f4a-1000-7000-8000-000000001000\"");
    }
}
