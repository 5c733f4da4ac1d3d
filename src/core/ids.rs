//! Identifiers
//!
//! Parties, rounds and batches are all named by 16 raw bytes (UUID layout).
//! Every identifier implements `Ord` so maps keyed by them iterate in a
//! deterministic order.

use std::fmt;
use serde::{Serialize, Deserialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Create from raw bytes.
            pub const fn new(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Create a fresh random identifier (UUID v4).
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().into_bytes())
            }

            /// Create from UUID string.
            pub fn from_uuid_str(s: &str) -> Option<Self> {
                uuid::Uuid::parse_str(s)
                    .ok()
                    .map(|u| Self(*u.as_bytes()))
            }

            /// Convert to UUID string.
            pub fn to_uuid_string(&self) -> String {
                uuid::Uuid::from_bytes(self.0).to_string()
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_uuid_string())
            }
        }
    };
}

uuid_id! {
    /// A protocol participant.
    PartyId
}

uuid_id! {
    /// A commit-reveal round.
    RoundId
}

uuid_id! {
    /// A Merkle batch of precommitted secrets.
    BatchId
}
