//! Canonical activity records
//!
//! A raw log becomes a [`NormalizedEvent`] (no timestamp yet) and is
//! promoted to an [`ActivityRecord`] the moment its block timestamp
//! resolves. Only ActivityRecords ever reach the store, so readers can
//! never observe a record without a timestamp.

use num_bigint::BigUint;
use serde::{Serialize, Serializer};

use crate::chain::EventKind;

/// Serialize a token amount as a decimal string for JavaScript clients
fn serialize_biguint_as_string<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

/// A decoded event with the mint noise filtered out, not yet timestamped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    /// Sender (Transfer) / owner (Approval)
    pub from: String,
    /// Recipient (Transfer) / spender (Approval)
    pub to: String,
    /// Amount in the smallest token unit
    pub amount: BigUint,
    pub block_number: u64,
}

impl NormalizedEvent {
    /// Attach the resolved block timestamp, producing the record the
    /// feed actually stores.
    pub fn into_record(self, timestamp: String) -> ActivityRecord {
        ActivityRecord {
            kind: self.kind,
            from: self.from,
            to: self.to,
            amount: self.amount,
            block_number: self.block_number,
            timestamp,
        }
    }
}

/// One entry of the activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub kind: EventKind,
    /// Sender (Transfer) / owner (Approval)
    pub from: String,
    /// Recipient (Transfer) / spender (Approval)
    pub to: String,
    /// Amount in the smallest token unit, decimal string on the wire
    #[serde(serialize_with = "serialize_biguint_as_string")]
    pub amount: BigUint,
    pub block_number: u64,
    /// Human-readable block time, e.g. "2024-05-01 12:30:05 UTC"
    pub timestamp: String,
}
