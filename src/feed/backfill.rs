//! One-shot historical scan
//!
//! Runs exactly once at session start, before any live record is
//! accepted. A failed log query aborts the scan (partial history with
//! missing blocks would be misleading); a failed block lookup only
//! drops the events referencing that block.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chain::{EventKind, Ledger};

use super::{normalize, ActivityRecord, FeedError, TimestampResolver};

pub struct BackfillScanner {
    ledger: Arc<dyn Ledger>,
    resolver: Arc<TimestampResolver>,
}

impl BackfillScanner {
    pub fn new(ledger: Arc<dyn Ledger>, resolver: Arc<TimestampResolver>) -> Self {
        Self { ledger, resolver }
    }

    /// Scan the inclusive block range for both event kinds and return
    /// the timestamped records sorted by descending block number
    /// (stable for ties, so within a block the query order holds).
    pub async fn scan(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ActivityRecord>, FeedError> {
        // Two independent queries; relative order between them is
        // irrelevant once sorted.
        let transfers = self
            .ledger
            .query_past_events(EventKind::Transfer, from_block, to_block)
            .await
            .map_err(|e| FeedError::query("transfer logs", e))?;

        let approvals = self
            .ledger
            .query_past_events(EventKind::Approval, from_block, to_block)
            .await
            .map_err(|e| FeedError::query("approval logs", e))?;

        let raw_count = transfers.len() + approvals.len();

        let normalized: Vec<_> = transfers
            .into_iter()
            .chain(approvals)
            .filter_map(normalize)
            .collect();

        info!(
            from_block,
            to_block,
            raw = raw_count,
            kept = normalized.len(),
            "historical scan fetched"
        );

        // Resolve every distinct block concurrently and join before
        // sorting, so the sort step has all timestamps available.
        let timestamps = self
            .resolver
            .resolve_many(normalized.iter().map(|e| e.block_number))
            .await;

        let mut records: Vec<ActivityRecord> = normalized
            .into_iter()
            .filter_map(|event| {
                timestamps
                    .get(&event.block_number)
                    .map(|ts| event.into_record(ts.clone()))
            })
            .collect();

        records.sort_by(|a, b| b.block_number.cmp(&a.block_number));

        if records.len() < raw_count {
            warn!(
                dropped = raw_count - records.len(),
                "scan dropped events (mint filter or unresolvable blocks)"
            );
        }

        Ok(records)
    }
}
