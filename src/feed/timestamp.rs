//! Block timestamp resolution with a single-flight cache
//!
//! Every event is shown with the wall-clock time of its block, so a
//! batch of events hits the same small set of blocks over and over. The
//! resolver caches per block for the session lifetime and deduplicates
//! concurrent lookups: the first caller for an unmapped block performs
//! the query, everyone else awaits the same cell.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::DateTime;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::chain::Ledger;

use super::FeedError;

pub struct TimestampResolver {
    ledger: Arc<dyn Ledger>,
    cache: Mutex<HashMap<u64, Arc<OnceCell<String>>>>,
}

impl TimestampResolver {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one block to its human-readable timestamp.
    ///
    /// A failed lookup leaves the cache slot empty, so a later event in
    /// the same block gets a fresh attempt.
    pub async fn resolve(&self, block_number: u64) -> Result<String, FeedError> {
        let cell = {
            let mut cache = self.cache.lock();
            cache
                .entry(block_number)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| {
            let ledger = self.ledger.clone();
            async move {
                let secs = ledger
                    .block_timestamp(block_number)
                    .await
                    .map_err(|e| FeedError::block_resolution(block_number, e))?;
                Ok(format_timestamp(secs))
            }
        })
        .await
        .cloned()
    }

    /// Resolve a batch of block numbers concurrently, deduplicated, and
    /// join on all of them. Blocks that fail to resolve are dropped from
    /// the returned map (their events are dropped by the caller).
    pub async fn resolve_many(
        &self,
        blocks: impl IntoIterator<Item = u64>,
    ) -> HashMap<u64, String> {
        let distinct: HashSet<u64> = blocks.into_iter().collect();

        let lookups = distinct
            .into_iter()
            .map(|block| async move { (block, self.resolve(block).await) });

        let mut resolved = HashMap::new();
        for (block, result) in join_all(lookups).await {
            match result {
                Ok(timestamp) => {
                    resolved.insert(block, timestamp);
                }
                Err(e) => {
                    warn!(block, error = %e, "dropping events in unresolvable block");
                }
            }
        }

        resolved
    }
}

/// Render unix seconds as "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
