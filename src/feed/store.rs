//! Ordered record store shared by the backfill and live paths
//!
//! Single writer discipline: the one-shot backfill installs the initial
//! batch with `replace_all`, after which only the merger loop prepends.
//! Readers take cheap cloned snapshots; /ws consumers get each accepted
//! live record through the broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::ActivityRecord;

pub struct FeedStore {
    /// Records ordered by descending block number, most recent first
    records: RwLock<Vec<ActivityRecord>>,
    /// Set at teardown; all writes after that are rejected no-ops
    closed: AtomicBool,
    update_tx: broadcast::Sender<ActivityRecord>,
}

impl FeedStore {
    pub fn new() -> Arc<Self> {
        let (update_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            records: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            update_tx,
        })
    }

    /// Install the backfill batch. The batch is expected to be sorted
    /// descending by block number already; no broadcast is emitted,
    /// readers pick it up via snapshot.
    pub fn replace_all(&self, records: Vec<ActivityRecord>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        *self.records.write() = records;
        true
    }

    /// Insert a live record at the head and notify /ws subscribers.
    /// Returns false if the store was already torn down.
    pub fn prepend(&self, record: ActivityRecord) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.records.write().insert(0, record.clone());
        let _ = self.update_tx.send(record);
        true
    }

    /// Read-only view for the presentation layer
    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        self.records.read().clone()
    }

    /// Block number of the most recent record, if any
    pub fn head_block(&self) -> Option<u64> {
        self.records.read().first().map(|r| r.block_number)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Receiver of live records accepted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityRecord> {
        self.update_tx.subscribe()
    }

    /// Reject all further writes. In-flight resolutions completing after
    /// teardown land here and are silently discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use crate::chain::EventKind;
    use crate::feed::NormalizedEvent;

    use super::*;

    fn record(block_number: u64) -> ActivityRecord {
        NormalizedEvent {
            kind: EventKind::Transfer,
            from: "0xaa".to_string(),
            to: "0xbb".to_string(),
            amount: BigUint::from(1u8),
            block_number,
        }
        .into_record("2024-05-01 00:00:00 UTC".to_string())
    }

    #[test]
    fn test_prepend_puts_record_at_head() {
        let store = FeedStore::new();
        assert!(store.replace_all(vec![record(12), record(10)]));
        assert!(store.prepend(record(15)));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].block_number, 15);
        assert_eq!(store.head_block(), Some(15));
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let store = FeedStore::new();
        store.replace_all(vec![record(10)]);
        store.close();

        assert!(!store.prepend(record(15)));
        assert!(!store.replace_all(Vec::new()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prepend_notifies_subscribers() {
        let store = FeedStore::new();
        let mut rx = store.subscribe();

        store.prepend(record(15));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.block_number, 15);
    }
}
