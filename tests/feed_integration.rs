//! End-to-end feed scenarios against a scripted in-memory ledger

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::{mpsc, watch};

use tokenfeed_backend::chain::{EventKind, Ledger, RawEvent, ZERO_ADDRESS};
use tokenfeed_backend::feed::{
    BackfillScanner, FeedError, FeedSession, FeedStore, LiveMerger, TimestampResolver,
};
use tokenfeed_backend::models::Config;

const ALICE: &str = "0xf977814e90da44bfa03b6295a0616a897441acec";
const BOB: &str = "0xe7804c37c13166ff0b37f5ae0bb07a3aebb6e245";
const CAROL: &str = "0x505e71695e9bc45943c58adec1650577bca68fd9";

fn transfer(from: &str, to: &str, amount: u64, block: u64) -> RawEvent {
    RawEvent {
        kind: EventKind::Transfer,
        source: from.to_string(),
        target: to.to_string(),
        amount: BigUint::from(amount),
        block_number: block,
        log_index: 0,
    }
}

fn approval(owner: &str, spender: &str, amount: u64, block: u64) -> RawEvent {
    RawEvent {
        kind: EventKind::Approval,
        source: owner.to_string(),
        target: spender.to_string(),
        amount: BigUint::from(amount),
        block_number: block,
        log_index: 0,
    }
}

/// Scripted ledger: fixed event history, derived block times, optional
/// failure injection, and a counter for the dedup property.
#[derive(Default)]
struct MockLedger {
    transfers: Vec<RawEvent>,
    approvals: Vec<RawEvent>,
    failing_blocks: HashSet<u64>,
    fail_queries: bool,
    block_calls: AtomicUsize,
}

impl MockLedger {
    fn new(transfers: Vec<RawEvent>, approvals: Vec<RawEvent>) -> Arc<Self> {
        Arc::new(Self {
            transfers,
            approvals,
            ..Default::default()
        })
    }

    fn with_failing_blocks(
        transfers: Vec<RawEvent>,
        approvals: Vec<RawEvent>,
        failing_blocks: impl IntoIterator<Item = u64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transfers,
            approvals,
            failing_blocks: failing_blocks.into_iter().collect(),
            ..Default::default()
        })
    }

    fn failing_queries() -> Arc<Self> {
        Arc::new(Self {
            fail_queries: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn query_past_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        if self.fail_queries {
            anyhow::bail!("node unavailable");
        }
        let source = match kind {
            EventKind::Transfer => &self.transfers,
            EventKind::Approval => &self.approvals,
        };
        Ok(source
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_blocks.contains(&block_number) {
            anyhow::bail!("block {} lookup failed", block_number);
        }
        Ok(1_700_000_000 + 12 * block_number as i64)
    }

    async fn latest_block(&self) -> Result<u64> {
        if self.fail_queries {
            anyhow::bail!("node unavailable");
        }
        let head = self
            .transfers
            .iter()
            .chain(&self.approvals)
            .map(|e| e.block_number)
            .max()
            .unwrap_or(0);
        Ok(head)
    }

    async fn allowance(&self, _owner: &str, _spender: &str) -> Result<BigUint> {
        Ok(BigUint::from(0u8))
    }
}

fn scanner(ledger: Arc<MockLedger>) -> (BackfillScanner, Arc<TimestampResolver>) {
    let resolver = Arc::new(TimestampResolver::new(ledger.clone()));
    (BackfillScanner::new(ledger, resolver.clone()), resolver)
}

async fn wait_for_len(store: &FeedStore, len: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.len() < len {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("feed never reached {} records (got {})", len, store.len()));
}

#[tokio::test]
async fn scan_orders_descending_with_stable_ties() {
    let ledger = MockLedger::new(
        vec![
            transfer(ALICE, BOB, 1, 5),
            transfer(ALICE, BOB, 2, 9),
            transfer(BOB, CAROL, 3, 9),
        ],
        vec![approval(ALICE, BOB, 4, 9), approval(BOB, CAROL, 5, 7)],
    );

    let (scanner, _) = scanner(ledger);
    let records = scanner.scan(0, 20).await.unwrap();

    let blocks: Vec<u64> = records.iter().map(|r| r.block_number).collect();
    assert_eq!(blocks, vec![9, 9, 9, 7, 5]);

    // Stable ties inside block 9: transfer batch order first, then the
    // approval batch, exactly as queried.
    assert_eq!(records[0].amount, BigUint::from(2u8));
    assert_eq!(records[1].amount, BigUint::from(3u8));
    assert_eq!(records[2].amount, BigUint::from(4u8));
}

#[tokio::test]
async fn scan_filters_mints_and_timestamps_every_record() {
    let ledger = MockLedger::new(
        vec![
            transfer(ZERO_ADDRESS, ALICE, 1_000, 8),
            transfer(ALICE, BOB, 500, 10),
        ],
        vec![approval(ALICE, BOB, 200, 12)],
    );

    let (scanner, _) = scanner(ledger);
    let records = scanner.scan(0, 20).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, EventKind::Approval);
    assert_eq!(records[0].block_number, 12);
    assert_eq!(records[1].kind, EventKind::Transfer);
    assert_eq!(records[1].block_number, 10);
    assert!(records.iter().all(|r| !r.timestamp.is_empty()));
}

#[tokio::test]
async fn scan_deduplicates_block_lookups() {
    // 6 events across 3 distinct blocks
    let ledger = MockLedger::new(
        vec![
            transfer(ALICE, BOB, 1, 10),
            transfer(BOB, ALICE, 2, 10),
            transfer(ALICE, CAROL, 3, 12),
        ],
        vec![
            approval(ALICE, BOB, 4, 12),
            approval(BOB, CAROL, 5, 15),
            approval(CAROL, ALICE, 6, 15),
        ],
    );

    let (scanner, _) = scanner(ledger.clone());
    let records = scanner.scan(0, 20).await.unwrap();

    assert_eq!(records.len(), 6);
    assert_eq!(ledger.block_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn scan_is_idempotent_over_unchanged_range() {
    let ledger = MockLedger::new(
        vec![transfer(ALICE, BOB, 500, 10)],
        vec![approval(ALICE, BOB, 200, 12)],
    );

    // Fresh resolver each time so caching cannot mask a difference
    let (first_scanner, _) = scanner(ledger.clone());
    let first = first_scanner.scan(0, 20).await.unwrap();

    let (second_scanner, _) = scanner(ledger);
    let second = second_scanner.scan(0, 20).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn failed_block_lookup_drops_only_affected_events() {
    let ledger = MockLedger::with_failing_blocks(
        vec![transfer(ALICE, BOB, 500, 10)],
        vec![approval(ALICE, BOB, 200, 12)],
        [10],
    );

    let (scanner, _) = scanner(ledger);
    let records = scanner.scan(0, 20).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].block_number, 12);
    assert_eq!(records[0].kind, EventKind::Approval);
    assert!(records.iter().all(|r| !r.timestamp.is_empty()));
}

#[tokio::test]
async fn query_failure_aborts_whole_backfill() {
    let ledger = MockLedger::failing_queries();
    let (scanner, _) = scanner(ledger);

    match scanner.scan(0, 20).await {
        Err(FeedError::Query { .. }) => {}
        other => panic!("expected query failure, got {:?}", other.map(|r| r.len())),
    }
}

/// Backfill then live: a block-15 approval lands at the head.
#[tokio::test]
async fn live_record_is_prepended_after_backfill() {
    let ledger = MockLedger::new(
        vec![transfer(ALICE, BOB, 500, 10)],
        vec![approval(ALICE, BOB, 200, 12)],
    );

    let (scanner, resolver) = scanner(ledger);
    let store = FeedStore::new();
    assert!(store.replace_all(scanner.scan(0, 12).await.unwrap()));
    assert_eq!(store.len(), 2);

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let merger = LiveMerger::new(resolver, store.clone(), 12);
    let merger_task = tokio::spawn(merger.run(raw_rx, shutdown_rx));

    raw_tx.send(approval(BOB, CAROL, 300, 15)).unwrap();
    wait_for_len(&store, 3).await;

    let blocks: Vec<u64> = store.snapshot().iter().map(|r| r.block_number).collect();
    assert_eq!(blocks, vec![15, 12, 10]);
    assert_eq!(store.head_block(), Some(15));
    assert!(store.snapshot().iter().all(|r| !r.timestamp.is_empty()));

    shutdown_tx.send(true).unwrap();
    merger_task.await.unwrap();
}

/// Deliveries buffered during the scan that the scan already covered
/// are dropped; everything above the cutoff is appended exactly once.
#[tokio::test]
async fn live_deliveries_at_or_below_cutoff_are_dropped() {
    let ledger = MockLedger::new(Vec::new(), vec![approval(ALICE, BOB, 200, 12)]);

    let (scanner, resolver) = scanner(ledger);
    let store = FeedStore::new();
    store.replace_all(scanner.scan(0, 12).await.unwrap());

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let merger = LiveMerger::new(resolver, store.clone(), 12);
    let merger_task = tokio::spawn(merger.run(raw_rx, shutdown_rx));

    // Already covered by the scan
    raw_tx.send(approval(ALICE, BOB, 200, 12)).unwrap();
    raw_tx.send(transfer(ALICE, BOB, 1, 10)).unwrap();
    // New ground
    raw_tx.send(approval(BOB, CAROL, 300, 15)).unwrap();

    wait_for_len(&store, 2).await;
    // Give the dropped deliveries a chance to have landed if they were
    // going to.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let blocks: Vec<u64> = store.snapshot().iter().map(|r| r.block_number).collect();
    assert_eq!(blocks, vec![15, 12]);

    shutdown_tx.send(true).unwrap();
    merger_task.await.unwrap();
}

#[tokio::test]
async fn live_mint_transfers_are_filtered() {
    let ledger = MockLedger::new(Vec::new(), Vec::new());
    let resolver = Arc::new(TimestampResolver::new(ledger));
    let store = FeedStore::new();

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let merger = LiveMerger::new(resolver, store.clone(), 0);
    let merger_task = tokio::spawn(merger.run(raw_rx, shutdown_rx));

    raw_tx.send(transfer(ZERO_ADDRESS, ALICE, 1_000, 20)).unwrap();
    raw_tx.send(approval(ALICE, BOB, 50, 21)).unwrap();

    wait_for_len(&store, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].kind, EventKind::Approval);
    assert_eq!(snapshot[0].block_number, 21);

    shutdown_tx.send(true).unwrap();
    merger_task.await.unwrap();
}

/// A resolution that completes after teardown must not write into the
/// closed store.
#[tokio::test]
async fn closed_store_rejects_late_records() {
    let ledger = MockLedger::new(Vec::new(), Vec::new());
    let resolver = Arc::new(TimestampResolver::new(ledger));
    let store = FeedStore::new();

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let merger = LiveMerger::new(resolver, store.clone(), 0);
    let _merger_task = tokio::spawn(merger.run(raw_rx, shutdown_rx));

    store.close();
    raw_tx.send(approval(ALICE, BOB, 50, 21)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.is_empty());
}

/// Session-level failure path: the scan cannot complete, the session
/// refuses to go live and the error stays visible.
#[tokio::test]
async fn backfill_failure_marks_session_error() {
    let config = Config {
        rpc_http_url: "http://127.0.0.1:1".to_string(),
        // Unreachable on purpose; the subscription task just retries
        // until the failed backfill shuts it down.
        rpc_ws_url: "ws://127.0.0.1:1".to_string(),
        token_address: "0x455e53cbb86018ac2b8092fdcd39d8444affc3f6".to_string(),
        token_decimals: 18,
        from_block: 0,
        port: 0,
    };

    let ledger = MockLedger::failing_queries();
    let session = FeedSession::new(ledger, config);

    assert!(session.start().await.is_err());
    assert!(session.backfill_error().is_some());
    assert_eq!(session.synced_to_block(), None);
    assert!(session.store().is_empty());

    session.shutdown().await;
}
