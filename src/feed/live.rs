//! Live delivery merging
//!
//! Single-consumer loop between the subscription client and the store.
//! Deliveries queue in the subscription channel while the historical
//! scan runs, so nothing is lost in the gap; once draining starts,
//! anything at or below the scan cutoff is discarded (the scan already
//! covered it) and the rest is timestamped and prepended.
//!
//! Each delivery resolves its block independently. Two in-flight live
//! events may therefore land in completion order rather than block
//! order; that transient misordering is accepted and logged, not fixed.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chain::RawEvent;

use super::{normalize, ActivityRecord, FeedError, FeedStore, TimestampResolver};

pub struct LiveMerger {
    resolver: Arc<TimestampResolver>,
    store: Arc<FeedStore>,
    /// Highest block covered by the historical scan; deliveries at or
    /// below it are duplicates of scanned history.
    cutoff_block: u64,
}

impl LiveMerger {
    pub fn new(
        resolver: Arc<TimestampResolver>,
        store: Arc<FeedStore>,
        cutoff_block: u64,
    ) -> Self {
        Self {
            resolver,
            store,
            cutoff_block,
        }
    }

    /// Drain deliveries until shutdown. Timestamp resolutions run as
    /// independent tasks; their completed records funnel back through a
    /// second channel so this loop stays the only store writer.
    pub async fn run(
        self,
        mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ActivityRecord>();

        info!(cutoff_block = self.cutoff_block, "live merger started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                delivery = raw_rx.recv() => {
                    match delivery {
                        Some(raw) => self.handle_delivery(raw, &done_tx),
                        // Subscription channel closed; keep flushing
                        // resolutions already in flight until shutdown.
                        None => {
                            if !*shutdown_rx.borrow() {
                                let err = FeedError::subscription(
                                    "delivery channel closed before shutdown",
                                );
                                warn!(error = %err, "live subscription ended");
                            }
                            self.flush_until_shutdown(&mut done_rx, &mut shutdown_rx).await;
                            break;
                        }
                    }
                }
                Some(record) = done_rx.recv() => self.publish(record),
            }
        }

        debug!("live merger exiting");
    }

    fn handle_delivery(&self, raw: RawEvent, done_tx: &mpsc::UnboundedSender<ActivityRecord>) {
        if raw.block_number <= self.cutoff_block {
            debug!(
                block = raw.block_number,
                cutoff = self.cutoff_block,
                "delivery already covered by historical scan, dropping"
            );
            return;
        }

        let Some(event) = normalize(raw) else {
            debug!("mint transfer filtered from live path");
            return;
        };

        let block_number = event.block_number;
        let resolver = self.resolver.clone();
        let done_tx = done_tx.clone();

        tokio::spawn(async move {
            match resolver.resolve(block_number).await {
                Ok(timestamp) => {
                    let _ = done_tx.send(event.into_record(timestamp));
                }
                Err(e) => {
                    // Best-effort feed, not an audit log: the record is
                    // dropped, the subscription stays up.
                    warn!(block = block_number, error = %e, "dropping live event");
                }
            }
        });
    }

    fn publish(&self, record: ActivityRecord) {
        if let Some(head) = self.store.head_block() {
            if record.block_number < head {
                warn!(
                    block = record.block_number,
                    head,
                    "live event below feed head, prepending out of order"
                );
            }
        }

        if !self.store.prepend(record) {
            debug!("feed store closed, discarding late record");
        }
    }

    async fn flush_until_shutdown(
        &self,
        done_rx: &mut mpsc::UnboundedReceiver<ActivityRecord>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                Some(record) = done_rx.recv() => self.publish(record),
            }
        }
    }
}
