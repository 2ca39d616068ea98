//! Feed session lifecycle
//!
//! One explicit object owns everything with session lifetime: the
//! store, the timestamp cache, the subscription client, and the merger
//! task. Constructed at startup, torn down exactly once; nothing hangs
//! off module-level state.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::chain::{ws::ChainWsClient, Ledger};
use crate::models::Config;

use super::{BackfillScanner, FeedError, FeedStore, LiveMerger, TimestampResolver};

pub struct FeedSession {
    config: Config,
    ledger: Arc<dyn Ledger>,
    resolver: Arc<TimestampResolver>,
    store: Arc<FeedStore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    synced_to: RwLock<Option<u64>>,
    backfill_error: RwLock<Option<String>>,
}

impl FeedSession {
    pub fn new(ledger: Arc<dyn Ledger>, config: Config) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            resolver: Arc::new(TimestampResolver::new(ledger.clone())),
            store: FeedStore::new(),
            config,
            ledger,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
            synced_to: RwLock::new(None),
            backfill_error: RwLock::new(None),
        })
    }

    /// Subscribe, backfill, then start merging live deliveries.
    ///
    /// The subscriptions are established before the scan so nothing is
    /// mined into the gap between them; their deliveries buffer in the
    /// channel until the merger starts and drops everything the scan
    /// already covered. On backfill failure the session stops (live
    /// merging without settled history would corrupt ordering) and the
    /// error stays visible to the API.
    pub async fn start(&self) -> Result<(), FeedError> {
        let (ws_client, raw_rx) = ChainWsClient::new(
            self.config.rpc_ws_url.clone(),
            self.config.token_address.clone(),
            self.shutdown_rx.clone(),
        );
        self.tasks.lock().push(tokio::spawn(ws_client.run()));

        let to_block = match self.ledger.latest_block().await {
            Ok(head) => head,
            Err(e) => return Err(self.fail_backfill(FeedError::query("chain head", e))),
        };

        let scanner = BackfillScanner::new(self.ledger.clone(), self.resolver.clone());
        let records = match scanner.scan(self.config.from_block, to_block).await {
            Ok(records) => records,
            Err(e) => return Err(self.fail_backfill(e)),
        };

        let count = records.len();
        self.store.replace_all(records);
        *self.synced_to.write() = Some(to_block);
        info!(records = count, to_block, "✅ backfill complete, switching to live merging");

        let merger = LiveMerger::new(self.resolver.clone(), self.store.clone(), to_block);
        self.tasks
            .lock()
            .push(tokio::spawn(merger.run(raw_rx, self.shutdown_rx.clone())));

        Ok(())
    }

    fn fail_backfill(&self, err: FeedError) -> FeedError {
        error!(error = %err, "backfill failed, session stopped");
        *self.backfill_error.write() = Some(err.to_string());
        // Live merging must not begin on unsettled history; stop the
        // subscription task as well.
        let _ = self.shutdown_tx.send(true);
        err
    }

    pub fn store(&self) -> Arc<FeedStore> {
        self.store.clone()
    }

    /// Highest block covered by the completed backfill
    pub fn synced_to_block(&self) -> Option<u64> {
        *self.synced_to.read()
    }

    pub fn backfill_error(&self) -> Option<String> {
        self.backfill_error.read().clone()
    }

    /// Tear the session down: close the store first so in-flight
    /// resolutions cannot write, then cancel the tasks and wait for
    /// them to exit.
    pub async fn shutdown(&self) {
        info!("tearing down feed session");
        self.store.close();
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
