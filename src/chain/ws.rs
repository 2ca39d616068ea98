//! Live log subscription client
//!
//! Holds one WebSocket connection to the node with an eth_subscribe per
//! event kind, pushing decoded events into an unbounded channel. The
//! connection auto-reconnects with exponential backoff and re-issues its
//! subscriptions; a watch-channel shutdown signal tears it down, with a
//! best-effort eth_unsubscribe before the socket drops.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{EventKind, LogEntry, RawEvent};

const SUBSCRIBE_ID_TRANSFER: u64 = 1;
const SUBSCRIBE_ID_APPROVAL: u64 = 2;

/// Incoming eth_subscription notification
#[derive(Debug, Deserialize)]
struct SubscriptionNotification {
    params: SubscriptionParams,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    #[allow(dead_code)]
    subscription: String,
    result: LogEntry,
}

/// WebSocket client streaming Transfer/Approval logs for one token
pub struct ChainWsClient {
    ws_url: String,
    token_address: String,
    event_tx: mpsc::UnboundedSender<RawEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ChainWsClient {
    /// Create the client and the receiving half of its event channel
    pub fn new(
        ws_url: String,
        token_address: String,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let client = Self {
            ws_url,
            token_address: token_address.to_lowercase(),
            event_tx,
            shutdown_rx,
        };

        (client, event_rx)
    }

    /// Connect and stream until shutdown, reconnecting on failures
    pub async fn run(self) {
        let mut reconnect_delay = Duration::from_secs(1);
        let max_reconnect_delay = Duration::from_secs(60);

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match self.connect_and_stream().await {
                Ok(_) => {
                    // Clean exit only happens on shutdown or server close
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                    info!("log subscription closed by server, reconnecting");
                    reconnect_delay = Duration::from_secs(1);
                }
                Err(e) => {
                    error!(error = %e, "log subscription error");
                    warn!("reconnecting in {:?}...", reconnect_delay);

                    let mut shutdown_rx = self.shutdown_rx.clone();
                    tokio::select! {
                        _ = sleep(reconnect_delay) => {}
                        _ = shutdown_rx.changed() => break,
                    }

                    reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                }
            }
        }

        debug!("log subscription task exiting");
    }

    async fn connect_and_stream(&self) -> Result<()> {
        info!("🔌 Connecting to node WebSocket...");

        let (ws_stream, response) = connect_async(self.ws_url.as_str())
            .await
            .context("failed to connect to node WebSocket")?;

        info!("✅ WebSocket connected (status: {})", response.status());

        let (mut write, mut read) = ws_stream.split();

        // One standing subscription per event kind
        for (id, kind) in [
            (SUBSCRIBE_ID_TRANSFER, EventKind::Transfer),
            (SUBSCRIBE_ID_APPROVAL, EventKind::Approval),
        ] {
            let sub = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "eth_subscribe",
                "params": ["logs", {
                    "address": self.token_address,
                    "topics": [kind.signature_topic()],
                }]
            });

            write
                .send(Message::Text(sub.to_string()))
                .await
                .with_context(|| format!("failed to subscribe to {} logs", kind.as_str()))?;
        }

        info!(
            token = %self.token_address,
            "📡 Subscribed to transfer/approval log streams"
        );

        // Subscription ids from the two acks, needed for eth_unsubscribe
        let mut subscription_ids: Vec<String> = Vec::with_capacity(2);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    for sub_id in &subscription_ids {
                        let unsub = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": 99,
                            "method": "eth_unsubscribe",
                            "params": [sub_id]
                        });
                        let _ = write.send(Message::Text(unsub.to_string())).await;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = read.next() => {
                    let Some(message) = message else {
                        info!("WebSocket stream ended");
                        return Ok(());
                    };

                    match message {
                        Ok(Message::Text(text)) => {
                            self.handle_text(&text, &mut subscription_ids);
                        }
                        Ok(Message::Ping(ping)) => {
                            write
                                .send(Message::Pong(ping))
                                .await
                                .context("failed to send pong")?;
                        }
                        Ok(Message::Pong(_)) => {}
                        Ok(Message::Close(frame)) => {
                            info!("WebSocket closed by server: {:?}", frame);
                            return Ok(());
                        }
                        Ok(Message::Binary(data)) => {
                            warn!("unexpected binary message: {} bytes", data.len());
                        }
                        Err(e) => {
                            error!(error = %e, "WebSocket read error");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, subscription_ids: &mut Vec<String>) {
        match serde_json::from_str::<SubscriptionNotification>(text) {
            Ok(notification) => {
                let log = notification.params.result;

                // Reorg notice: the node retracts a previously delivered
                // log. Out-of-order handling is not a guarantee of this
                // feed, so surface it and move on.
                if log.removed.unwrap_or(false) {
                    warn!(block = %log.block_number, "log removed by reorg, ignoring");
                    return;
                }

                match log.decode() {
                    Ok(event) => {
                        debug!(
                            kind = event.kind.as_str(),
                            block = event.block_number,
                            "live log received"
                        );
                        if self.event_tx.send(event).is_err() {
                            debug!("event channel closed, dropping live log");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to decode live log"),
                }
            }
            Err(_) => {
                // Not a notification: subscription ack or other control
                // frame. The acks carry the ids we need for unsubscribe.
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                    match (value.get("id"), value.get("result")) {
                        (Some(id), Some(serde_json::Value::String(sub_id)))
                            if id.as_u64() == Some(SUBSCRIBE_ID_TRANSFER)
                                || id.as_u64() == Some(SUBSCRIBE_ID_APPROVAL) =>
                        {
                            debug!(subscription = %sub_id, "subscription confirmed");
                            subscription_ids.push(sub_id.clone());
                        }
                        _ => debug!("control message: {}", text),
                    }
                } else {
                    warn!("unparseable WebSocket message: {}", text);
                }
            }
        }
    }
}
