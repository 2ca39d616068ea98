//! API route handlers
//!
//! GET /health           - liveness probe
//! GET /api/feed         - current feed snapshot with sync state
//! GET /api/allowance    - read-only allowance(owner, spender) call
//! GET /ws               - snapshot replay followed by live records

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::chain::Ledger;
use crate::feed::FeedSession;
use crate::models::{Config, FeedResponse, WsServerEvent};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<FeedSession>,
    pub ledger: Arc<dyn Ledger>,
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/feed", get(get_feed))
        .route("/api/allowance", get(get_allowance))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_feed(State(state): State<AppState>) -> impl IntoResponse {
    let response = FeedResponse {
        token_address: state.config.token_address.clone(),
        token_decimals: state.config.token_decimals,
        synced_to_block: state.session.synced_to_block(),
        backfill_error: state.session.backfill_error(),
        records: state.session.store().snapshot(),
    };

    Json(response)
}

#[derive(Debug, Deserialize)]
struct AllowanceParams {
    owner: String,
    spender: String,
}

async fn get_allowance(
    State(state): State<AppState>,
    Query(params): Query<AllowanceParams>,
) -> Response {
    if !is_address(&params.owner) || !is_address(&params.spender) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "owner and spender must be 0x-prefixed 20-byte addresses"
            })),
        )
            .into_response();
    }

    match state.ledger.allowance(&params.owner, &params.spender).await {
        Ok(allowance) => Json(serde_json::json!({
            "token_address": state.config.token_address,
            "owner": params.owner.to_lowercase(),
            "spender": params.spender.to_lowercase(),
            "allowance": allowance.to_string(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "allowance call failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": format!("{:#}", e) })),
            )
                .into_response()
        }
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let store = state.session.store();
    let mut rx = store.subscribe();

    // Replay the current snapshot on connect so the client is never
    // empty, then stream live records as they are accepted.
    for record in store.snapshot() {
        let msg = serde_json::to_string(&WsServerEvent::Activity(record))
            .unwrap_or_else(|_| "{}".to_string());
        if socket.send(Message::Text(msg)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(record) => {
                        let msg = serde_json::to_string(&WsServerEvent::Activity(record))
                            .unwrap_or_else(|e| {
                                warn!("failed to serialize ws event: {}", e);
                                "{}".to_string()
                            });
                        if socket.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ws client lagging, records skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => debug!("ignoring client ws message"),
                    Some(Err(e)) => {
                        debug!(error = %e, "ws read error");
                        break;
                    }
                }
            }
        }
    }
}

fn is_address(s: &str) -> bool {
    let hexpart = match s.strip_prefix("0x") {
        Some(h) => h,
        None => return false,
    };
    hexpart.len() == 40 && hexpart.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_address() {
        assert!(is_address("0xf977814e90da44bfa03b6295a0616a897441acec"));
        assert!(is_address("0xF977814e90dA44bFA03b6295A0616a897441aceC"));
        assert!(!is_address("f977814e90da44bfa03b6295a0616a897441acec"));
        assert!(!is_address("0x1234"));
        assert!(!is_address("0xzz77814e90da44bfa03b6295a0616a897441acec"));
    }
}
