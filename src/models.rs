use serde::Serialize;

use crate::feed::ActivityRecord;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub rpc_ws_url: String,
    pub token_address: String,
    pub token_decimals: u32,
    pub from_block: u64,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let rpc_http_url = std::env::var("RPC_HTTP_URL")
            .map_err(|_| anyhow::anyhow!("RPC_HTTP_URL must be set (http(s):// node endpoint)"))?;

        let rpc_ws_url = std::env::var("RPC_WS_URL")
            .map_err(|_| anyhow::anyhow!("RPC_WS_URL must be set (ws(s):// node endpoint)"))?;

        let token_address = std::env::var("TOKEN_ADDRESS")
            .map_err(|_| anyhow::anyhow!("TOKEN_ADDRESS must be set (0x-prefixed contract address)"))?
            .to_lowercase();

        let token_decimals = std::env::var("TOKEN_DECIMALS")
            .unwrap_or_else(|_| "18".to_string())
            .parse()
            .unwrap_or(18);

        let from_block = std::env::var("FROM_BLOCK")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        Ok(Self {
            rpc_http_url,
            rpc_ws_url,
            token_address,
            token_decimals,
            from_block,
            port,
        })
    }
}

/// Server-to-client event pushed over the /ws stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsServerEvent {
    /// A newly observed activity record (live path only; the snapshot
    /// is replayed on connect)
    Activity(ActivityRecord),
}

/// Response for GET /api/feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse {
    pub token_address: String,
    pub token_decimals: u32,
    /// Highest block covered by the historical scan, if it completed
    pub synced_to_block: Option<u64>,
    /// Set when the historical scan failed; the feed below is then
    /// empty or partial and should be rendered as an error state
    pub backfill_error: Option<String>,
    pub records: Vec<ActivityRecord>,
}
