//! Chain access layer
//!
//! Raw JSON-RPC over HTTP for historical queries and a WebSocket
//! subscription client for live logs. The two event shapes this service
//! cares about (Transfer, Approval) are fixed, so logs are decoded by
//! hand instead of pulling in ABI machinery.

pub mod rpc;
pub mod ws;

use anyhow::{Context, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a1c6f9f3b3ef";

/// keccak256("Approval(address,address,uint256)")
pub const APPROVAL_TOPIC: &str =
    "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

/// Sentinel "no sender" address marking token creation
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// The two log kinds this service aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    Approval,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transfer => "transfer",
            EventKind::Approval => "approval",
        }
    }

    /// topic0 value identifying this kind in a log
    pub fn signature_topic(&self) -> &'static str {
        match self {
            EventKind::Transfer => TRANSFER_TOPIC,
            EventKind::Approval => APPROVAL_TOPIC,
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        if topic.eq_ignore_ascii_case(TRANSFER_TOPIC) {
            Some(EventKind::Transfer)
        } else if topic.eq_ignore_ascii_case(APPROVAL_TOPIC) {
            Some(EventKind::Approval)
        } else {
            None
        }
    }
}

/// Log entry as returned by eth_getLogs and eth_subscribe
///
/// Quantities are 0x-prefixed hex strings per the JSON-RPC wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// True when the log was removed by a reorg notification
    #[serde(default)]
    pub removed: Option<bool>,
}

impl LogEntry {
    /// Decode into a RawEvent. Fails on logs that are not a well-formed
    /// Transfer or Approval (wrong topic0, missing indexed params).
    pub fn decode(&self) -> Result<RawEvent> {
        let topic0 = self
            .topics
            .first()
            .context("log has no topics")?;
        let kind = EventKind::from_topic(topic0)
            .with_context(|| format!("unknown event signature {}", topic0))?;

        if self.topics.len() < 3 {
            anyhow::bail!(
                "{} log has {} topics, expected 3",
                kind.as_str(),
                self.topics.len()
            );
        }

        Ok(RawEvent {
            kind,
            source: topic_address(&self.topics[1])?,
            target: topic_address(&self.topics[2])?,
            amount: parse_hex_amount(&self.data)?,
            block_number: parse_hex_u64(&self.block_number)?,
            log_index: self
                .log_index
                .as_deref()
                .map(parse_hex_u64)
                .transpose()?
                .unwrap_or(0),
        })
    }
}

/// A decoded Transfer or Approval straight off the wire
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub kind: EventKind,
    /// from (Transfer) / owner (Approval)
    pub source: String,
    /// to (Transfer) / spender (Approval)
    pub target: String,
    /// Token amount in the smallest unit
    pub amount: BigUint,
    pub block_number: u64,
    /// Position within the block; carried for diagnostics, not ordering
    pub log_index: u64,
}

/// Ledger query seam. One implementation talks JSON-RPC
/// ([`rpc::EthRpcClient`]); tests substitute their own.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// All events of one kind emitted by the token contract in the
    /// inclusive block range.
    async fn query_past_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>>;

    /// Unix timestamp (seconds) of the given block.
    async fn block_timestamp(&self, block_number: u64) -> Result<i64>;

    /// Current chain head.
    async fn latest_block(&self) -> Result<u64>;

    /// Remaining spending right granted by `owner` to `spender`.
    async fn allowance(&self, owner: &str, spender: &str) -> Result<BigUint>;
}

/// Parse a 0x-prefixed hex quantity
pub fn parse_hex_u64(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("invalid hex quantity: {}", s))
}

/// Extract the address from a 32-byte indexed topic (lower 20 bytes)
pub fn topic_address(topic: &str) -> Result<String> {
    let hexpart = topic.trim_start_matches("0x");
    if hexpart.len() < 40 || !hexpart.bytes().all(|b| b.is_ascii_hexdigit()) {
        anyhow::bail!("invalid address topic: {}", topic);
    }
    Ok(format!("0x{}", hexpart[hexpart.len() - 40..].to_lowercase()))
}

/// Parse a 0x-prefixed hex blob as an unsigned integer amount
pub fn parse_hex_amount(data: &str) -> Result<BigUint> {
    let hexpart = data.trim_start_matches("0x");
    if hexpart.is_empty() {
        return Ok(BigUint::from(0u8));
    }
    BigUint::parse_bytes(hexpart.as_bytes(), 16)
        .with_context(|| format!("invalid hex amount: {}", data))
}
