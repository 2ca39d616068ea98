//! JSON-RPC HTTP client for historical ledger queries
//!
//! Plain eth_* calls over a pooled reqwest client. Covers everything the
//! feed needs from the chain's request/response surface: past logs,
//! block timestamps, the current head, and the read-only allowance call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    parse_hex_amount, parse_hex_u64, EventKind, Ledger, LogEntry, RawEvent,
};

/// allowance(address,address) selector
const ALLOWANCE_SELECTOR: &str = "0xdd62ed3e";

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

/// Block fields we care about (eth_getBlockByNumber with hydrate=false)
#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

pub struct EthRpcClient {
    client: Client,
    rpc_url: String,
    token_address: String,
}

impl EthRpcClient {
    pub fn new(rpc_url: &str, token_address: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            token_address: token_address.to_lowercase(),
        })
    }

    pub fn token_address(&self) -> &str {
        &self.token_address
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .json()
            .await
            .with_context(|| format!("failed to parse {} response", method))?;

        if let Some(err) = response.error {
            anyhow::bail!("{} RPC error: {}", method, err);
        }

        response
            .result
            .with_context(|| format!("no result in {} response", method))
    }
}

#[async_trait]
impl Ledger for EthRpcClient {
    async fn query_past_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let filter = serde_json::json!({
            "address": self.token_address,
            "topics": [kind.signature_topic()],
            "fromBlock": hex_quantity(from_block),
            "toBlock": hex_quantity(to_block),
        });

        let logs: Vec<LogEntry> = self.call("eth_getLogs", serde_json::json!([filter])).await?;

        debug!(
            kind = kind.as_str(),
            from_block,
            to_block,
            count = logs.len(),
            "fetched past logs"
        );

        // A log that matched the topic filter but does not decode is
        // malformed node output; skip it rather than poisoning the scan.
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match log.decode() {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "skipping undecodable log"),
            }
        }

        Ok(events)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64> {
        let header: Option<BlockHeader> = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([hex_quantity(block_number), false]),
            )
            .await?;

        let header =
            header.with_context(|| format!("block {} not found", block_number))?;

        let secs = parse_hex_u64(&header.timestamp)
            .with_context(|| format!("bad timestamp in block {}", block_number))?;

        Ok(secs as i64)
    }

    async fn latest_block(&self) -> Result<u64> {
        let head: String = self
            .call("eth_blockNumber", serde_json::json!([]))
            .await?;
        parse_hex_u64(&head)
    }

    async fn allowance(&self, owner: &str, spender: &str) -> Result<BigUint> {
        let data = format!(
            "{}{}{}",
            ALLOWANCE_SELECTOR,
            encode_address_word(owner)?,
            encode_address_word(spender)?
        );

        let result: String = self
            .call(
                "eth_call",
                serde_json::json!([
                    { "to": self.token_address, "data": data },
                    "latest"
                ]),
            )
            .await?;

        parse_hex_amount(&result)
    }
}

/// Format a block number as a 0x-prefixed hex quantity
fn hex_quantity(n: u64) -> String {
    format!("{:#x}", n)
}

/// ABI-encode an address as a left-padded 32-byte word (no 0x prefix)
fn encode_address_word(addr: &str) -> Result<String> {
    let hexpart = addr.trim_start_matches("0x");
    if hexpart.len() != 40 || !hexpart.bytes().all(|b| b.is_ascii_hexdigit()) {
        anyhow::bail!("invalid address: {}", addr);
    }
    Ok(format!("{:0>64}", hexpart.to_lowercase()))
}
