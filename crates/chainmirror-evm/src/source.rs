//! Upstream chain source.
//!
//! The indexer pulls one block at a time through [`ChainSource`]. The HTTP
//! implementation talks to an Ethereum node with `eth_getBlockByNumber`
//! (full transactions) and, when event ingestion is on,
//! `eth_getBlockReceipts` for the logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use chainmirror_core::config::SourceConfig;
use chainmirror_core::error::MirrorError;
use chainmirror_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use chainmirror_core::quantity::{decode_u256, decode_u64, encode_u64};
use chainmirror_core::types::{Block, EventData, SourceBlock, SourceTransaction, TransactionData};

/// Why a block could not be fetched. Every variant is retried by the indexer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The chain has not reached this height yet.
    #[error("block {number} not yet produced")]
    NotYetProduced { number: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    /// The source answered with something that is not a valid block.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<FetchError> for MirrorError {
    fn from(e: FetchError) -> Self {
        MirrorError::Source(e.to_string())
    }
}

/// Something that can deliver blocks by height.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Fetch block `number` with its transactions and their events.
    async fn fetch_block(&self, number: u64) -> Result<SourceBlock, FetchError>;
}

#[async_trait]
impl<S: ChainSource + ?Sized> ChainSource for std::sync::Arc<S> {
    async fn fetch_block(&self, number: u64) -> Result<SourceBlock, FetchError> {
        (**self).fetch_block(number).await
    }
}

// ─── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    hash: B256,
    parent_hash: B256,
    timestamp: String,
    #[serde(default)]
    size: Option<String>,
    gas_limit: String,
    gas_used: String,
    transactions_root: B256,
    state_root: B256,
    receipts_root: B256,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: B256,
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    nonce: String,
    value: String,
    input: Bytes,
    #[serde(default)]
    v: Option<String>,
    #[serde(default)]
    r: Option<String>,
    #[serde(default)]
    s: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: Address,
    #[serde(default)]
    topics: Vec<B256>,
    data: Bytes,
}

fn quantity_u64(field: &str, s: &str) -> Result<u64, FetchError> {
    decode_u64(s).map_err(|e| FetchError::Malformed(format!("{field}: {e}")))
}

fn quantity_u256(field: &str, s: Option<&str>) -> Result<U256, FetchError> {
    match s {
        Some(s) => decode_u256(s).map_err(|e| FetchError::Malformed(format!("{field}: {e}"))),
        None => Ok(U256::ZERO),
    }
}

/// Convert an `eth_getBlockByNumber(…, true)` result. `null` is
/// [`FetchError::NotYetProduced`].
pub fn block_from_json(number: u64, value: Value) -> Result<SourceBlock, FetchError> {
    if value.is_null() {
        return Err(FetchError::NotYetProduced { number });
    }
    let raw: RpcBlock =
        serde_json::from_value(value).map_err(|e| FetchError::Malformed(format!("block {number}: {e}")))?;

    let header = Block {
        number: quantity_u64("number", &raw.number)?,
        hash: raw.hash,
        parent_hash: raw.parent_hash,
        timestamp: quantity_u64("timestamp", &raw.timestamp)?,
        size: raw.size.as_deref().map(|s| quantity_u64("size", s)).transpose()?.unwrap_or(0),
        gas_limit: quantity_u64("gasLimit", &raw.gas_limit)?,
        gas_used: quantity_u64("gasUsed", &raw.gas_used)?,
        transactions_root: raw.transactions_root,
        state_root: raw.state_root,
        receipts_root: raw.receipts_root,
    };

    let transactions = raw
        .transactions
        .into_iter()
        .map(|tx| {
            Ok(SourceTransaction {
                tx: TransactionData {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    nonce: quantity_u64("nonce", &tx.nonce)?,
                    value: quantity_u256("value", Some(&tx.value))?,
                    input: tx.input,
                    v: quantity_u256("v", tx.v.as_deref())?,
                    r: quantity_u256("r", tx.r.as_deref())?,
                    s: quantity_u256("s", tx.s.as_deref())?,
                },
                events: vec![],
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;

    Ok(SourceBlock { header, transactions })
}

/// Attach receipt logs to their transactions, in emission order. With a
/// `contract` scope only logs emitted by that address are kept.
pub fn attach_receipts(
    block: &mut SourceBlock,
    receipts: Value,
    contract: Option<Address>,
) -> Result<(), FetchError> {
    if receipts.is_null() {
        // node has the block but not yet its receipts
        return Err(FetchError::Transport(format!(
            "receipts for block {} not available",
            block.header.number
        )));
    }
    let receipts: Vec<RpcReceipt> =
        serde_json::from_value(receipts).map_err(|e| FetchError::Malformed(format!("receipts: {e}")))?;

    let mut by_tx: HashMap<B256, Vec<EventData>> = HashMap::with_capacity(receipts.len());
    for receipt in receipts {
        let events = receipt
            .logs
            .into_iter()
            .filter(|log| contract.map_or(true, |c| log.address == c))
            .map(|log| EventData { topics: log.topics, data: log.data })
            .collect();
        by_tx.insert(receipt.transaction_hash, events);
    }
    for stx in &mut block.transactions {
        stx.events = by_tx.remove(&stx.tx.hash).unwrap_or_default();
    }
    Ok(())
}

// ─── HttpChainSource ─────────────────────────────────────────────────────────

/// [`ChainSource`] over an Ethereum node's HTTP JSON-RPC endpoint.
pub struct HttpChainSource {
    url: String,
    http: reqwest::Client,
    ingest_events: bool,
    contract: Option<Address>,
    next_id: AtomicU64,
}

impl HttpChainSource {
    pub fn new(config: &SourceConfig) -> Result<Self, MirrorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| MirrorError::Other(format!("building HTTP client: {e}")))?;
        let contract = config
            .contract
            .as_deref()
            .map(|c| {
                c.parse::<Address>()
                    .map_err(|e| MirrorError::InvalidParams(format!("source.contract {c:?}: {e}")))
            })
            .transpose()?;
        Ok(Self {
            url: config.url.clone(),
            http,
            ingest_events: config.ingest_events,
            contract,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Transport(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .into_result()
            .map_err(|e| FetchError::Transport(format!("{method}: {e}")))
    }
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn fetch_block(&self, number: u64) -> Result<SourceBlock, FetchError> {
        let tag = encode_u64(number);
        let raw = self
            .call("eth_getBlockByNumber", vec![json!(tag), json!(true)])
            .await?;
        let mut block = block_from_json(number, raw)?;

        if self.ingest_events && !block.transactions.is_empty() {
            let receipts = self.call("eth_getBlockReceipts", vec![json!(tag)]).await?;
            attach_receipts(&mut block, receipts, self.contract)?;
        }
        tracing::trace!(block = number, txs = block.transactions.len(), url = %self.url, "fetched block");
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> String {
        format!("{:#x}", B256::repeat_byte(byte))
    }

    fn a(byte: u8) -> String {
        format!("{:#x}", Address::repeat_byte(byte))
    }

    fn block_json() -> Value {
        json!({
            "number": "0x2a",
            "hash": h(0x01),
            "parentHash": h(0x02),
            "timestamp": "0x6553f100",
            "size": "0x220",
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x5208",
            "transactionsRoot": h(0x03),
            "stateRoot": h(0x04),
            "receiptsRoot": h(0x05),
            "transactions": [
                {
                    "hash": h(0xa1), "from": a(0x11), "to": a(0x22),
                    "nonce": "0x7", "value": "0xde0b6b3a7640000", "input": "0x",
                    "v": "0x25", "r": "0x1", "s": "0x2"
                },
                {
                    "hash": h(0xa2), "from": a(0x33), "to": null,
                    "nonce": "0x0", "value": "0x0", "input": "0x6080",
                    "v": "0x1", "r": "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff", "s": "0x3"
                }
            ]
        })
    }

    #[test]
    fn parses_full_block() {
        let block = block_from_json(42, block_json()).unwrap();
        assert_eq!(block.header.number, 42);
        assert_eq!(block.header.gas_used, 21_000);
        assert_eq!(block.header.size, 0x220);
        assert_eq!(block.transactions.len(), 2);

        let first = &block.transactions[0].tx;
        assert_eq!(first.nonce, 7);
        assert_eq!(first.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(first.to, Some(Address::repeat_byte(0x22)));

        let creation = &block.transactions[1].tx;
        assert_eq!(creation.to, None);
        assert_eq!(creation.r, U256::MAX);
        assert_eq!(creation.input.as_ref(), &[0x60, 0x80]);
    }

    #[test]
    fn null_block_is_not_yet_produced() {
        let err = block_from_json(7, Value::Null).unwrap_err();
        assert!(matches!(err, FetchError::NotYetProduced { number: 7 }));
    }

    #[test]
    fn bad_quantity_is_malformed() {
        let mut raw = block_json();
        raw["gasUsed"] = json!("5208");
        assert!(matches!(block_from_json(42, raw).unwrap_err(), FetchError::Malformed(_)));
    }

    #[test]
    fn receipts_attach_in_order_and_respect_contract_scope() {
        let mut block = block_from_json(42, block_json()).unwrap();
        let receipts = json!([
            {
                "transactionHash": h(0xa1),
                "logs": [
                    { "address": a(0xcc), "topics": [h(0x10)], "data": "0x01" },
                    { "address": a(0xdd), "topics": [], "data": "0x" },
                    { "address": a(0xcc), "topics": [h(0x11), h(0x12)], "data": "0x" }
                ]
            },
            { "transactionHash": h(0xa2), "logs": [] }
        ]);

        attach_receipts(&mut block, receipts.clone(), None).unwrap();
        assert_eq!(block.transactions[0].events.len(), 3);
        assert!(block.transactions[1].events.is_empty());

        attach_receipts(&mut block, receipts, Some(Address::repeat_byte(0xcc))).unwrap();
        let events = &block.transactions[0].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].topics, vec![B256::repeat_byte(0x11), B256::repeat_byte(0x12)]);
    }

    #[test]
    fn missing_receipts_are_retryable() {
        let mut block = block_from_json(42, block_json()).unwrap();
        let err = attach_receipts(&mut block, Value::Null, None).unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[test]
    fn invalid_contract_scope_is_rejected() {
        let config = SourceConfig {
            contract: Some("not-an-address".into()),
            ..Default::default()
        };
        assert!(HttpChainSource::new(&config).is_err());
    }
}
