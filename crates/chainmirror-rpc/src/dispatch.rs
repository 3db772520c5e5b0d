//! Method dispatch: JSON-RPC method name + params → result value.

use std::sync::Arc;

use alloy_primitives::B256;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use chainmirror_core::filter::LogFilterParams;
use chainmirror_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use chainmirror_core::quantity::{decode_u64, encode_u64};
use chainmirror_core::spec::BlockSpec;
use chainmirror_core::store::Store;
use chainmirror_core::types::Block;

use crate::error::RpcError;
use crate::filters::FilterRegistry;
use crate::logs::{FilterChanges, LogQueryEngine};
use crate::render::{RpcBlock, RpcLog, RpcTransaction};

/// Ethereum methods this server answers with "method not supported".
pub const UNSUPPORTED_METHODS: &[&str] = &[
    "eth_sign",
    "eth_signTransaction",
    "eth_signTypedData",
    "eth_signTypedData_v4",
    "eth_sendTransaction",
    "eth_sendRawTransaction",
    "eth_estimateGas",
    "eth_accounts",
    "eth_mining",
    "eth_hashrate",
];

/// Routes JSON-RPC calls to the store, the filter registry and the log
/// query engine.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    filters: FilterRegistry,
    logs: LogQueryEngine,
    chain_id: u64,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, chain_id: u64, max_logs: usize) -> Self {
        let filters = FilterRegistry::new(store.clone());
        let logs = LogQueryEngine::new(store.clone(), filters.clone(), max_logs);
        Self {
            store,
            filters,
            logs,
            chain_id,
        }
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Handle one request envelope. Never fails; errors become error responses.
    pub async fn handle(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        match self.dispatch(&req.method, req.params).await {
            Ok(result) => JsonRpcResponse::success(req.id, result),
            Err(e) => {
                match &e {
                    RpcError::Internal(_) => warn!(method = %req.method, error = %e, "request failed"),
                    _ => debug!(method = %req.method, error = %e, "request rejected"),
                }
                JsonRpcResponse::failure(req.id, e.to_json_error())
            }
        }
    }

    /// Run `method` with positional `params`.
    pub async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "eth_blockNumber" => {
                let head = self.store.latest_block_number().await?;
                Ok(Value::String(encode_u64(head.unwrap_or(0))))
            }
            "eth_chainId" => Ok(Value::String(encode_u64(self.chain_id))),
            "net_version" => Ok(Value::String(self.chain_id.to_string())),
            "web3_clientVersion" => Ok(Value::String(format!(
                "chainmirror/v{}",
                env!("CARGO_PKG_VERSION")
            ))),

            "eth_getBlockByNumber" => {
                let spec: BlockSpec = param(&params, 0, "block")?;
                let full: bool = optional_param(&params, 1, "full transactions")?.unwrap_or(false);
                let block = match self.resolve_block_number(spec).await? {
                    Some(n) => self.store.block_by_number(n).await?,
                    None => None,
                };
                self.render_block(block, full).await
            }
            "eth_getBlockByHash" => {
                let hash: B256 = param(&params, 0, "block hash")?;
                let full: bool = optional_param(&params, 1, "full transactions")?.unwrap_or(false);
                let block = self.store.block_by_hash(hash).await?;
                self.render_block(block, full).await
            }
            "eth_getBlockTransactionCountByNumber" => {
                let spec: BlockSpec = param(&params, 0, "block")?;
                let count = match self.resolve_block_number(spec).await? {
                    Some(n) => self.store.transaction_count(n).await?,
                    None => None,
                };
                Ok(count.map_or(Value::Null, |c| Value::String(encode_u64(c))))
            }
            "eth_getBlockTransactionCountByHash" => {
                let hash: B256 = param(&params, 0, "block hash")?;
                let count = match self.store.block_by_hash(hash).await? {
                    Some(block) => self.store.transaction_count(block.number).await?,
                    None => None,
                };
                Ok(count.map_or(Value::Null, |c| Value::String(encode_u64(c))))
            }

            "eth_getTransactionByHash" => {
                let hash: B256 = param(&params, 0, "transaction hash")?;
                let tx = self.store.transaction_by_hash(hash).await?;
                to_value(tx.as_ref().map(RpcTransaction::from))
            }
            "eth_getTransactionByBlockNumberAndIndex" => {
                let spec: BlockSpec = param(&params, 0, "block")?;
                let index = quantity_param(&params, 1, "transaction index")?;
                let tx = match (self.resolve_block_number(spec).await?, u32::try_from(index)) {
                    (Some(n), Ok(i)) => self.store.transaction_by_location(n, i).await?,
                    _ => None,
                };
                to_value(tx.as_ref().map(RpcTransaction::from))
            }
            "eth_getTransactionByBlockHashAndIndex" => {
                let hash: B256 = param(&params, 0, "block hash")?;
                let index = quantity_param(&params, 1, "transaction index")?;
                let tx = match (self.store.block_by_hash(hash).await?, u32::try_from(index)) {
                    (Some(block), Ok(i)) => self.store.transaction_by_location(block.number, i).await?,
                    _ => None,
                };
                to_value(tx.as_ref().map(RpcTransaction::from))
            }

            "eth_getLogs" => {
                let filter = filter_param(&params)?;
                let logs = self.logs.get_logs(&filter).await?;
                to_value(logs.iter().map(RpcLog::from).collect::<Vec<_>>())
            }
            "eth_newFilter" => {
                let filter = filter_param(&params)?;
                let id = self.filters.create_event_filter(filter).await?;
                Ok(Value::String(encode_u64(id)))
            }
            "eth_newBlockFilter" => {
                let id = self.filters.create_block_filter().await?;
                Ok(Value::String(encode_u64(id)))
            }
            "eth_newPendingTransactionFilter" => {
                let id = self.filters.create_pending_filter().await?;
                Ok(Value::String(encode_u64(id)))
            }
            "eth_getFilterChanges" => {
                let id = quantity_param(&params, 0, "filter id")?;
                render_changes(self.logs.filter_changes(id).await?)
            }
            "eth_getFilterLogs" => {
                let id = quantity_param(&params, 0, "filter id")?;
                render_changes(self.logs.filter_logs(id).await?)
            }
            "eth_uninstallFilter" => {
                let id = quantity_param(&params, 0, "filter id")?;
                Ok(Value::Bool(self.filters.uninstall(id).await?))
            }

            m if UNSUPPORTED_METHODS.contains(&m) => Err(RpcError::Unsupported(m.to_string())),
            m => Err(RpcError::MethodNotFound(m.to_string())),
        }
    }

    /// `None` when a tag names the head of an empty store.
    async fn resolve_block_number(&self, spec: BlockSpec) -> Result<Option<u64>, RpcError> {
        if spec.needs_head() {
            return Ok(self.store.latest_block_number().await?);
        }
        Ok(Some(spec.resolve(None)))
    }

    async fn render_block(&self, block: Option<Block>, full: bool) -> Result<Value, RpcError> {
        let Some(block) = block else {
            return Ok(Value::Null);
        };
        let txs = self.store.transactions_in_block(block.number).await?;
        to_value(RpcBlock::new(&block, &txs, full))
    }
}

fn render_changes(changes: FilterChanges) -> Result<Value, RpcError> {
    match changes {
        FilterChanges::Empty => Ok(Value::Array(vec![])),
        FilterChanges::BlockHashes(hashes) => to_value(hashes),
        FilterChanges::Logs(logs) => to_value(logs.iter().map(RpcLog::from).collect::<Vec<_>>()),
    }
}

fn to_value<T: Serialize>(v: T) -> Result<Value, RpcError> {
    serde_json::to_value(v).map_err(|e| RpcError::Internal(format!("serializing result: {e}")))
}

// ─── Param extraction ────────────────────────────────────────────────────────

fn optional_param<T: DeserializeOwned>(
    params: &[Value],
    index: usize,
    name: &str,
) -> Result<Option<T>, RpcError> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| RpcError::InvalidParams(format!("{name}: {e}"))),
    }
}

fn param<T: DeserializeOwned>(params: &[Value], index: usize, name: &str) -> Result<T, RpcError> {
    optional_param(params, index, name)?
        .ok_or_else(|| RpcError::InvalidParams(format!("missing parameter {index} ({name})")))
}

/// A `0x` quantity (filter ids, indices); plain JSON integers are accepted.
fn quantity_param(params: &[Value], index: usize, name: &str) -> Result<u64, RpcError> {
    match params.get(index) {
        Some(Value::String(s)) => decode_u64(s).map_err(|e| RpcError::InvalidParams(format!("{name}: {e}"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| RpcError::InvalidParams(format!("{name}: {n} is not an unsigned integer"))),
        Some(other) => Err(RpcError::InvalidParams(format!("{name}: expected a quantity, got {other}"))),
        None => Err(RpcError::InvalidParams(format!("missing parameter {index} ({name})"))),
    }
}

fn filter_param(params: &[Value]) -> Result<LogFilterParams, RpcError> {
    match params.first() {
        None | Some(Value::Null) => Ok(LogFilterParams::default()),
        Some(v) => Ok(LogFilterParams::from_value(v.clone())?),
    }
}
