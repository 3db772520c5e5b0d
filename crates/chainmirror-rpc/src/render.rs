//! Response shapes for blocks, transactions and logs.
//!
//! Quantities go through the numeric codec, so every integer on the wire is
//! minimal `0x` hex.

use alloy_primitives::{Address, Bytes, B256};
use serde::Serialize;

use chainmirror_core::quantity::{encode_u256, encode_u64};
use chainmirror_core::types::{Block, LogEntry, Transaction};

/// RPC representation of a log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    /// Sender of the emitting transaction.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: String,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: String,
    pub log_index: String,
    pub removed: bool,
}

impl From<&LogEntry> for RpcLog {
    fn from(entry: &LogEntry) -> Self {
        Self {
            address: entry.address,
            topics: entry.topics.clone(),
            data: entry.data.clone(),
            block_number: encode_u64(entry.block_number),
            block_hash: entry.block_hash,
            transaction_hash: entry.tx_hash,
            transaction_index: encode_u64(entry.tx_index as u64),
            log_index: encode_u64(entry.log_index as u64),
            removed: false,
        }
    }
}

/// RPC representation of a transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    pub nonce: String,
    pub block_hash: B256,
    pub block_number: String,
    pub transaction_index: String,
    pub from: Address,
    /// `null` for contract creation.
    pub to: Option<Address>,
    pub value: String,
    pub input: Bytes,
    pub v: String,
    pub r: String,
    pub s: String,
}

impl From<&Transaction> for RpcTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.data.hash,
            nonce: encode_u64(tx.data.nonce),
            block_hash: tx.block_hash,
            block_number: encode_u64(tx.block_number),
            transaction_index: encode_u64(tx.tx_index as u64),
            from: tx.data.from,
            to: tx.data.to,
            value: encode_u256(tx.data.value),
            input: tx.data.input.clone(),
            v: encode_u256(tx.data.v),
            r: encode_u256(tx.data.r),
            s: encode_u256(tx.data.s),
        }
    }
}

/// Transactions of a block: hashes, or full objects when requested.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Hashes(Vec<B256>),
    Full(Vec<RpcTransaction>),
}

/// RPC representation of a block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: String,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: String,
    pub size: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub transactions_root: B256,
    pub state_root: B256,
    pub receipts_root: B256,
    pub transactions: BlockTransactions,
    pub uncles: Vec<B256>,
}

impl RpcBlock {
    pub fn new(block: &Block, txs: &[Transaction], full: bool) -> Self {
        let transactions = if full {
            BlockTransactions::Full(txs.iter().map(RpcTransaction::from).collect())
        } else {
            BlockTransactions::Hashes(txs.iter().map(|t| t.data.hash).collect())
        };
        Self {
            number: encode_u64(block.number),
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: encode_u64(block.timestamp),
            size: encode_u64(block.size),
            gas_limit: encode_u64(block.gas_limit),
            gas_used: encode_u64(block.gas_used),
            transactions_root: block.transactions_root,
            state_root: block.state_root,
            receipts_root: block.receipts_root,
            transactions,
            uncles: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use chainmirror_core::types::TransactionData;
    use serde_json::json;

    fn stored_tx() -> Transaction {
        Transaction {
            block_number: 16,
            block_hash: B256::repeat_byte(0xbb),
            tx_index: 2,
            data: TransactionData {
                hash: B256::repeat_byte(0xaa),
                from: Address::repeat_byte(0x01),
                to: None,
                nonce: 0,
                value: U256::from(1u128 << 70),
                input: Bytes::from(vec![0xca, 0xfe]),
                v: U256::from(27u8),
                r: U256::from(255u8),
                s: U256::ZERO,
            },
        }
    }

    #[test]
    fn transaction_quantities_are_minimal_hex() {
        let value = serde_json::to_value(RpcTransaction::from(&stored_tx())).unwrap();
        assert_eq!(value["blockNumber"], json!("0x10"));
        assert_eq!(value["transactionIndex"], json!("0x2"));
        assert_eq!(value["nonce"], json!("0x0"));
        assert_eq!(value["value"], json!("0x400000000000000000"));
        assert_eq!(value["r"], json!("0xff"));
        assert_eq!(value["s"], json!("0x0"));
        assert_eq!(value["input"], json!("0xcafe"));
        assert!(value["to"].is_null());
    }

    #[test]
    fn block_lists_hashes_or_objects() {
        let block = Block {
            number: 0,
            hash: B256::repeat_byte(0xbb),
            parent_hash: B256::ZERO,
            timestamp: 1_700_000_000,
            size: 0,
            gas_limit: 30_000_000,
            gas_used: 0,
            transactions_root: B256::ZERO,
            state_root: B256::ZERO,
            receipts_root: B256::ZERO,
        };
        let txs = vec![stored_tx()];

        let hashes = serde_json::to_value(RpcBlock::new(&block, &txs, false)).unwrap();
        assert_eq!(hashes["number"], json!("0x0"));
        assert_eq!(hashes["gasLimit"], json!("0x1c9c380"));
        assert!(hashes["transactions"][0].is_string());

        let full = serde_json::to_value(RpcBlock::new(&block, &txs, true)).unwrap();
        assert_eq!(full["transactions"][0]["transactionIndex"], json!("0x2"));
    }

    #[test]
    fn log_is_never_removed() {
        let entry = LogEntry {
            event_id: 9,
            block_number: 255,
            block_hash: B256::ZERO,
            tx_hash: B256::ZERO,
            tx_index: 1,
            log_index: 3,
            address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
        };
        let value = serde_json::to_value(RpcLog::from(&entry)).unwrap();
        assert_eq!(value["blockNumber"], json!("0xff"));
        assert_eq!(value["logIndex"], json!("0x3"));
        assert_eq!(value["removed"], json!(false));
        assert_eq!(value["data"], json!("0x"));
    }
}
