//! Shared types for the mirror: stored rows, source records, query results.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block header row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub size: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub transactions_root: B256,
    pub state_root: B256,
    pub receipts_root: B256,
}

// ─── Transactions and events ─────────────────────────────────────────────────

/// Transaction payload as delivered by the chain source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub input: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

/// A stored transaction: payload plus its location in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub block_number: u64,
    pub block_hash: B256,
    /// Dense 0-based position in the block, in source order.
    pub tx_index: u32,
    pub data: TransactionData,
}

/// An emitted event (log) as delivered by the chain source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub topics: Vec<B256>,
    pub data: Bytes,
}

// ─── Source records ──────────────────────────────────────────────────────────

/// A source transaction with the events it emitted, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTransaction {
    pub tx: TransactionData,
    pub events: Vec<EventData>,
}

/// A block with fully materialised transactions, as returned upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlock {
    pub header: Block,
    pub transactions: Vec<SourceTransaction>,
}

// ─── BlockBundle ─────────────────────────────────────────────────────────────

/// An event with its block-level ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEvent {
    /// Position among all events of the block, in emission order.
    pub log_index: u32,
    pub event: EventData,
}

/// A transaction with its in-block index and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTransaction {
    pub tx_index: u32,
    pub tx: TransactionData,
    pub events: Vec<IndexedEvent>,
}

/// Everything persisted for one height, written as one store transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBundle {
    pub block: Block,
    pub transactions: Vec<IndexedTransaction>,
}

impl BlockBundle {
    /// Assign in-block transaction indices and block-level log indices in
    /// source order.
    pub fn assemble(source: SourceBlock) -> Self {
        let mut next_log = 0u32;
        let transactions = source
            .transactions
            .into_iter()
            .enumerate()
            .map(|(i, stx)| {
                let events = stx
                    .events
                    .into_iter()
                    .map(|event| {
                        let log_index = next_log;
                        next_log += 1;
                        IndexedEvent { log_index, event }
                    })
                    .collect();
                IndexedTransaction {
                    tx_index: i as u32,
                    tx: stx.tx,
                    events,
                }
            })
            .collect();
        Self {
            block: source.header,
            transactions,
        }
    }

    pub fn event_count(&self) -> usize {
        self.transactions.iter().map(|t| t.events.len()).sum()
    }
}

// ─── LogEntry ────────────────────────────────────────────────────────────────

/// One row of a log query: Event → Transaction → Block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Store-assigned global event id, monotonic in ingestion order.
    pub event_id: u64,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub tx_index: u32,
    pub log_index: u32,
    /// Sender of the transaction that emitted the event.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn header(number: u64) -> Block {
        Block {
            number,
            hash: B256::with_last_byte(number as u8 + 1),
            parent_hash: if number == 0 {
                B256::ZERO
            } else {
                B256::with_last_byte(number as u8)
            },
            timestamp: 1_700_000_000 + number * 12,
            size: 512,
            gas_limit: 30_000_000,
            gas_used: 21_000,
            transactions_root: B256::ZERO,
            state_root: B256::ZERO,
            receipts_root: B256::ZERO,
        }
    }

    pub fn tx(seed: u8) -> TransactionData {
        TransactionData {
            hash: B256::repeat_byte(seed),
            from: Address::repeat_byte(seed),
            to: None,
            nonce: seed as u64,
            value: U256::from(seed),
            input: Bytes::new(),
            v: U256::from(27u8),
            r: U256::from(1u8),
            s: U256::from(2u8),
        }
    }

    fn event(seed: u8) -> EventData {
        EventData {
            topics: vec![B256::repeat_byte(seed)],
            data: Bytes::from(vec![seed]),
        }
    }

    #[test]
    fn assemble_assigns_source_order_indices() {
        let source = SourceBlock {
            header: header(5),
            transactions: vec![
                SourceTransaction { tx: tx(0x10), events: vec![event(1), event(2)] },
                SourceTransaction { tx: tx(0x20), events: vec![] },
                SourceTransaction { tx: tx(0x30), events: vec![event(3)] },
            ],
        };
        let bundle = BlockBundle::assemble(source);

        let indices: Vec<u32> = bundle.transactions.iter().map(|t| t.tx_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let hashes: Vec<u8> = bundle.transactions.iter().map(|t| t.tx.hash[0]).collect();
        assert_eq!(hashes, vec![0x10, 0x20, 0x30]);

        let log_indices: Vec<u32> = bundle
            .transactions
            .iter()
            .flat_map(|t| t.events.iter().map(|e| e.log_index))
            .collect();
        assert_eq!(log_indices, vec![0, 1, 2]);
        assert_eq!(bundle.event_count(), 3);
    }
}
