//! The `Store` trait — the relational projection shared by the indexer and
//! the query side.
//!
//! Implementations: `MemoryStore` and `PostgresStore` in
//! `chainmirror-storage`.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::MirrorError;
use crate::filter::{FilterRecord, NewFilter};
use crate::topics::Predicate;
use crate::types::{Block, BlockBundle, LogEntry, Transaction};

/// Channel the store publishes committed block numbers on.
pub const NEW_BLOCK_CHANNEL: &str = "chainmirror_new_block";

/// Which blocks a log query covers. Exactly one form applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockPredicate {
    /// Inclusive height range.
    Range { from: u64, to: u64 },
    /// One block, by hash.
    Hash(B256),
}

impl BlockPredicate {
    pub fn matches(&self, number: u64, hash: &B256) -> bool {
        match self {
            Self::Range { from, to } => (*from..=*to).contains(&number),
            Self::Hash(h) => h == hash,
        }
    }
}

/// A fully resolved log query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub block: BlockPredicate,
    /// Sender must be one of these; empty means any.
    pub addresses: Vec<Address>,
    pub topics: Predicate,
    /// Only events with a larger id (filter cursor).
    pub after_event: Option<u64>,
    /// Upper bound on returned rows.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Evaluate the query against one entry, ignoring `limit`.
    pub fn matches_entry(&self, entry: &LogEntry) -> bool {
        self.block.matches(entry.block_number, &entry.block_hash)
            && (self.addresses.is_empty() || self.addresses.contains(&entry.address))
            && self.after_event.map_or(true, |after| entry.event_id > after)
            && self.topics.matches(&entry.topics)
    }
}

/// Durable store for blocks, transactions, events and filters.
///
/// Readers never observe a partially written block: `insert_block` is one
/// transaction.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── ingestion ────────────────────────────────────────────────────────────

    /// Highest recorded block number, `None` if empty.
    async fn latest_block_number(&self) -> Result<Option<u64>, MirrorError>;

    /// Highest event id, `None` if no event was recorded.
    async fn latest_event_id(&self) -> Result<Option<u64>, MirrorError>;

    /// Persist a block with its transactions and events atomically, then
    /// publish its number on the new-block channel.
    async fn insert_block(&self, bundle: &BlockBundle) -> Result<(), MirrorError>;

    // ── block / transaction lookups ──────────────────────────────────────────

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, MirrorError>;

    async fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, MirrorError>;

    /// Transactions of a block ordered by index.
    async fn transactions_in_block(&self, number: u64) -> Result<Vec<Transaction>, MirrorError>;

    /// Number of transactions, `None` if the block is unknown.
    async fn transaction_count(&self, number: u64) -> Result<Option<u64>, MirrorError>;

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, MirrorError>;

    async fn transaction_by_location(
        &self,
        block_number: u64,
        tx_index: u32,
    ) -> Result<Option<Transaction>, MirrorError>;

    // ── queries ──────────────────────────────────────────────────────────────

    /// Matching events ordered by event id.
    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, MirrorError>;

    /// `(number, hash)` of blocks after `after` (all blocks when `None`),
    /// ascending.
    async fn block_hashes_after(
        &self,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, B256)>, MirrorError>;

    // ── filters ──────────────────────────────────────────────────────────────

    /// Record a filter; returns the allocated id (never 0).
    async fn create_filter(&self, filter: NewFilter) -> Result<u64, MirrorError>;

    async fn get_filter(&self, id: u64) -> Result<Option<FilterRecord>, MirrorError>;

    /// Move the cursor from `expected` to `next` only if it still equals
    /// `expected`. Returns `false` when another poller advanced it first or
    /// the filter is gone.
    async fn advance_filter(
        &self,
        id: u64,
        expected: Option<u64>,
        next: u64,
    ) -> Result<bool, MirrorError>;

    /// Returns whether a filter existed.
    async fn delete_filter(&self, id: u64) -> Result<bool, MirrorError>;

    /// Stamp a poll at `at` (unix seconds). Returns whether the filter exists.
    async fn touch_filter(&self, id: u64, at: i64) -> Result<bool, MirrorError>;

    /// Remove filters whose last poll is at or before `cutoff` (unix
    /// seconds). Returns the removed ids.
    async fn expire_filters(&self, cutoff: i64) -> Result<Vec<u64>, MirrorError>;

    // ── notifications ────────────────────────────────────────────────────────

    /// Subscribe to committed block numbers. Best effort: messages may be
    /// missed, consumers must also poll.
    fn subscribe_blocks(&self) -> broadcast::Receiver<u64>;
}
