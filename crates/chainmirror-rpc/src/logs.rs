//! Log query engine — `eth_getLogs` and filter polling.
//!
//! # Resolution
//! `blockHash` wins over `fromBlock`/`toBlock`. Otherwise both default to
//! `latest`; tags resolve against the store's max height (0 when empty) and
//! `from > to` is an empty result. Block specs and topics are validated
//! while parsing, so malformed input fails before any store access.
//!
//! Event-filter polls are scoped by the event-id cursor instead: an absent or
//! `latest`/`pending` `fromBlock` is open below, and `toBlock` is the head at
//! poll time, so events committed between polls are never skipped.
//!
//! # Polling
//! | kind      | changes                                   | logs                           |
//! |-----------|-------------------------------------------|--------------------------------|
//! | block     | hashes after cursor, cursor advances      | hashes after initial cursor    |
//! | event     | matches with id > cursor, cursor advances | matches of stored params       |
//! | pending   | `[]`                                      | `[]`                           |
//! | unknown/0 | `[]`                                      | `[]`                           |

use std::sync::Arc;

use alloy_primitives::B256;
use tracing::debug;

use chainmirror_core::error::MirrorError;
use chainmirror_core::filter::{FilterKind, LogFilterParams};
use chainmirror_core::spec::BlockSpec;
use chainmirror_core::store::{BlockPredicate, LogQuery, Store};
use chainmirror_core::topics;
use chainmirror_core::types::LogEntry;

use crate::filters::FilterRegistry;

/// Result of polling a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChanges {
    /// Nothing to report (also for unknown and pending filters).
    Empty,
    BlockHashes(Vec<B256>),
    Logs(Vec<LogEntry>),
}

impl FilterChanges {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::BlockHashes(v) => v.is_empty(),
            Self::Logs(v) => v.is_empty(),
        }
    }
}

/// Which events a query covers.
enum Scope {
    /// The requested block range.
    Range,
    /// Everything after the filter cursor, up to the head.
    SinceCursor(Option<u64>),
}

/// Runs log queries and filter polls against the store.
#[derive(Clone)]
pub struct LogQueryEngine {
    store: Arc<dyn Store>,
    filters: FilterRegistry,
    max_logs: usize,
}

impl LogQueryEngine {
    pub fn new(store: Arc<dyn Store>, filters: FilterRegistry, max_logs: usize) -> Self {
        Self {
            store,
            filters,
            max_logs,
        }
    }

    /// Resolve the block part of a filter. `None` means the range is empty.
    pub async fn resolve_blocks(
        &self,
        params: &LogFilterParams,
    ) -> Result<Option<BlockPredicate>, MirrorError> {
        if let Some(hash) = params.block_hash {
            return Ok(Some(BlockPredicate::Hash(hash)));
        }
        self.resolve_range(params.from_block.unwrap_or_default(), params.to_block.unwrap_or_default())
            .await
    }

    /// Range scanned by an event-filter poll.
    async fn resolve_poll_blocks(
        &self,
        params: &LogFilterParams,
    ) -> Result<Option<BlockPredicate>, MirrorError> {
        if let Some(hash) = params.block_hash {
            return Ok(Some(BlockPredicate::Hash(hash)));
        }
        let from = match params.from_block {
            None | Some(BlockSpec::Latest) | Some(BlockSpec::Pending) => BlockSpec::Earliest,
            Some(spec) => spec,
        };
        self.resolve_range(from, params.to_block.unwrap_or_default()).await
    }

    async fn resolve_range(
        &self,
        from: BlockSpec,
        to: BlockSpec,
    ) -> Result<Option<BlockPredicate>, MirrorError> {
        let head = if from.needs_head() || to.needs_head() {
            self.store.latest_block_number().await?
        } else {
            None
        };
        let (from, to) = (from.resolve(head), to.resolve(head));
        Ok((from <= to).then_some(BlockPredicate::Range { from, to }))
    }

    /// Build the store query for `params`. `None` when nothing can match.
    async fn build_query(
        &self,
        params: &LogFilterParams,
        scope: Scope,
        limit: Option<usize>,
    ) -> Result<Option<LogQuery>, MirrorError> {
        let topics = topics::compile(params.topics.as_ref())?;
        let (block, after_event) = match scope {
            Scope::Range => (self.resolve_blocks(params).await?, None),
            Scope::SinceCursor(cursor) => (self.resolve_poll_blocks(params).await?, cursor),
        };
        let Some(block) = block else {
            return Ok(None);
        };
        Ok(Some(LogQuery {
            block,
            addresses: params.addresses(),
            topics,
            after_event,
            limit,
        }))
    }

    /// `eth_getLogs`. More than `max_logs` results is an input error.
    pub async fn get_logs(&self, params: &LogFilterParams) -> Result<Vec<LogEntry>, MirrorError> {
        let limit = Some(self.max_logs.saturating_add(1));
        let Some(query) = self.build_query(params, Scope::Range, limit).await? else {
            return Ok(vec![]);
        };
        let logs = self.store.query_logs(&query).await?;
        if logs.len() > self.max_logs {
            return Err(MirrorError::InvalidParams(format!(
                "query returned more than {} logs",
                self.max_logs
            )));
        }
        Ok(logs)
    }

    /// `eth_getFilterChanges`: everything new since the last poll.
    pub async fn filter_changes(&self, id: u64) -> Result<FilterChanges, MirrorError> {
        let Some(record) = self.filters.poll(id).await? else {
            return Ok(FilterChanges::Empty);
        };

        match record.kind {
            FilterKind::Block => {
                let rows = self.store.block_hashes_after(record.cursor, None).await?;
                let Some(&(last, _)) = rows.last() else {
                    return Ok(FilterChanges::BlockHashes(vec![]));
                };
                if !self.filters.advance(id, record.cursor, last).await? {
                    return Ok(FilterChanges::BlockHashes(vec![]));
                }
                debug!(filter_id = id, blocks = rows.len(), last, "block filter advanced");
                Ok(FilterChanges::BlockHashes(rows.into_iter().map(|(_, h)| h).collect()))
            }
            FilterKind::Event => {
                let params = record.params.unwrap_or_default();
                // Capped pages; the remainder is delivered on the next poll.
                let query = self
                    .build_query(&params, Scope::SinceCursor(record.cursor), Some(self.max_logs))
                    .await?;
                let Some(query) = query else {
                    return Ok(FilterChanges::Logs(vec![]));
                };
                let logs = self.store.query_logs(&query).await?;
                let Some(last) = logs.last().map(|l| l.event_id) else {
                    return Ok(FilterChanges::Logs(vec![]));
                };
                if !self.filters.advance(id, record.cursor, last).await? {
                    return Ok(FilterChanges::Logs(vec![]));
                }
                debug!(filter_id = id, logs = logs.len(), last, "event filter advanced");
                Ok(FilterChanges::Logs(logs))
            }
            FilterKind::PendingTransaction => Ok(FilterChanges::Empty),
        }
    }

    /// `eth_getFilterLogs`: the full result set, cursor untouched.
    pub async fn filter_logs(&self, id: u64) -> Result<FilterChanges, MirrorError> {
        let Some(record) = self.filters.poll(id).await? else {
            return Ok(FilterChanges::Empty);
        };
        match record.kind {
            FilterKind::Block => {
                let rows = self.store.block_hashes_after(record.initial_cursor, None).await?;
                Ok(FilterChanges::BlockHashes(rows.into_iter().map(|(_, h)| h).collect()))
            }
            FilterKind::Event => {
                let params = record.params.unwrap_or_default();
                Ok(FilterChanges::Logs(self.get_logs(&params).await?))
            }
            FilterKind::PendingTransaction => Ok(FilterChanges::Empty),
        }
    }
}
