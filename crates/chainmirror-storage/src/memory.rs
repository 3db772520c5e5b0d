//! In-memory storage backend.
//!
//! Holds blocks, transactions, events, and filters in RAM behind one mutex,
//! so a block insert is atomic with respect to readers. Used by tests and
//! by `chainmirror --memory`; all data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use chainmirror_core::error::MirrorError;
use chainmirror_core::filter::{FilterRecord, NewFilter};
use chainmirror_core::store::{LogQuery, Store};
use chainmirror_core::types::{Block, BlockBundle, LogEntry, Transaction, TransactionData};

struct TxRow {
    block_number: u64,
    tx_index: u32,
    data: TransactionData,
}

struct EventRow {
    /// Index into `Tables::transactions`.
    tx_row: usize,
    log_index: u32,
    topics: Vec<B256>,
    data: Bytes,
}

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<u64, Block>,
    block_by_hash: HashMap<B256, u64>,
    /// Transaction id = position + 1.
    transactions: Vec<TxRow>,
    tx_by_hash: HashMap<B256, usize>,
    tx_by_location: BTreeMap<(u64, u32), usize>,
    /// Event id = position + 1.
    events: Vec<EventRow>,
    filters: BTreeMap<u64, FilterRecord>,
    last_filter_id: u64,
}

impl Tables {
    fn transaction(&self, row: usize) -> Option<Transaction> {
        let tx = self.transactions.get(row)?;
        let block = self.blocks.get(&tx.block_number)?;
        Some(Transaction {
            block_number: tx.block_number,
            block_hash: block.hash,
            tx_index: tx.tx_index,
            data: tx.data.clone(),
        })
    }

    fn log_entry(&self, event_row: usize) -> Option<LogEntry> {
        let event = self.events.get(event_row)?;
        let tx = self.transactions.get(event.tx_row)?;
        let block = self.blocks.get(&tx.block_number)?;
        Some(LogEntry {
            event_id: event_row as u64 + 1,
            block_number: block.number,
            block_hash: block.hash,
            tx_hash: tx.data.hash,
            tx_index: tx.tx_index,
            log_index: event.log_index,
            address: tx.data.from,
            topics: event.topics.clone(),
            data: event.data.clone(),
        })
    }

    /// Constraint checks run before any row is written.
    fn check_insert(&self, bundle: &BlockBundle) -> Result<(), MirrorError> {
        let number = bundle.block.number;
        if self.blocks.contains_key(&number) {
            return Err(MirrorError::Storage(format!("duplicate block number {number}")));
        }
        if self.block_by_hash.contains_key(&bundle.block.hash) {
            return Err(MirrorError::Storage(format!("duplicate block hash {}", bundle.block.hash)));
        }
        let mut seen = std::collections::HashSet::new();
        for tx in &bundle.transactions {
            if self.tx_by_hash.contains_key(&tx.tx.hash) || !seen.insert(tx.tx.hash) {
                return Err(MirrorError::Storage(format!("duplicate transaction hash {}", tx.tx.hash)));
            }
        }
        Ok(())
    }
}

/// In-memory store.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    notify: broadcast::Sender<u64>,
    accesses: AtomicU64,
    fail_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(256);
        Self {
            tables: Mutex::new(Tables::default()),
            notify,
            accesses: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of `Store` calls served so far.
    pub fn access_count(&self) -> u64 {
        self.accesses.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail, as an unreachable database would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All recorded block numbers, ascending.
    pub fn block_numbers(&self) -> Vec<u64> {
        self.tables
            .lock()
            .map(|t| t.blocks.keys().copied().collect())
            .unwrap_or_default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, MirrorError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .map_err(|_| MirrorError::Storage("memory store lock poisoned".into()))
    }

    fn check_writable(&self) -> Result<(), MirrorError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MirrorError::Storage("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn latest_block_number(&self) -> Result<Option<u64>, MirrorError> {
        Ok(self.tables()?.blocks.keys().next_back().copied())
    }

    async fn latest_event_id(&self) -> Result<Option<u64>, MirrorError> {
        let len = self.tables()?.events.len() as u64;
        Ok((len > 0).then_some(len))
    }

    async fn insert_block(&self, bundle: &BlockBundle) -> Result<(), MirrorError> {
        let number = bundle.block.number;
        {
            let mut t = self.tables()?;
            self.check_writable()?;
            t.check_insert(bundle)?;

            t.blocks.insert(number, bundle.block.clone());
            t.block_by_hash.insert(bundle.block.hash, number);
            for itx in &bundle.transactions {
                let row = t.transactions.len();
                t.transactions.push(TxRow {
                    block_number: number,
                    tx_index: itx.tx_index,
                    data: itx.tx.clone(),
                });
                t.tx_by_hash.insert(itx.tx.hash, row);
                t.tx_by_location.insert((number, itx.tx_index), row);
                for ev in &itx.events {
                    t.events.push(EventRow {
                        tx_row: row,
                        log_index: ev.log_index,
                        topics: ev.event.topics.clone(),
                        data: ev.event.data.clone(),
                    });
                }
            }
        }
        debug!(block = number, txs = bundle.transactions.len(), "memory store: block committed");
        // No receivers is fine.
        let _ = self.notify.send(number);
        Ok(())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, MirrorError> {
        Ok(self.tables()?.blocks.get(&number).cloned())
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, MirrorError> {
        let t = self.tables()?;
        Ok(t.block_by_hash.get(&hash).and_then(|n| t.blocks.get(n)).cloned())
    }

    async fn transactions_in_block(&self, number: u64) -> Result<Vec<Transaction>, MirrorError> {
        let t = self.tables()?;
        Ok(t.tx_by_location
            .range((number, 0)..=(number, u32::MAX))
            .filter_map(|(_, row)| t.transaction(*row))
            .collect())
    }

    async fn transaction_count(&self, number: u64) -> Result<Option<u64>, MirrorError> {
        let t = self.tables()?;
        if !t.blocks.contains_key(&number) {
            return Ok(None);
        }
        Ok(Some(t.tx_by_location.range((number, 0)..=(number, u32::MAX)).count() as u64))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, MirrorError> {
        let t = self.tables()?;
        Ok(t.tx_by_hash.get(&hash).and_then(|row| t.transaction(*row)))
    }

    async fn transaction_by_location(
        &self,
        block_number: u64,
        tx_index: u32,
    ) -> Result<Option<Transaction>, MirrorError> {
        let t = self.tables()?;
        Ok(t.tx_by_location
            .get(&(block_number, tx_index))
            .and_then(|row| t.transaction(*row)))
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, MirrorError> {
        let t = self.tables()?;
        let start = query.after_event.map_or(0, |after| after as usize);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok((start..t.events.len())
            .filter_map(|row| t.log_entry(row))
            .filter(|entry| query.matches_entry(entry))
            .take(limit)
            .collect())
    }

    async fn block_hashes_after(
        &self,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, B256)>, MirrorError> {
        let t = self.tables()?;
        let start = match after {
            Some(n) => match n.checked_add(1) {
                Some(s) => s,
                None => return Ok(vec![]),
            },
            None => 0,
        };
        Ok(t.blocks
            .range(start..)
            .map(|(n, b)| (*n, b.hash))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn create_filter(&self, filter: NewFilter) -> Result<u64, MirrorError> {
        let mut t = self.tables()?;
        self.check_writable()?;
        t.last_filter_id += 1;
        let id = t.last_filter_id;
        let now = chrono::Utc::now().timestamp();
        t.filters.insert(
            id,
            FilterRecord {
                id,
                kind: filter.kind,
                params: filter.params,
                owner: filter.owner,
                created_at: now,
                last_polled_at: now,
                initial_cursor: filter.cursor,
                cursor: filter.cursor,
            },
        );
        Ok(id)
    }

    async fn get_filter(&self, id: u64) -> Result<Option<FilterRecord>, MirrorError> {
        Ok(self.tables()?.filters.get(&id).cloned())
    }

    async fn advance_filter(
        &self,
        id: u64,
        expected: Option<u64>,
        next: u64,
    ) -> Result<bool, MirrorError> {
        let mut t = self.tables()?;
        self.check_writable()?;
        let Some(record) = t.filters.get_mut(&id) else {
            return Ok(false);
        };
        if record.cursor != expected || expected.is_some_and(|e| next <= e) {
            return Ok(false);
        }
        record.cursor = Some(next);
        Ok(true)
    }

    async fn delete_filter(&self, id: u64) -> Result<bool, MirrorError> {
        let mut t = self.tables()?;
        self.check_writable()?;
        Ok(t.filters.remove(&id).is_some())
    }

    async fn touch_filter(&self, id: u64, at: i64) -> Result<bool, MirrorError> {
        let mut t = self.tables()?;
        self.check_writable()?;
        Ok(match t.filters.get_mut(&id) {
            Some(record) => {
                record.last_polled_at = at;
                true
            }
            None => false,
        })
    }

    async fn expire_filters(&self, cutoff: i64) -> Result<Vec<u64>, MirrorError> {
        let mut t = self.tables()?;
        self.check_writable()?;
        let stale: Vec<u64> = t
            .filters
            .values()
            .filter(|f| f.last_polled_at <= cutoff)
            .map(|f| f.id)
            .collect();
        for id in &stale {
            t.filters.remove(id);
        }
        Ok(stale)
    }

    fn subscribe_blocks(&self) -> broadcast::Receiver<u64> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use chainmirror_core::filter::FilterKind;
    use chainmirror_core::store::BlockPredicate;
    use chainmirror_core::topics::Predicate;
    use chainmirror_core::types::{EventData, SourceBlock, SourceTransaction};

    fn block(number: u64) -> Block {
        Block {
            number,
            hash: B256::with_last_byte(number as u8 + 1),
            parent_hash: B256::with_last_byte(number as u8),
            timestamp: 1_000 + number,
            size: 100,
            gas_limit: 30_000_000,
            gas_used: 0,
            transactions_root: B256::ZERO,
            state_root: B256::ZERO,
            receipts_root: B256::ZERO,
        }
    }

    fn tx(seed: u8, topics: Vec<B256>) -> SourceTransaction {
        SourceTransaction {
            tx: TransactionData {
                hash: B256::repeat_byte(seed),
                from: Address::repeat_byte(seed),
                to: Some(Address::ZERO),
                nonce: 0,
                value: U256::from(seed),
                input: Bytes::new(),
                v: U256::from(27u8),
                r: U256::from(1u8),
                s: U256::from(1u8),
            },
            events: vec![EventData { topics, data: Bytes::new() }],
        }
    }

    fn bundle(number: u64, txs: Vec<SourceTransaction>) -> BlockBundle {
        BlockBundle::assemble(SourceBlock { header: block(number), transactions: txs })
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let store = MemoryStore::new();
        assert_eq!(store.latest_block_number().await.unwrap(), None);

        store.insert_block(&bundle(0, vec![])).await.unwrap();
        store
            .insert_block(&bundle(1, vec![tx(0x11, vec![]), tx(0x12, vec![])]))
            .await
            .unwrap();

        assert_eq!(store.latest_block_number().await.unwrap(), Some(1));
        assert_eq!(store.transaction_count(0).await.unwrap(), Some(0));
        assert_eq!(store.transaction_count(1).await.unwrap(), Some(2));
        assert_eq!(store.transaction_count(2).await.unwrap(), None);

        let t = store.transaction_by_hash(B256::repeat_byte(0x12)).await.unwrap().unwrap();
        assert_eq!((t.block_number, t.tx_index), (1, 1));
        assert_eq!(t.block_hash, block(1).hash);
        let by_loc = store.transaction_by_location(1, 0).await.unwrap().unwrap();
        assert_eq!(by_loc.data.hash, B256::repeat_byte(0x11));
    }

    #[tokio::test]
    async fn duplicate_block_is_rejected_without_partial_write() {
        let store = MemoryStore::new();
        store.insert_block(&bundle(0, vec![tx(1, vec![])])).await.unwrap();
        // same tx hash again at a new height
        let err = store.insert_block(&bundle(1, vec![tx(2, vec![]), tx(1, vec![])])).await;
        assert!(err.unwrap_err().is_storage());
        assert_eq!(store.latest_block_number().await.unwrap(), Some(0));
        assert!(store.transaction_by_hash(B256::repeat_byte(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logs_filtered_and_ordered() {
        let store = MemoryStore::new();
        let topic = B256::repeat_byte(0xaa);
        store
            .insert_block(&bundle(0, vec![tx(1, vec![topic]), tx(2, vec![B256::ZERO])]))
            .await
            .unwrap();
        store.insert_block(&bundle(1, vec![tx(3, vec![topic])])).await.unwrap();

        let query = LogQuery {
            block: BlockPredicate::Range { from: 0, to: 1 },
            addresses: vec![],
            topics: Predicate::TopicEq { slot: 1, topic },
            after_event: None,
            limit: None,
        };
        let logs = store.query_logs(&query).await.unwrap();
        assert_eq!(logs.iter().map(|l| l.event_id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(logs[1].tx_index, 0);
        assert_eq!(logs[0].address, Address::repeat_byte(1));

        let after = store
            .query_logs(&LogQuery { after_event: Some(1), ..query.clone() })
            .await
            .unwrap();
        assert_eq!(after.len(), 1);

        let by_hash = store
            .query_logs(&LogQuery { block: BlockPredicate::Hash(block(0).hash), ..query })
            .await
            .unwrap();
        assert_eq!(by_hash.len(), 1);
    }

    #[tokio::test]
    async fn filter_cursor_compare_and_advance() {
        let store = MemoryStore::new();
        let id = store
            .create_filter(NewFilter {
                kind: FilterKind::Block,
                params: None,
                owner: "anonymous".into(),
                cursor: None,
            })
            .await
            .unwrap();
        assert_eq!(id, 1);

        assert!(store.advance_filter(id, None, 3).await.unwrap());
        // stale expectation loses
        assert!(!store.advance_filter(id, None, 4).await.unwrap());
        // never backwards
        assert!(!store.advance_filter(id, Some(3), 2).await.unwrap());
        assert_eq!(store.get_filter(id).await.unwrap().unwrap().cursor, Some(3));

        assert!(store.delete_filter(id).await.unwrap());
        assert!(!store.delete_filter(id).await.unwrap());
        assert!(store.get_filter(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_filters_expire() {
        let store = MemoryStore::new();
        let new_filter = || NewFilter {
            kind: FilterKind::Block,
            params: None,
            owner: "anonymous".into(),
            cursor: None,
        };
        let polled = store.create_filter(new_filter()).await.unwrap();
        let idle = store.create_filter(new_filter()).await.unwrap();
        let record = store.get_filter(polled).await.unwrap().unwrap();
        assert_eq!(record.last_polled_at, record.created_at);

        assert!(store.touch_filter(polled, i64::MAX).await.unwrap());
        assert!(!store.touch_filter(99, 0).await.unwrap());

        assert_eq!(store.expire_filters(i64::MAX - 1).await.unwrap(), vec![idle]);
        assert!(store.get_filter(idle).await.unwrap().is_none());
        assert!(store.get_filter(polled).await.unwrap().is_some());
        assert_eq!(store.expire_filters(i64::MAX).await.unwrap(), vec![polled]);
    }

    #[tokio::test]
    async fn notifies_committed_blocks() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe_blocks();
        store.insert_block(&bundle(0, vec![])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failing_writes_surface_as_storage_errors() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(store.insert_block(&bundle(0, vec![])).await.unwrap_err().is_storage());
        assert!(store.block_numbers().is_empty());
    }
}
