//! Sequential block ingestion from a chain source into the store.
//!
//! # Loop
//! Resume at `max recorded + 1` (or 0). For each height `h`:
//!   - fetch block `h` (with events when the source ingests them)
//!   - not produced yet / transport failure → wait the retry interval, retry `h`
//!   - assign transaction and log indices, persist as one store transaction
//!   - advance to `h + 1`
//!
//! A store failure ends the loop with the error. Shutdown is observed only
//! between blocks and while waiting, never during a persist.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chainmirror_core::error::MirrorError;
use chainmirror_core::indexer::{IndexerConfig, IndexerState};
use chainmirror_core::retry::RetryPolicy;
use chainmirror_core::store::Store;
use chainmirror_core::types::{BlockBundle, SourceBlock};
use chainmirror_core::watermark::Watermark;

use crate::source::{ChainSource, FetchError};

/// Sequential block ingestion loop.
pub struct BlockIndexer<S: ChainSource> {
    config: IndexerConfig,
    source: S,
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    shutdown: Option<watch::Receiver<bool>>,
    stop_after: Option<u64>,
    state: IndexerState,
}

impl<S: ChainSource> BlockIndexer<S> {
    pub fn new(config: IndexerConfig, source: S, store: Arc<dyn Store>) -> Self {
        let retry = RetryPolicy::fixed(config.retry_interval());
        Self {
            config,
            source,
            store,
            retry,
            shutdown: None,
            stop_after: None,
            state: IndexerState::Idle,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stop once `true` is sent on the channel.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Return after committing this height.
    pub fn with_stop_after(mut self, height: u64) -> Self {
        self.stop_after = Some(height);
        self
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Run until shutdown, the stop height, or a store failure. Returns the
    /// watermark reached.
    pub async fn run(&mut self) -> Result<Watermark, MirrorError> {
        let latest = self.store.latest_block_number().await?;
        let mut mark = Watermark::resume(latest);
        info!(
            chain = %self.config.chain,
            next = mark.next_block(),
            "indexer starting"
        );

        loop {
            if self.shutdown_requested() {
                break;
            }
            if let (Some(stop), Some(last)) = (self.stop_after, mark.last_committed()) {
                if last >= stop {
                    break;
                }
            }

            let height = mark.next_block();
            let Some(block) = self.fetch(height).await? else {
                break;
            };

            self.state = IndexerState::Ingesting;
            let bundle = BlockBundle::assemble(block);
            if let Err(e) = self.store.insert_block(&bundle).await {
                self.state = IndexerState::Error;
                error!(block = height, error = %e, "persisting block failed");
                return Err(e);
            }
            mark.advance();

            if self.config.log_every > 0 && height % self.config.log_every == 0 {
                info!(
                    block = height,
                    txs = bundle.transactions.len(),
                    events = bundle.event_count(),
                    "indexed block"
                );
            } else {
                debug!(block = height, txs = bundle.transactions.len(), "indexed block");
            }
        }

        self.state = IndexerState::Stopped;
        info!(next = mark.next_block(), "indexer stopped");
        Ok(mark)
    }

    /// Fetch `height`, retrying on every source failure. `Ok(None)` when
    /// shutdown arrived while waiting.
    async fn fetch(&mut self, height: u64) -> Result<Option<SourceBlock>, MirrorError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.source.fetch_block(height).await {
                Ok(block) if block.header.number == height => return Ok(Some(block)),
                Ok(block) => FetchError::Malformed(format!(
                    "requested block {height}, source returned {}",
                    block.header.number
                )),
                Err(e) => e,
            };

            attempt += 1;
            self.state = IndexerState::Waiting;
            match &err {
                FetchError::NotYetProduced { .. } => {
                    debug!(block = height, attempt, "waiting for block")
                }
                _ => warn!(block = height, attempt, error = %err, "fetch failed, retrying"),
            }

            let Some(delay) = self.retry.next_delay(attempt) else {
                self.state = IndexerState::Error;
                return Err(err.into());
            };

            match self.shutdown.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_signalled(rx) => return Ok(None),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Resolves once `true` is observed. A closed channel never resolves.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alloy_primitives::{Address, Bytes, B256, U256};
    use chainmirror_core::types::{Block, SourceTransaction, TransactionData};
    use chainmirror_storage::MemoryStore;

    use crate::mock::MockSource;

    fn block(number: u64, txs: u8) -> SourceBlock {
        SourceBlock {
            header: Block {
                number,
                hash: B256::with_last_byte(number as u8 + 1),
                parent_hash: B256::with_last_byte(number as u8),
                timestamp: number,
                size: 0,
                gas_limit: 0,
                gas_used: 0,
                transactions_root: B256::ZERO,
                state_root: B256::ZERO,
                receipts_root: B256::ZERO,
            },
            transactions: (0..txs)
                .map(|i| SourceTransaction {
                    tx: TransactionData {
                        hash: B256::from(U256::from(number * 100 + i as u64)),
                        from: Address::ZERO,
                        to: None,
                        nonce: 0,
                        value: U256::ZERO,
                        input: Bytes::new(),
                        v: U256::ZERO,
                        r: U256::ZERO,
                        s: U256::ZERO,
                    },
                    events: vec![],
                })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_after_latest_recorded() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_block(&BlockBundle::assemble(block(0, 0)))
            .await
            .unwrap();

        let source = MockSource::new();
        for n in 0..3 {
            source.push_block(block(n, 1));
        }
        let mut indexer = BlockIndexer::new(IndexerConfig::default(), source, store.clone())
            .with_stop_after(2);
        let mark = indexer.run().await.unwrap();

        assert_eq!(mark.next_block(), 3);
        assert_eq!(store.block_numbers(), vec![0, 1, 2]);
        // block 0 kept its original (empty) contents
        assert_eq!(store.transaction_count(0).await.unwrap(), Some(0));
        assert_eq!(indexer.state(), IndexerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_height_from_source_is_retried_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MockSource::new());
        source.insert_at(0, block(5, 0));

        let (tx, rx) = watch::channel(false);
        let mut indexer = BlockIndexer::new(IndexerConfig::default(), source.clone(), store.clone())
            .with_shutdown(rx);
        let handle = tokio::spawn(async move { indexer.run().await });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(source.calls().len() >= 3);
        assert!(source.calls().iter().all(|h| *h == 0));
        assert!(store.block_numbers().is_empty());

        tx.send(true).unwrap();
        let mark = handle.await.unwrap().unwrap();
        assert_eq!(mark.next_block(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retry_policy_surfaces_source_error() {
        let store = Arc::new(MemoryStore::new());
        let mut indexer = BlockIndexer::new(IndexerConfig::default(), MockSource::new(), store)
            .with_retry_policy(RetryPolicy::new(chainmirror_core::retry::RetryConfig {
                interval: Duration::from_millis(10),
                max_retries: Some(2),
            }));
        let err = indexer.run().await.unwrap_err();
        assert!(matches!(err, MirrorError::Source(_)));
        assert_eq!(indexer.state(), IndexerState::Error);
    }
}
