//! Fluent builder API for creating block indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainmirror_evm::{IndexerBuilder, MockSource};
//! use chainmirror_storage::MemoryStore;
//!
//! let indexer = IndexerBuilder::new()
//!     .chain("sepolia")
//!     .retry_interval_ms(250)
//!     .log_every(1_000)
//!     .build(MockSource::new(), Arc::new(MemoryStore::new()));
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use chainmirror_core::indexer::IndexerConfig;
use chainmirror_core::retry::RetryPolicy;
use chainmirror_core::store::Store;

use crate::indexer::BlockIndexer;
use crate::source::ChainSource;

/// Fluent builder for [`BlockIndexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    retry: Option<RetryPolicy>,
    shutdown: Option<watch::Receiver<bool>>,
    stop_after: Option<u64>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. loaded from YAML).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the chain name used in logs.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Fixed wait between fetch attempts.
    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    /// Log at info level every N blocks (0 disables).
    pub fn log_every(mut self, n: u64) -> Self {
        self.config.log_every = n;
        self
    }

    /// Override the retry policy derived from `retry_interval_ms`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    /// Stop after committing this height.
    pub fn stop_after(mut self, height: u64) -> Self {
        self.stop_after = Some(height);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build the indexer over `source` and `store`.
    pub fn build<S: ChainSource>(self, source: S, store: Arc<dyn Store>) -> BlockIndexer<S> {
        let mut indexer = BlockIndexer::new(self.config, source, store);
        if let Some(policy) = self.retry {
            indexer = indexer.with_retry_policy(policy);
        }
        if let Some(rx) = self.shutdown {
            indexer = indexer.with_shutdown(rx);
        }
        if let Some(height) = self.stop_after {
            indexer = indexer.with_stop_after(height);
        }
        indexer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.chain, "ethereum");
        assert_eq!(cfg.retry_interval_ms, 100);
        assert_eq!(cfg.log_every, 100);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .chain("polygon")
            .retry_interval_ms(500)
            .log_every(0)
            .build_config();

        assert_eq!(cfg.chain, "polygon");
        assert_eq!(cfg.retry_interval_ms, 500);
        assert_eq!(cfg.log_every, 0);
    }
}
