//! Indexer configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the block indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Chain label used in log fields.
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Wait between attempts when a block is not produced yet (milliseconds).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Emit a progress line every N committed blocks.
    #[serde(default = "default_log_every")]
    pub log_every: u64,
}

fn default_chain() -> String {
    "ethereum".into()
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_log_every() -> u64 {
    100
}

impl IndexerConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            retry_interval_ms: default_retry_interval_ms(),
            log_every: default_log_every(),
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Fetching or persisting the watermark block.
    Ingesting,
    /// Waiting for the source to produce the watermark block.
    Waiting,
    /// Terminated.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Ingesting => write!(f, "ingesting"),
            Self::Waiting => write!(f, "waiting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
