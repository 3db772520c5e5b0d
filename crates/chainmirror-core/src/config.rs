//! Top-level configuration, loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```yaml
//! database_url: postgres://localhost/chainmirror
//! source:
//!   url: http://localhost:8545
//! rpc:
//!   listen: 127.0.0.1:8546
//! log:
//!   level: info
//!   components:
//!     chainmirror_evm: debug
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::indexer::IndexerConfig;

/// Upstream chain source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// JSON-RPC endpoint of the upstream node.
    #[serde(default = "default_source_url")]
    pub url: String,
    /// Contract scope forwarded to sources that support it.
    #[serde(default)]
    pub contract: Option<String>,
    /// Fetch receipts and ingest events with each block.
    #[serde(default = "bool_true")]
    pub ingest_events: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_source_url() -> String {
    "http://localhost:8545".into()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn bool_true() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            contract: None,
            ingest_events: true,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// JSON-RPC server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound on logs returned by one `eth_getLogs`.
    #[serde(default = "default_max_logs")]
    pub max_logs: usize,
    /// Filters not polled for this long are removed. 0 keeps them forever.
    #[serde(default = "default_filter_ttl_secs")]
    pub filter_ttl_secs: u64,
}

impl RpcConfig {
    pub fn filter_ttl(&self) -> Option<std::time::Duration> {
        (self.filter_ttl_secs > 0).then(|| std::time::Duration::from_secs(self.filter_ttl_secs))
    }
}

fn default_listen() -> String {
    "127.0.0.1:8546".into()
}
fn default_max_logs() -> usize {
    10_000
}
fn default_filter_ttl_secs() -> u64 {
    300
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_logs: default_max_logs(),
            filter_ttl_secs: default_filter_ttl_secs(),
        }
    }
}

/// Connection pool settings for the Postgres store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Build the filter directive string: `"info,chainmirror_evm=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Everything the `chainmirror` binary needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Returned by `eth_chainId` / `net_version`.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_database_url() -> String {
    "postgres://localhost/chainmirror".into()
}
fn default_chain_id() -> u64 {
    1
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            chain_id: default_chain_id(),
            source: SourceConfig::default(),
            indexer: IndexerConfig::default(),
            rpc: RpcConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl MirrorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MirrorError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| MirrorError::Other(format!("config: {e}")))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, MirrorError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::Other(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_default() {
        let cfg = MirrorConfig::from_yaml_str("").unwrap();
        assert_eq!(cfg.chain_id, 1);
        assert_eq!(cfg.indexer.retry_interval_ms, 100);
        assert_eq!(cfg.rpc.max_logs, 10_000);
        assert_eq!(cfg.rpc.filter_ttl(), Some(std::time::Duration::from_secs(300)));
        assert!(cfg.source.ingest_events);
    }

    #[test]
    fn zero_filter_ttl_disables_expiry() {
        let cfg = MirrorConfig::from_yaml_str("rpc:\n  filter_ttl_secs: 0\n").unwrap();
        assert_eq!(cfg.rpc.filter_ttl(), None);
        assert_eq!(cfg.rpc.max_logs, 10_000);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = MirrorConfig::from_yaml_str(
            "chain_id: 5\nsource:\n  url: http://node:8545\nindexer:\n  retry_interval_ms: 250\n",
        )
        .unwrap();
        assert_eq!(cfg.chain_id, 5);
        assert_eq!(cfg.source.url, "http://node:8545");
        assert_eq!(cfg.source.request_timeout_ms, 30_000);
        assert_eq!(cfg.indexer.retry_interval_ms, 250);
        assert_eq!(cfg.indexer.chain, "ethereum");
        assert_eq!(cfg.rpc.listen, "127.0.0.1:8546");
    }

    #[test]
    fn log_directives_include_components() {
        let mut log = LogConfig::default();
        log.components.insert("chainmirror-evm".into(), "debug".into());
        assert_eq!(log.directives(), "info,chainmirror_evm=debug");
    }

    #[test]
    fn invalid_yaml_is_error() {
        assert!(MirrorConfig::from_yaml_str("chain_id: [nope").is_err());
    }
}
