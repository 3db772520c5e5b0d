//! chainmirror-core — foundation for the relational chain mirror.
//!
//! # Architecture
//!
//! ```text
//! ChainSource → BlockIndexer ──┐
//!                              ├── Store (memory / Postgres)
//! JSON-RPC → Dispatcher ───────┘
//!              ├── LogQueryEngine  (block spec resolution + TopicCompiler)
//!              └── FilterRegistry  (per-filter cursors)
//! ```
//!
//! The indexer and the query side never talk to each other directly; every
//! piece of shared state lives in the [`store::Store`].

pub mod config;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod jsonrpc;
pub mod quantity;
pub mod retry;
pub mod spec;
pub mod store;
pub mod topics;
pub mod types;
pub mod watermark;

pub use config::{LogConfig, MirrorConfig, RpcConfig, SourceConfig, StoreConfig};
pub use error::MirrorError;
pub use filter::{AddressFilter, FilterKind, FilterRecord, LogFilterParams, NewFilter};
pub use indexer::{IndexerConfig, IndexerState};
pub use retry::{RetryConfig, RetryPolicy};
pub use spec::BlockSpec;
pub use store::{BlockPredicate, LogQuery, Store};
pub use topics::{Predicate, TopicFilter, TopicPosition};
pub use types::{
    Block, BlockBundle, EventData, IndexedEvent, IndexedTransaction, LogEntry, SourceBlock,
    SourceTransaction, Transaction, TransactionData,
};
pub use watermark::Watermark;
