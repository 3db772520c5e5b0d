//! chainmirror-evm — chain source and block indexer.

pub mod builder;
pub mod indexer;
pub mod mock;
pub mod source;

pub use builder::IndexerBuilder;
pub use indexer::BlockIndexer;
pub use mock::MockSource;
pub use source::{ChainSource, FetchError, HttpChainSource};
