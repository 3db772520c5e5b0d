//! chainmirror-rpc — the Ethereum JSON-RPC surface over the mirror store.
//!
//! ```text
//! HTTP POST ──▶ server ──▶ Dispatcher ──┬──▶ Store (blocks, transactions)
//!                                        ├──▶ LogQueryEngine ──▶ Store
//!                                        └──▶ FilterRegistry ──▶ Store
//! ```

pub mod dispatch;
pub mod error;
pub mod filters;
pub mod logs;
pub mod render;
pub mod server;

pub use dispatch::{Dispatcher, UNSUPPORTED_METHODS};
pub use error::RpcError;
pub use filters::FilterRegistry;
pub use logs::{FilterChanges, LogQueryEngine};
pub use server::{router, serve};
