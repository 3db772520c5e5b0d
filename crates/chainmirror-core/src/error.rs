//! Error types shared by the indexer, the store, and the query side.

use thiserror::Error;

/// Errors that can occur anywhere in the mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Request parameters could not be understood.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A block number or tag was not `earliest`/`latest`/`pending` or `0x…` hex.
    #[error("invalid block specifier: {0}")]
    InvalidBlockSpec(String),

    /// The operation exists on the Ethereum API but is not served here.
    #[error("unsupported method: {0}")]
    Unsupported(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("source error: {0}")]
    Source(String),

    /// A stored or wire value could not be converted to an integer/digest.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Returns `true` for errors caused by the caller's input.
    ///
    /// These are raised before any store access.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::InvalidParams(_) | Self::InvalidBlockSpec(_))
    }

    /// Returns `true` for store failures; fatal to the indexer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_input_errors() {
        assert!(MirrorError::InvalidBlockSpec("0xzz".into()).is_malformed_input());
        assert!(MirrorError::InvalidParams("bad".into()).is_malformed_input());
        assert!(!MirrorError::Storage("down".into()).is_malformed_input());
        assert!(MirrorError::Storage("down".into()).is_storage());
    }
}
