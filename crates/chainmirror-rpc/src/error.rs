//! Wire-level error type for the JSON-RPC surface.

use thiserror::Error;

use chainmirror_core::error::MirrorError;
use chainmirror_core::jsonrpc::{codes, JsonRpcError};

/// An error returned to a JSON-RPC caller.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Body is not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// JSON is not a request object.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("the method {0} does not exist/is not available")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A known Ethereum method this server does not serve.
    #[error("method not supported: {0}")]
    Unsupported(String),

    /// Store or upstream failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// JSON-RPC error code.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Unsupported(_) => codes::METHOD_NOT_SUPPORTED,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn to_json_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<MirrorError> for RpcError {
    fn from(e: MirrorError) -> Self {
        match e {
            MirrorError::InvalidParams(msg) => Self::InvalidParams(msg),
            MirrorError::InvalidBlockSpec(msg) => Self::InvalidParams(msg),
            MirrorError::Unsupported(method) => Self::Unsupported(method),
            MirrorError::Storage(_)
            | MirrorError::Source(_)
            | MirrorError::Codec(_)
            | MirrorError::Other(_) => Self::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_errors_map_to_codes() {
        let cases = [
            (MirrorError::InvalidParams("x".into()), -32602),
            (MirrorError::InvalidBlockSpec("12".into()), -32602),
            (MirrorError::Unsupported("eth_sign".into()), -32004),
            (MirrorError::Storage("down".into()), -32603),
            (MirrorError::Codec("bad".into()), -32603),
        ];
        for (err, code) in cases {
            assert_eq!(RpcError::from(err).code(), code);
        }
    }

    #[test]
    fn internal_error_keeps_cause() {
        let err = RpcError::from(MirrorError::Storage("connection refused".into()));
        let wire = err.to_json_error();
        assert_eq!(wire.code, -32603);
        assert!(wire.message.contains("connection refused"), "{}", wire.message);
    }
}
