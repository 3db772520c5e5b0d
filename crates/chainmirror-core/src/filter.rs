//! Filter parameters and server-side filter records.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::spec::BlockSpec;
use crate::topics::TopicFilter;

/// Owner recorded on filters until clients carry an identity.
pub const ANONYMOUS_OWNER: &str = "anonymous";

// ─── LogFilterParams ─────────────────────────────────────────────────────────

/// `address` accepts one address or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressFilter {
    One(Address),
    Many(Vec<Address>),
}

impl AddressFilter {
    pub fn to_vec(&self) -> Vec<Address> {
        match self {
            Self::One(a) => vec![*a],
            Self::Many(v) => v.clone(),
        }
    }
}

/// The `eth_getLogs` / `eth_newFilter` filter object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<BlockSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<BlockSpec>,
    /// Exact-block filter; when set, `from_block`/`to_block` are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<TopicFilter>,
}

impl LogFilterParams {
    /// Parse from a JSON-RPC parameter, mapping serde failures to
    /// malformed-input errors.
    pub fn from_value(value: serde_json::Value) -> Result<Self, MirrorError> {
        serde_json::from_value(value).map_err(|e| MirrorError::InvalidParams(format!("filter object: {e}")))
    }

    /// Addresses to match; empty means any sender.
    pub fn addresses(&self) -> Vec<Address> {
        self.address.as_ref().map(AddressFilter::to_vec).unwrap_or_default()
    }
}

// ─── FilterKind ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Block,
    Event,
    PendingTransaction,
}

impl FilterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Event => "event",
            Self::PendingTransaction => "pending-transaction",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "event" => Ok(Self::Event),
            "pending-transaction" => Ok(Self::PendingTransaction),
            other => Err(MirrorError::Codec(format!("unknown filter kind {other:?}"))),
        }
    }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A filter to be created. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFilter {
    pub kind: FilterKind,
    pub params: Option<LogFilterParams>,
    pub owner: String,
    /// Max block number (block filters) or max event id (event filters) at
    /// creation; `None` when the store had nothing yet.
    pub cursor: Option<u64>,
}

/// A stored filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRecord {
    pub id: u64,
    pub kind: FilterKind,
    pub params: Option<LogFilterParams>,
    pub owner: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds of the last poll, `created_at` until the first one.
    pub last_polled_at: i64,
    pub initial_cursor: Option<u64>,
    /// Last block number / event id already delivered.
    pub cursor: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_filter_object() {
        let json = serde_json::json!({
            "fromBlock": "earliest",
            "toBlock": "0x10",
            "address": "0x00000000000000000000000000000000000000aa",
            "topics": [null]
        });
        let params = LogFilterParams::from_value(json).unwrap();
        assert_eq!(params.from_block, Some(BlockSpec::Earliest));
        assert_eq!(params.to_block, Some(BlockSpec::Number(16)));
        assert_eq!(params.addresses(), vec![Address::with_last_byte(0xaa)]);
        assert_eq!(params.topics, Some(vec![None]));
    }

    #[test]
    fn address_list_and_missing_fields() {
        let json = serde_json::json!({
            "address": [
                "0x00000000000000000000000000000000000000aa",
                "0x00000000000000000000000000000000000000bb"
            ]
        });
        let params = LogFilterParams::from_value(json).unwrap();
        assert_eq!(params.addresses().len(), 2);
        assert!(params.from_block.is_none());
        assert!(params.topics.is_none());
    }

    #[test]
    fn malformed_block_in_filter_is_input_error() {
        let err = LogFilterParams::from_value(serde_json::json!({ "fromBlock": "12" })).unwrap_err();
        assert!(err.is_malformed_input());
        assert!(err.to_string().contains("block tag"), "{err}");
    }

    #[test]
    fn params_survive_storage_serialization() {
        let params = LogFilterParams {
            from_block: Some(BlockSpec::Number(3)),
            block_hash: None,
            ..Default::default()
        };
        let stored = serde_json::to_value(&params).unwrap();
        assert_eq!(LogFilterParams::from_value(stored).unwrap(), params);
    }

    #[test]
    fn filter_kind_strings() {
        for kind in [FilterKind::Block, FilterKind::Event, FilterKind::PendingTransaction] {
            assert_eq!(kind.as_str().parse::<FilterKind>().unwrap(), kind);
        }
        assert!("log".parse::<FilterKind>().is_err());
    }
}
