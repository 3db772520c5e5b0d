//! Block specifiers: `earliest`, `latest`, `pending`, or a literal height.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::MirrorError;
use crate::quantity;

/// A block identifier as accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockSpec {
    Earliest,
    #[default]
    Latest,
    /// There is no pending-block view; resolves like [`BlockSpec::Latest`].
    Pending,
    Number(u64),
}

impl BlockSpec {
    /// Parse a tag or a `0x…` hex height.
    pub fn parse(s: &str) -> Result<Self, MirrorError> {
        match s {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "pending" => Ok(Self::Pending),
            literal => quantity::decode_u64(literal).map(Self::Number).map_err(|_| {
                MirrorError::InvalidBlockSpec(format!(
                    "{literal:?} is neither a block tag (earliest/latest/pending) nor a 0x-prefixed hex height"
                ))
            }),
        }
    }

    /// Resolve against the store's current maximum height.
    ///
    /// `head` is `None` when nothing has been indexed yet; tags then
    /// resolve to 0.
    pub fn resolve(self, head: Option<u64>) -> u64 {
        match self {
            Self::Earliest => 0,
            Self::Latest | Self::Pending => head.unwrap_or(0),
            Self::Number(n) => n,
        }
    }

    /// Returns `true` if resolving needs the current head.
    pub fn needs_head(self) -> bool {
        matches!(self, Self::Latest | Self::Pending)
    }
}

impl fmt::Display for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => write!(f, "earliest"),
            Self::Latest => write!(f, "latest"),
            Self::Pending => write!(f, "pending"),
            Self::Number(n) => write!(f, "{}", quantity::encode_u64(*n)),
        }
    }
}

impl Serialize for BlockSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecVisitor;

        impl Visitor<'_> for SpecVisitor {
            type Value = BlockSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a block tag, a 0x-prefixed hex height, or an unsigned integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BlockSpec, E> {
                BlockSpec::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BlockSpec, E> {
                Ok(BlockSpec::Number(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<BlockSpec, E> {
                u64::try_from(v)
                    .map(BlockSpec::Number)
                    .map_err(|_| E::custom(format!("negative block height {v}")))
            }
        }

        deserializer.deserialize_any(SpecVisitor)
    }
}
