//! Topic compiler — Ethereum topic filters to predicate trees.
//!
//! A topic filter is an ordered list of up to four positions. Each position
//! is a wildcard (`null`), one digest, or a set of digests:
//!
//! ```text
//! [A, null, [B, C]]  →  topics[1] = A  AND  (topics[3] = B OR topics[3] = C)
//! ```
//!
//! Slots are 1-based to match the store's topic array. The compiled tree is
//! evaluated in memory by [`Predicate::matches`] and rendered to SQL by the
//! Postgres backend.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Maximum number of topic positions an event can carry.
pub const MAX_TOPICS: usize = 4;

/// One position of a topic filter. `null` positions are `None` in
/// [`TopicFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicPosition {
    Single(B256),
    AnyOf(Vec<B256>),
}

/// Ordered topic positions, as received in `eth_getLogs` / `eth_newFilter`.
pub type TopicFilter = Vec<Option<TopicPosition>>;

/// Boolean predicate over an event's topic array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// No constraint.
    True,
    /// Can never be satisfied.
    False,
    /// `topics[slot] = topic`, slot 1-based.
    TopicEq { slot: usize, topic: B256 },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against an event's topics.
    pub fn matches(&self, topics: &[B256]) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::TopicEq { slot, topic } => slot
                .checked_sub(1)
                .and_then(|i| topics.get(i))
                .is_some_and(|actual| actual == topic),
            Self::And(parts) => parts.iter().all(|p| p.matches(topics)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(topics)),
        }
    }

    /// Returns `true` if this predicate places no constraint at all.
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Self::True)
    }
}

/// Compile a topic filter. `None` and `[]` both compile to [`Predicate::True`].
pub fn compile(filter: Option<&TopicFilter>) -> Result<Predicate, MirrorError> {
    let Some(positions) = filter else {
        return Ok(Predicate::True);
    };
    if positions.len() > MAX_TOPICS {
        return Err(MirrorError::InvalidParams(format!(
            "topic filter has {} positions, at most {MAX_TOPICS} allowed",
            positions.len()
        )));
    }

    let mut clauses = Vec::new();
    for (i, position) in positions.iter().enumerate() {
        let slot = i + 1;
        let clause = match position {
            None => continue,
            Some(TopicPosition::Single(topic)) => Predicate::TopicEq { slot, topic: *topic },
            Some(TopicPosition::AnyOf(candidates)) => match candidates.as_slice() {
                // OR of zero alternatives
                [] => return Ok(Predicate::False),
                [only] => Predicate::TopicEq { slot, topic: *only },
                many => Predicate::Or(
                    many.iter()
                        .map(|topic| Predicate::TopicEq { slot, topic: *topic })
                        .collect(),
                ),
            },
        };
        clauses.push(clause);
    }

    Ok(match clauses.len() {
        0 => Predicate::True,
        1 => clauses.remove(0),
        _ => Predicate::And(clauses),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn positions_and_alternatives() {
        let (a, b, c) = (t(0xa), t(0xb), t(0xc));
        let filter: TopicFilter = vec![
            Some(TopicPosition::Single(a)),
            None,
            Some(TopicPosition::AnyOf(vec![b, c])),
        ];
        let p = compile(Some(&filter)).unwrap();

        assert!(p.matches(&[a, t(0x01), b]));
        assert!(p.matches(&[a, t(0x02), c]));
        assert!(p.matches(&[a, t(0x03), c, t(0x04)]));
        assert!(!p.matches(&[t(0xee), t(0x02), b]));
        assert!(!p.matches(&[a, t(0x02)]));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(compile(None).unwrap(), Predicate::True);
        let empty: TopicFilter = vec![];
        let p = compile(Some(&empty)).unwrap();
        assert!(p.is_unconstrained());
        assert!(p.matches(&[]));
        assert!(p.matches(&[t(1), t(2), t(3), t(4)]));

        let wildcards: TopicFilter = vec![None, None];
        assert_eq!(compile(Some(&wildcards)).unwrap(), Predicate::True);
    }

    #[test]
    fn empty_candidate_set_matches_nothing() {
        let filter: TopicFilter = vec![None, Some(TopicPosition::AnyOf(vec![]))];
        let p = compile(Some(&filter)).unwrap();
        assert_eq!(p, Predicate::False);
        assert!(!p.matches(&[]));
        assert!(!p.matches(&[t(1), t(2)]));
    }

    #[test]
    fn position_binds_one_based_slot() {
        let filter: TopicFilter = vec![None, Some(TopicPosition::Single(t(7)))];
        assert_eq!(
            compile(Some(&filter)).unwrap(),
            Predicate::TopicEq { slot: 2, topic: t(7) }
        );
    }

    #[test]
    fn too_many_positions_is_malformed() {
        let filter: TopicFilter = vec![None; 5];
        let err = compile(Some(&filter)).unwrap_err();
        assert!(err.is_malformed_input());
    }

    #[test]
    fn deserializes_wire_shape() {
        let a = format!("{:#x}", t(0xa));
        let b = format!("{:#x}", t(0xb));
        let json = format!(r#"["{a}", null, ["{b}"]]"#);
        let filter: TopicFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(filter[0], Some(TopicPosition::Single(t(0xa))));
        assert_eq!(filter[1], None);
        assert_eq!(filter[2], Some(TopicPosition::AnyOf(vec![t(0xb)])));
    }
}
