//! Indexer watermark — the next height to ingest.

use serde::{Deserialize, Serialize};

/// The indexer's position in the chain.
///
/// Derived from durable state only: on startup it is `max + 1` of the
/// recorded heights, or `0` for an empty store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    next: u64,
}

impl Watermark {
    /// Resume after the highest recorded block.
    pub fn resume(latest_recorded: Option<u64>) -> Self {
        Self {
            next: latest_recorded.map_or(0, |n| n + 1),
        }
    }

    /// The next block to ingest.
    pub fn next_block(&self) -> u64 {
        self.next
    }

    /// Mark the current height as committed.
    pub fn advance(&mut self) {
        self.next += 1;
    }

    /// Last committed block, if any.
    pub fn last_committed(&self) -> Option<u64> {
        self.next.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_starts_at_genesis() {
        let w = Watermark::resume(None);
        assert_eq!(w.next_block(), 0);
        assert_eq!(w.last_committed(), None);
    }

    #[test]
    fn resumes_after_max() {
        let mut w = Watermark::resume(Some(41));
        assert_eq!(w.next_block(), 42);
        w.advance();
        assert_eq!(w.next_block(), 43);
        assert_eq!(w.last_committed(), Some(42));
    }
}
