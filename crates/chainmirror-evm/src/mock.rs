//! Scripted in-memory chain source for tests and demos.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use chainmirror_core::types::SourceBlock;

use crate::source::{ChainSource, FetchError};

#[derive(Default)]
struct Script {
    blocks: BTreeMap<u64, SourceBlock>,
    /// Errors returned before any block, one per call.
    failures: VecDeque<FetchError>,
    calls: Vec<u64>,
}

/// A [`ChainSource`] that serves pre-loaded blocks.
///
/// Heights without a block answer [`FetchError::NotYetProduced`]; queued
/// failures are returned first, one per call.
#[derive(Default)]
pub struct MockSource {
    script: Mutex<Script>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `block` at its own height.
    pub fn push_block(&self, block: SourceBlock) {
        let number = block.header.number;
        self.insert_at(number, block);
    }

    /// Serve `block` when height `number` is requested, whatever its header
    /// says.
    pub fn insert_at(&self, number: u64, block: SourceBlock) {
        if let Ok(mut script) = self.script.lock() {
            script.blocks.insert(number, block);
        }
    }

    /// Queue a failure for the next call.
    pub fn fail_next(&self, error: FetchError) {
        if let Ok(mut script) = self.script.lock() {
            script.failures.push_back(error);
        }
    }

    /// Heights requested so far, in call order.
    pub fn calls(&self) -> Vec<u64> {
        self.script.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChainSource for MockSource {
    async fn fetch_block(&self, number: u64) -> Result<SourceBlock, FetchError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| FetchError::Transport("mock source lock poisoned".into()))?;
        script.calls.push(number);
        if let Some(err) = script.failures.pop_front() {
            return Err(err);
        }
        script
            .blocks
            .get(&number)
            .cloned()
            .ok_or(FetchError::NotYetProduced { number })
    }
}
