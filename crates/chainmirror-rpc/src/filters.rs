//! Server-side filters and their cursors.
//!
//! Filters live in the store, so any number of server processes share them.
//! Id `0` is never allocated and is answered without touching the store.
//! Every poll stamps the filter; filters left unpolled for the configured
//! TTL are removed by [`FilterRegistry::expire_idle`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use chainmirror_core::error::MirrorError;
use chainmirror_core::filter::{FilterKind, FilterRecord, LogFilterParams, NewFilter, ANONYMOUS_OWNER};
use chainmirror_core::store::Store;
use chainmirror_core::topics;

/// Create, look up, advance and remove filters.
#[derive(Clone)]
pub struct FilterRegistry {
    store: Arc<dyn Store>,
}

impl FilterRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// New block filter; delivers blocks committed after this call.
    pub async fn create_block_filter(&self) -> Result<u64, MirrorError> {
        let cursor = self.store.latest_block_number().await?;
        self.create(FilterKind::Block, None, cursor).await
    }

    /// New event filter; delivers matching events recorded after this call.
    ///
    /// The topic filter is validated before anything is stored.
    pub async fn create_event_filter(&self, params: LogFilterParams) -> Result<u64, MirrorError> {
        topics::compile(params.topics.as_ref())?;
        let cursor = self.store.latest_event_id().await?;
        self.create(FilterKind::Event, Some(params), cursor).await
    }

    /// New pending-transaction filter. There is no pending pool, so it never
    /// yields anything.
    pub async fn create_pending_filter(&self) -> Result<u64, MirrorError> {
        self.create(FilterKind::PendingTransaction, None, None).await
    }

    async fn create(
        &self,
        kind: FilterKind,
        params: Option<LogFilterParams>,
        cursor: Option<u64>,
    ) -> Result<u64, MirrorError> {
        let id = self
            .store
            .create_filter(NewFilter {
                kind,
                params,
                owner: ANONYMOUS_OWNER.to_string(),
                cursor,
            })
            .await?;
        debug!(filter_id = id, %kind, ?cursor, "filter installed");
        Ok(id)
    }

    pub async fn get(&self, id: u64) -> Result<Option<FilterRecord>, MirrorError> {
        if id == 0 {
            return Ok(None);
        }
        self.store.get_filter(id).await
    }

    /// Look up a filter for polling and stamp the poll time.
    pub async fn poll(&self, id: u64) -> Result<Option<FilterRecord>, MirrorError> {
        if id == 0 {
            return Ok(None);
        }
        if !self.store.touch_filter(id, chrono::Utc::now().timestamp()).await? {
            return Ok(None);
        }
        self.store.get_filter(id).await
    }

    /// Remove filters not polled within `ttl`. Returns how many were removed.
    pub async fn expire_idle(&self, ttl: Duration) -> Result<usize, MirrorError> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp().saturating_sub(ttl);
        let expired = self.store.expire_filters(cutoff).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), ?expired, "idle filters expired");
        }
        Ok(expired.len())
    }

    /// Sweep idle filters every `every` until the task is dropped. Store
    /// errors are logged and the sweep carries on.
    pub async fn run_expiry(self, ttl: Duration, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.expire_idle(ttl).await {
                warn!(error = %e, "filter expiry failed");
            }
        }
    }

    /// Compare-and-advance the cursor. `false` means another poll got there
    /// first (or the filter is gone).
    pub async fn advance(&self, id: u64, expected: Option<u64>, next: u64) -> Result<bool, MirrorError> {
        if id == 0 {
            return Ok(false);
        }
        let moved = self.store.advance_filter(id, expected, next).await?;
        if !moved {
            debug!(filter_id = id, ?expected, next, "cursor advanced concurrently");
        }
        Ok(moved)
    }

    /// Returns whether the filter existed.
    pub async fn uninstall(&self, id: u64) -> Result<bool, MirrorError> {
        if id == 0 {
            return Ok(false);
        }
        let existed = self.store.delete_filter(id).await?;
        debug!(filter_id = id, existed, "filter uninstalled");
        Ok(existed)
    }
}
