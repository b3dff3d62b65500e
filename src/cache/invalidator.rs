//! Mutation invalidation.
//!
//! Every completed write clears the whole request cache. Scoping invalidation
//! to the touched resource would need a dependency graph between views
//! (dashboard totals depend on diary writes, the diary depends on the food
//! catalogue); one extra read round-trip is the accepted price instead.

use std::sync::Arc;

use metrics::counter;
use reqwest::Method;
use tracing::info;

use super::store::ResponseCache;

const METRIC_CACHE_INVALIDATE: &str = "nutrisync_cache_invalidate_total";

/// True for the methods that mutate server state.
pub fn is_write(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[derive(Clone)]
pub struct MutationInvalidator {
    cache: Arc<ResponseCache>,
}

impl MutationInvalidator {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    /// Observe a finished request. Writes clear the cache whatever their
    /// outcome: a failed write may still have been applied server-side.
    /// Returns the number of cleared entries for writes, `None` for reads.
    pub fn observe(&self, method: &Method, path: &str, succeeded: bool) -> Option<usize> {
        if !is_write(method) {
            return None;
        }
        let cleared = self.cache.clear();
        counter!(METRIC_CACHE_INVALIDATE).increment(1);
        info!(
            method = %method,
            path,
            succeeded,
            cleared,
            "Request cache invalidated after write"
        );
        Some(cleared)
    }

    /// Clear the cache outside of a transport write, e.g. after an optimistic rollback.
    pub fn invalidate(&self, reason: &'static str) -> usize {
        let cleared = self.cache.clear();
        counter!(METRIC_CACHE_INVALIDATE).increment(1);
        info!(reason, cleared, "Request cache invalidated");
        cleared
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}
