//! Response cache storage.
//!
//! Holds successful GET payloads keyed by [`RequestSignature`]. Freshness is
//! checked lazily on read: an entry is served only while it is younger than
//! the configured TTL, and an expired entry is dropped by the read that finds it.
//! Callers may therefore observe data up to one TTL old.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, FixedOffset, TimeDelta};
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::infra::clock::Clock;

use super::config::CacheConfig;
use super::keys::RequestSignature;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_HIT: &str = "nutrisync_cache_hit_total";
const METRIC_CACHE_MISS: &str = "nutrisync_cache_miss_total";
const METRIC_CACHE_STALE_PUT: &str = "nutrisync_cache_stale_put_total";

/// Ordering stamp handed out when a read starts.
///
/// A response may only be stored if its ticket is newer than the entry already
/// present and newer than the last invalidation, so an out-of-order or
/// pre-mutation response never overwrites fresher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadTicket(u64);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: RequestSignature,
    pub payload: Value,
    pub stored_at: DateTime<FixedOffset>,
    ticket: ReadTicket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// An entry from a later read is already present.
    Superseded,
    /// The read started before the last invalidation.
    Invalidated,
}

struct Entries {
    lru: LruCache<RequestSignature, CacheEntry>,
    /// Tickets below this value predate the last `clear()`.
    valid_from: u64,
}

pub struct ResponseCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<Entries>,
    next_ticket: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let lru = LruCache::new(config.max_entries_non_zero());
        Self {
            config,
            clock,
            entries: RwLock::new(Entries { lru, valid_from: 0 }),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether reads of `signature` go through the cache at all.
    pub fn is_cacheable(&self, signature: &RequestSignature) -> bool {
        self.config.enabled && !self.config.is_volatile(signature.path())
    }

    /// Stamp a read about to hit the network.
    pub fn issue_ticket(&self) -> ReadTicket {
        ReadTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst))
    }

    /// Fresh payload for `signature`, or `None` on a miss.
    pub fn get(&self, signature: &RequestSignature) -> Option<Value> {
        let now = self.clock.now();
        let ttl = self.ttl_delta();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let lookup = entries
            .lru
            .get(signature)
            .map(|entry| (now - entry.stored_at < ttl, entry.payload.clone()));

        let fresh = match lookup {
            Some((true, payload)) => Some(payload),
            Some((false, _)) => {
                entries.lru.pop(signature);
                debug!(cache = "request", key = %signature, outcome = "expired", "dropping expired entry");
                None
            }
            None => None,
        };

        if fresh.is_some() {
            counter!(METRIC_CACHE_HIT).increment(1);
        } else {
            counter!(METRIC_CACHE_MISS).increment(1);
        }
        fresh
    }

    /// Store a successful read. See [`ReadTicket`] for the acceptance rule.
    pub fn put(&self, signature: RequestSignature, payload: Value, ticket: ReadTicket) -> PutOutcome {
        let stored_at = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "put");

        if ticket.0 < entries.valid_from {
            counter!(METRIC_CACHE_STALE_PUT).increment(1);
            debug!(cache = "request", key = %signature, outcome = "invalidated", "discarding pre-invalidation response");
            return PutOutcome::Invalidated;
        }
        if entries
            .lru
            .peek(&signature)
            .is_some_and(|existing| existing.ticket > ticket)
        {
            counter!(METRIC_CACHE_STALE_PUT).increment(1);
            debug!(cache = "request", key = %signature, outcome = "superseded", "discarding out-of-order response");
            return PutOutcome::Superseded;
        }

        let entry = CacheEntry {
            key: signature.clone(),
            payload,
            stored_at,
            ticket,
        };
        entries.lru.put(signature, entry);
        PutOutcome::Stored
    }

    /// Drop every entry. Returns how many were present.
    pub fn clear(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let cleared = entries.lru.len();
        entries.lru.clear();
        entries.valid_from = self.next_ticket.load(Ordering::SeqCst);
        cleared
    }

    /// Get the number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").lru.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ttl_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.ttl()).unwrap_or(TimeDelta::MAX)
    }
}
