//! Request cache
//!
//! Read-through cache for GET responses with lazy TTL expiry, plus the
//! mutation invalidator that wipes it after every write.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `nutrisync.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 60
//! max_entries = 512
//! volatile_paths = ["/search", "/callback", "/statistics", "/unread_count"]
//! ```

mod config;
mod invalidator;
mod keys;
pub(crate) mod lock;
mod store;

pub use config::CacheConfig;
pub use invalidator::{MutationInvalidator, is_write};
pub use keys::{RequestSignature, hash_value};
pub use store::{CacheEntry, PutOutcome, ReadTicket, ResponseCache};
