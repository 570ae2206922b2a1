//! A concurrent, weight-bounded cache with per-entry expiry, change events
//! and per-key locks.
//!
//! # Features
//! - **High Concurrency**: Built with a sharded architecture to minimize lock contention.
//! - **Weighted Capacity**: Entries are weighed by a pluggable [`UnitCalculator`];
//!   writes evict expired entries first, then least recently used ones, until the
//!   cache is back under its high units.
//! - **Events**: Synchronous, filtered [`MapListener`] callbacks for inserts,
//!   updates and deletes, including synthetic deletes for evictions.
//! - **Statistics**: Hit, miss and put counters with averages and atomic reset.
//! - **Key Locks**: Owner-tagged locks with bounded waits, so the cache can back
//!   a transaction layer.
//! - **Non-Clone Support**: Stores values in an `Arc<V>`, avoiding `V: Clone` bounds.

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod handles;
pub mod iter;
pub mod listener;
pub mod lock;
pub mod policy;
pub mod stats;
pub mod time;
pub mod unit;

// Internal, crate-only modules
mod entry;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use config::CacheConfig;
pub use error::CacheError;
pub use handles::{Cache, EntryView};
pub use iter::{EntriesView, Iter, KeysView, ValuesView};
pub use listener::{CacheEvent, EventDispatcher, EventFilter, EventKind, MapListener};
pub use lock::LockOwner;
pub use policy::{CachePolicy, EvictionKind};
pub use stats::{CacheStatistics, StatisticsSnapshot};
pub use time::{Clock, Expiry, ManualClock, SystemClock, EXPIRY_DEFAULT, EXPIRY_NEVER};
pub use unit::{FixedUnits, UnitCalculator};
