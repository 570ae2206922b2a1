//! Victim selection for capacity eviction.

pub mod fifo;
pub mod lru;

mod order_list;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// Tracks entry usage and picks victims when the cache is over its high units.
///
/// The cache calls `on_write` and `on_remove` while holding the shard lock of
/// the key, so the policy's view of which keys exist follows the store.
/// `victim` is called with no shard lock held.
pub trait CachePolicy<K>: Send + Sync {
  /// Called after an entry was inserted or replaced.
  fn on_write(&self, key: &K);

  /// Called after a successful lookup.
  fn on_read(&self, key: &K);

  /// Called when an entry leaves the cache for any reason.
  fn on_remove(&self, key: &K);

  /// Removes and returns the next key to evict, or `None` if nothing is tracked.
  fn victim(&self) -> Option<K>;

  /// Clears all state from the policy.
  fn clear(&self);
}

/// The built-in policies, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EvictionKind {
  /// Least recently used first.
  #[default]
  Lru,
  /// Oldest insertion first; reads and updates do not reorder.
  Fifo,
}

impl EvictionKind {
  pub(crate) fn build<K>(self) -> Box<dyn CachePolicy<K>>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
  {
    match self {
      EvictionKind::Lru => Box::new(lru::LruPolicy::new()),
      EvictionKind::Fifo => Box::new(fifo::FifoPolicy::new()),
    }
  }
}
