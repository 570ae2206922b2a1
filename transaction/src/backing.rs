//! The map a transaction reads from and commits into.

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use tandem_cache::{Cache, CacheError, Expiry, LockOwner};

/// A concurrent map with per-key owner locks.
///
/// `lock` must be re-entrant for the same owner, and a zero `wait` must
/// check exactly once; pessimistic lock validation relies on both.
pub trait BackingMap<K, V>: Send + Sync {
  fn get(&self, key: &K) -> Option<Arc<V>>;

  fn put(&self, key: K, value: Arc<V>) -> Result<(), CacheError>;

  fn remove(&self, key: &K) -> Option<Arc<V>>;

  fn lock(&self, key: &K, owner: LockOwner, wait: Duration) -> bool;

  fn unlock(&self, key: &K, owner: LockOwner) -> bool;
}

impl<K, V, H> BackingMap<K, V> for Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  #[inline]
  fn get(&self, key: &K) -> Option<Arc<V>> {
    Cache::get(self, key)
  }

  fn put(&self, key: K, value: Arc<V>) -> Result<(), CacheError> {
    self.put_shared(key, value, Expiry::Default).map(|_| ())
  }

  #[inline]
  fn remove(&self, key: &K) -> Option<Arc<V>> {
    Cache::remove(self, key)
  }

  #[inline]
  fn lock(&self, key: &K, owner: LockOwner, wait: Duration) -> bool {
    Cache::lock(self, key, owner, wait)
  }

  #[inline]
  fn unlock(&self, key: &K, owner: LockOwner) -> bool {
    Cache::unlock(self, key, owner)
  }
}
