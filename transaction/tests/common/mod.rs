#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tandem_cache::{Cache, CacheBuilder, CacheError, Expiry, LockOwner, ManualClock};
use tandem_txn::BackingMap;

/// An owner id no transaction will be handed in these tests.
pub const OUTSIDER: LockOwner = LockOwner(u64::MAX);

pub fn key(name: &str) -> String {
  name.to_string()
}

pub fn cache() -> Arc<Cache<String, i32>> {
  Arc::new(CacheBuilder::<String, i32>::new().build().unwrap())
}

/// A cache whose key locks lapse after `lease` on `clock`.
pub fn leased_cache(clock: &ManualClock, lease: Duration) -> Arc<Cache<String, i32>> {
  Arc::new(
    CacheBuilder::<String, i32>::new()
      .clock(clock.clone())
      .lock_lease(lease)
      .build()
      .unwrap(),
  )
}

/// Seeds `cache` with `entries`, outside of any transaction.
pub fn seed(cache: &Cache<String, i32>, entries: &[(&str, i32)]) {
  for (name, value) in entries {
    cache.put(key(name), *value, Expiry::Default).unwrap();
  }
}

pub fn value_of(cache: &Cache<String, i32>, name: &str) -> Option<i32> {
  cache.get(&key(name)).map(|value| *value)
}

/// A backing map that refuses to store one particular key.
pub struct RejectingMap {
  pub inner: Arc<Cache<String, i32>>,
  pub rejected: String,
}

impl BackingMap<String, i32> for RejectingMap {
  fn get(&self, key: &String) -> Option<Arc<i32>> {
    self.inner.get(key)
  }

  fn put(&self, key: String, value: Arc<i32>) -> Result<(), CacheError> {
    if key == self.rejected {
      return Err(CacheError::InvalidState(format!("{key} is read-only")));
    }
    BackingMap::put(&*self.inner, key, value)
  }

  fn remove(&self, key: &String) -> Option<Arc<i32>> {
    self.inner.remove(key)
  }

  fn lock(&self, key: &String, owner: LockOwner, wait: Duration) -> bool {
    self.inner.lock(key, owner, wait)
  }

  fn unlock(&self, key: &String, owner: LockOwner) -> bool {
    self.inner.unlock(key, owner)
  }
}
