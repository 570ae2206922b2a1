use crate::error::CacheError;
use crate::iter::{EntriesView, Iter, KeysView, ValuesView, DEFAULT_ITER_BATCH_SIZE};
use crate::listener::{EventFilter, MapListener};
use crate::lock::LockOwner;
use crate::shared::{CacheShared, Mutation};
use crate::stats::CacheStatistics;
use crate::time::Expiry;
use crate::unit::{FixedUnits, UnitCalculator};

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

/// A thread-safe, weight-bounded cache with expiry and change events.
///
/// Values are stored as `Arc<V>`; reads hand out clones of the `Arc`.
/// Cloning a `Cache` is cheap and yields another handle to the same cache.
#[derive(Debug)]
pub struct Cache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for Cache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

/// A point-in-time copy of a single entry, read without touching statistics.
#[derive(Debug, Clone)]
pub struct EntryView<K, V> {
  key: K,
  value: Arc<V>,
  units: u64,
  expires_at: u64,
}

impl<K, V> EntryView<K, V> {
  pub fn key(&self) -> &K {
    &self.key
  }

  pub fn value(&self) -> &Arc<V> {
    &self.value
  }

  /// Raw units reported by the unit calculator.
  pub fn units(&self) -> u64 {
    self.units
  }

  /// Absolute expiry on the cache clock in milliseconds, `0` if the entry
  /// never expires.
  pub fn expires_at(&self) -> u64 {
    self.expires_at
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  // --- Reads ---

  /// Retrieves a value from the cache.
  ///
  /// An expired entry is reported as absent; it is left for the next write,
  /// sweep or capacity check to remove, and no event fires here.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    let start = Instant::now();
    let now = self.shared.now();
    let found = {
      let map = self.shared.store.shard(key).read_recursive();
      map
        .get(key)
        .filter(|entry| !entry.is_expired(now))
        .map(|entry| entry.value())
    };

    match found {
      Some(value) => {
        self.shared.policy.on_read(key);
        self.shared.stats.register_hits(1, start.elapsed());
        Some(value)
      }
      None => {
        self.shared.stats.register_misses(1, start.elapsed());
        None
      }
    }
  }

  /// Looks up several keys at once. Only live entries are returned; hits and
  /// misses are registered once for the whole batch.
  pub fn get_all<'k>(&self, keys: impl IntoIterator<Item = &'k K>) -> HashMap<K, Arc<V>>
  where
    K: 'k,
  {
    let start = Instant::now();
    let now = self.shared.now();
    let mut found = HashMap::new();
    let mut misses = 0u64;

    for key in keys {
      let value = {
        let map = self.shared.store.shard(key).read_recursive();
        map
          .get(key)
          .filter(|entry| !entry.is_expired(now))
          .map(|entry| entry.value())
      };
      match value {
        Some(value) => {
          self.shared.policy.on_read(key);
          found.insert(key.clone(), value);
        }
        None => misses += 1,
      }
    }

    let elapsed = start.elapsed();
    if !found.is_empty() {
      self.shared.stats.register_hits(found.len() as u64, elapsed);
    }
    if misses > 0 {
      self.shared.stats.register_misses(misses, elapsed);
    }
    found
  }

  /// Returns a copy of the live entry for `key`, including its units and
  /// expiry. Does not count as a hit or miss.
  pub fn cache_entry(&self, key: &K) -> Option<EntryView<K, V>> {
    let now = self.shared.now();
    let map = self.shared.store.shard(key).read_recursive();
    map
      .get(key)
      .filter(|entry| !entry.is_expired(now))
      .map(|entry| EntryView {
        key: key.clone(),
        value: entry.value(),
        units: entry.weight(),
        expires_at: entry.expires_at(),
      })
  }

  pub fn contains_key(&self, key: &K) -> bool {
    let now = self.shared.now();
    let map = self.shared.store.shard(key).read_recursive();
    map.get(key).is_some_and(|entry| !entry.is_expired(now))
  }

  pub fn contains_value(&self, value: &V) -> bool
  where
    V: PartialEq,
  {
    let now = self.shared.now();
    self.shared.store.iter_shards().any(|shard| {
      shard
        .read_recursive()
        .values()
        .any(|entry| !entry.is_expired(now) && **entry.value_ref() == *value)
    })
  }

  /// Returns the number of live entries.
  pub fn len(&self) -> usize {
    let now = self.shared.now();
    self
      .shared
      .store
      .iter_shards()
      .map(|shard| shard.read_recursive().values().filter(|entry| !entry.is_expired(now)).count())
      .sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  // --- Writes ---

  /// Stores `value` under `key` and returns the previous live value.
  ///
  /// Fires an insert or update event, then evicts down to the high units if
  /// the write pushed the cache over. Fails with `InvalidState` if the unit
  /// calculator weighs the entry negative, in which case nothing changes.
  pub fn put(&self, key: K, value: V, expiry: Expiry) -> Result<Option<Arc<V>>, CacheError> {
    self.put_shared(key, Arc::new(value), expiry)
  }

  /// Like [`put`](Self::put) with a millisecond time-to-live, where
  /// [`EXPIRY_DEFAULT`](crate::EXPIRY_DEFAULT) uses the cache's expiry delay
  /// and [`EXPIRY_NEVER`](crate::EXPIRY_NEVER) disables expiry.
  pub fn put_millis(&self, key: K, value: V, ttl_millis: i64) -> Result<Option<Arc<V>>, CacheError> {
    let expiry = Expiry::from_millis(ttl_millis)?;
    self.put(key, value, expiry)
  }

  /// Stores an already shared value.
  pub fn put_shared(&self, key: K, value: Arc<V>, expiry: Expiry) -> Result<Option<Arc<V>>, CacheError> {
    let (units, generation) = self.shared.preweigh(&key, &value)?;
    self.shared.mutate(key, move |current| {
      Ok((Mutation::Preweighed(value, units, generation, expiry), current.cloned()))
    })
  }

  /// Stores every pair with the same `expiry`, in iteration order.
  ///
  /// Stops at the first rejected value and returns its error; the pairs
  /// before it stay stored.
  pub fn put_all<I>(&self, entries: I, expiry: Expiry) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = (K, V)>,
  {
    for (key, value) in entries {
      self.put(key, value, expiry)?;
    }
    Ok(())
  }

  /// Stores `value` only if no live entry exists. Returns the existing value
  /// when there was one.
  pub fn put_if_absent(&self, key: K, value: V, expiry: Expiry) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.mutate(key, move |current| match current {
      Some(existing) => Ok((Mutation::Keep, Some(existing.clone()))),
      None => Ok((Mutation::Put(Arc::new(value), expiry), None)),
    })
  }

  /// Replaces the value of an existing live entry. Returns the old value, or
  /// `None` if the key was absent and nothing was stored.
  pub fn replace(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.mutate(key, move |current| match current {
      Some(existing) => Ok((Mutation::Put(Arc::new(value), Expiry::Default), Some(existing.clone()))),
      None => Ok((Mutation::Keep, None)),
    })
  }

  /// Replaces the value only if the current one equals `expected`.
  pub fn replace_if(&self, key: K, expected: &V, value: V) -> Result<bool, CacheError>
  where
    V: PartialEq,
  {
    self.shared.mutate(key, move |current| match current {
      Some(existing) if **existing == *expected => {
        Ok((Mutation::Put(Arc::new(value), Expiry::Default), true))
      }
      _ => Ok((Mutation::Keep, false)),
    })
  }

  /// Computes a new value from the current one. Returning `None` removes the
  /// entry. The closure runs under the key's shard lock and must not touch
  /// the cache.
  pub fn compute<F>(&self, key: K, remap: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&K, Option<&V>) -> Option<V>,
  {
    let target = key.clone();
    self.shared.mutate(key, move |current| {
      match remap(&target, current.map(|value| &**value)) {
        Some(value) => {
          let value = Arc::new(value);
          Ok((Mutation::Put(value.clone(), Expiry::Default), Some(value)))
        }
        None if current.is_some() => Ok((Mutation::Remove, None)),
        None => Ok((Mutation::Keep, None)),
      }
    })
  }

  /// Like [`compute`](Self::compute), but only runs `remap` when a live
  /// entry exists. Returning `None` removes it.
  pub fn compute_if_present<F>(&self, key: K, remap: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&K, &V) -> Option<V>,
  {
    let target = key.clone();
    self.shared.mutate(key, move |current| {
      let Some(existing) = current else {
        return Ok((Mutation::Keep, None));
      };
      match remap(&target, &**existing) {
        Some(value) => {
          let value = Arc::new(value);
          Ok((Mutation::Put(value.clone(), Expiry::Default), Some(value)))
        }
        None => Ok((Mutation::Remove, None)),
      }
    })
  }

  /// Stores `value` if `key` is absent; otherwise stores what `combine`
  /// makes of the existing value and `value`, removing the entry when it
  /// returns `None`. Returns the value now stored.
  pub fn merge<F>(&self, key: K, value: V, combine: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&V, V) -> Option<V>,
  {
    self.shared.mutate(key, move |current| {
      let merged = match current {
        None => Some(value),
        Some(existing) => combine(&**existing, value),
      };
      match merged {
        Some(merged) => {
          let merged = Arc::new(merged);
          Ok((Mutation::Put(merged.clone(), Expiry::Default), Some(merged)))
        }
        None if current.is_some() => Ok((Mutation::Remove, None)),
        None => Ok((Mutation::Keep, None)),
      }
    })
  }

  /// Replaces the value of every live entry with `remap(key, value)` and
  /// returns how many were replaced.
  ///
  /// Keys are gathered one shard at a time; `remap` then sees each entry's
  /// value at the moment it is replaced. Stops at the first rejected value.
  pub fn replace_all<F>(&self, mut remap: F) -> Result<usize, CacheError>
  where
    F: FnMut(&K, &V) -> V,
  {
    let mut replaced = 0;
    for index in 0..self.shared.store.num_shards() {
      let now = self.shared.now();
      let keys: Vec<K> = {
        let map = self.shared.store.shard_at(index).read_recursive();
        map
          .iter()
          .filter(|(_, entry)| !entry.is_expired(now))
          .map(|(key, _)| key.clone())
          .collect()
      };

      for key in keys {
        let target = key.clone();
        let remap = &mut remap;
        let hit = self.shared.mutate(key, move |current| match current {
          Some(existing) => Ok((Mutation::Put(Arc::new((*remap)(&target, &**existing)), Expiry::Default), true)),
          None => Ok((Mutation::Keep, false)),
        })?;
        if hit {
          replaced += 1;
        }
      }
    }
    Ok(replaced)
  }

  /// Returns the live value for `key`, inserting the result of `init` if
  /// there is none. `init` runs at most once, under the key's shard lock.
  pub fn get_or_insert_with<F>(&self, key: K, init: F) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce() -> V,
  {
    if let Some(value) = self.get(&key) {
      return Ok(value);
    }
    self.shared.mutate(key, move |current| match current {
      Some(existing) => Ok((Mutation::Keep, existing.clone())),
      None => {
        let value = Arc::new(init());
        Ok((Mutation::Put(value.clone(), Expiry::Default), value))
      }
    })
  }

  // --- Removal ---

  /// Removes `key` and returns its live value, firing a delete event. An
  /// entry found expired is purged as an eviction and `None` is returned.
  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    let removed = self.shared.mutate(key.clone(), |current| {
      Ok((Mutation::Remove, current.cloned()))
    });
    removed.ok().flatten()
  }

  /// Removes `key` only if its value equals `expected`.
  pub fn remove_if_equal(&self, key: &K, expected: &V) -> bool
  where
    V: PartialEq,
  {
    let removed = self.shared.mutate(key.clone(), |current| match current {
      Some(existing) if **existing == *expected => Ok((Mutation::Remove, true)),
      _ => Ok((Mutation::Keep, false)),
    });
    removed.unwrap_or(false)
  }

  /// Removes every live entry accepted by `predicate` and returns how many
  /// were removed.
  ///
  /// Each shard is snapshotted and the predicate runs without any lock held.
  /// An entry changed after its shard was snapshotted is left alone.
  pub fn remove_if<F>(&self, mut predicate: F) -> usize
  where
    F: FnMut(&K, &V) -> bool,
  {
    let mut removed = 0;
    for index in 0..self.shared.store.num_shards() {
      let now = self.shared.now();
      let candidates: Vec<(K, Arc<V>)> = {
        let map = self.shared.store.shard_at(index).read_recursive();
        map
          .iter()
          .filter(|(_, entry)| !entry.is_expired(now))
          .map(|(key, entry)| (key.clone(), entry.value()))
          .collect()
      };

      for (key, seen) in candidates {
        if !predicate(&key, &seen) {
          continue;
        }
        let outcome = self.shared.mutate(key, |current| match current {
          Some(existing) if Arc::ptr_eq(existing, &seen) => Ok((Mutation::Remove, true)),
          _ => Ok((Mutation::Keep, false)),
        });
        if outcome.unwrap_or(false) {
          removed += 1;
        }
      }
    }
    removed
  }

  /// Removes every entry, firing a non-synthetic delete for each.
  pub fn clear(&self) {
    self.shared.clear();
  }

  // --- Expiry & eviction ---

  /// Expires and removes `key` right away, firing one synthetic delete
  /// flagged as expired. Returns `false` if there was nothing to evict.
  pub fn evict(&self, key: &K) -> bool {
    self.shared.evict_key(key)
  }

  /// Evicts each of `keys` as [`evict`](Self::evict) does and returns how many
  /// entries were evicted. To sweep every expired entry instead, use
  /// [`evict_expired`](Self::evict_expired).
  pub fn evict_all<'k>(&self, keys: impl IntoIterator<Item = &'k K>) -> usize
  where
    K: 'k,
  {
    keys.into_iter().filter(|key| self.shared.evict_key(key)).count()
  }

  /// Removes every expired entry, firing a synthetic delete for each, and
  /// returns how many were removed.
  pub fn evict_expired(&self) -> usize {
    self.shared.sweep_expired()
  }

  /// The earliest expiry time among live entries, `0` if none expires.
  pub fn next_expiry_time(&self) -> u64 {
    let now = self.shared.now();
    self
      .shared
      .store
      .iter_shards()
      .filter_map(|shard| {
        shard
          .read_recursive()
          .values()
          .map(|entry| entry.expires_at())
          .filter(|&at| at > now)
          .min()
      })
      .min()
      .unwrap_or(0)
  }

  /// The default expiry delay in milliseconds, `0` meaning never.
  pub fn expiry_delay(&self) -> i64 {
    self.shared.expiry_delay_millis.load(Ordering::Relaxed)
  }

  /// Sets the default expiry delay applied to later writes.
  pub fn set_expiry_delay(&self, millis: i64) -> Result<(), CacheError> {
    if millis < 0 {
      return Err(CacheError::invalid_argument(format!("negative expiry delay: {millis}ms")));
    }
    self.shared.expiry_delay_millis.store(millis, Ordering::Relaxed);
    Ok(())
  }

  // --- Units ---

  /// Current size in external units, `ceil(raw units / unit factor)`.
  pub fn units(&self) -> u64 {
    let factor = self.shared.unit_factor.load(Ordering::Acquire).max(1) as u64;
    self.shared.raw_units().div_ceil(factor)
  }

  /// The high units limit; `i64::MAX` when unbounded.
  pub fn high_units(&self) -> i64 {
    self.shared.high_units.load(Ordering::Acquire)
  }

  /// Sets the high units limit and evicts down to it immediately. `0` or
  /// `i64::MAX` makes the cache unbounded.
  pub fn set_high_units(&self, high_units: i64) -> Result<(), CacheError> {
    if high_units < 0 {
      return Err(CacheError::invalid_argument(format!("negative high units: {high_units}")));
    }
    let high_units = if high_units == 0 { i64::MAX } else { high_units };
    {
      let _config = self.shared.config_lock.lock();
      self.shared.high_units.store(high_units, Ordering::Release);
    }
    debug!(high_units, "set cache high units");
    self.shared.enforce_capacity();
    Ok(())
  }

  pub fn unit_factor(&self) -> i64 {
    self.shared.unit_factor.load(Ordering::Acquire)
  }

  /// Sets the divisor between raw and external units. Only allowed while the
  /// cache holds no live entries.
  pub fn set_unit_factor(&self, factor: i64) -> Result<(), CacheError> {
    if factor <= 0 {
      return Err(CacheError::invalid_argument(format!("unit factor must be positive: {factor}")));
    }
    let _config = self.shared.config_lock.lock();
    self.shared.sweep_expired();
    if self.shared.raw_units() > 0 || !self.is_empty() {
      return Err(CacheError::invalid_state("unit factor can only change while the cache is empty"));
    }
    self.shared.unit_factor.store(factor, Ordering::Release);
    Ok(())
  }

  /// Replaces the unit calculator and re-weighs every entry without firing
  /// events. `None` restores one unit per entry. If the new calculator weighs
  /// any current entry negative, the call fails and nothing changes.
  pub fn set_unit_calculator(&self, calculator: Option<Arc<dyn UnitCalculator<K, V>>>) -> Result<(), CacheError> {
    let calculator = calculator.unwrap_or_else(|| Arc::new(FixedUnits));
    self.shared.replace_calculator(calculator)
  }

  // --- Events & statistics ---

  /// Registers a listener. See [`EventDispatcher::subscribe`](crate::EventDispatcher::subscribe).
  pub fn subscribe(&self, listener: Arc<dyn MapListener<K, V>>, filter: EventFilter<K, V>, lite: bool) {
    self.shared.listeners.subscribe(listener, filter, lite);
  }

  pub fn unsubscribe(&self, listener: &Arc<dyn MapListener<K, V>>, filter: &EventFilter<K, V>) -> bool {
    self.shared.listeners.unsubscribe(listener, filter)
  }

  pub fn statistics(&self) -> &CacheStatistics {
    &self.shared.stats
  }

  // --- Key locks ---

  /// Locks `key` for `owner`, waiting up to `wait`.
  pub fn lock(&self, key: &K, owner: LockOwner, wait: Duration) -> bool {
    self.shared.locks.lock(key, owner, wait)
  }

  /// Locks `key` for `owner` without waiting.
  pub fn try_lock(&self, key: &K, owner: LockOwner) -> bool {
    self.shared.locks.lock(key, owner, Duration::ZERO)
  }

  pub fn unlock(&self, key: &K, owner: LockOwner) -> bool {
    self.shared.locks.unlock(key, owner)
  }

  pub fn is_locked(&self, key: &K) -> bool {
    self.shared.locks.is_locked(key)
  }

  pub fn lock_holder(&self, key: &K) -> Option<LockOwner> {
    self.shared.locks.holder(key)
  }

  // --- Iteration ---

  /// Returns an iterator over live `(key, value)` pairs.
  ///
  /// The iterator holds one shard lock at a time and is weakly consistent;
  /// see [`Iter`].
  pub fn iter(&self) -> Iter<'_, K, V, H> {
    Iter::new(self, DEFAULT_ITER_BATCH_SIZE)
  }

  pub fn keys(&self) -> KeysView<'_, K, V, H> {
    KeysView::new(self)
  }

  pub fn values(&self) -> ValuesView<'_, K, V, H> {
    ValuesView::new(self)
  }

  pub fn entries(&self) -> EntriesView<'_, K, V, H> {
    EntriesView::new(self)
  }
}
