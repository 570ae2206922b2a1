use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::listener::{CacheEvent, EventDispatcher};
use crate::lock::LockTable;
use crate::policy::CachePolicy;
use crate::stats::CacheStatistics;
use crate::store::ShardedStore;
use crate::task::janitor::Janitor;
use crate::time::{Clock, Expiry};
use crate::unit::UnitCalculator;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

/// The decision a write closure hands back to [`CacheShared::mutate`].
pub(crate) enum Mutation<V> {
  Keep,
  /// Store a value, weighing it under the shard lock.
  Put(Arc<V>, Expiry),
  /// Store a value weighed beforehand by [`CacheShared::preweigh`].
  Preweighed(Arc<V>, u64, u64, Expiry),
  Remove,
  // Internal: a put whose weight is final.
  Weighed(Arc<V>, u64, Expiry),
}

/// Events gathered while a shard is write-locked, delivered by
/// [`CacheShared::deliver`].
pub(crate) struct Outbox<K, V> {
  enabled: bool,
  events: Vec<CacheEvent<K, V>>,
}

impl<K, V> Outbox<K, V> {
  #[inline]
  pub(crate) fn push_with(&mut self, build: impl FnOnce() -> CacheEvent<K, V>) {
    if self.enabled {
      self.events.push(build());
    }
  }
}

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) listeners: EventDispatcher<K, V>,
  pub(crate) stats: CacheStatistics,
  pub(crate) policy: Box<dyn CachePolicy<K>>,
  pub(crate) calculator: RwLock<Arc<dyn UnitCalculator<K, V>>>,
  // Bumped on every calculator swap; invalidates weights taken before it.
  calculator_generation: AtomicU64,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) locks: LockTable<K, H>,
  // Raw units of every stored entry, expired or not.
  units: CachePadded<AtomicU64>,
  // Stored entries carrying an expiry time; lets sweeps skip immortal caches.
  expiring: AtomicUsize,
  pub(crate) high_units: AtomicI64,
  pub(crate) unit_factor: AtomicI64,
  pub(crate) expiry_delay_millis: AtomicI64,
  // Serializes configuration changes that must see a stable cache.
  pub(crate) config_lock: Mutex<()>,
  eviction_lock: Mutex<()>,
  pub(crate) janitor: Mutex<Option<Janitor>>,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("store", &self.store)
      .field("raw_units", &self.units.load(Ordering::Relaxed))
      .field("high_units", &self.high_units.load(Ordering::Relaxed))
      .field("unit_factor", &self.unit_factor.load(Ordering::Relaxed))
      .field("listeners", &self.listeners)
      .field("stats", &self.stats.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Drop for CacheShared<K, V, H> {
  fn drop(&mut self) {
    if let Some(janitor) = self.janitor.get_mut().take() {
      janitor.stop();
    }
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    store: ShardedStore<K, V, H>,
    listeners: EventDispatcher<K, V>,
    policy: Box<dyn CachePolicy<K>>,
    calculator: Arc<dyn UnitCalculator<K, V>>,
    clock: Arc<dyn Clock>,
    locks: LockTable<K, H>,
    high_units: i64,
    unit_factor: i64,
    expiry_delay_millis: i64,
  ) -> Self {
    Self {
      store,
      listeners,
      stats: CacheStatistics::new(),
      policy,
      calculator: RwLock::new(calculator),
      calculator_generation: AtomicU64::new(0),
      clock,
      locks,
      units: CachePadded::new(AtomicU64::new(0)),
      expiring: AtomicUsize::new(0),
      high_units: AtomicI64::new(high_units),
      unit_factor: AtomicI64::new(unit_factor),
      expiry_delay_millis: AtomicI64::new(expiry_delay_millis),
      config_lock: Mutex::new(()),
      eviction_lock: Mutex::new(()),
      janitor: Mutex::new(None),
    }
  }

  #[inline]
  pub(crate) fn now(&self) -> u64 {
    self.clock.now_millis()
  }

  #[inline]
  pub(crate) fn raw_units(&self) -> u64 {
    self.units.load(Ordering::Acquire)
  }

  /// The raw unit budget, `high_units * unit_factor`.
  pub(crate) fn raw_capacity(&self) -> u64 {
    let high = self.high_units.load(Ordering::Acquire);
    if high == i64::MAX {
      return u64::MAX;
    }
    let factor = self.unit_factor.load(Ordering::Acquire).max(1) as u64;
    (high.max(0) as u64).saturating_mul(factor)
  }

  pub(crate) fn weigh(&self, key: &K, value: &V) -> Result<u64, CacheError> {
    let units = self.calculator.read().units(key, value);
    u64::try_from(units)
      .map_err(|_| CacheError::invalid_state(format!("unit calculator returned {units} units")))
  }

  fn deadline(&self, expiry: Expiry, now: u64) -> u64 {
    let delay = self.expiry_delay_millis.load(Ordering::Relaxed).max(0) as u64;
    expiry.deadline(now, delay)
  }

  // Account for an entry entering the store. Caller holds its shard lock.
  fn admit(&self, entry: &CacheEntry<V>) {
    self.units.fetch_add(entry.weight(), Ordering::AcqRel);
    if entry.expires_at() > 0 {
      self.expiring.fetch_add(1, Ordering::AcqRel);
    }
  }

  // Account for an entry leaving the store. Caller holds its shard lock.
  pub(crate) fn release(&self, entry: &CacheEntry<V>) {
    self.units.fetch_sub(entry.weight(), Ordering::AcqRel);
    if entry.expires_at() > 0 {
      self.expiring.fetch_sub(1, Ordering::AcqRel);
    }
  }

  /// Adjusts the unit total after an entry's weight was rewritten in place.
  pub(crate) fn reweighed(&self, old: u64, new: u64) {
    if new >= old {
      self.units.fetch_add(new - old, Ordering::AcqRel);
    } else {
      self.units.fetch_sub(old - new, Ordering::AcqRel);
    }
  }

  /// A fresh outbox that collects events only when someone is listening.
  #[inline]
  pub(crate) fn outbox(&self) -> Outbox<K, V> {
    Outbox {
      enabled: !self.listeners.is_empty(),
      events: Vec::new(),
    }
  }

  /// Fires the events gathered under `guard`.
  ///
  /// The write guard is downgraded first: other writers to the shard stay
  /// excluded until delivery ends, which keeps events for a key in mutation
  /// order, while readers proceed and listeners may read the cache.
  pub(crate) fn deliver<T>(&self, guard: RwLockWriteGuard<'_, T>, outbox: Outbox<K, V>) {
    if outbox.events.is_empty() {
      return;
    }
    let _shared = RwLockWriteGuard::downgrade(guard);
    for event in &outbox.events {
      self.listeners.fire(event);
    }
  }

  /// Weighs `value` outside any shard lock, tagging the result with the
  /// calculator generation it was computed under.
  pub(crate) fn preweigh(&self, key: &K, value: &V) -> Result<(u64, u64), CacheError> {
    let generation = self.calculator_generation.load(Ordering::Acquire);
    let units = self.weigh(key, value)?;
    Ok((units, generation))
  }

  /// Runs a read-modify-write of `key` under its shard write lock.
  ///
  /// `decide` sees the live value (an expired one reads as absent) and
  /// returns the mutation to apply plus the caller's result. The new value is
  /// weighed before anything changes, so a rejected weight leaves the cache
  /// untouched. An expired entry is then purged, the mutation applied, and
  /// the resulting events fired under the downgraded shard lock. A successful
  /// put is followed by a capacity check.
  pub(crate) fn mutate<R, F>(&self, key: K, decide: F) -> Result<R, CacheError>
  where
    F: FnOnce(Option<&Arc<V>>) -> Result<(Mutation<V>, R), CacheError>,
  {
    let start = Instant::now();
    let now = self.now();
    let shard = self.store.shard(&key);
    let mut map = shard.write();

    let stale = map.get(&key).is_some_and(|entry| entry.is_expired(now));
    let current = if stale {
      None
    } else {
      map.get(&key).map(|entry| entry.value())
    };
    let (mutation, result) = decide(current.as_ref())?;

    let mutation = match mutation {
      Mutation::Put(value, expiry) => {
        let units = self.weigh(&key, &value)?;
        Mutation::Weighed(value, units, expiry)
      }
      Mutation::Preweighed(value, units, generation, expiry) => {
        if generation == self.calculator_generation.load(Ordering::Acquire) {
          Mutation::Weighed(value, units, expiry)
        } else {
          // The calculator was replaced since the value was weighed.
          let units = self.weigh(&key, &value)?;
          Mutation::Weighed(value, units, expiry)
        }
      }
      other => other,
    };

    let mut outbox = self.outbox();
    if stale {
      if let Some(expired) = map.remove(&key) {
        self.release(&expired);
        self.policy.on_remove(&key);
        self.stats.register_expirations(1);
        outbox.push_with(|| CacheEvent::evicted(key.clone(), expired.value(), true));
      }
    }

    let wrote = match mutation {
      Mutation::Weighed(value, units, expiry) => {
        let entry = CacheEntry::new(value.clone(), units, self.deadline(expiry, now));
        self.admit(&entry);
        let previous = map.insert(key.clone(), entry);
        if let Some(previous) = &previous {
          self.release(previous);
        }
        self.policy.on_write(&key);
        outbox.push_with(|| match previous {
          Some(previous) => CacheEvent::updated(key, previous.value(), value),
          None => CacheEvent::inserted(key, value),
        });
        true
      }
      Mutation::Remove => {
        if let Some(removed) = map.remove(&key) {
          self.release(&removed);
          self.policy.on_remove(&key);
          outbox.push_with(|| CacheEvent::deleted(key, removed.value()));
        }
        false
      }
      _ => false,
    };
    self.deliver(map, outbox);

    if wrote {
      self.stats.register_put(start.elapsed());
      self.enforce_capacity();
    }
    Ok(result)
  }

  /// Removes `key` as an eviction: one synthetic delete flagged `expired`.
  pub(crate) fn evict_key(&self, key: &K) -> bool {
    let shard = self.store.shard(key);
    let mut map = shard.write();
    let Some(entry) = map.remove(key) else {
      return false;
    };
    self.release(&entry);
    self.policy.on_remove(key);
    self.stats.register_expirations(1);
    let mut outbox = self.outbox();
    outbox.push_with(|| CacheEvent::evicted(key.clone(), entry.value(), true));
    self.deliver(map, outbox);
    true
  }

  /// Removes every entry, firing a non-synthetic delete for each.
  pub(crate) fn clear(&self) {
    for shard in self.store.iter_shards() {
      let mut map = shard.write();
      let mut outbox = self.outbox();
      for (key, entry) in map.drain() {
        self.release(&entry);
        self.policy.on_remove(&key);
        outbox.push_with(|| CacheEvent::deleted(key, entry.value()));
      }
      self.deliver(map, outbox);
    }
  }

  /// Removes every expired entry, one shard at a time.
  pub(crate) fn sweep_expired(&self) -> usize {
    if self.expiring.load(Ordering::Acquire) == 0 {
      return 0;
    }

    let now = self.now();
    let mut removed = 0usize;
    for shard in self.store.iter_shards() {
      let mut map = shard.write();
      let mut outbox = self.outbox();
      map.retain(|key, entry| {
        if !entry.is_expired(now) {
          return true;
        }
        self.release(entry);
        self.policy.on_remove(key);
        outbox.push_with(|| CacheEvent::evicted(key.clone(), entry.value(), true));
        removed += 1;
        false
      });
      self.deliver(map, outbox);
    }

    if removed > 0 {
      self.stats.register_expirations(removed as u64);
      debug!(removed, "swept expired cache entries");
    }
    removed
  }

  /// Brings the cache back under its high units: expired entries go first,
  /// then victims chosen by the eviction policy. Holds at most one shard lock
  /// at a time.
  pub(crate) fn enforce_capacity(&self) {
    let capacity = self.raw_capacity();
    if self.raw_units() <= capacity {
      return;
    }

    let _evicting = self.eviction_lock.lock();
    // Re-read under the lock, another evictor may have finished the job.
    let capacity = self.raw_capacity();
    if self.raw_units() <= capacity {
      return;
    }

    let expired = self.sweep_expired();
    let mut evicted = 0u64;
    while self.raw_units() > capacity {
      let Some(key) = self.policy.victim() else {
        warn!(
          raw_units = self.raw_units(),
          capacity, "eviction policy ran out of victims above capacity"
        );
        break;
      };

      let shard = self.store.shard(&key);
      let mut map = shard.write();
      if let Some(entry) = map.remove(&key) {
        self.release(&entry);
        // The key may have been written again since the policy let go of it.
        self.policy.on_remove(&key);
        let mut outbox = self.outbox();
        outbox.push_with(|| CacheEvent::evicted(key, entry.value(), false));
        self.deliver(map, outbox);
        evicted += 1;
      }
    }

    if evicted > 0 {
      self.stats.register_evictions(evicted);
    }
    debug!(expired, evicted, raw_units = self.raw_units(), capacity, "enforced cache capacity");
  }

  /// Installs a new calculator and re-weighs every entry, without events.
  ///
  /// All current entries are weighed with `calculator` first; if any comes
  /// out negative the cache is left untouched.
  pub(crate) fn replace_calculator(&self, calculator: Arc<dyn UnitCalculator<K, V>>) -> Result<(), CacheError> {
    let _config = self.config_lock.lock();

    for shard in self.store.iter_shards() {
      let map = shard.read();
      for (key, entry) in map.iter() {
        let units = calculator.units(key, entry.value_ref());
        if units < 0 {
          return Err(CacheError::invalid_state(format!(
            "unit calculator returned {units} units for an existing entry"
          )));
        }
      }
    }

    *self.calculator.write() = calculator.clone();
    self.calculator_generation.fetch_add(1, Ordering::AcqRel);

    let mut changed = 0usize;
    for shard in self.store.iter_shards() {
      let map = shard.write();
      for (key, entry) in map.iter() {
        let units = calculator.units(key, entry.value_ref());
        let Ok(units) = u64::try_from(units) else {
          // Written between validation and the swap; keeps its old weight.
          warn!(units, "unit calculator returned negative units while re-weighing");
          continue;
        };
        let old = entry.swap_weight(units);
        if old != units {
          self.reweighed(old, units);
          changed += 1;
        }
      }
    }
    debug!(changed, raw_units = self.raw_units(), "re-weighed cache entries");
    drop(_config);

    self.enforce_capacity();
    Ok(())
  }
}
