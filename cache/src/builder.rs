use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::handles::Cache;
use crate::listener::{EventDispatcher, EventFilter, MapListener};
use crate::lock::LockTable;
use crate::policy::{CachePolicy, EvictionKind};
use crate::shared::CacheShared;
use crate::store::ShardedStore;
use crate::task::janitor::Janitor;
use crate::time::{Clock, SystemClock};
use crate::unit::{FixedUnits, UnitCalculator};

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

type Subscription<K, V> = (Arc<dyn MapListener<K, V>>, EventFilter<K, V>, bool);

/// A builder for creating `Cache` instances.
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  high_units: i64,
  unit_factor: i64,
  expiry_delay_millis: i64,
  shards: usize,
  hasher: H,
  eviction: EvictionKind,
  cache_policy: Option<Box<dyn CachePolicy<K>>>,
  unit_calculator: Option<Arc<dyn UnitCalculator<K, V>>>,
  listeners: Vec<Subscription<K, V>>,
  clock: Option<Arc<dyn Clock>>,
  lock_lease: Option<Duration>,
  janitor_interval: Option<Duration>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("high_units", &self.high_units)
      .field("unit_factor", &self.unit_factor)
      .field("expiry_delay_millis", &self.expiry_delay_millis)
      .field("shards", &self.shards)
      .field("eviction", &self.eviction)
      .field("has_custom_policy", &self.cache_policy.is_some())
      .field("listeners", &self.listeners.len())
      .field("janitor_interval", &self.janitor_interval)
      .finish_non_exhaustive()
  }
}

fn default_shards() -> usize {
  (num_cpus::get() * 4).max(1).next_power_of_two()
}

// --- General Configuration Methods ---
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Creates a builder that hashes keys with `hasher`.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      high_units: 0,
      unit_factor: 1,
      expiry_delay_millis: 0,
      shards: default_shards(),
      hasher,
      eviction: EvictionKind::default(),
      cache_policy: None,
      unit_calculator: None,
      listeners: Vec::new(),
      clock: None,
      lock_lease: None,
      janitor_interval: None,
    }
  }

  /// Sets the capacity in external units. `0` (the default) leaves the cache
  /// unbounded.
  pub fn high_units(mut self, high_units: i64) -> Self {
    self.high_units = high_units;
    self
  }

  /// Sets the number of raw units that make one external unit.
  pub fn unit_factor(mut self, unit_factor: i64) -> Self {
    self.unit_factor = unit_factor;
    self
  }

  /// Sets the default time-to-live for entries written with
  /// [`Expiry::Default`](crate::Expiry::Default). `0` means never.
  pub fn expiry_delay_millis(mut self, millis: i64) -> Self {
    self.expiry_delay_millis = millis;
    self
  }

  /// Sets the default time-to-live from a `Duration`.
  pub fn expiry_delay(mut self, delay: Duration) -> Self {
    self.expiry_delay_millis = delay.as_millis().min(i64::MAX as u128) as i64;
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    // Ensure shards is at least 1 and a power of two for fast bitwise ANDing.
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Selects one of the built-in eviction policies. LRU is the default.
  pub fn eviction(mut self, eviction: EvictionKind) -> Self {
    self.eviction = eviction;
    self
  }

  /// Sets a custom eviction policy, overriding [`eviction`](Self::eviction).
  pub fn cache_policy<Policy>(mut self, policy: Policy) -> Self
  where
    Policy: CachePolicy<K> + 'static,
  {
    self.cache_policy = Some(Box::new(policy));
    self
  }

  /// Sets how entries are weighed. Defaults to one unit per entry.
  pub fn unit_calculator<Calc>(mut self, calculator: Calc) -> Self
  where
    Calc: UnitCalculator<K, V> + 'static,
  {
    self.unit_calculator = Some(Arc::new(calculator));
    self
  }

  /// Registers a listener that is in place before the first write.
  pub fn listener(mut self, listener: Arc<dyn MapListener<K, V>>, filter: EventFilter<K, V>, lite: bool) -> Self {
    self.listeners.push((listener, filter, lite));
    self
  }

  /// Sets the clock used for expiry and lock leases.
  pub fn clock<C>(mut self, clock: C) -> Self
  where
    C: Clock + 'static,
  {
    self.clock = Some(Arc::new(clock));
    self
  }

  /// Makes key locks lapse after `lease` on the cache clock.
  pub fn lock_lease(mut self, lease: Duration) -> Self {
    self.lock_lease = Some(lease);
    self
  }

  /// Runs a background janitor that sweeps expired entries every `interval`.
  pub fn janitor_interval(mut self, interval: Duration) -> Self {
    self.janitor_interval = Some(interval);
    self
  }

  /// Applies every field of `config`.
  pub fn config(mut self, config: &CacheConfig) -> Self {
    self.high_units = config.high_units;
    self.unit_factor = config.unit_factor;
    self.expiry_delay_millis = config.expiry_delay_millis;
    if let Some(shards) = config.shards {
      self = self.shards(shards);
    }
    self.janitor_interval = config.janitor_interval_millis.map(Duration::from_millis);
    self.lock_lease = config.lock_lease_millis.map(Duration::from_millis);
    self.eviction = config.eviction;
    self
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self::with_hasher(H::default())
  }

  /// Creates a builder from a configuration.
  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new().config(config)
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
// This impl block contains the full set of trait bounds required to actually
// construct the cache, including the `'static` bounds for the janitor.
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds a `Cache`.
  pub fn build(self) -> Result<Cache<K, V, H>, CacheError> {
    self.validate()?;

    let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
    let store = ShardedStore::new(self.shards, self.hasher.clone());
    let locks = LockTable::new(self.shards, self.hasher, clock.clone(), self.lock_lease);

    let listeners = EventDispatcher::new();
    for (listener, filter, lite) in self.listeners {
      listeners.subscribe(listener, filter, lite);
    }

    let policy = self.cache_policy.unwrap_or_else(|| self.eviction.build());
    let calculator = self.unit_calculator.unwrap_or_else(|| Arc::new(FixedUnits));
    let high_units = if self.high_units == 0 {
      i64::MAX
    } else {
      self.high_units
    };

    let shared = Arc::new(CacheShared::new(
      store,
      listeners,
      policy,
      calculator,
      clock,
      locks,
      high_units,
      self.unit_factor,
      self.expiry_delay_millis,
    ));

    if let Some(interval) = self.janitor_interval {
      *shared.janitor.lock() = Some(Janitor::spawn(Arc::downgrade(&shared), interval));
    }

    debug!(
      shards = self.shards,
      high_units,
      unit_factor = self.unit_factor,
      eviction = ?self.eviction,
      "built cache"
    );
    Ok(Cache { shared })
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), CacheError> {
    if self.high_units < 0 {
      return Err(CacheError::invalid_argument(format!(
        "negative high units: {}",
        self.high_units
      )));
    }
    if self.unit_factor <= 0 {
      return Err(CacheError::invalid_argument(format!(
        "unit factor must be positive: {}",
        self.unit_factor
      )));
    }
    if self.expiry_delay_millis < 0 {
      return Err(CacheError::invalid_argument(format!(
        "negative expiry delay: {}ms",
        self.expiry_delay_millis
      )));
    }
    if let Some(interval) = self.janitor_interval {
      if interval.is_zero() {
        return Err(CacheError::invalid_argument("janitor interval must be non-zero"));
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejects_invalid_settings() {
    let err = CacheBuilder::<u32, u32>::new().high_units(-1).build().unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));

    let err = CacheBuilder::<u32, u32>::new().unit_factor(0).build().unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));

    let err = CacheBuilder::<u32, u32>::new()
      .expiry_delay_millis(-5)
      .build()
      .unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));
  }

  #[test]
  fn test_zero_high_units_is_unbounded() {
    let cache = CacheBuilder::<u32, u32>::new().build().unwrap();
    assert_eq!(cache.high_units(), i64::MAX);
  }

  #[test]
  fn test_shards_round_up_to_power_of_two() {
    let builder = CacheBuilder::<u32, u32>::new().shards(6);
    assert_eq!(builder.shards, 8);
    let builder = CacheBuilder::<u32, u32>::new().shards(0);
    assert_eq!(builder.shards, 1);
  }

  #[test]
  fn test_from_config() {
    let config = CacheConfig {
      high_units: 10,
      unit_factor: 2,
      shards: Some(3),
      eviction: EvictionKind::Fifo,
      ..CacheConfig::default()
    };
    let cache = CacheBuilder::<u32, u32>::from_config(&config).build().unwrap();
    assert_eq!(cache.high_units(), 10);
    assert_eq!(cache.unit_factor(), 2);
    assert_eq!(cache.shared.store.num_shards(), 4);
  }
}
