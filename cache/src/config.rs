//! Plain, serializable cache settings.

use crate::policy::EvictionKind;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings for a [`CacheBuilder`](crate::CacheBuilder), loadable from any
/// serde format when the `serde` feature is on. Missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
  /// Capacity in external units. `0` or `i64::MAX` means unbounded.
  pub high_units: i64,
  /// Raw units per external unit.
  pub unit_factor: i64,
  /// Default time-to-live in milliseconds, `0` for never.
  pub expiry_delay_millis: i64,
  /// Number of shards, rounded up to a power of two. `None` picks a default
  /// from the CPU count.
  pub shards: Option<usize>,
  /// Tick of the background janitor. `None` runs no janitor.
  pub janitor_interval_millis: Option<u64>,
  /// Lease on key locks. `None` keeps locks until released.
  pub lock_lease_millis: Option<u64>,
  pub eviction: EvictionKind,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      high_units: 0,
      unit_factor: 1,
      expiry_delay_millis: 0,
      shards: None,
      janitor_interval_millis: None,
      lock_lease_millis: None,
      eviction: EvictionKind::Lru,
    }
  }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
  use super::*;

  #[test]
  fn test_partial_config_uses_defaults() {
    let config: CacheConfig =
      serde_json::from_str(r#"{ "high_units": 500, "eviction": "fifo" }"#).unwrap();
    assert_eq!(config.high_units, 500);
    assert_eq!(config.unit_factor, 1);
    assert_eq!(config.eviction, EvictionKind::Fifo);
    assert_eq!(config.janitor_interval_millis, None);
  }
}
