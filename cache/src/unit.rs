//! Pluggable weighing of cache entries.

/// Computes the number of raw units an entry occupies.
///
/// The result must be non-negative; a negative value makes the write that
/// triggered the calculation fail with [`CacheError::InvalidState`].
///
/// Any `Fn(&K, &V) -> i64` closure is a calculator.
///
/// [`CacheError::InvalidState`]: crate::CacheError::InvalidState
pub trait UnitCalculator<K, V>: Send + Sync {
  fn units(&self, key: &K, value: &V) -> i64;
}

/// Weighs every entry as a single unit, so capacity is an entry count.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedUnits;

impl<K, V> UnitCalculator<K, V> for FixedUnits {
  #[inline]
  fn units(&self, _key: &K, _value: &V) -> i64 {
    1
  }
}

impl<K, V, F> UnitCalculator<K, V> for F
where
  F: Fn(&K, &V) -> i64 + Send + Sync,
{
  #[inline]
  fn units(&self, key: &K, value: &V) -> i64 {
    self(key, value)
  }
}
