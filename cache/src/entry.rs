use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A container for a value in the cache, holding its weight and expiry.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  value: Arc<V>,
  /// Raw units reported by the unit calculator. Rewritten in place when the
  /// calculator is replaced.
  weight: AtomicU64,
  /// Absolute expiry in clock milliseconds. 0 means the entry never expires.
  expires_at: u64,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, weight: u64, expires_at: u64) -> Self {
    Self {
      value,
      weight: AtomicU64::new(weight),
      expires_at,
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn value_ref(&self) -> &Arc<V> {
    &self.value
  }

  #[inline]
  pub(crate) fn weight(&self) -> u64 {
    self.weight.load(Ordering::Relaxed)
  }

  /// Stores a new weight and returns the previous one.
  #[inline]
  pub(crate) fn swap_weight(&self, weight: u64) -> u64 {
    self.weight.swap(weight, Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn expires_at(&self) -> u64 {
    self.expires_at
  }

  #[inline]
  pub(crate) fn is_expired(&self, now: u64) -> bool {
    self.expires_at > 0 && now >= self.expires_at
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zero_expiry_never_expires() {
    let entry = CacheEntry::new(Arc::new("v"), 1, 0);
    assert!(!entry.is_expired(u64::MAX));
  }

  #[test]
  fn test_expiry_boundary_and_reweigh() {
    let entry = CacheEntry::new(Arc::new("v"), 1, 500);
    assert!(!entry.is_expired(499));
    assert!(entry.is_expired(500));

    assert_eq!(entry.swap_weight(7), 1);
    assert_eq!(entry.weight(), 7);
  }
}
