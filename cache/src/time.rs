use crate::error::CacheError;

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// The single, static reference point for the system clock.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A source of wall-clock milliseconds for expiry and lock leases.
///
/// The returned value is measured from an arbitrary fixed origin and must be
/// non-decreasing. It must never be `0`, which the cache reserves to mean
/// "never expires".
pub trait Clock: Send + Sync + fmt::Debug {
  fn now_millis(&self) -> u64;
}

/// The default clock, backed by `Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now_millis(&self) -> u64 {
    Instant::now()
      .saturating_duration_since(*CACHE_EPOCH)
      .as_millis() as u64
      + 1
  }
}

/// A clock that only moves when told to. Clones share the same time, so a
/// test can keep one handle and give another to the cache.
#[derive(Debug, Clone)]
pub struct ManualClock {
  millis: Arc<AtomicU64>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      millis: Arc::new(AtomicU64::new(1)),
    }
  }

  /// Moves the clock forward by `by`.
  pub fn advance(&self, by: Duration) {
    self
      .millis
      .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
  }

  /// Sets the clock to an absolute value, clamped to at least 1.
  pub fn set_millis(&self, millis: u64) {
    self.millis.store(millis.max(1), Ordering::SeqCst);
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  #[inline]
  fn now_millis(&self) -> u64 {
    self.millis.load(Ordering::SeqCst)
  }
}

/// Millisecond sentinel selecting the cache's default expiry delay.
pub const EXPIRY_DEFAULT: i64 = 0;

/// Millisecond sentinel for an entry that never expires.
pub const EXPIRY_NEVER: i64 = -1;

/// How long a written entry stays visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
  /// Use the cache's expiry delay, which may itself be "never".
  #[default]
  Default,
  /// Never expire, regardless of the cache's expiry delay.
  Never,
  /// Expire once this much time has passed on the cache clock.
  After(Duration),
}

impl Expiry {
  /// Interprets a millisecond time-to-live: [`EXPIRY_DEFAULT`],
  /// [`EXPIRY_NEVER`], or a positive delay. Other negative values are
  /// rejected.
  pub fn from_millis(millis: i64) -> Result<Self, CacheError> {
    match millis {
      EXPIRY_DEFAULT => Ok(Expiry::Default),
      EXPIRY_NEVER => Ok(Expiry::Never),
      ms if ms > 0 => Ok(Expiry::After(Duration::from_millis(ms as u64))),
      ms => Err(CacheError::invalid_argument(format!("invalid expiry: {ms}ms"))),
    }
  }

  /// Resolves the absolute expiry time for a write at `now`. `0` means never.
  pub(crate) fn deadline(self, now: u64, default_delay_millis: u64) -> u64 {
    let delay = match self {
      Expiry::Default if default_delay_millis == 0 => return 0,
      Expiry::Default => default_delay_millis,
      Expiry::Never => return 0,
      Expiry::After(ttl) => ttl.as_millis().min(u64::MAX as u128) as u64,
    };
    now.saturating_add(delay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_system_clock_is_never_zero() {
    assert!(SystemClock.now_millis() >= 1);
  }

  #[test]
  fn test_manual_clock_shares_time_between_clones() {
    let clock = ManualClock::new();
    let other = clock.clone();
    clock.advance(Duration::from_millis(150));
    assert_eq!(other.now_millis(), 151);

    other.set_millis(0);
    assert_eq!(clock.now_millis(), 1);
  }

  #[test]
  fn test_expiry_from_millis() {
    assert_eq!(Expiry::from_millis(0), Ok(Expiry::Default));
    assert_eq!(Expiry::from_millis(-1), Ok(Expiry::Never));
    assert_eq!(
      Expiry::from_millis(250),
      Ok(Expiry::After(Duration::from_millis(250)))
    );
    assert!(matches!(
      Expiry::from_millis(-2),
      Err(CacheError::InvalidArgument(_))
    ));
  }

  #[test]
  fn test_expiry_deadline() {
    assert_eq!(Expiry::Default.deadline(10, 0), 0);
    assert_eq!(Expiry::Default.deadline(10, 100), 110);
    assert_eq!(Expiry::Never.deadline(10, 100), 0);
    assert_eq!(Expiry::After(Duration::from_millis(5)).deadline(10, 100), 15);
  }
}
