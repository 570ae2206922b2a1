use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// One generation of counters. `reset` swaps in a fresh generation.
#[derive(Debug)]
struct Counters {
  // --- Hit/Miss Ratios ---
  hits: CachePadded<AtomicU64>,
  misses: CachePadded<AtomicU64>,
  hit_nanos: CachePadded<AtomicU64>,
  miss_nanos: CachePadded<AtomicU64>,

  // --- Throughput ---
  puts: CachePadded<AtomicU64>,
  put_nanos: CachePadded<AtomicU64>,

  // --- Removal Stats ---
  evictions: CachePadded<AtomicU64>,
  expirations: CachePadded<AtomicU64>,

  started_at: Instant,
}

impl Counters {
  fn new() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      hit_nanos: CachePadded::new(AtomicU64::new(0)),
      miss_nanos: CachePadded::new(AtomicU64::new(0)),
      puts: CachePadded::new(AtomicU64::new(0)),
      put_nanos: CachePadded::new(AtomicU64::new(0)),
      evictions: CachePadded::new(AtomicU64::new(0)),
      expirations: CachePadded::new(AtomicU64::new(0)),
      started_at: Instant::now(),
    }
  }
}

#[inline]
fn nanos(elapsed: Duration) -> u64 {
  elapsed.as_nanos().min(u64::MAX as u128) as u64
}

/// Thread-safe hit/miss/put counters for a cache.
///
/// Increments take a shared lock on the current generation, `reset` takes the
/// exclusive lock to install a new one, so a snapshot sees either all
/// pre-reset or all post-reset values.
pub struct CacheStatistics {
  current: RwLock<Counters>,
}

impl CacheStatistics {
  pub fn new() -> Self {
    Self {
      current: RwLock::new(Counters::new()),
    }
  }

  /// Records `count` successful lookups that took `elapsed` in total.
  pub fn register_hits(&self, count: u64, elapsed: Duration) {
    let counters = self.current.read();
    counters.hits.fetch_add(count, Ordering::Relaxed);
    counters.hit_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
  }

  /// Records `count` failed lookups that took `elapsed` in total.
  pub fn register_misses(&self, count: u64, elapsed: Duration) {
    let counters = self.current.read();
    counters.misses.fetch_add(count, Ordering::Relaxed);
    counters.miss_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
  }

  /// Records a single write.
  pub fn register_put(&self, elapsed: Duration) {
    let counters = self.current.read();
    counters.puts.fetch_add(1, Ordering::Relaxed);
    counters.put_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
  }

  pub(crate) fn register_evictions(&self, count: u64) {
    self.current.read().evictions.fetch_add(count, Ordering::Relaxed);
  }

  pub(crate) fn register_expirations(&self, count: u64) {
    self.current.read().expirations.fetch_add(count, Ordering::Relaxed);
  }

  /// Clears every counter at once.
  pub fn reset(&self) {
    *self.current.write() = Counters::new();
  }

  /// Creates a point-in-time snapshot of the counters.
  pub fn snapshot(&self) -> StatisticsSnapshot {
    let counters = self.current.read();
    let hits = counters.hits.load(Ordering::Relaxed);
    let misses = counters.misses.load(Ordering::Relaxed);
    let puts = counters.puts.load(Ordering::Relaxed);

    StatisticsSnapshot {
      hits,
      misses,
      total_gets: hits + misses,
      hit_ratio: ratio(hits, hits + misses),
      average_hit_time: average(counters.hit_nanos.load(Ordering::Relaxed), hits),
      average_miss_time: average(counters.miss_nanos.load(Ordering::Relaxed), misses),
      puts,
      average_put_time: average(counters.put_nanos.load(Ordering::Relaxed), puts),
      evictions: counters.evictions.load(Ordering::Relaxed),
      expirations: counters.expirations.load(Ordering::Relaxed),
      uptime: counters.started_at.elapsed(),
    }
  }
}

impl Default for CacheStatistics {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CacheStatistics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.snapshot().fmt(f)
  }
}

fn ratio(part: u64, total: u64) -> f64 {
  if total == 0 {
    0.0
  } else {
    part as f64 / total as f64
  }
}

fn average(total_nanos: u64, count: u64) -> Duration {
  if count == 0 {
    Duration::ZERO
  } else {
    Duration::from_nanos(total_nanos / count)
  }
}

/// A point-in-time, public-facing snapshot of the cache's statistics.
#[derive(Clone, PartialEq)]
pub struct StatisticsSnapshot {
  /// The number of successful lookups.
  pub hits: u64,
  /// The number of failed lookups.
  pub misses: u64,
  /// `hits + misses`.
  pub total_gets: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  pub average_hit_time: Duration,
  pub average_miss_time: Duration,
  /// The number of writes, inserts and updates alike.
  pub puts: u64,
  pub average_put_time: Duration,
  /// Entries removed to bring the cache back under its high units.
  pub evictions: u64,
  /// Entries removed because they expired.
  pub expirations: u64,
  /// Time since the cache was created or the statistics were last reset.
  pub uptime: Duration,
}

impl fmt::Debug for StatisticsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatisticsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("average_hit_time", &self.average_hit_time)
      .field("average_miss_time", &self.average_miss_time)
      .field("puts", &self.puts)
      .field("average_put_time", &self.average_put_time)
      .field("evictions", &self.evictions)
      .field("expirations", &self.expirations)
      .field("uptime", &self.uptime)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn test_counters_and_averages() {
    let stats = CacheStatistics::new();
    stats.register_hits(3, Duration::from_micros(30));
    stats.register_misses(1, Duration::from_micros(5));
    stats.register_put(Duration::from_micros(8));

    let snap = stats.snapshot();
    assert_eq!(snap.hits, 3);
    assert_eq!(snap.misses, 1);
    assert_eq!(snap.total_gets, 4);
    assert_eq!(snap.hit_ratio, 0.75);
    assert_eq!(snap.average_hit_time, Duration::from_micros(10));
    assert_eq!(snap.average_put_time, Duration::from_micros(8));
  }

  #[test]
  fn test_reset_clears_everything() {
    let stats = CacheStatistics::new();
    stats.register_hits(5, Duration::ZERO);
    stats.register_put(Duration::ZERO);
    stats.register_evictions(2);
    stats.reset();

    let snap = stats.snapshot();
    assert_eq!(snap.hits, 0);
    assert_eq!(snap.puts, 0);
    assert_eq!(snap.evictions, 0);
    assert_eq!(snap.hit_ratio, 0.0);
  }

  #[test]
  fn test_reset_is_never_observed_half_done() {
    let stats = Arc::new(CacheStatistics::new());
    let writer = {
      let stats = stats.clone();
      thread::spawn(move || {
        for _ in 0..10_000 {
          // hits and misses always move together
          let counters = stats.current.read();
          counters.hits.fetch_add(1, Ordering::Relaxed);
          counters.misses.fetch_add(1, Ordering::Relaxed);
        }
      })
    };

    for _ in 0..100 {
      stats.reset();
      let snap = stats.snapshot();
      assert_eq!(snap.hits, snap.misses);
    }
    writer.join().unwrap();
  }
}
