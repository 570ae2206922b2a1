use crate::shared::CacheShared;

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::trace;

/// The background task that periodically sweeps expired entries and
/// re-checks capacity.
///
/// The thread only holds a weak reference to the cache, so it never keeps a
/// dropped cache alive; it exits on its next tick after `stop` or once the
/// cache is gone.
pub(crate) struct Janitor {
  _handle: JoinHandle<()>,
  stop_flag: Arc<AtomicBool>,
}

impl Janitor {
  /// Spawns a new janitor thread.
  pub(crate) fn spawn<K, V, H>(shared: Weak<CacheShared<K, V, H>>, tick_interval: Duration) -> Self
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    let handle = thread::spawn(move || {
      while !stop_clone.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        match shared.upgrade() {
          Some(shared) => Self::cleanup(&shared),
          None => break,
        }

        // Sleep for the remaining duration of the tick interval.
        if let Some(remaining) = tick_interval.checked_sub(tick_start.elapsed()) {
          thread::sleep(remaining);
        }
      }
      trace!("cache janitor exiting");
    });

    Self {
      _handle: handle,
      stop_flag,
    }
  }

  fn cleanup<K, V, H>(shared: &CacheShared<K, V, H>)
  where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
    H: BuildHasher + Clone,
  {
    let expired = shared.sweep_expired();
    shared.enforce_capacity();
    trace!(expired, "cache janitor tick");
  }

  /// Signals the janitor thread to stop.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Relaxed);
  }
}
