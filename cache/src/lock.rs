//! Per-key owner locks used when the cache serves as the backing map of a
//! transaction layer.

use crate::store::hash_key;
use crate::time::Clock;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Identifies the holder of a key lock, typically a transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockOwner(pub u64);

impl fmt::Display for LockOwner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "owner#{}", self.0)
  }
}

#[derive(Debug, Clone, Copy)]
struct LockState {
  owner: LockOwner,
  // Clock millis after which the lock counts as free. 0 means no lease.
  leased_until: u64,
}

impl LockState {
  #[inline]
  fn lapsed(&self, now: u64) -> bool {
    self.leased_until > 0 && now >= self.leased_until
  }
}

struct LockShard<K, H> {
  held: Mutex<HashMap<K, LockState, H>>,
  released: Condvar,
}

/// A table of exclusive, owner-tagged key locks.
///
/// Locking is re-entrant for the same owner but not counted: a second `lock`
/// only refreshes the lease, and a single `unlock` releases the key. When a
/// lease is configured, a lock whose lease has run out on the cache clock is
/// treated as free and may be taken over by another owner.
pub struct LockTable<K, H> {
  shards: Box<[CachePadded<LockShard<K, H>>]>,
  hasher: H,
  clock: Arc<dyn Clock>,
  lease: Option<Duration>,
}

impl<K, H> fmt::Debug for LockTable<K, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LockTable")
      .field("num_shards", &self.shards.len())
      .field("lease", &self.lease)
      .finish()
  }
}

impl<K, H> LockTable<K, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(num_shards: usize, hasher: H, clock: Arc<dyn Clock>, lease: Option<Duration>) -> Self {
    debug_assert!(num_shards.is_power_of_two());
    let shards = (0..num_shards)
      .map(|_| {
        CachePadded::new(LockShard {
          held: Mutex::new(HashMap::with_hasher(hasher.clone())),
          released: Condvar::new(),
        })
      })
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self {
      shards,
      hasher,
      clock,
      lease,
    }
  }

  #[inline]
  fn shard(&self, key: &K) -> &LockShard<K, H> {
    let index = hash_key(&self.hasher, key) as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  fn lease_deadline(&self, now: u64) -> u64 {
    match self.lease {
      Some(lease) => now.saturating_add(lease.as_millis() as u64).max(1),
      None => 0,
    }
  }

  fn try_acquire(&self, held: &mut HashMap<K, LockState, H>, key: &K, owner: LockOwner) -> bool {
    let now = self.clock.now_millis();
    let leased_until = self.lease_deadline(now);
    match held.get_mut(key) {
      Some(state) if state.owner == owner || state.lapsed(now) => {
        if state.owner != owner {
          trace!(previous = %state.owner, new = %owner, "taking over lapsed key lock");
        }
        state.owner = owner;
        state.leased_until = leased_until;
        true
      }
      Some(_) => false,
      None => {
        held.insert(key.clone(), LockState { owner, leased_until });
        true
      }
    }
  }

  /// Attempts to lock `key` for `owner`, waiting up to `wait` for a competing
  /// holder to release it. A zero `wait` checks exactly once. Returns `true`
  /// if `owner` holds the lock afterwards.
  pub fn lock(&self, key: &K, owner: LockOwner, wait: Duration) -> bool {
    let shard = self.shard(key);
    let mut held = shard.held.lock();

    if self.try_acquire(&mut held, key, owner) {
      return true;
    }
    if wait.is_zero() {
      return false;
    }

    let deadline = Instant::now().checked_add(wait);
    loop {
      let timed_out = match deadline {
        Some(deadline) => shard.released.wait_until(&mut held, deadline).timed_out(),
        None => {
          shard.released.wait(&mut held);
          false
        }
      };

      // A lease may lapse without anyone signalling, so the state is checked
      // once more after a timeout.
      if self.try_acquire(&mut held, key, owner) {
        return true;
      }
      if timed_out {
        trace!(%owner, ?wait, "key lock wait timed out");
        return false;
      }
    }
  }

  /// Releases `key` if it is held by `owner`. Returns `false` otherwise.
  pub fn unlock(&self, key: &K, owner: LockOwner) -> bool {
    let shard = self.shard(key);
    let mut held = shard.held.lock();
    match held.get(key) {
      Some(state) if state.owner == owner => {
        held.remove(key);
        drop(held);
        shard.released.notify_all();
        true
      }
      _ => false,
    }
  }

  /// Returns `true` if some owner currently holds `key`.
  pub fn is_locked(&self, key: &K) -> bool {
    self.holder(key).is_some()
  }

  /// Returns the current holder of `key`, ignoring lapsed leases.
  pub fn holder(&self, key: &K) -> Option<LockOwner> {
    let now = self.clock.now_millis();
    let held = self.shard(key).held.lock();
    held.get(key).filter(|state| !state.lapsed(now)).map(|state| state.owner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::time::ManualClock;

  use std::sync::mpsc;
  use std::thread;

  fn table(lease: Option<Duration>) -> (Arc<LockTable<u32, ahash::RandomState>>, ManualClock) {
    let clock = ManualClock::new();
    let table = LockTable::new(4, ahash::RandomState::new(), Arc::new(clock.clone()), lease);
    (Arc::new(table), clock)
  }

  #[test]
  fn test_lock_is_exclusive_and_reentrant() {
    let (locks, _clock) = table(None);
    let a = LockOwner(1);
    let b = LockOwner(2);

    assert!(locks.lock(&7, a, Duration::ZERO));
    assert!(locks.lock(&7, a, Duration::ZERO));
    assert!(!locks.lock(&7, b, Duration::ZERO));
    assert_eq!(locks.holder(&7), Some(a));

    assert!(!locks.unlock(&7, b), "only the holder may unlock");
    assert!(locks.unlock(&7, a));
    assert!(!locks.is_locked(&7));
    assert!(locks.lock(&7, b, Duration::ZERO));
  }

  #[test]
  fn test_waiter_acquires_after_release() {
    let (locks, _clock) = table(None);
    assert!(locks.lock(&1, LockOwner(1), Duration::ZERO));

    let (tx, rx) = mpsc::channel();
    let waiter = {
      let locks = locks.clone();
      thread::spawn(move || {
        tx.send(()).unwrap();
        locks.lock(&1, LockOwner(2), Duration::from_secs(5))
      })
    };

    rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(locks.unlock(&1, LockOwner(1)));
    assert!(waiter.join().unwrap());
    assert_eq!(locks.holder(&1), Some(LockOwner(2)));
  }

  #[test]
  fn test_bounded_wait_times_out() {
    let (locks, _clock) = table(None);
    assert!(locks.lock(&1, LockOwner(1), Duration::ZERO));

    let start = Instant::now();
    assert!(!locks.lock(&1, LockOwner(2), Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
  }

  #[test]
  fn test_lapsed_lease_is_taken_over() {
    let (locks, clock) = table(Some(Duration::from_millis(100)));
    assert!(locks.lock(&1, LockOwner(1), Duration::ZERO));
    assert!(!locks.lock(&1, LockOwner(2), Duration::ZERO));

    clock.advance(Duration::from_millis(100));
    assert!(!locks.is_locked(&1));
    assert!(locks.lock(&1, LockOwner(2), Duration::ZERO));
    assert!(!locks.unlock(&1, LockOwner(1)));
  }
}
