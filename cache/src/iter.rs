//! Contains types for iterating over a cache's contents and the live
//! collection views built on them.

use crate::handles::Cache;

use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A resumable cursor representing a position within the cache's iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Cursor {
  shard_index: usize,
  items_seen_in_shard: usize,
}

pub const DEFAULT_ITER_BATCH_SIZE: usize = 64;

/// An iterator over the live key-value pairs of a `Cache`.
///
/// Items are fetched in batches, holding a read lock on only one shard at a
/// time for a very brief period.
///
/// **Important**: This iterator does **not** provide a point-in-time snapshot
/// of the cache. Items inserted after a shard has been scanned will be missed,
/// and items may be modified or deleted by other threads while iteration is
/// in progress.
pub struct Iter<'a, K, V, H> {
  cache: &'a Cache<K, V, H>,
  buffer: VecDeque<(K, Arc<V>)>,
  cursor: Cursor,
  batch_size: usize,
  finished: bool,
}

impl<'a, K, V, H> Iter<'a, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(cache: &'a Cache<K, V, H>, batch_size: usize) -> Self {
    let batch_size = batch_size.max(1);
    Self {
      cache,
      buffer: VecDeque::with_capacity(batch_size),
      cursor: Cursor::default(),
      batch_size,
      finished: false,
    }
  }

  /// Fills the internal buffer with the next batch of items from the cache.
  fn refill_buffer(&mut self) {
    if self.finished {
      return;
    }

    let shared = &self.cache.shared;
    let num_shards = shared.store.num_shards();
    let now = shared.now();

    while self.cursor.shard_index < num_shards && self.buffer.len() < self.batch_size {
      let guard = shared.store.shard_at(self.cursor.shard_index).read_recursive();

      if self.cursor.items_seen_in_shard >= guard.len() {
        self.cursor.shard_index += 1;
        self.cursor.items_seen_in_shard = 0;
        continue;
      }

      let wanted = self.batch_size - self.buffer.len();
      let mut scanned = 0;
      for (key, entry) in guard.iter().skip(self.cursor.items_seen_in_shard).take(wanted) {
        scanned += 1;
        if !entry.is_expired(now) {
          self.buffer.push_back((key.clone(), entry.value()));
        }
      }
      self.cursor.items_seen_in_shard += scanned;
    } // Lock on shard is released here

    if self.cursor.shard_index >= num_shards {
      self.finished = true;
    }
  }
}

impl<'a, K, V, H> Iterator for Iter<'a, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  type Item = (K, Arc<V>);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      // Fast path: serve from the buffer if possible
      if let Some(item) = self.buffer.pop_front() {
        return Some(item);
      }
      if self.finished {
        return None;
      }
      // A batch may come back empty when it only held expired entries.
      self.refill_buffer();
    }
  }
}

/// A live view of the cache's keys. Removals write through to the cache.
pub struct KeysView<'a, K, V, H> {
  cache: &'a Cache<K, V, H>,
}

/// A live view of the cache's values. Removals write through to the cache.
pub struct ValuesView<'a, K, V, H> {
  cache: &'a Cache<K, V, H>,
}

/// A live view of the cache's entries. Removals write through to the cache.
pub struct EntriesView<'a, K, V, H> {
  cache: &'a Cache<K, V, H>,
}

impl<'a, K, V, H> KeysView<'a, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(cache: &'a Cache<K, V, H>) -> Self {
    Self { cache }
  }

  pub fn iter(&self) -> impl Iterator<Item = K> + 'a {
    let cache: &'a Cache<K, V, H> = self.cache;
    cache.iter().map(|(key, _)| key)
  }

  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  pub fn contains(&self, key: &K) -> bool {
    self.cache.contains_key(key)
  }

  pub fn remove(&self, key: &K) -> bool {
    self.cache.remove(key).is_some()
  }

  pub fn remove_if<F>(&self, mut predicate: F) -> usize
  where
    F: FnMut(&K) -> bool,
  {
    self.cache.remove_if(|key, _| predicate(key))
  }

  pub fn clear(&self) {
    self.cache.clear();
  }
}

impl<'a, K, V, H> ValuesView<'a, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(cache: &'a Cache<K, V, H>) -> Self {
    Self { cache }
  }

  pub fn iter(&self) -> impl Iterator<Item = Arc<V>> + 'a {
    let cache: &'a Cache<K, V, H> = self.cache;
    cache.iter().map(|(_, value)| value)
  }

  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  pub fn contains(&self, value: &V) -> bool
  where
    V: PartialEq,
  {
    self.cache.contains_value(value)
  }

  /// Removes one entry whose value equals `value`.
  pub fn remove(&self, value: &V) -> bool
  where
    V: PartialEq,
  {
    self
      .cache
      .iter()
      .filter(|(_, candidate)| **candidate == *value)
      .any(|(key, _)| self.cache.remove_if_equal(&key, value))
  }

  pub fn remove_if<F>(&self, mut predicate: F) -> usize
  where
    F: FnMut(&V) -> bool,
  {
    self.cache.remove_if(|_, value| predicate(value))
  }

  pub fn clear(&self) {
    self.cache.clear();
  }
}

impl<'a, K, V, H> EntriesView<'a, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(cache: &'a Cache<K, V, H>) -> Self {
    Self { cache }
  }

  pub fn iter(&self) -> Iter<'a, K, V, H> {
    let cache: &'a Cache<K, V, H> = self.cache;
    cache.iter()
  }

  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  /// Removes `key` only while it still maps to `value`.
  pub fn remove(&self, key: &K, value: &V) -> bool
  where
    V: PartialEq,
  {
    self.cache.remove_if_equal(key, value)
  }

  pub fn remove_if<F>(&self, predicate: F) -> usize
  where
    F: FnMut(&K, &V) -> bool,
  {
    self.cache.remove_if(predicate)
  }

  pub fn clear(&self) {
    self.cache.clear();
  }
}
