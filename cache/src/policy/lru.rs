use super::order_list::OrderList;
use super::CachePolicy;

use parking_lot::Mutex;
use std::hash::Hash;

/// An eviction policy that evicts the least recently used entries.
///
/// Reads only reorder the list when its lock is free; a read that finds it
/// busy is dropped, which keeps lookups from queueing behind each other.
#[derive(Debug)]
pub struct LruPolicy<K: Eq + Hash + Clone> {
  list: Mutex<OrderList<K>>,
}

impl<K: Eq + Hash + Clone> LruPolicy<K> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(OrderList::new()),
    }
  }
}

impl<K: Eq + Hash + Clone> Default for LruPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for LruPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  /// A write makes the entry the most recently used.
  fn on_write(&self, key: &K) {
    self.list.lock().push_front(key.clone());
  }

  fn on_read(&self, key: &K) {
    if let Some(mut list) = self.list.try_lock() {
      list.move_to_front(key);
    }
  }

  fn on_remove(&self, key: &K) {
    self.list.lock().remove(key);
  }

  fn victim(&self) -> Option<K> {
    self.list.lock().pop_back()
  }

  fn clear(&self) {
    self.list.lock().clear();
  }
}
