use super::order_list::OrderList;
use super::CachePolicy;

use parking_lot::Mutex;
use std::hash::Hash;

/// An eviction policy that evicts entries in a First-In, First-Out (FIFO) manner.
#[derive(Debug)]
pub struct FifoPolicy<K: Eq + Hash + Clone> {
  list: Mutex<OrderList<K>>,
}

impl<K: Eq + Hash + Clone> FifoPolicy<K> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(OrderList::new()),
    }
  }
}

impl<K: Eq + Hash + Clone> Default for FifoPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for FifoPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  /// Re-writing an existing key keeps its original position.
  fn on_write(&self, key: &K) {
    self.list.lock().push_front_if_absent(key);
  }

  /// A FIFO policy does not care about access patterns. This is a no-op.
  fn on_read(&self, _key: &K) {}

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
