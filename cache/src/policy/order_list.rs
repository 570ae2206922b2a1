use std::{collections::HashMap, hash::Hash};

use generational_arena::{Arena, Index};

#[derive(Debug)]
pub(super) struct Node<K> {
  pub(crate) key: K,
  pub(crate) next: Option<Index>,
  pub(crate) prev: Option<Index>,
}

// An arena-backed doubly linked list of keys with O(1) lookup, move and
// removal. Head is the most recently pushed key, tail the oldest.
#[derive(Debug)]
pub(super) struct OrderList<K: Eq + Hash + Clone> {
  pub(crate) nodes: Arena<Node<K>>,
  pub(crate) lookup: HashMap<K, Index>,
  pub(crate) head: Option<Index>,
  pub(crate) tail: Option<Index>,
}

impl<K: Eq + Hash + Clone> OrderList<K> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      head: None,
      tail: None,
    }
  }

  // Unlinks a node without touching the arena or the lookup map.
  fn unlink(&mut self, index: Index) {
    let node = &self.nodes[index];
    let prev_node_idx = node.prev;
    let next_node_idx = node.next;

    if let Some(prev_idx) = prev_node_idx {
      self.nodes[prev_idx].next = next_node_idx;
    } else {
      self.head = next_node_idx;
    }

    if let Some(next_idx) = next_node_idx {
      self.nodes[next_idx].prev = prev_node_idx;
    } else {
      self.tail = prev_node_idx;
    }
  }

  // Links a node that is already in the arena as the new head.
  fn link_front(&mut self, index: Index) {
    let old_head_idx = self.head;
    self.nodes[index].next = old_head_idx;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head_idx {
      self.nodes[old_head].prev = Some(index);
    }

    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  #[cfg(test)]
  pub fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  /// Inserts `key` at the front, or moves it there if already present.
  pub fn push_front(&mut self, key: K) {
    if let Some(&index) = self.lookup.get(&key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
    } else {
      self.insert_front(key);
    }
  }

  /// Inserts `key` at the front only if it is not tracked yet.
  pub fn push_front_if_absent(&mut self, key: &K) {
    if !self.lookup.contains_key(key) {
      self.insert_front(key.clone());
    }
  }

  fn insert_front(&mut self, key: K) {
    let index = self.nodes.insert(Node {
      key: key.clone(),
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.link_front(index);
  }

  pub fn move_to_front(&mut self, key: &K) {
    if let Some(&index) = self.lookup.get(key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
    }
  }

  pub fn pop_back(&mut self) -> Option<K> {
    let tail_index = self.tail?;
    let key = self.nodes.get(tail_index)?.key.clone();
    self.remove(&key);
    Some(key)
  }

  pub fn remove(&mut self, key: &K) -> bool {
    match self.lookup.remove(key) {
      Some(index) => {
        self.unlink(index);
        self.nodes.remove(index);
        true
      }
      None => false,
    }
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }

  // A helper for tests, to get the order of keys from head to tail.
  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn new_list_is_empty() {
    let list = OrderList::<i32>::new();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
    assert!(!list.contains(&123));
  }

  #[test]
  fn push_front_existing_item_moves_to_front() {
    let mut list = OrderList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front(3);
    assert_eq!(list.keys_as_vec(), vec![3, 2, 1]);

    list.push_front(1);
    assert_eq!(list.len(), 3, "Length should not change");
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
  }

  #[test]
  fn push_front_if_absent_keeps_position() {
    let mut list = OrderList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front_if_absent(&1);
    assert_eq!(list.keys_as_vec(), vec![2, 1]);
  }

  #[test]
  fn pop_back_returns_oldest() {
    let mut list = OrderList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front(3);

    assert_eq!(list.pop_back(), Some(1));
    assert!(!list.contains(&1));
    assert_eq!(list.keys_as_vec(), vec![3, 2]);
  }

  #[test]
  fn pop_back_from_empty_list() {
    let mut list = OrderList::<i32>::new();
    assert_eq!(list.pop_back(), None);
  }

  #[test]
  fn remove_item_from_middle() {
    let mut list = OrderList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front(3);

    assert!(list.remove(&2));
    assert!(!list.remove(&99));
    assert_eq!(list.keys_as_vec(), vec![3, 1]);

    list.clear();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
  }
}
