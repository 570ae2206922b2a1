use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A set of keys that iterates in the order the transaction first touched
/// them.
///
/// Every key of a transaction gets a sequence number on first enlistment;
/// all of its key sets share that numbering, so locking walks keys in the
/// same deterministic order on every run.
#[derive(Debug, Clone)]
pub struct KeySet<K> {
  by_seq: BTreeMap<u64, K>,
  seq_of: HashMap<K, u64>,
}

impl<K> Default for KeySet<K> {
  fn default() -> Self {
    Self {
      by_seq: BTreeMap::new(),
      seq_of: HashMap::new(),
    }
  }
}

impl<K: Eq + Hash + Clone> KeySet<K> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds `key` at position `seq`. Returns `false` if it was already present.
  pub(crate) fn insert(&mut self, key: K, seq: u64) -> bool {
    if self.seq_of.contains_key(&key) {
      return false;
    }
    self.seq_of.insert(key.clone(), seq);
    self.by_seq.insert(seq, key);
    true
  }

  pub(crate) fn remove(&mut self, key: &K) -> bool {
    match self.seq_of.remove(key) {
      Some(seq) => {
        self.by_seq.remove(&seq);
        true
      }
      None => false,
    }
  }

  pub(crate) fn clear(&mut self) {
    self.by_seq.clear();
    self.seq_of.clear();
  }

  pub fn contains(&self, key: &K) -> bool {
    self.seq_of.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.seq_of.len()
  }

  pub fn is_empty(&self) -> bool {
    self.seq_of.is_empty()
  }

  /// Iterates keys in first-enlistment order.
  pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
    self.by_seq.values()
  }
}

impl<'a, K: Eq + Hash + Clone> IntoIterator for &'a KeySet<K> {
  type Item = &'a K;
  type IntoIter = std::collections::btree_map::Values<'a, u64, K>;

  fn into_iter(self) -> Self::IntoIter {
    self.by_seq.values()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_iterates_in_sequence_order() {
    let mut keys = KeySet::new();
    assert!(keys.insert("c", 3));
    assert!(keys.insert("a", 1));
    assert!(keys.insert("b", 2));
    assert!(!keys.insert("a", 9), "a key keeps its first position");

    assert_eq!(keys.iter().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);

    assert!(keys.remove(&"b"));
    assert!(!keys.remove(&"b"));
    assert_eq!(keys.len(), 2);
    assert!(!keys.contains(&"b"));
  }
}
