mod common;

use common::{cache, key, seed, value_of, RejectingMap, OUTSIDER};
use std::sync::Arc;
use std::time::Duration;

use tandem_txn::{ConcurrencyMode, Isolation, TransactionManager, TxError, TxStatus};

#[test]
fn test_commit_applies_inserts_updates_and_deletes() {
  let cache = cache();
  seed(&cache, &[("kept", 1), ("changed", 2), ("dropped", 3)]);
  let manager = TransactionManager::new(cache.clone());

  let mut tx = manager.begin();
  assert_eq!(tx.put(key("added"), 10).unwrap(), None);
  assert_eq!(tx.put(key("changed"), 20).unwrap().as_deref(), Some(&2));
  assert_eq!(tx.remove(&key("dropped")).unwrap().as_deref(), Some(&3));

  assert!(tx.insert_keys().contains(&key("added")));
  assert!(tx.update_keys().contains(&key("changed")));
  assert!(tx.delete_keys().contains(&key("dropped")));

  // Nothing is visible outside the transaction before commit.
  assert_eq!(value_of(&cache, "added"), None);
  assert_eq!(value_of(&cache, "changed"), Some(2));
  assert_eq!(value_of(&cache, "dropped"), Some(3));

  tx.commit().unwrap();
  assert_eq!(tx.status(), TxStatus::Committed);

  assert_eq!(value_of(&cache, "kept"), Some(1));
  assert_eq!(value_of(&cache, "added"), Some(10));
  assert_eq!(value_of(&cache, "changed"), Some(20));
  assert_eq!(value_of(&cache, "dropped"), None);
  assert!(!cache.is_locked(&key("added")));
  assert!(!cache.is_locked(&key("changed")));
}

#[test]
fn test_reads_see_own_writes() {
  let cache = cache();
  seed(&cache, &[("a", 1)]);
  let manager = TransactionManager::new(cache.clone());

  let mut tx = manager.begin();
  tx.put(key("a"), 2).unwrap();
  tx.put(key("b"), 3).unwrap();
  tx.remove(&key("a")).unwrap();

  assert_eq!(tx.get(&key("a")).unwrap(), None);
  assert_eq!(tx.get(&key("b")).unwrap().as_deref(), Some(&3));
  assert!(tx.contains_key(&key("b")).unwrap());

  let found = tx.get_all([key("a"), key("b"), key("c")].iter()).unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found.get(&key("b")).map(|value| **value), Some(3));
}

#[test]
fn test_removing_own_insert_leaves_nothing_to_apply() {
  let cache = cache();
  let manager = TransactionManager::new(cache.clone());

  let mut tx = manager.begin();
  tx.put(key("temp"), 1).unwrap();
  assert_eq!(tx.remove(&key("temp")).unwrap().as_deref(), Some(&1));

  assert!(tx.insert_keys().is_empty());
  assert!(tx.delete_keys().is_empty());
  tx.commit().unwrap();
  assert!(cache.is_empty());
}

#[test]
fn test_rollback_discards_and_releases_locks() {
  let cache = cache();
  seed(&cache, &[("a", 1)]);
  let manager = TransactionManager::new(cache.clone());

  let mut tx = manager.begin();
  tx.put(key("a"), 100).unwrap();
  tx.put(key("b"), 200).unwrap();
  assert_eq!(cache.lock_holder(&key("a")), Some(tx.owner()));

  tx.rollback().unwrap();
  assert_eq!(tx.status(), TxStatus::RolledBack);
  assert!(tx.locked_keys().is_empty());

  assert_eq!(value_of(&cache, "a"), Some(1));
  assert_eq!(value_of(&cache, "b"), None);
  assert!(cache.lock(&key("a"), OUTSIDER, Duration::from_millis(10)));
  assert!(cache.lock(&key("b"), OUTSIDER, Duration::from_millis(10)));

  // Rolling back again is a no-op.
  tx.rollback().unwrap();
}

#[test]
fn test_finished_transactions_reject_operations() {
  let cache = cache();
  let manager = TransactionManager::new(cache.clone());

  let mut tx = manager.begin();
  tx.put(key("a"), 1).unwrap();
  tx.commit().unwrap();

  assert!(matches!(tx.put(key("b"), 2), Err(TxError::InvalidState(_))));
  assert!(matches!(tx.get(&key("a")), Err(TxError::InvalidState(_))));
  assert!(matches!(tx.commit(), Err(TxError::InvalidState(_))));
  assert!(matches!(tx.rollback(), Err(TxError::InvalidState(_))));

  let mut rolled = manager.begin();
  rolled.rollback().unwrap();
  assert!(matches!(rolled.prepare(), Err(TxError::InvalidState(_))));
  assert!(matches!(rolled.commit(), Err(TxError::InvalidState(_))));
}

#[test]
fn test_prepare_then_commit() {
  let cache = cache();
  let manager = TransactionManager::new(cache.clone());

  let mut tx = manager.begin();
  tx.put(key("a"), 1).unwrap();
  tx.prepare().unwrap();
  assert_eq!(tx.status(), TxStatus::Prepared);
  assert!(matches!(tx.put(key("b"), 2), Err(TxError::InvalidState(_))));

  tx.commit().unwrap();
  assert_eq!(value_of(&cache, "a"), Some(1));
}

#[test]
fn test_drop_rolls_back_and_releases_locks() {
  let cache = cache();
  let manager = TransactionManager::new(cache.clone());

  {
    let mut tx = manager.begin();
    tx.put(key("a"), 1).unwrap();
    assert!(cache.is_locked(&key("a")));
  }

  assert!(!cache.is_locked(&key("a")));
  assert_eq!(value_of(&cache, "a"), None);
}

#[test]
fn test_failed_apply_ends_in_unknown() {
  let cache = cache();
  let backing = Arc::new(RejectingMap {
    inner: cache.clone(),
    rejected: key("frozen"),
  });
  let manager = TransactionManager::new(backing);

  let mut tx = manager.begin();
  tx.put(key("fine"), 1).unwrap();
  tx.put(key("frozen"), 2).unwrap();

  let err = tx.commit().unwrap_err();
  assert!(matches!(err, TxError::Cache(_)));
  assert!(!err.is_retryable());
  assert_eq!(tx.status(), TxStatus::Unknown);

  // The write before the failure landed; every lock is gone either way.
  assert_eq!(value_of(&cache, "fine"), Some(1));
  assert!(!cache.is_locked(&key("fine")));
  assert!(!cache.is_locked(&key("frozen")));
  assert!(matches!(tx.rollback(), Err(TxError::InvalidState(_))));
}

#[test]
fn test_transaction_ids_are_unique_across_managers() {
  let cache = cache();
  let first = TransactionManager::new(cache.clone());
  let second = TransactionManager::new(cache.clone());

  let a = first.begin();
  let b = second.begin();
  let c = first.begin_with(ConcurrencyMode::Optimistic, Isolation::ReadCommitted);
  assert_ne!(a.id(), b.id());
  assert_ne!(a.id(), c.id());
  assert_ne!(b.id(), c.id());
  assert_eq!(c.isolation(), Isolation::ReadCommitted);
}
