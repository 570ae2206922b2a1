use crate::backing::BackingMap;
use crate::error::TxError;
use crate::keyset::KeySet;
use crate::validator::{TxView, Validator};

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tandem_cache::LockOwner;
use tracing::{debug, trace, warn};

/// The life cycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
  Active,
  Preparing,
  Prepared,
  Committing,
  Committed,
  RolledBack,
  /// A commit failed partway; some writes may have reached the backing map.
  Unknown,
}

impl TxStatus {
  /// Whether the transaction can no longer change state.
  pub fn is_terminal(self) -> bool {
    matches!(self, TxStatus::Committed | TxStatus::RolledBack | TxStatus::Unknown)
  }
}

impl fmt::Display for TxStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TxStatus::Active => "active",
      TxStatus::Preparing => "preparing",
      TxStatus::Prepared => "prepared",
      TxStatus::Committing => "committing",
      TxStatus::Committed => "committed",
      TxStatus::RolledBack => "rolled back",
      TxStatus::Unknown => "unknown",
    };
    f.write_str(name)
  }
}

/// How reads see the backing map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Isolation {
  /// Every read goes to the backing map and is not enlisted.
  ReadCommitted,
  /// The first read of a key is cached and enlisted in the read set; a
  /// pessimistic transaction also locks it.
  #[default]
  RepeatableRead,
}

/// When a transaction takes its key locks.
pub enum ConcurrencyStrategy<K, V> {
  /// Locks are taken at prepare, then the validator checks for conflicts.
  /// With `lock_external` the caller manages locks and prepare only
  /// validates.
  Optimistic {
    validator: Arc<dyn Validator<K, V>>,
    lock_external: bool,
  },
  /// Keys are locked as they are enlisted for write. With `validate_locks`,
  /// prepare confirms every lock is still held.
  Pessimistic { validate_locks: bool },
}

impl<K, V> Clone for ConcurrencyStrategy<K, V> {
  fn clone(&self) -> Self {
    match self {
      ConcurrencyStrategy::Optimistic {
        validator,
        lock_external,
      } => ConcurrencyStrategy::Optimistic {
        validator: validator.clone(),
        lock_external: *lock_external,
      },
      ConcurrencyStrategy::Pessimistic { validate_locks } => ConcurrencyStrategy::Pessimistic {
        validate_locks: *validate_locks,
      },
    }
  }
}

impl<K, V> fmt::Debug for ConcurrencyStrategy<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConcurrencyStrategy::Optimistic { lock_external, .. } => f
        .debug_struct("Optimistic")
        .field("lock_external", lock_external)
        .finish_non_exhaustive(),
      ConcurrencyStrategy::Pessimistic { validate_locks } => f
        .debug_struct("Pessimistic")
        .field("validate_locks", validate_locks)
        .finish(),
    }
  }
}

/// A set of pending changes over a backing map.
///
/// Reads and writes go to a private overlay; nothing reaches the backing map
/// until `commit`. Locks are tagged with the transaction's id and are
/// released by `commit`, `rollback` or a failed `prepare`. Dropping an
/// unfinished transaction rolls it back.
pub struct Transaction<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug,
  B: BackingMap<K, V>,
{
  id: u64,
  backing: Arc<B>,
  strategy: ConcurrencyStrategy<K, V>,
  isolation: Isolation,
  lock_wait: Duration,
  status: TxStatus,
  next_seq: u64,
  seq: HashMap<K, u64>,
  originals: HashMap<K, Option<Arc<V>>>,
  pending: HashMap<K, Option<Arc<V>>>,
  inserts: KeySet<K>,
  updates: KeySet<K>,
  deletes: KeySet<K>,
  reads: KeySet<K>,
  locked: KeySet<K>,
}

impl<K, V, B> fmt::Debug for Transaction<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug,
  B: BackingMap<K, V>,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Transaction")
      .field("id", &self.id)
      .field("status", &self.status)
      .field("strategy", &self.strategy)
      .field("isolation", &self.isolation)
      .field("inserts", &self.inserts.len())
      .field("updates", &self.updates.len())
      .field("deletes", &self.deletes.len())
      .field("reads", &self.reads.len())
      .field("locked", &self.locked.len())
      .finish()
  }
}

impl<K, V, B> Transaction<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug,
  B: BackingMap<K, V>,
{
  pub(crate) fn new(
    id: u64,
    backing: Arc<B>,
    strategy: ConcurrencyStrategy<K, V>,
    isolation: Isolation,
    lock_wait: Duration,
  ) -> Self {
    Self {
      id,
      backing,
      strategy,
      isolation,
      lock_wait,
      status: TxStatus::Active,
      next_seq: 0,
      seq: HashMap::new(),
      originals: HashMap::new(),
      pending: HashMap::new(),
      inserts: KeySet::new(),
      updates: KeySet::new(),
      deletes: KeySet::new(),
      reads: KeySet::new(),
      locked: KeySet::new(),
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  /// The owner tag this transaction's key locks carry.
  pub fn owner(&self) -> LockOwner {
    LockOwner(self.id)
  }

  pub fn status(&self) -> TxStatus {
    self.status
  }

  pub fn isolation(&self) -> Isolation {
    self.isolation
  }

  pub fn strategy(&self) -> &ConcurrencyStrategy<K, V> {
    &self.strategy
  }

  pub fn insert_keys(&self) -> &KeySet<K> {
    &self.inserts
  }

  pub fn update_keys(&self) -> &KeySet<K> {
    &self.updates
  }

  pub fn delete_keys(&self) -> &KeySet<K> {
    &self.deletes
  }

  pub fn read_keys(&self) -> &KeySet<K> {
    &self.reads
  }

  pub fn locked_keys(&self) -> &KeySet<K> {
    &self.locked
  }

  fn ensure_active(&self, op: &str) -> Result<(), TxError<K>> {
    if self.status == TxStatus::Active {
      Ok(())
    } else {
      Err(TxError::invalid_state(format!(
        "{op} on transaction {} which is {}",
        self.id, self.status
      )))
    }
  }

  fn is_pessimistic(&self) -> bool {
    matches!(self.strategy, ConcurrencyStrategy::Pessimistic { .. })
  }

  fn is_modified(&self, key: &K) -> bool {
    self.inserts.contains(key) || self.updates.contains(key) || self.deletes.contains(key)
  }

  // The first-enlistment position of `key`, assigned on first touch.
  fn seq_for(&mut self, key: &K) -> u64 {
    let next = &mut self.next_seq;
    *self.seq.entry(key.clone()).or_insert_with(|| {
      let seq = *next;
      *next += 1;
      seq
    })
  }

  // The backing value as first observed by this transaction.
  fn load(&mut self, key: &K) -> Option<Arc<V>> {
    if let Some(original) = self.originals.get(key) {
      return original.clone();
    }
    let value = self.backing.get(key);
    self.originals.insert(key.clone(), value.clone());
    value
  }

  // The value this transaction currently sees for `key`.
  fn visible(&mut self, key: &K) -> Option<Arc<V>> {
    match self.pending.get(key) {
      Some(pending) => pending.clone(),
      None => self.load(key),
    }
  }

  fn view(&self) -> TxView<'_, K, V> {
    TxView {
      id: self.id,
      originals: &self.originals,
      pending: &self.pending,
    }
  }

  fn lock_key(&mut self, key: &K, wait: Duration) -> Result<(), TxError<K>> {
    if self.backing.lock(key, self.owner(), wait) {
      let seq = self.seq_for(key);
      self.locked.insert(key.clone(), seq);
      Ok(())
    } else {
      debug!(tx = self.id, ?key, ?wait, "failed to lock key");
      Err(TxError::ConcurrentModification { key: key.clone() })
    }
  }

  fn release_locks(&mut self) {
    let owner = self.owner();
    for key in self.locked.iter() {
      if !self.backing.unlock(key, owner) {
        trace!(tx = self.id, ?key, "lock was no longer held at release");
      }
    }
    self.locked.clear();
  }

  // Drops the overlay and every lock, ending in `RolledBack`.
  fn abort(&mut self) {
    self.release_locks();
    self.pending.clear();
    self.originals.clear();
    self.seq.clear();
    self.inserts.clear();
    self.updates.clear();
    self.deletes.clear();
    self.reads.clear();
    self.status = TxStatus::RolledBack;
    debug!(tx = self.id, "transaction rolled back");
  }

  // --- Enlistment ---

  /// Registers `key` with the transaction.
  ///
  /// For a write, an optimistic transaction gives its validator a chance to
  /// register interest the first time the key is enlisted; a pessimistic
  /// one locks the key, waiting up to the lock wait, and fails with
  /// `ConcurrentModification` if it cannot. A failed lock does not roll the
  /// transaction back. A read enlistment adds the key to the read set.
  pub fn enlist(&mut self, key: &K, for_write: bool) -> Result<(), TxError<K>> {
    self.ensure_active("enlist")?;
    let seq = self.seq_for(key);

    if for_write {
      if let ConcurrencyStrategy::Optimistic { validator, .. } = &self.strategy {
        if !self.is_modified(key) {
          validator.enlist(&self.view(), key)?;
        }
      } else if !self.locked.contains(key) {
        self.lock_key(key, self.lock_wait)?;
      }
    } else if !self.is_modified(key) {
      self.reads.insert(key.clone(), seq);
    }
    Ok(())
  }

  /// Enlists every key the transaction has touched, in first-enlistment
  /// order.
  ///
  /// On a pessimistic lock failure, the keys locked by this call are
  /// unlocked again before the error is returned; locks from earlier calls
  /// are kept.
  pub fn enlist_all(&mut self, for_write: bool) -> Result<(), TxError<K>> {
    self.ensure_active("enlist_all")?;

    let mut keys: Vec<(u64, K)> = self.seq.iter().map(|(key, seq)| (*seq, key.clone())).collect();
    keys.sort_unstable_by_key(|(seq, _)| *seq);

    if !self.is_pessimistic() {
      for (_, key) in keys {
        self.enlist(&key, for_write)?;
      }
      return Ok(());
    }

    if !for_write {
      return Ok(());
    }

    let owner = self.owner();
    let mut locked_now = Vec::new();
    for (seq, key) in keys {
      if self.locked.contains(&key) {
        continue;
      }
      if self.backing.lock(&key, owner, self.lock_wait) {
        self.locked.insert(key.clone(), seq);
        locked_now.push(key);
      } else {
        for undone in &locked_now {
          self.backing.unlock(undone, owner);
          self.locked.remove(undone);
        }
        debug!(tx = self.id, ?key, undone = locked_now.len(), "enlist_all failed to lock key");
        return Err(TxError::ConcurrentModification { key });
      }
    }
    Ok(())
  }

  // --- Map operations ---

  /// Reads `key` through the overlay.
  pub fn get(&mut self, key: &K) -> Result<Option<Arc<V>>, TxError<K>> {
    self.ensure_active("get")?;
    if let Some(pending) = self.pending.get(key) {
      return Ok(pending.clone());
    }

    match self.isolation {
      Isolation::ReadCommitted => Ok(self.backing.get(key)),
      Isolation::RepeatableRead => {
        if let Some(original) = self.originals.get(key) {
          return Ok(original.clone());
        }
        if self.is_pessimistic() && !self.locked.contains(key) {
          self.lock_key(key, self.lock_wait)?;
        }
        self.enlist(key, false)?;
        Ok(self.load(key))
      }
    }
  }

  /// Reads several keys, returning the ones present.
  pub fn get_all<'k>(&mut self, keys: impl IntoIterator<Item = &'k K>) -> Result<HashMap<K, Arc<V>>, TxError<K>>
  where
    K: 'k,
  {
    let mut found = HashMap::new();
    for key in keys {
      if let Some(value) = self.get(key)? {
        found.insert(key.clone(), value);
      }
    }
    Ok(found)
  }

  pub fn contains_key(&mut self, key: &K) -> Result<bool, TxError<K>> {
    Ok(self.get(key)?.is_some())
  }

  /// Stages a write of `value` under `key` and returns the value the
  /// transaction saw before it.
  pub fn put(&mut self, key: K, value: V) -> Result<Option<Arc<V>>, TxError<K>> {
    self.put_shared(key, Arc::new(value))
  }

  pub fn put_shared(&mut self, key: K, value: Arc<V>) -> Result<Option<Arc<V>>, TxError<K>> {
    self.ensure_active("put")?;
    self.enlist(&key, true)?;

    let seq = self.seq_for(&key);
    let previous = self.visible(&key);
    if self.load(&key).is_some() {
      self.updates.insert(key.clone(), seq);
    } else {
      self.inserts.insert(key.clone(), seq);
    }
    self.deletes.remove(&key);
    self.reads.remove(&key);
    self.pending.insert(key, Some(value));
    Ok(previous)
  }

  /// Stages a delete of `key` and returns the value the transaction saw
  /// before it.
  pub fn remove(&mut self, key: &K) -> Result<Option<Arc<V>>, TxError<K>> {
    self.ensure_active("remove")?;
    self.enlist(key, true)?;

    let seq = self.seq_for(key);
    let previous = self.visible(key);
    self.reads.remove(key);
    if self.load(key).is_some() {
      self.updates.remove(key);
      self.deletes.insert(key.clone(), seq);
      self.pending.insert(key.clone(), None);
    } else {
      // Deleting a key this transaction inserted leaves nothing to apply.
      self.inserts.remove(key);
      self.pending.remove(key);
    }
    Ok(previous)
  }

  // --- Completion ---

  /// Finalizes locks and, for an optimistic transaction, runs the validator.
  ///
  /// Any failure rolls the transaction back before the error is returned,
  /// so no lock outlives a failed prepare.
  pub fn prepare(&mut self) -> Result<(), TxError<K>> {
    self.ensure_active("prepare")?;
    self.status = TxStatus::Preparing;
    trace!(tx = self.id, "preparing transaction");

    let owner = self.owner();
    match self.strategy.clone() {
      ConcurrencyStrategy::Optimistic {
        validator,
        lock_external,
      } => {
        if !lock_external {
          let keys: Vec<K> = self
            .inserts
            .iter()
            .chain(self.updates.iter())
            .chain(self.deletes.iter())
            .chain(self.reads.iter())
            .cloned()
            .collect();
          for key in keys {
            if self.locked.contains(&key) {
              continue;
            }
            if let Err(err) = self.lock_key(&key, self.lock_wait) {
              self.abort();
              return Err(err);
            }
          }
        }

        let phantoms = KeySet::new();
        let verdict = validator.validate(
          &self.view(),
          &self.inserts,
          &self.updates,
          &self.deletes,
          &self.reads,
          &phantoms,
        );
        if let Err(err) = verdict {
          debug!(tx = self.id, %err, "validator rejected transaction");
          self.abort();
          return Err(err.into());
        }
      }
      ConcurrencyStrategy::Pessimistic { validate_locks } => {
        if validate_locks {
          let held: Vec<K> = self.locked.iter().cloned().collect();
          for key in held {
            if !self.backing.lock(&key, owner, Duration::ZERO) {
              debug!(tx = self.id, ?key, "lock lost before prepare");
              self.abort();
              return Err(TxError::ConcurrentModification { key });
            }
          }
        }
      }
    }

    self.status = TxStatus::Prepared;
    Ok(())
  }

  /// Applies the overlay to the backing map and releases every lock.
  ///
  /// An active transaction is prepared first. If the backing map rejects a
  /// write partway, the transaction ends in [`TxStatus::Unknown`], its locks
  /// are released and the error is returned.
  pub fn commit(&mut self) -> Result<(), TxError<K>> {
    if self.status == TxStatus::Active {
      self.prepare()?;
    }
    if self.status != TxStatus::Prepared {
      return Err(TxError::invalid_state(format!(
        "commit on transaction {} which is {}",
        self.id, self.status
      )));
    }

    self.status = TxStatus::Committing;
    let applied = self.apply();
    self.release_locks();

    match applied {
      Ok(writes) => {
        self.status = TxStatus::Committed;
        debug!(tx = self.id, writes, "transaction committed");
        Ok(())
      }
      Err(err) => {
        self.status = TxStatus::Unknown;
        warn!(tx = self.id, %err, "commit failed partway");
        Err(err)
      }
    }
  }

  fn apply(&self) -> Result<usize, TxError<K>> {
    let mut writes = 0;
    for key in self.deletes.iter() {
      self.backing.remove(key);
      writes += 1;
    }
    for key in self.inserts.iter().chain(self.updates.iter()) {
      if let Some(Some(value)) = self.pending.get(key) {
        self.backing.put(key.clone(), value.clone())?;
        writes += 1;
      }
    }
    Ok(writes)
  }

  /// Discards the overlay and releases every lock. Rolling back twice is a
  /// no-op; a committed transaction cannot be rolled back.
  pub fn rollback(&mut self) -> Result<(), TxError<K>> {
    match self.status {
      TxStatus::RolledBack => Ok(()),
      TxStatus::Committed | TxStatus::Unknown => Err(TxError::invalid_state(format!(
        "rollback on transaction {} which is {}",
        self.id, self.status
      ))),
      _ => {
        self.abort();
        Ok(())
      }
    }
  }
}

impl<K, V, B> Drop for Transaction<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug,
  B: BackingMap<K, V>,
{
  fn drop(&mut self) {
    if !self.status.is_terminal() {
      debug!(tx = self.id, status = %self.status, "rolling back dropped transaction");
      self.abort();
    }
  }
}
