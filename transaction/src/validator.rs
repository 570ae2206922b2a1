//! Pluggable validation of optimistic transactions.

use crate::backing::BackingMap;
use crate::error::ValidationError;
use crate::keyset::KeySet;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a validator may inspect of a transaction.
pub struct TxView<'a, K, V> {
  pub(crate) id: u64,
  pub(crate) originals: &'a HashMap<K, Option<Arc<V>>>,
  pub(crate) pending: &'a HashMap<K, Option<Arc<V>>>,
}

impl<'a, K: Eq + Hash, V> TxView<'a, K, V> {
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Whether the transaction has loaded `key` from the backing map.
  pub fn has_seen(&self, key: &K) -> bool {
    self.originals.contains_key(key)
  }

  /// The backing value observed when `key` was first enlisted, `None` if the
  /// key was absent then or has not been seen.
  pub fn original(&self, key: &K) -> Option<&Arc<V>> {
    self.originals.get(key).and_then(Option::as_ref)
  }

  /// The value the transaction will commit for `key`: `Some(None)` for a
  /// delete, `None` if the key is not written.
  pub fn pending(&self, key: &K) -> Option<Option<&Arc<V>>> {
    self.pending.get(key).map(Option::as_ref)
  }
}

impl<'a, K, V> fmt::Debug for TxView<'a, K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TxView")
      .field("id", &self.id)
      .field("seen", &self.originals.len())
      .field("pending", &self.pending.len())
      .finish()
  }
}

/// Approves or rejects an optimistic transaction at prepare time.
///
/// `validate` runs after every enlisted key is locked (unless locking is
/// external), so the backing values it reads cannot change underneath it.
pub trait Validator<K, V>: Send + Sync {
  /// Called the first time a key is enlisted for write. The default accepts.
  fn enlist(&self, _tx: &TxView<'_, K, V>, _key: &K) -> Result<(), ValidationError> {
    Ok(())
  }

  fn validate(
    &self,
    tx: &TxView<'_, K, V>,
    inserts: &KeySet<K>,
    updates: &KeySet<K>,
    deletes: &KeySet<K>,
    reads: &KeySet<K>,
    phantoms: &KeySet<K>,
  ) -> Result<(), ValidationError>;
}

/// Checks that every enlisted key still holds the exact value the
/// transaction first observed.
///
/// Values are compared by `Arc` identity, so a concurrent write of an equal
/// value still counts as a conflict.
pub struct SimpleValidator<K, V, B> {
  backing: Arc<B>,
  _marker: PhantomData<fn(K, V)>,
}

impl<K, V, B> SimpleValidator<K, V, B> {
  pub fn new(backing: Arc<B>) -> Self {
    Self {
      backing,
      _marker: PhantomData,
    }
  }
}

impl<K, V, B> fmt::Debug for SimpleValidator<K, V, B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SimpleValidator").finish_non_exhaustive()
  }
}

impl<K, V, B> SimpleValidator<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug,
  B: BackingMap<K, V>,
{
  fn check(&self, tx: &TxView<'_, K, V>, keys: &KeySet<K>) -> Result<(), ValidationError> {
    for key in keys {
      let current = self.backing.get(key);
      let unchanged = match (tx.original(key), current.as_ref()) {
        (None, None) => true,
        (Some(seen), Some(now)) => Arc::ptr_eq(seen, now),
        _ => false,
      };
      if !unchanged {
        return Err(ValidationError::conflict(key));
      }
    }
    Ok(())
  }
}

impl<K, V, B> Validator<K, V> for SimpleValidator<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug,
  V: Send + Sync,
  B: BackingMap<K, V>,
{
  fn validate(
    &self,
    tx: &TxView<'_, K, V>,
    inserts: &KeySet<K>,
    updates: &KeySet<K>,
    deletes: &KeySet<K>,
    reads: &KeySet<K>,
    phantoms: &KeySet<K>,
  ) -> Result<(), ValidationError> {
    self.check(tx, inserts)?;
    self.check(tx, updates)?;
    self.check(tx, deletes)?;
    self.check(tx, reads)?;
    // A phantom is a key the transaction never saw; it must still be absent.
    for key in phantoms {
      if self.backing.get(key).is_some() {
        return Err(ValidationError::conflict(key));
      }
    }
    Ok(())
  }
}
