//! Change events and their synchronous, filtered delivery.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// The kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Inserted,
  Updated,
  Deleted,
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventKind::Inserted => write!(f, "inserted"),
      EventKind::Updated => write!(f, "updated"),
      EventKind::Deleted => write!(f, "deleted"),
    }
  }
}

/// A change to a single cache entry.
///
/// `synthetic` is set when the cache removed the entry on its own (capacity
/// eviction or expiry) rather than because a caller asked for it; `expired`
/// further distinguishes expiry from capacity eviction.
pub struct CacheEvent<K, V> {
  kind: EventKind,
  key: K,
  old_value: Option<Arc<V>>,
  new_value: Option<Arc<V>>,
  synthetic: bool,
  expired: bool,
}

impl<K, V> CacheEvent<K, V> {
  pub(crate) fn inserted(key: K, new_value: Arc<V>) -> Self {
    Self {
      kind: EventKind::Inserted,
      key,
      old_value: None,
      new_value: Some(new_value),
      synthetic: false,
      expired: false,
    }
  }

  pub(crate) fn updated(key: K, old_value: Arc<V>, new_value: Arc<V>) -> Self {
    Self {
      kind: EventKind::Updated,
      key,
      old_value: Some(old_value),
      new_value: Some(new_value),
      synthetic: false,
      expired: false,
    }
  }

  pub(crate) fn deleted(key: K, old_value: Arc<V>) -> Self {
    Self {
      kind: EventKind::Deleted,
      key,
      old_value: Some(old_value),
      new_value: None,
      synthetic: false,
      expired: false,
    }
  }

  pub(crate) fn evicted(key: K, old_value: Arc<V>, expired: bool) -> Self {
    Self {
      kind: EventKind::Deleted,
      key,
      old_value: Some(old_value),
      new_value: None,
      synthetic: true,
      expired,
    }
  }

  pub fn kind(&self) -> EventKind {
    self.kind
  }

  pub fn key(&self) -> &K {
    &self.key
  }

  pub fn old_value(&self) -> Option<&Arc<V>> {
    self.old_value.as_ref()
  }

  pub fn new_value(&self) -> Option<&Arc<V>> {
    self.new_value.as_ref()
  }

  pub fn is_synthetic(&self) -> bool {
    self.synthetic
  }

  pub fn is_expired(&self) -> bool {
    self.expired
  }

  /// Returns a copy of this event with both values stripped.
  pub fn to_lite(&self) -> Self
  where
    K: Clone,
  {
    Self {
      kind: self.kind,
      key: self.key.clone(),
      old_value: None,
      new_value: None,
      synthetic: self.synthetic,
      expired: self.expired,
    }
  }
}

impl<K: Clone, V> Clone for CacheEvent<K, V> {
  fn clone(&self) -> Self {
    Self {
      kind: self.kind,
      key: self.key.clone(),
      old_value: self.old_value.clone(),
      new_value: self.new_value.clone(),
      synthetic: self.synthetic,
      expired: self.expired,
    }
  }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEvent<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEvent")
      .field("kind", &self.kind)
      .field("key", &self.key)
      .field("old_value", &self.old_value)
      .field("new_value", &self.new_value)
      .field("synthetic", &self.synthetic)
      .field("expired", &self.expired)
      .finish()
  }
}

/// A listener registered with the cache to observe entry changes.
///
/// Callbacks run synchronously on the thread performing the mutation, after
/// the change is applied. The key's shard stays closed to other writers until
/// the callbacks return, which keeps events for a key in mutation order.
/// Readers are not held up, and a listener may read the cache, but it must
/// not write to it.
pub trait MapListener<K, V>: Send + Sync {
  fn on_insert(&self, _event: &CacheEvent<K, V>) {}

  fn on_update(&self, _event: &CacheEvent<K, V>) {}

  fn on_delete(&self, _event: &CacheEvent<K, V>) {}
}

/// Selects which events a registration receives.
pub enum EventFilter<K, V> {
  /// Every event.
  All,
  /// Events for a single key.
  Key(K),
  /// Events accepted by the predicate. Two `Matching` filters are the same
  /// filter only if they share the same `Arc`.
  Matching(Arc<dyn Fn(&CacheEvent<K, V>) -> bool + Send + Sync>),
}

impl<K, V> EventFilter<K, V> {
  /// Wraps a predicate into a filter.
  pub fn matching<F>(predicate: F) -> Self
  where
    F: Fn(&CacheEvent<K, V>) -> bool + Send + Sync + 'static,
  {
    EventFilter::Matching(Arc::new(predicate))
  }

  fn accepts(&self, event: &CacheEvent<K, V>) -> bool
  where
    K: Eq,
  {
    match self {
      EventFilter::All => true,
      EventFilter::Key(key) => key == event.key(),
      EventFilter::Matching(predicate) => predicate(event),
    }
  }

  fn same_as(&self, other: &Self) -> bool
  where
    K: Eq,
  {
    match (self, other) {
      (EventFilter::All, EventFilter::All) => true,
      (EventFilter::Key(a), EventFilter::Key(b)) => a == b,
      (EventFilter::Matching(a), EventFilter::Matching(b)) => {
        Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
      }
      _ => false,
    }
  }
}

impl<K: Clone, V> Clone for EventFilter<K, V> {
  fn clone(&self) -> Self {
    match self {
      EventFilter::All => EventFilter::All,
      EventFilter::Key(key) => EventFilter::Key(key.clone()),
      EventFilter::Matching(predicate) => EventFilter::Matching(predicate.clone()),
    }
  }
}

impl<K: fmt::Debug, V> fmt::Debug for EventFilter<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventFilter::All => write!(f, "All"),
      EventFilter::Key(key) => f.debug_tuple("Key").field(key).finish(),
      EventFilter::Matching(_) => write!(f, "Matching(..)"),
    }
  }
}

struct Registration<K, V> {
  listener: Arc<dyn MapListener<K, V>>,
  filter: EventFilter<K, V>,
  lite: bool,
}

impl<K: Clone, V> Clone for Registration<K, V> {
  fn clone(&self) -> Self {
    Self {
      listener: self.listener.clone(),
      filter: self.filter.clone(),
      lite: self.lite,
    }
  }
}

#[inline]
fn same_listener<K, V>(a: &Arc<dyn MapListener<K, V>>, b: &Arc<dyn MapListener<K, V>>) -> bool {
  Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Fans events out to registered listeners in registration order.
///
/// The registration list is copy-on-write: `fire` clones the current `Arc`
/// and iterates it without holding any lock, so listeners may be added or
/// removed while a dispatch is in flight.
pub struct EventDispatcher<K, V> {
  registrations: RwLock<Arc<Vec<Registration<K, V>>>>,
  count: AtomicUsize,
}

impl<K, V> EventDispatcher<K, V>
where
  K: Eq + Clone,
{
  pub fn new() -> Self {
    Self {
      registrations: RwLock::new(Arc::new(Vec::new())),
      count: AtomicUsize::new(0),
    }
  }

  /// Returns `true` when no listener is registered. Callers check this before
  /// building an event so the write path pays nothing without listeners.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.count.load(Ordering::Acquire) == 0
  }

  pub fn len(&self) -> usize {
    self.count.load(Ordering::Acquire)
  }

  /// Registers `listener` for events accepted by `filter`. A `lite`
  /// registration receives events without old and new values.
  pub fn subscribe(&self, listener: Arc<dyn MapListener<K, V>>, filter: EventFilter<K, V>, lite: bool) {
    let mut guard = self.registrations.write();
    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(Registration {
      listener,
      filter,
      lite,
    });
    self.count.store(next.len(), Ordering::Release);
    *guard = Arc::new(next);
  }

  /// Removes the first registration of `listener` with an equal `filter`.
  /// Returns `false` if there was none.
  pub fn unsubscribe(&self, listener: &Arc<dyn MapListener<K, V>>, filter: &EventFilter<K, V>) -> bool {
    let mut guard = self.registrations.write();
    let position = guard
      .iter()
      .position(|reg| same_listener(&reg.listener, listener) && reg.filter.same_as(filter));

    match position {
      Some(index) => {
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.remove(index);
        self.count.store(next.len(), Ordering::Release);
        *guard = Arc::new(next);
        true
      }
      None => false,
    }
  }

  /// Delivers `event` to every matching registration.
  pub fn fire(&self, event: &CacheEvent<K, V>) {
    if self.is_empty() {
      return;
    }

    let snapshot = self.registrations.read().clone();
    let mut lite: Option<CacheEvent<K, V>> = None;

    for reg in snapshot.iter() {
      if !reg.filter.accepts(event) {
        continue;
      }

      let delivered = if reg.lite {
        &*lite.get_or_insert_with(|| event.to_lite())
      } else {
        event
      };

      match delivered.kind() {
        EventKind::Inserted => reg.listener.on_insert(delivered),
        EventKind::Updated => reg.listener.on_update(delivered),
        EventKind::Deleted => reg.listener.on_delete(delivered),
      }
    }
  }
}

impl<K: Eq + Clone, V> Default for EventDispatcher<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V> fmt::Debug for EventDispatcher<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventDispatcher")
      .field("listeners", &self.count.load(Ordering::Relaxed))
      .finish()
  }
}
