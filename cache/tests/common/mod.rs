#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tandem_cache::{Cache, CacheBuilder, CacheEvent, EventFilter, EventKind, MapListener};

/// What a listener saw, without the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen<K> {
  pub kind: EventKind,
  pub key: K,
  pub synthetic: bool,
  pub expired: bool,
  pub has_values: bool,
}

/// A listener that records every event it receives, in order.
pub struct Recorder<K> {
  seen: Mutex<Vec<Seen<K>>>,
}

impl<K: Clone> Recorder<K> {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      seen: Mutex::new(Vec::new()),
    })
  }

  pub fn events(&self) -> Vec<Seen<K>> {
    self.seen.lock().clone()
  }

  pub fn count(&self, kind: EventKind) -> usize {
    self.seen.lock().iter().filter(|seen| seen.kind == kind).count()
  }

  pub fn clear(&self) {
    self.seen.lock().clear();
  }

  fn record<V>(&self, event: &CacheEvent<K, V>) {
    self.seen.lock().push(Seen {
      kind: event.kind(),
      key: event.key().clone(),
      synthetic: event.is_synthetic(),
      expired: event.is_expired(),
      has_values: event.old_value().is_some() || event.new_value().is_some(),
    });
  }
}

impl<K: Clone + Send + Sync, V> MapListener<K, V> for Recorder<K> {
  fn on_insert(&self, event: &CacheEvent<K, V>) {
    self.record(event);
  }

  fn on_update(&self, event: &CacheEvent<K, V>) {
    self.record(event);
  }

  fn on_delete(&self, event: &CacheEvent<K, V>) {
    self.record(event);
  }
}

/// Builds a cache with a recorder listening to every event.
pub fn recorded_cache<V: Send + Sync + 'static>(
  builder: CacheBuilder<String, V>,
) -> (Cache<String, V>, Arc<Recorder<String>>) {
  let recorder = Recorder::new();
  let cache = builder
    .listener(recorder.clone(), EventFilter::All, false)
    .build()
    .unwrap();
  (cache, recorder)
}

pub fn key(i: usize) -> String {
  format!("key-{i}")
}
