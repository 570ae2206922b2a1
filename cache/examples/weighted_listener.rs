use std::sync::Arc;
use tandem_cache::{CacheBuilder, CacheEvent, EventFilter, Expiry, MapListener};

struct Logger;

impl MapListener<String, String> for Logger {
  fn on_insert(&self, event: &CacheEvent<String, String>) {
    println!("[Listener] inserted '{}'", event.key());
  }

  fn on_delete(&self, event: &CacheEvent<String, String>) {
    let cause = if event.is_synthetic() { "evicted" } else { "removed" };
    println!("[Listener] {} '{}'", cause, event.key());
  }
}

fn main() {
  // Entries weigh as many units as their value has bytes.
  let cache = CacheBuilder::default()
    .high_units(16)
    .unit_calculator(|_: &String, value: &String| value.len() as i64)
    .listener(Arc::new(Logger), EventFilter::All, true)
    .build()
    .unwrap();

  for word in ["alpha", "bravo", "charlie", "delta"] {
    cache.put(word.to_string(), word.to_string(), Expiry::Default).unwrap();
    println!("after '{}': {} units in {} entries", word, cache.units(), cache.len());
  }

  println!("statistics: {:?}", cache.statistics().snapshot());
}
