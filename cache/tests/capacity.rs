mod common;

use common::{key, recorded_cache, Recorder};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tandem_cache::{
  CacheBuilder, CacheError, EventFilter, EventKind, EvictionKind, Expiry, ManualClock, UnitCalculator,
};

#[test]
fn test_fifteen_puts_into_ten_units() {
  let (cache, recorder) = recorded_cache(CacheBuilder::default().high_units(10).unit_factor(1));

  for i in 0..15 {
    cache.put(key(i), i, Expiry::Default).unwrap();
  }

  assert!(cache.len() <= 10);
  assert_eq!(cache.units(), 10);

  let evictions: Vec<_> = recorder
    .events()
    .into_iter()
    .filter(|seen| seen.kind == EventKind::Deleted)
    .collect();
  assert!(evictions.len() >= 5);
  assert!(evictions.iter().all(|seen| seen.synthetic && !seen.expired));
  assert_eq!(cache.statistics().snapshot().evictions, evictions.len() as u64);
}

#[test]
fn test_lru_keeps_recently_read_entries() {
  let cache = CacheBuilder::default().high_units(3).build().unwrap();
  cache.put(1, "one", Expiry::Default).unwrap();
  cache.put(2, "two", Expiry::Default).unwrap();
  cache.put(3, "three", Expiry::Default).unwrap();

  assert!(cache.get(&1).is_some());
  cache.put(4, "four", Expiry::Default).unwrap();

  assert!(cache.contains_key(&1));
  assert!(!cache.contains_key(&2), "key 2 was the least recently used");
  assert!(cache.contains_key(&3));
  assert!(cache.contains_key(&4));
}

#[test]
fn test_fifo_ignores_reads() {
  let cache = CacheBuilder::default()
    .high_units(3)
    .eviction(EvictionKind::Fifo)
    .build()
    .unwrap();
  cache.put(1, "one", Expiry::Default).unwrap();
  cache.put(2, "two", Expiry::Default).unwrap();
  cache.put(3, "three", Expiry::Default).unwrap();

  assert!(cache.get(&1).is_some());
  cache.put(1, "uno", Expiry::Default).unwrap();
  cache.put(4, "four", Expiry::Default).unwrap();

  assert!(!cache.contains_key(&1), "key 1 was inserted first");
  assert_eq!(cache.len(), 3);
}

#[test]
fn test_expired_entries_go_before_live_ones() {
  let clock = ManualClock::new();
  let (cache, recorder) = recorded_cache(CacheBuilder::default().high_units(3).clock(clock.clone()));

  cache.put(key(0), 0, Expiry::After(Duration::from_millis(10))).unwrap();
  cache.put(key(1), 1, Expiry::Never).unwrap();
  cache.put(key(2), 2, Expiry::Never).unwrap();
  clock.advance(Duration::from_millis(20));
  recorder.clear();

  cache.put(key(3), 3, Expiry::Never).unwrap();

  assert_eq!(cache.len(), 3);
  for i in 1..=3 {
    assert!(cache.contains_key(&key(i)));
  }

  let deletes: Vec<_> = recorder
    .events()
    .into_iter()
    .filter(|seen| seen.kind == EventKind::Deleted)
    .collect();
  assert_eq!(deletes.len(), 1);
  assert_eq!(deletes[0].key, key(0));
  assert!(deletes[0].synthetic && deletes[0].expired);

  let stats = cache.statistics().snapshot();
  assert_eq!(stats.evictions, 0);
  assert_eq!(stats.expirations, 1);
}

#[test]
fn test_set_high_units_evicts_immediately() {
  let cache = CacheBuilder::default().build().unwrap();
  for i in 0..10 {
    cache.put(i, i, Expiry::Default).unwrap();
  }
  assert_eq!(cache.high_units(), i64::MAX);

  cache.set_high_units(4).unwrap();
  assert_eq!(cache.len(), 4);
  assert_eq!(cache.units(), 4);
  assert_eq!(cache.statistics().snapshot().evictions, 6);

  assert!(matches!(cache.set_high_units(-1), Err(CacheError::InvalidArgument(_))));
  assert_eq!(cache.high_units(), 4);

  cache.set_high_units(0).unwrap();
  assert_eq!(cache.high_units(), i64::MAX);
}

#[test]
fn test_unit_factor_scales_capacity() {
  let cache = CacheBuilder::<u32, u64>::default()
    .high_units(2)
    .unit_factor(10)
    .unit_calculator(|_: &u32, value: &u64| *value as i64)
    .build()
    .unwrap();

  cache.put(1, 8, Expiry::Default).unwrap();
  cache.put(2, 8, Expiry::Default).unwrap();
  assert_eq!(cache.units(), 2);
  assert_eq!(cache.len(), 2);

  cache.put(3, 8, Expiry::Default).unwrap();
  assert!(!cache.contains_key(&1));
  assert_eq!(cache.units(), 2);

  assert!(matches!(cache.set_unit_factor(5), Err(CacheError::InvalidState(_))));
  assert!(matches!(cache.set_unit_factor(0), Err(CacheError::InvalidArgument(_))));

  cache.clear();
  cache.set_unit_factor(4).unwrap();
  assert_eq!(cache.unit_factor(), 4);
}

#[test]
fn test_set_unit_calculator_reweighs_without_events() {
  let recorder = Recorder::<String>::new();
  let cache = CacheBuilder::<String, String>::default()
    .listener(recorder.clone(), EventFilter::All, true)
    .build()
    .unwrap();
  for word in ["a", "bb", "ccc"] {
    cache.put(word.to_string(), word.to_string(), Expiry::Default).unwrap();
  }
  assert_eq!(cache.units(), 3);
  recorder.clear();

  let by_length: Arc<dyn UnitCalculator<String, String>> = Arc::new(|_: &String, v: &String| v.len() as i64);
  cache.set_unit_calculator(Some(by_length)).unwrap();
  assert_eq!(cache.units(), 6);
  assert_eq!(cache.cache_entry(&"ccc".to_string()).unwrap().units(), 3);
  assert!(recorder.events().is_empty());

  let negative: Arc<dyn UnitCalculator<String, String>> = Arc::new(|_: &String, _: &String| -1);
  let err = cache.set_unit_calculator(Some(negative)).unwrap_err();
  assert!(matches!(err, CacheError::InvalidState(_)));
  assert_eq!(cache.units(), 6);

  cache.set_unit_calculator(None).unwrap();
  assert_eq!(cache.units(), 3);
}

#[test]
fn test_heavier_calculator_enforces_capacity() {
  let cache = CacheBuilder::default().high_units(6).build().unwrap();
  for i in 0..6u32 {
    cache.put(i, i, Expiry::Default).unwrap();
  }

  let doubled: Arc<dyn UnitCalculator<u32, u32>> = Arc::new(|_: &u32, _: &u32| 2);
  cache.set_unit_calculator(Some(doubled)).unwrap();
  assert_eq!(cache.len(), 3);
  assert_eq!(cache.units(), 6);
}

#[test]
fn test_randomized_weight_invariant() {
  let mut rng = Pcg64::seed_from_u64(0x5eed);
  let cache = CacheBuilder::<u32, u32>::default()
    .high_units(20)
    .unit_factor(2)
    .shards(4)
    .unit_calculator(|_: &u32, value: &u32| (*value % 6) as i64)
    .build()
    .unwrap();

  for _ in 0..5_000 {
    let key = rng.random_range(0..200u32);
    if rng.random_bool(0.8) {
      let value = rng.random_range(0..1_000u32);
      cache.put(key, value, Expiry::Default).unwrap();
    } else {
      cache.remove(&key);
    }
    assert!(cache.units() <= 20, "units {} over the limit", cache.units());
  }
}

#[test]
fn test_concurrent_writers_respect_capacity() {
  let cache = CacheBuilder::default().high_units(100).shards(8).build().unwrap();

  let handles: Vec<_> = (0..8u64)
    .map(|t| {
      let cache = cache.clone();
      thread::spawn(move || {
        for i in 0..1_000u64 {
          let key = t * 1_000 + i;
          cache.put(key, i, Expiry::Default).unwrap();
          cache.get(&(t * 1_000 + i / 2));
        }
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }

  assert!(cache.units() <= 100);
  assert_eq!(cache.len() as u64, cache.units());
}
