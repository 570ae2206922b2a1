use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tandem_cache::{Cache, CacheBuilder, Expiry};

const NUM_ITEMS: u64 = 10_000;

fn populated_cache(high_units: i64) -> Cache<u64, u64> {
  let cache = CacheBuilder::default().high_units(high_units).build().unwrap();
  // Pre-populate in a single thread for a consistent start.
  for i in 0..NUM_ITEMS {
    cache.put(i, i, Expiry::Never).unwrap();
  }
  cache
}

fn shuffled(range: std::ops::Range<u64>) -> Vec<u64> {
  let mut keys: Vec<u64> = range.collect();
  let mut rng = Pcg64::seed_from_u64(0);
  keys.shuffle(&mut rng);
  keys
}

fn single_thread_ops(c: &mut Criterion) {
  let mut group = c.benchmark_group("single_thread");
  group.throughput(Throughput::Elements(NUM_ITEMS));

  let cache = populated_cache(0);
  let hit_keys = shuffled(0..NUM_ITEMS);
  let miss_keys = shuffled(NUM_ITEMS..2 * NUM_ITEMS);

  group.bench_function("get_hit", |b| {
    b.iter(|| {
      for key in &hit_keys {
        black_box(cache.get(key));
      }
    })
  });

  group.bench_function("get_miss", |b| {
    b.iter(|| {
      for key in &miss_keys {
        black_box(cache.get(key));
      }
    })
  });

  // Bounded so every insert also runs eviction.
  let bounded = populated_cache(NUM_ITEMS as i64);
  group.bench_function("put_evicting", |b| {
    let mut next = NUM_ITEMS;
    b.iter(|| {
      for _ in 0..NUM_ITEMS {
        bounded.put(next, next, Expiry::Never).unwrap();
        next += 1;
      }
    })
  });

  group.finish();
}

fn concurrent_gets(c: &mut Criterion) {
  let mut group = c.benchmark_group("concurrent_get_hit");
  group.throughput(Throughput::Elements(NUM_ITEMS));

  for concurrency in [2usize, 4, 8] {
    let cache = Arc::new(populated_cache(0));
    let keys = shuffled(0..NUM_ITEMS);
    let mut keys_by_thread = vec![Vec::new(); concurrency];
    for (i, key) in keys.into_iter().enumerate() {
      keys_by_thread[i % concurrency].push(key);
    }
    let keys_by_thread = Arc::new(keys_by_thread);

    group.bench_with_input(BenchmarkId::from_parameter(concurrency), &concurrency, |b, &concurrency| {
      b.iter_custom(|iters| {
        let mut total = Duration::ZERO;
        for _ in 0..iters {
          let barrier = Arc::new(Barrier::new(concurrency + 1));
          let handles: Vec<_> = (0..concurrency)
            .map(|t| {
              let cache = cache.clone();
              let keys_by_thread = keys_by_thread.clone();
              let barrier = barrier.clone();
              thread::spawn(move || {
                barrier.wait();
                for key in &keys_by_thread[t] {
                  black_box(cache.get(key));
                }
              })
            })
            .collect();

          let start = Instant::now();
          barrier.wait();
          for handle in handles {
            handle.join().unwrap();
          }
          total += start.elapsed();
        }
        total
      })
    });
  }

  group.finish();
}

criterion_group!(benches, single_thread_ops, concurrent_gets);
criterion_main!(benches);
