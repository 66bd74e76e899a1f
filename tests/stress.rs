use annforest::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn random_dataset(n: usize, dim: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|_| (0..dim).map(|_| normal.sample(&mut rng)).collect())
        .collect();
    Dataset::from_rows(&rows).unwrap()
}

fn kdtree_mode(seed: u64) -> BuildMode {
    BuildMode::Manual(
        IndexParameters::builder()
            .algorithm(Algorithm::KdTree)
            .trees(2)
            .checks(32)
            .seed(seed)
            .build()
            .unwrap(),
    )
}

// ---------------------------------------------------------------------------
// 1. Concurrent build + search
//    4 builder threads register indexes while 4 readers search the ones
//    already published. Verify no panics and every handle stays valid.
// ---------------------------------------------------------------------------

#[test]
fn stress_concurrent_build_and_search() {
    let engine = Arc::new(Engine::with_metrics());
    let published = Arc::new(parking_lot::Mutex::new(Vec::<(IndexHandle, Dataset)>::new()));
    let done = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();

    for t in 0..4u64 {
        let engine = Arc::clone(&engine);
        let published = Arc::clone(&published);
        workers.push(thread::spawn(move || {
            for i in 0..10u64 {
                let ds = random_dataset(300, 8, t * 100 + i);
                let out = engine.build_index(&ds, &kdtree_mode(i)).unwrap();
                published.lock().push((out.handle, ds));
            }
        }));
    }

    let searches = Arc::new(AtomicUsize::new(0));
    let mut readers = Vec::new();
    for t in 0..4u64 {
        let engine = Arc::clone(&engine);
        let published = Arc::clone(&published);
        let done = Arc::clone(&done);
        let searches = Arc::clone(&searches);
        readers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(1000 + t);
            while !done.load(Ordering::Relaxed) {
                let pick = {
                    let list = published.lock();
                    if list.is_empty() {
                        None
                    } else {
                        Some(list[rng.gen_range(0..list.len())].clone())
                    }
                };
                let Some((handle, ds)) = pick else {
                    thread::yield_now();
                    continue;
                };
                let row = rng.gen_range(0..ds.len());
                let queries = ds.select(&[row]).unwrap();
                let res = engine
                    .find_nearest_neighbors_index(handle, &queries, 3, None)
                    .unwrap();
                assert_eq!(res[0].len(), 3);
                assert_eq!(res[0][0], row, "self query must return itself first");
                searches.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for w in workers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(engine.len(), 40);
    let m = engine.metrics().unwrap();
    assert_eq!(m.build_count, 40);
    assert_eq!(m.query_count as usize, searches.load(Ordering::Relaxed));
}

// ---------------------------------------------------------------------------
// 2. Free under concurrent reads
//    Readers hammer a handle while another thread frees it. Every search
//    either succeeds with a full result or fails with InvalidHandle.
// ---------------------------------------------------------------------------

#[test]
fn stress_free_under_concurrent_reads() {
    let engine = Arc::new(Engine::new());
    let ds = random_dataset(2000, 16, 7);
    let out = engine.build_index(&ds, &kdtree_mode(3)).unwrap();
    let handle = out.handle;

    let invalid = Arc::new(AtomicUsize::new(0));
    let mut readers = Vec::new();
    for t in 0..6u64 {
        let engine = Arc::clone(&engine);
        let ds = ds.clone();
        let invalid = Arc::clone(&invalid);
        readers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(t);
            for _ in 0..200 {
                let rows: Vec<usize> = (0..8).map(|_| rng.gen_range(0..ds.len())).collect();
                let queries = ds.select(&rows).unwrap();
                match engine.find_nearest_neighbors_index(handle, &queries, 5, None) {
                    Ok(res) => {
                        assert_eq!(res.len(), 8);
                        assert!(res.iter().all(|r| r.len() == 5));
                    }
                    Err(AnnError::InvalidHandle(h)) => {
                        assert_eq!(h, handle);
                        invalid.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }));
    }

    thread::sleep(std::time::Duration::from_millis(5));
    engine.free_index(handle).unwrap();

    for r in readers {
        r.join().unwrap();
    }
    assert!(engine.is_empty());
    assert!(matches!(
        engine.find_nearest_neighbors_index(handle, &ds, 1, None),
        Err(AnnError::InvalidHandle(_))
    ));
}

// ---------------------------------------------------------------------------
// 3. Rapid build-free cycles
//    Slots get recycled; stale handles must never resolve to a new index.
// ---------------------------------------------------------------------------

#[test]
fn stress_rapid_build_free_cycles() {
    let engine = Arc::new(Engine::new());
    let mut workers = Vec::new();

    for t in 0..4u64 {
        let engine = Arc::clone(&engine);
        workers.push(thread::spawn(move || {
            let linear = BuildMode::Manual(
                IndexParameters::builder()
                    .algorithm(Algorithm::Linear)
                    .build()
                    .unwrap(),
            );
            let mut stale = Vec::new();
            for i in 0..100u64 {
                let ds = random_dataset(16, 2, t * 1000 + i);
                let out = engine.build_index(&ds, &linear).unwrap();
                for old in &stale {
                    assert!(engine.index(*old).is_err(), "stale handle {old} resolved");
                }
                engine.free_index(out.handle).unwrap();
                stale.push(out.handle);
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }
    assert!(engine.is_empty());
}

// ---------------------------------------------------------------------------
// 4. Large-scale build
//    100,000 points of dim 32; check stats and that self queries resolve.
// ---------------------------------------------------------------------------

#[test]
fn stress_large_scale_build() {
    let ds = random_dataset(100_000, 32, 11);
    let p = IndexParameters::builder()
        .algorithm(Algorithm::KdTree)
        .trees(4)
        .checks(256)
        .seed(5)
        .build()
        .unwrap();
    let index = Index::build(&ds, &p).unwrap();

    let stats = index.stats();
    assert_eq!(stats.num_points, 100_000);
    assert_eq!(stats.dimension, 32);
    assert!(stats.index_memory_bytes > 0);

    let queries = ds.select(&[0, 12_345, 99_999]).unwrap();
    let res = index.knn_search_batch(&queries, 10, 256).unwrap();
    for (r, expected) in res.iter().zip([0, 12_345, 99_999]) {
        assert_eq!(r.len(), 10);
        assert_eq!(r[0].index, expected);
    }
}
