//! Benchmark comparison: tree-based approximate search vs. exact linear scan.
//!
//! Generates random vectors, builds one index per algorithm, and compares
//! query speed and recall against the linear index.
//!
//! Run with:
//!   cargo run --example benchmark_comparison --release

use annforest::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashSet;
use std::time::{Duration, Instant};

const N: usize = 50_000;
const DIM: usize = 64;
const NUM_QUERIES: usize = 100;
const K: usize = 10;
const CHECKS: usize = 256;

fn timed_search(index: &Index, queries: &Dataset) -> (Vec<Vec<Neighbor>>, Duration) {
    let start = Instant::now();
    let results = index
        .knn_search_batch(queries, K, CHECKS)
        .expect("search failed");
    (results, start.elapsed())
}

fn recall(found: &[Vec<Neighbor>], truth: &[Vec<Neighbor>]) -> f64 {
    let mut total = 0.0_f64;
    for (got, want) in found.iter().zip(truth) {
        let true_ids: HashSet<usize> = want.iter().map(|n| n.index).collect();
        let hits = got.iter().filter(|n| true_ids.contains(&n.index)).count();
        total += hits as f64 / K as f64;
    }
    total / found.len() as f64
}

fn main() {
    println!("========================================");
    println!("  Tree indexes vs Linear Scan");
    println!("========================================");
    println!("  Points:     {}", N);
    println!("  Dimension:  {}", DIM);
    println!("  Queries:    {}", NUM_QUERIES);
    println!("  Top-K:      {}", K);
    println!("  Checks:     {}", CHECKS);
    println!();

    // ---------------------------------------------------------------
    // 1. Generate random vectors.
    // ---------------------------------------------------------------
    println!("[1/3] Generating {} random {}-d vectors...", N, DIM);
    let mut rng = StdRng::seed_from_u64(7);
    let normal = Normal::new(0.0_f32, 1.0).unwrap();
    let rows: Vec<Vec<f32>> = (0..N + NUM_QUERIES)
        .map(|_| (0..DIM).map(|_| normal.sample(&mut rng)).collect())
        .collect();
    let dataset = Dataset::from_rows(&rows[..N]).expect("dataset");
    let queries = Dataset::from_rows(&rows[N..]).expect("queries");
    println!("      Done.\n");

    // ---------------------------------------------------------------
    // 2. Exact ground truth from the linear index.
    // ---------------------------------------------------------------
    println!("[2/3] Running {} linear-scan queries (top-{})...", NUM_QUERIES, K);
    let linear_params = IndexParameters::builder()
        .algorithm(Algorithm::Linear)
        .build()
        .expect("params");
    let linear = Index::build(&dataset, &linear_params).expect("linear build");
    let (truth, linear_elapsed) = timed_search(&linear, &queries);
    println!("      Linear total time: {:.2?}\n", linear_elapsed);

    // ---------------------------------------------------------------
    // 3. Build and query each tree index.
    // ---------------------------------------------------------------
    println!("[3/3] Building and querying tree indexes...");
    let mut rows_out = Vec::new();
    for algorithm in [Algorithm::KdTree, Algorithm::KMeans, Algorithm::Composite] {
        let params = IndexParameters::builder()
            .algorithm(algorithm)
            .trees(8)
            .branching(32)
            .iterations(5)
            .seed(42)
            .build()
            .expect("params");
        let build_start = Instant::now();
        let index = Index::build(&dataset, &params).expect("build failed");
        let build_elapsed = build_start.elapsed();
        let (found, elapsed) = timed_search(&index, &queries);
        rows_out.push((algorithm, build_elapsed, elapsed, recall(&found, &truth)));
        println!("      {} built in {:.2?}", algorithm, build_elapsed);
    }

    // ---------------------------------------------------------------
    // 4. Print summary.
    // ---------------------------------------------------------------
    println!();
    println!("========================================");
    println!("  Summary");
    println!("========================================");
    println!(
        "  {:<10} {:>12} {:>12} {:>9} {:>9}",
        "Algorithm", "Build", "Search", "Speedup", "Recall"
    );
    println!("  {:-<10} {:-<12} {:-<12} {:-<9} {:-<9}", "", "", "", "", "");
    for (algorithm, build, search, r) in rows_out {
        let speedup = linear_elapsed.as_secs_f64() / search.as_secs_f64();
        println!(
            "  {:<10} {:>12.2?} {:>12.2?} {:>8.1}x {:>8.1}%",
            algorithm.to_string(),
            build,
            search,
            speedup,
            r * 100.0
        );
    }
    println!("========================================");
}
