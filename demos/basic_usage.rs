//! Basic usage of `annforest`.
//!
//! Demonstrates the parameter builder, building and searching through an
//! engine, inspecting stats and metrics, autotuning, the numeric parameter
//! tuple, and freeing handles.
//!
//! Run with:
//!   cargo run --example basic_usage

use annforest::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const DIM: usize = 32;
const NUM_POINTS: usize = 10_000;

fn main() -> annforest::Result<()> {
    // ---------------------------------------------------------------
    // 1. Generate 10,000 random 32-d points.
    // ---------------------------------------------------------------
    println!("=== Step 1: Generate {} random points ===", NUM_POINTS);
    let mut rng = StdRng::seed_from_u64(123);
    let normal = Normal::new(0.0_f32, 1.0).unwrap();
    let rows: Vec<Vec<f32>> = (0..NUM_POINTS)
        .map(|_| (0..DIM).map(|_| normal.sample(&mut rng)).collect())
        .collect();
    let dataset = Dataset::from_rows(&rows)?;
    println!("Dataset: {} points, dim={}\n", dataset.len(), dataset.dim());

    // ---------------------------------------------------------------
    // 2. Build a KD-forest with manual parameters.
    // ---------------------------------------------------------------
    println!("=== Step 2: Build a KD-forest ===");
    let engine = Engine::with_metrics();
    let params = IndexParameters::builder()
        .algorithm(Algorithm::KdTree)
        .trees(8)
        .checks(128)
        .seed(42)
        .build()?;
    let built = engine.build_index(&dataset, &BuildMode::Manual(params))?;
    println!("Handle: {}", built.handle);
    println!("Effective params tuple: {:?}\n", built.params.to_tuple());

    // ---------------------------------------------------------------
    // 3. Query with one of the indexed points; print top-5 results.
    // ---------------------------------------------------------------
    println!("=== Step 3: Top-5 nearest neighbors of point #0 ===");
    let index = engine.index(built.handle)?;
    for (rank, n) in index.knn_search(&rows[0], 5, 128)?.iter().enumerate() {
        println!("  rank={} index={:<6} distance={:.6}", rank + 1, n.index, n.distance);
    }
    println!();

    // ---------------------------------------------------------------
    // 4. Index statistics.
    // ---------------------------------------------------------------
    println!("=== Step 4: Index statistics ===");
    let stats = index.stats();
    println!("  {}", stats);
    println!("  Trees:  {}", stats.num_trees);
    println!("  Nodes:  {}", stats.num_nodes);
    println!(
        "  Memory: {:.2} MB index + {:.2} MB data",
        stats.index_memory_bytes as f64 / (1024.0 * 1024.0),
        stats.dataset_memory_bytes as f64 / (1024.0 * 1024.0)
    );
    println!();

    // ---------------------------------------------------------------
    // 5. Batch search through the handle, overriding checks.
    // ---------------------------------------------------------------
    println!("=== Step 5: Batch search with checks=32 ===");
    let queries = dataset.select(&[1, 2, 3])?;
    let results = engine.find_nearest_neighbors_index(built.handle, &queries, 3, Some(32))?;
    for (q, row) in results.iter().enumerate() {
        println!("  query {} -> {:?}", q + 1, row);
    }
    println!();

    // ---------------------------------------------------------------
    // 6. Autotune for 90% precision.
    // ---------------------------------------------------------------
    println!("=== Step 6: Autotune (target precision 0.9) ===");
    let (tuned, report) = autotune(&dataset, &AutotuneTarget::new(0.9).with_seed(7))?;
    println!("  {}", report);
    for c in &report.candidates {
        println!(
            "  {:<9} trees={:<2} branching={:<3} iterations={:<2} checks={:<5} \
             precision={:.2} cost={:.2}",
            c.params.algorithm.to_string(),
            c.params.trees,
            c.params.branching,
            c.params.iterations,
            c.params.checks,
            c.precision,
            c.cost
        );
    }
    let tuned_handle = engine.register(tuned)?;
    println!();

    // ---------------------------------------------------------------
    // 7. Numeric parameter tuple: [-1, precision, build_w, memory_w].
    // ---------------------------------------------------------------
    println!("=== Step 7: One-shot search from a parameter tuple ===");
    let mode = BuildMode::from_tuple(&[-1.0, 0.8, 0.0, 0.0])?;
    let (nn, effective) = engine.find_nearest_neighbors(&dataset, &queries, 2, &mode)?;
    println!("  Results:   {:?}", nn);
    println!("  Effective: {:?}\n", effective.to_tuple());

    // ---------------------------------------------------------------
    // 8. Metrics, then free both handles.
    // ---------------------------------------------------------------
    println!("=== Step 8: Metrics and cleanup ===");
    if let Some(m) = engine.metrics() {
        println!("  {}", m);
    }
    engine.free_index(built.handle)?;
    engine.free_index(tuned_handle)?;
    println!("  Live indexes after free: {}", engine.len());
    match engine.free_index(built.handle) {
        Err(e) => println!("  Second free rejected: {}", e),
        Ok(()) => println!("  Second free unexpectedly succeeded"),
    }

    println!("\nDone.");
    Ok(())
}
