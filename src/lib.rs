//! # annforest
//!
//! Approximate nearest-neighbor (ANN) search over dense `f32` vectors using
//! randomized KD-forests and hierarchical k-means trees, with an exact
//! linear scan as baseline and an autotuner that picks the algorithm and
//! parameters for a target precision.
//!
//! Indexes live in an [`Engine`], which hands out opaque [`IndexHandle`]s.
//!
//! ## Quick start
//!
//! ```rust
//! use annforest::{Algorithm, BuildMode, Dataset, Engine, IndexParameters};
//!
//! // A 20 x 10 grid of 2-d points; point `i` is (i % 20, i / 20).
//! let rows: Vec<Vec<f32>> = (0..200)
//!     .map(|i| vec![(i % 20) as f32, (i / 20) as f32])
//!     .collect();
//! let dataset = Dataset::from_rows(&rows)?;
//!
//! let engine = Engine::new();
//! let params = IndexParameters::builder()
//!     .algorithm(Algorithm::KdTree)
//!     .trees(4)
//!     .checks(64)
//!     .build()?;
//! let built = engine.build_index(&dataset, &BuildMode::Manual(params))?;
//!
//! let queries = Dataset::from_rows(&[vec![3.0f32, 5.0]])?;
//! let nearest = engine.find_nearest_neighbors_index(built.handle, &queries, 3, None)?;
//! assert_eq!(nearest[0][0], 5 * 20 + 3);
//!
//! engine.free_index(built.handle)?;
//! # Ok::<(), annforest::AnnError>(())
//! ```
//!
//! Passing [`BuildMode::Autotune`] instead lets the engine choose the
//! algorithm; the chosen parameters come back in the build outcome.
//!
//! ## Feature flags
//!
//! | Flag          | Effect                                          |
//! |---------------|-------------------------------------------------|
//! | `parallel`    | Parallel tree builds and batch search via rayon |
//! | `persistence` | Save/load indexes to disk (serde + bincode)     |
//! | `python`      | Python bindings via PyO3                        |
//! | `full`        | Enables `parallel` + `persistence`              |

pub mod autotune;
pub mod composite;
pub mod dataset;
pub mod distance;
pub mod engine;
pub mod error;
pub mod index;
pub mod kdtree;
pub mod kmeans;
pub mod linear;
pub mod metrics;
pub mod params;
pub mod registry;
pub mod search;

#[cfg(feature = "persistence")]
pub mod persistence;

#[cfg(feature = "python")]
pub mod python;

// Re-exports for convenience.
pub use autotune::{autotune, AutotuneReport, CandidateReport};
pub use dataset::Dataset;
pub use distance::DistanceMetric;
pub use engine::{BuildOutcome, Engine};
pub use error::{AnnError, Result};
pub use index::{Index, IndexStats, IndexVariant, NearestNeighborIndex};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use params::{
    Algorithm, AutotuneTarget, BuildMode, CentersInit, IndexParameters, IndexParametersBuilder,
    CHECKS_UNLIMITED,
};
pub use registry::{IndexHandle, IndexRegistry};
pub use search::{KnnResultSet, Neighbor, SearchContext};
