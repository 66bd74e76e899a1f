use std::sync::Arc;

use crate::autotune::autotune;
use crate::dataset::Dataset;
use crate::error::{check_buffer, reserve_buffer, Result};
use crate::index::Index;
use crate::metrics::{MetricsCollector, MetricsSnapshot, QueryTimer};
use crate::params::{Algorithm, BuildMode, IndexParameters};
use crate::registry::{IndexHandle, IndexRegistry};
use crate::search::Neighbor;

/// Result of [`Engine::build_index`].
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub handle: IndexHandle,
    /// Parameters the index was actually built with.
    pub params: IndexParameters,
    /// Linear scan time over index search time, measured by the autotuner.
    /// `Some(1.0)` for linear indexes, `None` for other manual builds.
    pub speedup: Option<f32>,
}

/// Entry point for building, querying and releasing indexes.
///
/// Each engine owns its own registry; handles from one engine mean nothing
/// to another. All methods take `&self` and are safe to call from many
/// threads at once.
#[derive(Debug, Default)]
pub struct Engine {
    registry: IndexRegistry,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that records [`MetricsSnapshot`] counters.
    pub fn with_metrics() -> Self {
        Self {
            registry: IndexRegistry::new(),
            metrics: Some(Arc::new(MetricsCollector::new())),
        }
    }

    /// Build an index over `dataset` and register it.
    pub fn build_index(&self, dataset: &Dataset, mode: &BuildMode) -> Result<BuildOutcome> {
        let (index, speedup) = self.build(dataset, mode)?;
        let params = index.params().clone();
        let handle = self.registry.insert(index)?;
        Ok(BuildOutcome {
            handle,
            params,
            speedup,
        })
    }

    /// One-shot search: build a temporary index, answer `queries`, discard it.
    ///
    /// Returns up to `nn` point indices per query, nearest first, together
    /// with the effective parameters.
    pub fn find_nearest_neighbors(
        &self,
        dataset: &Dataset,
        queries: &Dataset,
        nn: usize,
        mode: &BuildMode,
    ) -> Result<(Vec<Vec<usize>>, IndexParameters)> {
        dataset.check_queries(queries)?;
        let (index, _) = self.build(dataset, mode)?;
        let checks = index.params().checks;
        let results = self.search(&index, queries, nn, checks)?;
        Ok((results, index.params().clone()))
    }

    /// Search a registered index. `checks` overrides the index's default
    /// budget when given.
    pub fn find_nearest_neighbors_index(
        &self,
        handle: IndexHandle,
        queries: &Dataset,
        nn: usize,
        checks: Option<usize>,
    ) -> Result<Vec<Vec<usize>>> {
        let index = self.registry.get(handle)?;
        let checks = checks.unwrap_or(index.params().checks);
        self.search(&index, queries, nn, checks)
    }

    /// Destroy the index behind `handle`. A second free of the same handle
    /// fails with `InvalidHandle`.
    pub fn free_index(&self, handle: IndexHandle) -> Result<()> {
        self.registry.remove(handle)?;
        if let Some(ref m) = self.metrics {
            m.record_free();
        }
        Ok(())
    }

    /// Shared reference to a registered index.
    pub fn index(&self, handle: IndexHandle) -> Result<Arc<Index>> {
        self.registry.get(handle)
    }

    /// Register an index built elsewhere, e.g. one loaded from disk.
    pub fn register(&self, index: Index) -> Result<IndexHandle> {
        self.registry.insert(index)
    }

    /// Number of live indexes.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Snapshot of runtime metrics (`None` if metrics were not enabled).
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(|m| m.snapshot())
    }

    /// Reset metrics counters.
    pub fn reset_metrics(&self) {
        if let Some(ref m) = self.metrics {
            m.reset();
        }
    }

    fn build(&self, dataset: &Dataset, mode: &BuildMode) -> Result<(Index, Option<f32>)> {
        let built = match mode {
            BuildMode::Manual(params) => {
                let index = Index::build(dataset, params)?;
                let speedup = (index.algorithm() == Algorithm::Linear).then_some(1.0);
                (index, speedup)
            }
            BuildMode::Autotune(target) => {
                let (index, report) = autotune(dataset, target)?;
                (index, Some(report.speedup))
            }
        };
        if let Some(ref m) = self.metrics {
            m.record_build(matches!(mode, BuildMode::Autotune(_)));
        }
        Ok(built)
    }

    fn search(
        &self,
        index: &Index,
        queries: &Dataset,
        nn: usize,
        checks: usize,
    ) -> Result<Vec<Vec<usize>>> {
        check_buffer::<usize>(queries.len(), nn.min(index.size()))?;
        let timer = self.metrics.as_ref().map(|_| QueryTimer::new());
        let (neighbors, total_checks) = index.search_batch_counted(queries, nn, checks)?;
        if let (Some(m), Some(t)) = (&self.metrics, timer) {
            m.record_queries(queries.len() as u64, total_checks as u64, t.elapsed_ns());
        }

        let mut out = reserve_buffer::<Vec<usize>>(queries.len(), 1)?;
        for row in neighbors {
            out.push(row.iter().map(|n: &Neighbor| n.index).collect());
        }
        Ok(out)
    }
}
