use std::time::Instant;

use ndarray::ArrayView1;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::composite::CompositeIndex;
use crate::dataset::Dataset;
use crate::error::{check_buffer, reserve_buffer, AnnError, Result};
use crate::kdtree::KdTreeIndex;
use crate::kmeans::KMeansTreeIndex;
use crate::linear::LinearIndex;
use crate::params::{Algorithm, IndexParameters};
use crate::search::{KnnResultSet, Neighbor, SearchContext};

/// Capability shared by every concrete index structure.
pub trait NearestNeighborIndex: Send + Sync {
    /// Build over `dataset`. `params` has already been validated and carries
    /// a resolved seed.
    fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self>
    where
        Self: Sized;

    /// Offer candidates for `query` to `result`, spending from `ctx`'s budget.
    fn search(&self, query: &ArrayView1<f32>, result: &mut KnnResultSet, ctx: &mut SearchContext);

    /// Bytes held by derived structures, excluding the dataset itself.
    fn used_memory(&self) -> usize;

    /// Number of indexed points.
    fn size(&self) -> usize;
}

/// The built structure, tagged by algorithm.
#[derive(Debug, Clone)]
pub enum IndexVariant {
    Linear(LinearIndex),
    KdTree(KdTreeIndex),
    KMeans(KMeansTreeIndex),
    Composite(CompositeIndex),
}

impl IndexVariant {
    fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self> {
        Ok(match params.algorithm {
            Algorithm::Linear => IndexVariant::Linear(LinearIndex::build(dataset, params)?),
            Algorithm::KdTree => IndexVariant::KdTree(KdTreeIndex::build(dataset, params)?),
            Algorithm::KMeans => IndexVariant::KMeans(KMeansTreeIndex::build(dataset, params)?),
            Algorithm::Composite => {
                IndexVariant::Composite(CompositeIndex::build(dataset, params)?)
            }
        })
    }

    fn inner(&self) -> &dyn NearestNeighborIndex {
        match self {
            IndexVariant::Linear(i) => i,
            IndexVariant::KdTree(i) => i,
            IndexVariant::KMeans(i) => i,
            IndexVariant::Composite(i) => i,
        }
    }
}

/// Aggregate statistics about a built index.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub algorithm: Algorithm,
    pub num_points: usize,
    pub dimension: usize,
    pub num_trees: usize,
    pub num_nodes: usize,
    pub index_memory_bytes: usize,
    pub dataset_memory_bytes: usize,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Index {{ algorithm: {}, points: {}, dim: {}, trees: {}, nodes: {}, \
             index mem: ~{:.1}MB, data mem: ~{:.1}MB }}",
            self.algorithm,
            self.num_points,
            self.dimension,
            self.num_trees,
            self.num_nodes,
            self.index_memory_bytes as f64 / (1024.0 * 1024.0),
            self.dataset_memory_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}

/// A built search structure over one dataset, together with the effective
/// parameters that produced it.
#[derive(Debug, Clone)]
pub struct Index {
    variant: IndexVariant,
    params: IndexParameters,
    dataset: Dataset,
}

impl Index {
    /// Build an index with manual parameters.
    ///
    /// When `params.seed` is unset a seed is drawn here and recorded in
    /// [`params`](Self::params), so the effective parameters rebuild the
    /// same structure.
    pub fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self> {
        params.validate()?;
        let mut params = params.clone();
        params.seed.get_or_insert_with(rand::random);

        let start = Instant::now();
        let variant = IndexVariant::build(dataset, &params)?;
        let index = Self {
            variant,
            params,
            dataset: dataset.clone(),
        };

        tracing::info!(
            algorithm = %index.params.algorithm,
            points = dataset.len(),
            dim = dataset.dim(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            memory_bytes = index.used_memory(),
            "index built"
        );
        Ok(index)
    }

    pub fn params(&self) -> &IndexParameters {
        &self.params
    }

    /// Replace the default search budget recorded in the effective parameters.
    pub(crate) fn set_checks(&mut self, checks: usize) {
        self.params.checks = checks;
    }

    pub fn algorithm(&self) -> Algorithm {
        self.params.algorithm
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn variant(&self) -> &IndexVariant {
        &self.variant
    }

    pub fn size(&self) -> usize {
        self.variant.inner().size()
    }

    pub fn dim(&self) -> usize {
        self.dataset.dim()
    }

    pub fn used_memory(&self) -> usize {
        self.variant.inner().used_memory()
    }

    /// Find up to `nn` neighbors of `query`, examining about `checks` points.
    ///
    /// Returns fewer than `nn` results only when the dataset is smaller.
    pub fn knn_search(&self, query: &[f32], nn: usize, checks: usize) -> Result<Vec<Neighbor>> {
        self.check_request(query.len(), nn, checks)?;
        Ok(self.search_one(&ArrayView1::from(query), nn, checks).0)
    }

    /// Search every point of `queries`; results are in query order.
    pub fn knn_search_batch(
        &self,
        queries: &Dataset,
        nn: usize,
        checks: usize,
    ) -> Result<Vec<Vec<Neighbor>>> {
        Ok(self.search_batch_counted(queries, nn, checks)?.0)
    }

    /// Batch search that also reports the total number of points examined.
    pub(crate) fn search_batch_counted(
        &self,
        queries: &Dataset,
        nn: usize,
        checks: usize,
    ) -> Result<(Vec<Vec<Neighbor>>, usize)> {
        self.check_request(queries.dim(), nn, checks)?;
        check_buffer::<Neighbor>(queries.len(), nn.min(self.size()))?;
        let mut out = reserve_buffer::<Vec<Neighbor>>(queries.len(), 1)?;

        #[cfg(feature = "parallel")]
        let per_query: Vec<(Vec<Neighbor>, usize)> = (0..queries.len())
            .into_par_iter()
            .map(|q| self.search_one(&queries.point(q), nn, checks))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let per_query: Vec<(Vec<Neighbor>, usize)> = (0..queries.len())
            .map(|q| self.search_one(&queries.point(q), nn, checks))
            .collect();

        let mut total_checks = 0;
        for (neighbors, examined) in per_query {
            total_checks += examined;
            out.push(neighbors);
        }
        Ok((out, total_checks))
    }

    /// Compute aggregate statistics about the index.
    pub fn stats(&self) -> IndexStats {
        let (num_trees, num_nodes) = match &self.variant {
            IndexVariant::Linear(_) => (0, 0),
            IndexVariant::KdTree(i) => (i.num_trees(), i.num_nodes()),
            IndexVariant::KMeans(i) => (1, i.num_nodes()),
            IndexVariant::Composite(i) => (
                i.kdtree().num_trees() + 1,
                i.kdtree().num_nodes() + i.kmeans().num_nodes(),
            ),
        };
        IndexStats {
            algorithm: self.algorithm(),
            num_points: self.size(),
            dimension: self.dim(),
            num_trees,
            num_nodes,
            index_memory_bytes: self.used_memory(),
            dataset_memory_bytes: self.dataset.memory_bytes(),
        }
    }

    fn check_request(&self, query_dim: usize, nn: usize, checks: usize) -> Result<()> {
        if query_dim != self.dim() {
            return Err(AnnError::DimensionMismatch {
                expected: self.dim(),
                got: query_dim,
            });
        }
        if nn == 0 {
            return Err(AnnError::InvalidArgument("nn must be > 0".into()));
        }
        if checks == 0 {
            return Err(AnnError::InvalidArgument("checks must be > 0".into()));
        }
        Ok(())
    }

    pub(crate) fn search_one(
        &self,
        query: &ArrayView1<f32>,
        nn: usize,
        checks: usize,
    ) -> (Vec<Neighbor>, usize) {
        let mut result = KnnResultSet::new(nn.min(self.size()));
        let mut ctx = SearchContext::new(self.size(), checks);
        self.variant.inner().search(query, &mut result, &mut ctx);
        (result.into_sorted(self.params.metric), ctx.checks())
    }
}
