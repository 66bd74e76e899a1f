use ndarray::ArrayView1;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::index::NearestNeighborIndex;
use crate::kdtree::KdTreeIndex;
use crate::kmeans::KMeansTreeIndex;
use crate::params::IndexParameters;
use crate::search::{KnnResultSet, SearchContext};

/// A k-means tree and a KD-forest over the same dataset.
///
/// A query runs through the k-means tree first and then the forest, each
/// with the full visit budget, collecting into one result set. Points seen
/// by the first search are not examined again by the second.
#[derive(Debug, Clone)]
pub struct CompositeIndex {
    kmeans: KMeansTreeIndex,
    kdtree: KdTreeIndex,
}

impl CompositeIndex {
    pub fn kmeans(&self) -> &KMeansTreeIndex {
        &self.kmeans
    }

    pub fn kdtree(&self) -> &KdTreeIndex {
        &self.kdtree
    }
}

impl NearestNeighborIndex for CompositeIndex {
    fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self> {
        Ok(Self {
            kmeans: KMeansTreeIndex::build(dataset, params)?,
            kdtree: KdTreeIndex::build(dataset, params)?,
        })
    }

    fn search(&self, query: &ArrayView1<f32>, result: &mut KnnResultSet, ctx: &mut SearchContext) {
        self.kmeans.search(query, result, ctx);
        ctx.reset_budget();
        self.kdtree.search(query, result, ctx);
    }

    fn used_memory(&self) -> usize {
        self.kmeans.used_memory() + self.kdtree.used_memory()
    }

    fn size(&self) -> usize {
        self.kdtree.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::params::{Algorithm, CHECKS_UNLIMITED};

    #[test]
    fn test_composite_finds_each_point_once() {
        let rows: Vec<Vec<f32>> = (0..200)
            .map(|i| vec![(i % 17) as f32, (i % 23) as f32])
            .collect();
        let ds = Dataset::from_rows(&rows).unwrap();
        let params = IndexParameters::builder()
            .algorithm(Algorithm::Composite)
            .trees(2)
            .branching(4)
            .seed(9)
            .build()
            .unwrap();
        let index = CompositeIndex::build(&ds, &params).unwrap();

        let q = ndarray::array![8.0f32, 19.0];
        let mut rs = KnnResultSet::new(10);
        let mut ctx = SearchContext::new(ds.len(), CHECKS_UNLIMITED);
        index.search(&q.view(), &mut rs, &mut ctx);
        let out = rs.into_sorted(DistanceMetric::SquaredEuclidean);

        let mut ids: Vec<usize> = out.iter().map(|n| n.index).collect();
        assert_eq!(ids.len(), 10);
        ids.dedup();
        assert_eq!(ids.len(), 10, "no duplicate points in the result");
        assert!(ctx.checks() <= ds.len());
        assert_eq!(out[0].distance, 0.0);
    }
}
