use ndarray::ArrayView1;

use crate::dataset::Dataset;
use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::index::NearestNeighborIndex;
use crate::params::IndexParameters;
use crate::search::{KnnResultSet, SearchContext};

/// Exhaustive (brute-force) index.
///
/// Holds only a handle to the dataset; every query scans every point, so
/// results are exact and the visit budget is ignored. Serves as the ground
/// truth for recall estimates.
#[derive(Debug, Clone)]
pub struct LinearIndex {
    dataset: Dataset,
    metric: DistanceMetric,
}

impl LinearIndex {
    pub fn new(dataset: Dataset, metric: DistanceMetric) -> Self {
        Self { dataset, metric }
    }
}

impl NearestNeighborIndex for LinearIndex {
    fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self> {
        Ok(Self::new(dataset.clone(), params.metric))
    }

    fn search(&self, query: &ArrayView1<f32>, result: &mut KnnResultSet, ctx: &mut SearchContext) {
        for i in 0..self.dataset.len() {
            if ctx.visit(i) {
                result.add(i, self.metric.reduced(query, &self.dataset.point(i)));
            }
        }
    }

    fn used_memory(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        self.dataset.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_matches_reference_scan() {
        let rows: Vec<Vec<f32>> = (0..50)
            .map(|i| vec![(i * 7 % 13) as f32, (i * 3 % 11) as f32])
            .collect();
        let ds = Dataset::from_rows(&rows).unwrap();
        let index = LinearIndex::new(ds.clone(), DistanceMetric::SquaredEuclidean);
        let q = ndarray::array![4.2, 5.1];

        let mut rs = KnnResultSet::new(5);
        let mut ctx = SearchContext::new(ds.len(), 1);
        index.search(&q.view(), &mut rs, &mut ctx);
        let got: Vec<usize> = rs
            .into_sorted(DistanceMetric::SquaredEuclidean)
            .iter()
            .map(|n| n.index)
            .collect();

        let mut reference: Vec<(f32, usize)> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let d = (r[0] - 4.2) * (r[0] - 4.2) + (r[1] - 5.1) * (r[1] - 5.1);
                (d, i)
            })
            .collect();
        reference.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let expected: Vec<usize> = reference.iter().take(5).map(|&(_, i)| i).collect();

        assert_eq!(got, expected);
        assert_eq!(ctx.checks(), 50, "linear scan ignores the budget");
    }
}
