use ndarray::ArrayView1;

/// Distance metric used for nearest-neighbor comparisons.
///
/// Every metric here is a sum of per-coordinate terms, which is what the
/// tree indexes rely on to bound the distance to an unexplored region.
/// Searches work in a *reduced* space (the sum itself, before any root is
/// taken) and only convert to the reported distance at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "persistence",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum DistanceMetric {
    /// Squared L2 distance. No root is taken. Range [0, inf).
    #[default]
    SquaredEuclidean,
    /// L2 distance. Ranked internally by its square. Range [0, inf).
    Euclidean,
    /// L1 distance. Range [0, inf).
    Manhattan,
}

impl DistanceMetric {
    /// Compute the distance between two vectors using this metric.
    pub fn compute(&self, a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
        self.finish(self.reduced(a, b))
    }

    /// Reduced distance: monotone in [`compute`](Self::compute) and additive
    /// over coordinates.
    #[inline]
    pub fn reduced(&self, a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean | DistanceMetric::Euclidean => {
                squared_euclidean(a, b)
            }
            DistanceMetric::Manhattan => manhattan(a, b),
        }
    }

    /// Reduced contribution of a single coordinate difference.
    #[inline]
    pub fn coordinate_term(&self, diff: f32) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean | DistanceMetric::Euclidean => diff * diff,
            DistanceMetric::Manhattan => diff.abs(),
        }
    }

    /// Convert a reduced distance into the distance reported to callers.
    #[inline]
    pub fn finish(&self, reduced: f32) -> f32 {
        match self {
            DistanceMetric::Euclidean => reduced.sqrt(),
            _ => reduced,
        }
    }

    /// Map a reduced distance into a space where the triangle inequality
    /// holds, and back. Used for ball bounds in the k-means tree.
    #[inline]
    pub(crate) fn to_metric_space(&self, reduced: f32) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean | DistanceMetric::Euclidean => reduced.sqrt(),
            DistanceMetric::Manhattan => reduced,
        }
    }

    #[inline]
    pub(crate) fn from_metric_space(&self, d: f32) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean | DistanceMetric::Euclidean => d * d,
            DistanceMetric::Manhattan => d,
        }
    }
}

/// Squared Euclidean distance between two vectors.
pub fn squared_euclidean(a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Manhattan (L1) distance between two vectors.
pub fn manhattan(a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_squared_euclidean_default() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        let d = DistanceMetric::default().compute(&a.view(), &b.view());
        assert!((d - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_takes_root_only_at_the_end() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        let m = DistanceMetric::Euclidean;
        assert!((m.reduced(&a.view(), &b.view()) - 25.0).abs() < 1e-6);
        assert!((m.compute(&a.view(), &b.view()) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_manhattan() {
        let a = array![1.0, -1.0, 2.0];
        let b = array![0.0, 1.0, 2.0];
        let d = DistanceMetric::Manhattan.compute(&a.view(), &b.view());
        assert!((d - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric_and_zero_on_identity() {
        let a = array![0.5, -2.0, 7.25];
        let b = array![1.5, 3.0, -1.0];
        for m in [
            DistanceMetric::SquaredEuclidean,
            DistanceMetric::Euclidean,
            DistanceMetric::Manhattan,
        ] {
            assert_eq!(m.compute(&a.view(), &b.view()), m.compute(&b.view(), &a.view()));
            assert_eq!(m.compute(&a.view(), &a.view()), 0.0);
        }
    }

    #[test]
    fn test_coordinate_terms_sum_to_reduced() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![2.0, 0.0, 3.5];
        for m in [DistanceMetric::SquaredEuclidean, DistanceMetric::Manhattan] {
            let summed: f32 = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| m.coordinate_term(x - y))
                .sum();
            assert!((summed - m.reduced(&a.view(), &b.view())).abs() < 1e-6);
        }
    }
}
