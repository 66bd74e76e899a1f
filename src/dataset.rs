use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::index;
use rand::Rng;

use crate::error::{AnnError, Result};

/// An immutable collection of fixed-dimension feature vectors.
///
/// Points are addressed by their zero-based position. The backing matrix has
/// one row per point, which is the same memory layout as a column-major
/// `length × dcount` matrix where each column is a point. Cloning is cheap:
/// every clone shares the same buffer.
#[derive(Debug, Clone)]
pub struct Dataset {
    data: Arc<Array2<f32>>,
}

impl Dataset {
    /// Wrap a `points × dim` matrix.
    pub fn new(data: Array2<f32>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(AnnError::EmptyDataset);
        }
        Ok(Self {
            data: Arc::new(data.as_standard_layout().into_owned()),
        })
    }

    /// Build from a flat column-major buffer holding `dcount` points of
    /// `length` coordinates each (point `i` occupies
    /// `data[i * length..(i + 1) * length]`).
    pub fn from_column_major(data: Vec<f32>, length: usize, dcount: usize) -> Result<Self> {
        let expected = length.checked_mul(dcount).ok_or_else(|| {
            AnnError::InvalidArgument(format!("{length} x {dcount} matrix overflows usize"))
        })?;
        if data.len() != expected {
            return Err(AnnError::InvalidArgument(format!(
                "buffer holds {} values, expected {length} x {dcount} = {expected}",
                data.len()
            )));
        }
        let matrix = Array2::from_shape_vec((dcount, length), data)
            .map_err(|e| AnnError::InvalidArgument(e.to_string()))?;
        Self::new(matrix)
    }

    /// Build from a slice of equally sized rows.
    pub fn from_rows<V: AsRef<[f32]>>(rows: &[V]) -> Result<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(AnnError::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        Self::from_column_major(flat, dim, rows.len())
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    /// Always false: empty datasets are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Number of coordinates per point.
    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    /// Borrow point `i`. Panics if `i >= len()`.
    #[inline]
    pub fn point(&self, i: usize) -> ArrayView1<'_, f32> {
        self.data.row(i)
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Row-major flat copy of the coordinates.
    pub fn to_flat_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Bytes held by the coordinate buffer.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Draw `size` distinct points at random (all points, in order, when
    /// `size >= len()`). Returns the sampled dataset and the original
    /// indices of its points.
    pub fn sample(&self, size: usize, rng: &mut impl Rng) -> (Dataset, Vec<usize>) {
        if size >= self.len() {
            return (self.clone(), (0..self.len()).collect());
        }
        let mut picked = index::sample(rng, self.len(), size.max(1)).into_vec();
        picked.sort_unstable();
        let sampled = self.data.select(Axis(0), &picked);
        (
            Dataset {
                data: Arc::new(sampled),
            },
            picked,
        )
    }

    /// Copy the points at `rows`, in that order, into a new dataset.
    /// Panics if a row is out of bounds.
    pub fn select(&self, rows: &[usize]) -> Result<Dataset> {
        Self::new(self.data.select(Axis(0), rows))
    }

    /// Check that `queries` live in the same space as this dataset.
    pub(crate) fn check_queries(&self, queries: &Dataset) -> Result<()> {
        if queries.dim() != self.dim() {
            return Err(AnnError::DimensionMismatch {
                expected: self.dim(),
                got: queries.dim(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_column_major_layout() {
        // Two points of length 3: [1,2,3] and [4,5,6].
        let ds = Dataset::from_column_major(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.dim(), 3);
        assert_eq!(ds.point(1).to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_wrong_buffer_length() {
        let err = Dataset::from_column_major(vec![1.0; 5], 3, 2).unwrap_err();
        assert!(matches!(err, AnnError::InvalidArgument(_)));
    }

    #[test]
    fn test_empty_rejected() {
        let rows: Vec<Vec<f32>> = Vec::new();
        assert!(matches!(
            Dataset::from_rows(&rows).unwrap_err(),
            AnnError::EmptyDataset
        ));
        assert!(matches!(
            Dataset::from_rows(&[Vec::<f32>::new()]).unwrap_err(),
            AnnError::EmptyDataset
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            Dataset::from_rows(&rows).unwrap_err(),
            AnnError::DimensionMismatch { expected: 2, got: 1 }
        ));
    }

    #[test]
    fn test_sample_distinct_and_bounded() {
        let rows: Vec<Vec<f32>> = (0..100).map(|i| vec![i as f32, 0.0]).collect();
        let ds = Dataset::from_rows(&rows).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let (sample, picked) = ds.sample(10, &mut rng);
        assert_eq!(sample.len(), 10);
        assert_eq!(picked.len(), 10);
        for (row, &orig) in picked.iter().enumerate() {
            assert_eq!(sample.point(row)[0], orig as f32);
        }
        let (all, idx) = ds.sample(1000, &mut rng);
        assert_eq!(all.len(), 100);
        assert_eq!(idx, (0..100).collect::<Vec<_>>());
    }
}
