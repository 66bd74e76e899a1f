//! Save and load indexes to/from disk.
//!
//! Requires the `persistence` feature flag. Files hold the effective
//! parameters and the dataset; tree structures are rebuilt on load from the
//! recorded seed, so a loaded index answers queries exactly like the one
//! that was saved.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{AnnError, Result};
use crate::index::Index;
use crate::params::IndexParameters;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    params: IndexParameters,
    points: usize,
    dim: usize,
    /// Row-major coordinates, `points * dim` values.
    data: Vec<f32>,
}

impl IndexFile {
    fn capture(index: &Index) -> Self {
        Self {
            params: index.params().clone(),
            points: index.size(),
            dim: index.dim(),
            data: index.dataset().to_flat_vec(),
        }
    }

    fn restore(self) -> Result<Index> {
        let dataset = Dataset::from_column_major(self.data, self.dim, self.points)?;
        Index::build(&dataset, &self.params)
    }
}

impl Index {
    /// Serialize the index to a JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&IndexFile::capture(self))
            .map_err(|e| AnnError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Deserialize an index from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: IndexFile =
            serde_json::from_str(&data).map_err(|e| AnnError::Serialization(e.to_string()))?;
        file.restore()
    }

    /// Serialize the index to a compact bincode file.
    pub fn save_bincode(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(&IndexFile::capture(self))
            .map_err(|e| AnnError::Serialization(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Deserialize an index from a bincode file.
    pub fn load_bincode(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let file: IndexFile =
            bincode::deserialize(&data).map_err(|e| AnnError::Serialization(e.to_string()))?;
        file.restore()
    }
}
