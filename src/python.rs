//! Python bindings via PyO3.
//!
//! Requires the `python` feature flag. Build with [maturin](https://github.com/PyO3/maturin):
//!
//! ```sh
//! pip install maturin
//! maturin develop --features python
//! ```
//!
//! Parameters travel as the numeric vector understood by
//! [`BuildMode::from_tuple`]; point indices stay zero-based.

use pyo3::exceptions::{PyKeyError, PyMemoryError, PyValueError};
use pyo3::prelude::*;

use crate::dataset::Dataset;
use crate::engine::Engine;
use crate::error::AnnError;
use crate::params::BuildMode;
use crate::registry::IndexHandle;

fn to_py_err(e: AnnError) -> PyErr {
    match e {
        AnnError::InvalidHandle(_) => PyKeyError::new_err(e.to_string()),
        AnnError::AllocationFailure(_) => PyMemoryError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn rows_to_dataset(rows: Vec<Vec<f32>>) -> PyResult<Dataset> {
    Dataset::from_rows(&rows).map_err(to_py_err)
}

/// Python-visible wrapper around [`Engine`].
#[pyclass(name = "Engine")]
pub struct PyEngine {
    inner: Engine,
}

#[pymethods]
impl PyEngine {
    #[new]
    #[pyo3(signature = (metrics=false))]
    fn new(metrics: bool) -> Self {
        let inner = if metrics {
            Engine::with_metrics()
        } else {
            Engine::new()
        };
        Self { inner }
    }

    /// Build and register an index.
    ///
    /// Returns `(handle, params, speedup)`; speedup is `-1.0` when it was
    /// not measured.
    fn build_index(
        &self,
        dataset: Vec<Vec<f32>>,
        params: Vec<f64>,
    ) -> PyResult<(u64, Vec<f64>, f32)> {
        let dataset = rows_to_dataset(dataset)?;
        let mode = BuildMode::from_tuple(&params).map_err(to_py_err)?;
        let out = self.inner.build_index(&dataset, &mode).map_err(to_py_err)?;
        Ok((
            out.handle.to_raw(),
            out.params.to_tuple().to_vec(),
            out.speedup.unwrap_or(-1.0),
        ))
    }

    /// One-shot search without registering an index.
    fn find_nn(
        &self,
        dataset: Vec<Vec<f32>>,
        queries: Vec<Vec<f32>>,
        nn: usize,
        params: Vec<f64>,
    ) -> PyResult<(Vec<Vec<usize>>, Vec<f64>)> {
        let dataset = rows_to_dataset(dataset)?;
        let queries = rows_to_dataset(queries)?;
        let mode = BuildMode::from_tuple(&params).map_err(to_py_err)?;
        let (results, effective) = self
            .inner
            .find_nearest_neighbors(&dataset, &queries, nn, &mode)
            .map_err(to_py_err)?;
        Ok((results, effective.to_tuple().to_vec()))
    }

    /// Search a registered index, optionally overriding its `checks`.
    #[pyo3(signature = (handle, queries, nn, checks=None))]
    fn index_find_nn(
        &self,
        handle: u64,
        queries: Vec<Vec<f32>>,
        nn: usize,
        checks: Option<usize>,
    ) -> PyResult<Vec<Vec<usize>>> {
        let queries = rows_to_dataset(queries)?;
        self.inner
            .find_nearest_neighbors_index(IndexHandle::from_raw(handle), &queries, nn, checks)
            .map_err(to_py_err)
    }

    /// Release a registered index.
    fn free_index(&self, handle: u64) -> PyResult<()> {
        self.inner
            .free_index(IndexHandle::from_raw(handle))
            .map_err(to_py_err)
    }

    /// Number of live indexes.
    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        match self.inner.metrics() {
            Some(m) => format!("Engine({} live, {m})", self.inner.len()),
            None => format!("Engine({} live)", self.inner.len()),
        }
    }
}

/// Register the module with Python.
#[pymodule]
fn annforest(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyEngine>()?;
    Ok(())
}
