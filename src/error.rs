use thiserror::Error;

use crate::registry::IndexHandle;

/// Errors that can occur when building or querying an index.
#[derive(Debug, Error)]
pub enum AnnError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("dataset must contain at least one point of non-zero dimension")]
    EmptyDataset,

    #[error("invalid index handle: {0}")]
    InvalidHandle(IndexHandle),

    #[error("unsupported algorithm code: {0}")]
    UnsupportedAlgorithm(i64),

    #[error("unsupported centers init code: {0}")]
    UnsupportedCentersInit(i64),

    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    #[cfg(feature = "persistence")]
    #[error("serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "persistence")]
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for index operations.
pub type Result<T> = std::result::Result<T, AnnError>;

/// Validate that a buffer of `rows * cols` values of `T` fits in memory.
///
/// Returns the entry count.
pub(crate) fn check_buffer<T>(rows: usize, cols: usize) -> Result<usize> {
    let total = rows.checked_mul(cols).ok_or_else(|| {
        AnnError::AllocationFailure(format!("{rows} x {cols} result buffer overflows usize"))
    })?;
    match total.checked_mul(std::mem::size_of::<T>()) {
        Some(bytes) if bytes <= isize::MAX as usize => Ok(total),
        _ => Err(AnnError::AllocationFailure(format!(
            "{rows} x {cols} result buffer exceeds the address space"
        ))),
    }
}

/// Reserve a buffer of `rows * cols` entries, reporting overflow or
/// allocator refusal instead of aborting.
pub(crate) fn reserve_buffer<T>(rows: usize, cols: usize) -> Result<Vec<T>> {
    let total = check_buffer::<T>(rows, cols)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(total)
        .map_err(|e| AnnError::AllocationFailure(format!("{total} entries: {e}")))?;
    Ok(buf)
}
