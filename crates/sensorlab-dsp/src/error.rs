//! Error types for the analytical layer.
//!
//! Only construction and linear-algebra failures are errors. "No combined
//! system" and "no spectral peaks" are ordinary outcomes and are modelled
//! with `Option` at their call sites.

use thiserror::Error;

/// Result type for engine and analysis operations
pub type DspResult<T> = Result<T, DspError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    /// Matrix shapes do not satisfy the state-space invariants
    #[error("dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No usable pivot during inversion or a linear solve
    #[error("singular matrix: largest pivot {pivot:e} below threshold")]
    SingularMatrix { pivot: f64 },

    /// A newer analysis request superseded this one
    #[error("analysis cancelled")]
    Cancelled,
}

impl DspError {
    /// Singular systems mean "analysis unavailable for these parameters";
    /// callers surface a degraded status instead of aborting.
    pub fn is_degraded(&self) -> bool {
        matches!(self, DspError::SingularMatrix { .. })
    }
}

/// Errors from the best-effort parameter snapshot store.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot JSON invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no per-user configuration directory available")]
    NoConfigDir,
}
