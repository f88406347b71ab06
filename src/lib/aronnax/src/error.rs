use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions. Convergence and clipping warnings are logged and do not
/// surface here; anything that does surface terminates the run.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gridded input {path}: expected {expected} values, found {found}")]
    BadInputShape {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error(
        "free-surface solver did not converge within {maxits} iterations at step {step} \
         (relative residual {residual:.3e})"
    )]
    SolverDiverged {
        step: u64,
        maxits: usize,
        residual: f64,
    },

    #[error("NaN detected in layer thickness at step {step}")]
    NanThickness { step: u64 },

    #[error("worker pool: {0}")]
    WorkerPool(String),
}
