//! Error types shared by the whole sidecar pipeline.

use thiserror::Error;

/// Result type for sidecar operations.
pub type Result<T> = std::result::Result<T, SidecarError>;

#[derive(Error, Debug)]
pub enum SidecarError {
    /// Rejected before any oracle call: degenerate rings, mismatched shapes,
    /// illegal resolution levels.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The cell-index, hull-cover or resolution oracle failed.
    #[error("Index oracle failed: {0}")]
    Oracle(String),

    #[error("Unsupported product: {0}")]
    UnsupportedProduct(String),

    /// Granule metadata could not be parsed.
    #[error("Metadata parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to publish sidecar: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),
}

impl SidecarError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SidecarError::Validation(msg.into())
    }

    pub fn oracle(msg: impl Into<String>) -> Self {
        SidecarError::Oracle(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        SidecarError::Parse(msg.into())
    }
}
