//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the pixel capability the rest of the crate
//! drives: identify an original, and write one resized (optionally cropped)
//! variant of it. The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::ResizeParams;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Time budget of {0:?} exceeded")]
    BudgetExceeded(Duration),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Sync` so sizes can be generated in parallel with rayon.
pub trait ImageBackend: Sync {
    /// Get image dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Write one derived variant.
    fn resize(&self, params: &ResizeParams) -> Result<(), BackendError>;
}
