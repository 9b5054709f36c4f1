//! On-demand regeneration of every registered size for one asset.
//!
//! A materialization run regenerates *all* sizes in the registry, not only
//! the one a request asked for, so sibling sizes are ready for later
//! requests. The run is bounded by a time budget; on any failure nothing is
//! merged into stored metadata. Concurrent runs for the same asset collapse
//! into one through [`SingleFlight`]: late callers block and receive the
//! leader's result.

use crate::flight::SingleFlight;
use crate::imaging::{
    BackendError, GenerateOptions, ImageBackend, Quality, generate_attachment_metadata,
};
use crate::library::{Asset, AssetId, AssetIndex, AttachmentMetadata};
use crate::sizes::SizeRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("Original file missing: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("Image processing failed: {0}")]
    ProcessingFailed(String),
    #[error("No sizes generated for attachment {0}")]
    EmptyResult(AssetId),
    #[error("Time budget of {0:?} exceeded")]
    TimedOut(Duration),
    #[error("Failed to persist metadata: {0}")]
    PersistFailed(String),
}

impl From<BackendError> for MaterializeError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::BudgetExceeded(budget) => MaterializeError::TimedOut(budget),
            other => MaterializeError::ProcessingFailed(other.to_string()),
        }
    }
}

type Outcome = Result<AttachmentMetadata, MaterializeError>;

pub struct SizeMaterializer<B: ImageBackend> {
    backend: B,
    index: Arc<dyn AssetIndex>,
    registry: Arc<SizeRegistry>,
    quality: Quality,
    time_budget: Duration,
    flights: SingleFlight<AssetId, Outcome>,
}

impl<B: ImageBackend> SizeMaterializer<B> {
    pub fn new(
        backend: B,
        index: Arc<dyn AssetIndex>,
        registry: Arc<SizeRegistry>,
        quality: Quality,
        time_budget: Duration,
    ) -> Self {
        Self {
            backend,
            index,
            registry,
            quality,
            time_budget,
            flights: SingleFlight::new(),
        }
    }

    /// Regenerate every registered size of `asset` and merge the records.
    ///
    /// Returns the metadata produced by this run (one record per applicable
    /// size). Callers that arrive while a run for the same asset is in
    /// progress get that run's result.
    pub fn materialize(&self, asset: &Asset) -> Outcome {
        self.flights.run(asset.id, || self.run(asset))
    }

    fn run(&self, asset: &Asset) -> Outcome {
        if !asset.path.is_file() {
            return Err(MaterializeError::SourceMissing(asset.path.clone()));
        }

        let started = Instant::now();
        let options = GenerateOptions::with_budget(self.quality, self.time_budget);
        let sizes = self.registry.all();

        let generated = generate_attachment_metadata(&self.backend, &asset.path, &sizes, &options)
            .map_err(|e| {
                warn!(id = asset.id, error = %e, "size generation failed");
                MaterializeError::from(e)
            })?;

        let elapsed = started.elapsed();
        if elapsed > self.time_budget {
            warn!(id = asset.id, ?elapsed, "size generation overran its budget");
            return Err(MaterializeError::TimedOut(self.time_budget));
        }
        if generated.sizes.is_empty() {
            warn!(id = asset.id, "no applicable sizes generated");
            return Err(MaterializeError::EmptyResult(asset.id));
        }

        let changed = self
            .index
            .merge_metadata(asset.id, generated.clone())
            .map_err(|e| MaterializeError::PersistFailed(e.to_string()))?;

        info!(
            id = asset.id,
            sizes = generated.sizes.len(),
            changed,
            ?elapsed,
            "materialized sizes"
        );
        Ok(generated)
    }
}
