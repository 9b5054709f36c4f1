//! High-level image operations.
//!
//! These functions combine the scaling policy, the naming convention and
//! backend execution. [`plan_size`] is pure and is shared by upload-time stub
//! fabrication and on-demand generation; [`generate_attachment_metadata`]
//! executes the plan for every requested size.

use super::backend::{BackendError, ImageBackend};
use super::calculations::compute_target_dimensions;
use super::params::{Quality, ResizeParams};
use crate::library::{AttachmentMetadata, SizeRecord};
use crate::naming::{derived_filename, mime_type_for_extension, split_file_name};
use crate::sizes::{CropMode, SizeDefinition};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// A derived size that applies to a given original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSize {
    pub name: String,
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub crop: CropMode,
}

/// Plan one size for an original of `original` dimensions named `stem.ext`.
///
/// Returns `None` when the scaling policy deems the size not applicable.
pub fn plan_size(
    original: (u32, u32),
    size: &SizeDefinition,
    stem: &str,
    ext: &str,
) -> Option<PlannedSize> {
    let (width, height) =
        compute_target_dimensions(original, (size.width, size.height), size.crop)?;
    Some(PlannedSize {
        name: size.name.clone(),
        file: derived_filename(stem, width, height, ext),
        width,
        height,
        crop: size.crop,
    })
}

impl PlannedSize {
    /// The persisted record for this size; also the stub shape.
    pub fn into_record(self, mime_type: &str) -> SizeRecord {
        SizeRecord {
            file: self.file,
            width: self.width,
            height: self.height,
            mime_type: mime_type.to_string(),
        }
    }
}

/// Settings for one generation run.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub quality: Quality,
    /// Abort when this passes. Checked before each resize.
    pub deadline: Option<Instant>,
    /// The budget `deadline` was derived from, for error reporting.
    pub budget: Duration,
}

impl GenerateOptions {
    pub fn new(quality: Quality) -> Self {
        Self {
            quality,
            deadline: None,
            budget: Duration::ZERO,
        }
    }

    pub fn with_budget(quality: Quality, budget: Duration) -> Self {
        Self {
            quality,
            deadline: Some(Instant::now() + budget),
            budget,
        }
    }

    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(BackendError::BudgetExceeded(self.budget))
            }
            _ => Ok(()),
        }
    }
}

/// Hidden sibling a variant is encoded into before being renamed into place.
/// It keeps the variant's extension, which backends use to pick the encoder.
///
/// Readers of `file` see either the previous complete file or the new one.
fn staging_path(dir: &Path, file: &str) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".{}-{n}.{file}", std::process::id()))
}

/// Write every applicable size of `source` next to it and describe the result.
///
/// Sizes are generated in parallel. Each one is encoded into a hidden
/// staging file and renamed onto its final name. The returned metadata holds
/// only the sizes produced by this run; merging into stored metadata is the
/// caller's business.
pub fn generate_attachment_metadata(
    backend: &impl ImageBackend,
    source: &Path,
    sizes: &[SizeDefinition],
    config: &GenerateOptions,
) -> Result<AttachmentMetadata> {
    let file_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            BackendError::ProcessingFailed(format!("Invalid source path: {}", source.display()))
        })?;
    let (stem, ext) = split_file_name(file_name).ok_or_else(|| {
        BackendError::ProcessingFailed(format!("Source has no extension: {}", source.display()))
    })?;
    let mime_type = mime_type_for_extension(ext).ok_or_else(|| {
        BackendError::ProcessingFailed(format!("Unsupported source format: {}", ext))
    })?;
    let output_dir = source.parent().unwrap_or_else(|| Path::new(""));

    config.check_deadline()?;
    let original = get_dimensions(backend, source)?;

    let plans: Vec<PlannedSize> = sizes
        .iter()
        .filter_map(|size| plan_size(original, size, stem, ext))
        .collect();

    let records = plans
        .into_par_iter()
        .map(|plan| {
            config.check_deadline()?;
            let staging = staging_path(output_dir, &plan.file);
            let written = backend
                .resize(&ResizeParams {
                    source: source.to_path_buf(),
                    output: staging.clone(),
                    width: plan.width,
                    height: plan.height,
                    crop: plan.crop,
                    quality: config.quality,
                })
                .and_then(|()| {
                    fs::rename(&staging, output_dir.join(&plan.file)).map_err(BackendError::from)
                });
            if let Err(e) = written {
                let _ = fs::remove_file(&staging);
                return Err(e);
            }
            Ok((plan.name.clone(), plan.into_record(mime_type)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AttachmentMetadata {
        width: original.0,
        height: original.1,
        sizes: records.into_iter().collect(),
    })
}
