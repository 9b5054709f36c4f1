//! Registered size definitions.
//!
//! The registry holds two lists: the host's **built-in** sizes, which the
//! upload pipeline always generates, and **custom** sizes, which upload-time
//! deferral may postpone until first request. The registry itself is never
//! mutated after construction; deferral works on a request-local view (see
//! [`crate::deferral::UploadContext`]).

use serde::{Deserialize, Serialize};

/// How a derived size relates to its target box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropMode {
    /// Preserve aspect ratio, fit inside the box.
    #[default]
    Fit,
    /// Fill the box exactly, center-cropping the overflow.
    Fill,
}

/// A named derived size. A zero width or height means "unconstrained".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeDefinition {
    pub name: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub crop: CropMode,
}

impl SizeDefinition {
    pub fn new(name: impl Into<String>, width: u32, height: u32, crop: CropMode) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            crop,
        }
    }
}

/// Process-wide, read-only set of registered sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeRegistry {
    builtin: Vec<SizeDefinition>,
    custom: Vec<SizeDefinition>,
}

impl SizeRegistry {
    pub fn new(builtin: Vec<SizeDefinition>, custom: Vec<SizeDefinition>) -> Self {
        Self { builtin, custom }
    }

    pub fn builtin(&self) -> &[SizeDefinition] {
        &self.builtin
    }

    pub fn custom(&self) -> &[SizeDefinition] {
        &self.custom
    }

    /// Every registered size, built-in first.
    pub fn all(&self) -> Vec<SizeDefinition> {
        self.builtin.iter().chain(&self.custom).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The host's stock sizes.
pub fn default_builtin_sizes() -> Vec<SizeDefinition> {
    vec![
        SizeDefinition::new("thumbnail", 150, 150, CropMode::Fill),
        SizeDefinition::new("medium", 300, 300, CropMode::Fit),
        SizeDefinition::new("medium_large", 768, 0, CropMode::Fit),
        SizeDefinition::new("large", 1024, 1024, CropMode::Fit),
    ]
}
