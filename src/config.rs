//! Service configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; the project's `config.toml` overrides any subset of them.
//!
//! ## Config File Location
//!
//! ```text
//! project/
//! ├── config.toml          # Overrides stock defaults
//! └── uploads/             # library.uploads_dir
//!     ├── .library.json
//!     └── 2023/05/photo.jpg
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [library]
//! uploads_dir = "uploads"             # Relative to the project root
//! base_url = "/wp-content/uploads"    # Public prefix of uploads_dir
//! marker = "wp-content"               # Library-root directory in request paths
//! date_folders = true                 # Store uploads under yyyy/mm
//!
//! [generation]
//! defer = false             # Defer custom sizes from upload to first request
//! time_budget_secs = 60     # Ceiling for one on-demand regeneration
//! quality = 82              # JPEG quality (1-100)
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//!
//! [server]
//! address = "127.0.0.1:8080"
//! workers = 4
//! content_type = "extension"  # or "legacy-jpg"
//!
//! [[sizes.custom]]
//! name = "hero"
//! width = 1600
//! height = 600
//! crop = "fill"
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse; override just the values you want. Tables merge
//! key by key, arrays (the size lists) are replaced as a whole.
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Quality;
use crate::response::ContentTypePolicy;
use crate::sizes::{SizeDefinition, SizeRegistry, default_builtin_sizes};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Where originals live and how they are addressed.
    pub library: LibraryConfig,
    /// Size generation settings.
    pub generation: GenerationConfig,
    /// HTTP host adapter settings.
    pub server: ServerConfig,
    /// Registered sizes.
    pub sizes: SizesConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.generation.quality) {
            return Err(ConfigError::Validation(
                "generation.quality must be 1-100".into(),
            ));
        }
        if self.generation.time_budget_secs == 0 {
            return Err(ConfigError::Validation(
                "generation.time_budget_secs must be greater than 0".into(),
            ));
        }
        if self.server.workers == 0 {
            return Err(ConfigError::Validation(
                "server.workers must be greater than 0".into(),
            ));
        }
        if self.library.marker.is_empty() || self.library.marker.contains('/') {
            return Err(ConfigError::Validation(
                "library.marker must be a single directory name".into(),
            ));
        }

        let mut seen = HashSet::new();
        for size in self.sizes.builtin.iter().chain(&self.sizes.custom) {
            if size.name.trim().is_empty() {
                return Err(ConfigError::Validation("size names must not be empty".into()));
            }
            if !seen.insert(size.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "size '{}' is defined more than once",
                    size.name
                )));
            }
            if size.width == 0 && size.height == 0 {
                return Err(ConfigError::Validation(format!(
                    "size '{}' needs a width or a height",
                    size.name
                )));
            }
        }
        Ok(())
    }

    /// Absolute uploads directory for a project rooted at `root`.
    pub fn uploads_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.library.uploads_dir)
    }

    pub fn registry(&self) -> SizeRegistry {
        SizeRegistry::new(self.sizes.builtin.clone(), self.sizes.custom.clone())
    }
}

/// Library location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Filesystem directory holding originals and derived files.
    pub uploads_dir: String,
    /// Public URL (or path prefix) under which `uploads_dir` is reachable.
    pub base_url: String,
    /// The library-root directory name that request paths must contain.
    pub marker: String,
    /// Store new uploads under `yyyy/mm`.
    pub date_folders: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            uploads_dir: "uploads".to_string(),
            base_url: "/wp-content/uploads".to_string(),
            marker: "wp-content".to_string(),
            date_folders: true,
        }
    }
}

/// Size generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Skip custom sizes at upload time and record stubs instead.
    pub defer: bool,
    /// Ceiling for one on-demand regeneration, in seconds.
    pub time_budget_secs: u64,
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    /// Maximum number of parallel image processing workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            defer: false,
            time_budget_secs: 60,
            quality: 82,
            max_processes: None,
        }
    }
}

impl GenerationConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.quality)
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &GenerationConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// HTTP host adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub address: String,
    /// Request-handling threads.
    pub workers: usize,
    /// Content-Type reported for on-demand responses.
    pub content_type: ContentTypePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            workers: 4,
            content_type: ContentTypePolicy::Extension,
        }
    }
}

/// Registered sizes: built-in ones are always generated at upload, custom
/// ones may be deferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizesConfig {
    pub builtin: Vec<SizeDefinition>,
    pub custom: Vec<SizeDefinition>,
}

impl Default for SizesConfig {
    fn default() -> Self {
        Self {
            builtin: default_builtin_sizes(),
            custom: Vec::new(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay (including arrays) replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(root: &Path) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Sizes on Demand Configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Media library
# ---------------------------------------------------------------------------
[library]
# Directory holding originals and their derived sizes, relative to this file.
uploads_dir = "uploads"

# Public URL or path prefix under which uploads_dir is served.
base_url = "/wp-content/uploads"

# Library-root directory name that derived-size request paths contain.
marker = "wp-content"

# Store new uploads under year/month folders (2023/05/photo.jpg).
date_folders = true

# ---------------------------------------------------------------------------
# Size generation
# ---------------------------------------------------------------------------
[generation]
# Disable automatic generation of custom image sizes at upload time.
# Stub records are written instead and filled on first request.
defer = false

# Upper bound for one on-demand regeneration, in seconds.
time_budget_secs = 60

# JPEG encoding quality (1 = worst, 100 = best).
quality = 82

# Maximum parallel image-processing workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
address = "127.0.0.1:8080"

# Threads handling requests.
workers = 4

# Content-Type of on-demand responses:
#   "extension"  - from the requested file's extension
#   "legacy-jpg" - always image/jpg
content_type = "extension"

# ---------------------------------------------------------------------------
# Sizes
# ---------------------------------------------------------------------------
# Built-in sizes are always generated at upload. A zero width or height
# leaves that axis unconstrained. crop = "fill" cuts to the exact box,
# crop = "fit" keeps the aspect ratio.
[[sizes.builtin]]
name = "thumbnail"
width = 150
height = 150
crop = "fill"

[[sizes.builtin]]
name = "medium"
width = 300
height = 300
crop = "fit"

[[sizes.builtin]]
name = "medium_large"
width = 768
height = 0
crop = "fit"

[[sizes.builtin]]
name = "large"
width = 1024
height = 1024
crop = "fit"

# Custom sizes. These are the ones deferred when generation.defer is on.
# [[sizes.custom]]
# name = "hero"
# width = 1600
# height = 600
# crop = "fill"
"##
}
