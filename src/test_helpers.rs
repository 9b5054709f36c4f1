//! Shared test utilities.
//!
//! Synthetic image fixtures for tests that go through the real backend, and a
//! library fixture with one registered original.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let lib = library_with_original("2023/05/photo.jpg", 1200, 800);
//! let path = lib.uploads().join("2023/05/photo.jpg");
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::library::{AssetIndex, LibraryStore};

// =========================================================================
// Image fixtures
// =========================================================================

/// Gradient pixels, so resized output is not a flat color.
fn gradient(width: u32, height: u32) -> image::RgbImage {
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// Write a JPEG of the given dimensions, creating parent directories.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// Write a PNG of the given dimensions, creating parent directories.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

// =========================================================================
// Library fixtures
// =========================================================================

pub struct TestLibrary {
    pub tmp: TempDir,
    pub store: Arc<LibraryStore>,
}

impl TestLibrary {
    pub fn uploads(&self) -> PathBuf {
        self.tmp.path().to_path_buf()
    }
}

/// A library rooted in a temp dir with one real JPEG registered at `file`.
pub fn library_with_original(file: &str, width: u32, height: u32) -> TestLibrary {
    let tmp = TempDir::new().unwrap();
    create_test_jpeg(&tmp.path().join(file), width, height);
    let store = Arc::new(LibraryStore::open(tmp.path(), "/wp-content/uploads").unwrap());
    store.insert(file, "image/jpeg").unwrap();
    TestLibrary { tmp, store }
}
