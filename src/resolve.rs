//! Maps a parsed request back to the stored original it was derived from.
//!
//! The original's public URL is rebuilt from the request parts
//! (`<base_url><folder>/<base>.<ext>`), reverse-looked-up in the
//! [`AssetIndex`], and the resulting attachment's file is checked on disk.
//! Every miss is a silent `None`.

use crate::library::{Asset, AssetId, AssetIndex};
use std::sync::Arc;
use tracing::debug;

pub struct AssetResolver {
    index: Arc<dyn AssetIndex>,
    base_url: String,
}

impl AssetResolver {
    pub fn new(index: Arc<dyn AssetIndex>, base_url: &str) -> Self {
        Self {
            index,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of the unsized original for a request.
    pub fn original_url(&self, folder: &str, base: &str, ext: &str) -> String {
        format!("{}{}/{}.{}", self.base_url, folder, base, ext)
    }

    pub fn resolve(&self, folder: &str, base: &str, ext: &str) -> Option<Asset> {
        let url = self.original_url(folder, base, ext);
        let Some(id) = self.index.find_by_url(&url) else {
            debug!(url = %url, "no attachment for original URL");
            return None;
        };
        self.resolve_id(id)
    }

    /// Load an asset by id, provided its original is on disk.
    pub fn resolve_id(&self, id: AssetId) -> Option<Asset> {
        let Some(path) = self.index.attached_file(id) else {
            debug!(id, "attachment has no stored file");
            return None;
        };
        if !path.is_file() {
            debug!(id, path = %path.display(), "original missing on disk");
            return None;
        }
        let attachment = self.index.attachment(id)?;

        Some(Asset {
            id,
            path,
            mime_type: attachment.mime_type,
            sizes: attachment.metadata.sizes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryStore;
    use std::fs;
    use tempfile::TempDir;

    fn store_with_photo() -> (TempDir, Arc<LibraryStore>) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("2023/05")).unwrap();
        fs::write(tmp.path().join("2023/05/photo.jpg"), b"jpeg").unwrap();
        let store = LibraryStore::open(tmp.path(), "/wp-content/uploads").unwrap();
        store.insert("2023/05/photo.jpg", "image/jpeg").unwrap();
        (tmp, Arc::new(store))
    }

    #[test]
    fn resolves_dated_original() {
        let (tmp, store) = store_with_photo();
        let resolver = AssetResolver::new(store, "/wp-content/uploads/");

        let asset = resolver.resolve("/2023/05", "photo", "jpg").unwrap();
        assert_eq!(asset.path, tmp.path().join("2023/05/photo.jpg"));
        assert_eq!(asset.mime_type, "image/jpeg");
        assert!(asset.sizes.is_empty());
    }

    #[test]
    fn original_url_joins_parts() {
        let (_tmp, store) = store_with_photo();
        let resolver = AssetResolver::new(store, "/wp-content/uploads");
        assert_eq!(
            resolver.original_url("", "logo", "png"),
            "/wp-content/uploads/logo.png"
        );
    }

    #[test]
    fn unknown_url_is_none() {
        let (_tmp, store) = store_with_photo();
        let resolver = AssetResolver::new(store, "/wp-content/uploads");
        assert!(resolver.resolve("/2023/06", "photo", "jpg").is_none());
        assert!(resolver.resolve("/2023/05", "other", "jpg").is_none());
    }

    #[test]
    fn resolve_id_checks_identity() {
        let (_tmp, store) = store_with_photo();
        let resolver = AssetResolver::new(store, "/wp-content/uploads");
        assert!(resolver.resolve_id(1).is_some());
        assert!(resolver.resolve_id(2).is_none());
    }

    #[test]
    fn missing_original_file_is_none() {
        let (tmp, store) = store_with_photo();
        fs::remove_file(tmp.path().join("2023/05/photo.jpg")).unwrap();
        let resolver = AssetResolver::new(store, "/wp-content/uploads");
        assert!(resolver.resolve("/2023/05", "photo", "jpg").is_none());
    }
}
