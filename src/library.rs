//! Stored originals ("attachments") and their derived-size metadata.
//!
//! The core never creates or deletes assets on its own; it looks them up by
//! public URL, reads their original path and merges size records into their
//! metadata. [`AssetIndex`] is that contract. [`LibraryStore`] implements it
//! over a JSON manifest kept next to the uploads.
//!
//! ## Storage
//!
//! The manifest lives at `<uploads_dir>/.library.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "next_id": 2,
//!   "attachments": {
//!     "1": {
//!       "id": 1,
//!       "file": "2023/05/photo.jpg",
//!       "mime_type": "image/jpeg",
//!       "metadata": {
//!         "width": 1200, "height": 800,
//!         "sizes": {
//!           "medium": { "file": "photo-300x200.jpg", "width": 300, "height": 200, "mime_type": "image/jpeg" }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! A runtime index maps each attachment's relative file path to its id, so
//! URL lookups never scan the manifest. Writes go through a temp file and a
//! rename, and are skipped when a merge leaves the metadata unchanged.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the library manifest within the uploads directory.
pub const LIBRARY_FILENAME: &str = ".library.json";

/// Version of the manifest format.
const LIBRARY_VERSION: u32 = 1;

pub type AssetId = u64;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported library version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("Unknown attachment {0}")]
    UnknownAttachment(AssetId),
    #[error("Attachment already registered: {0}")]
    Duplicate(String),
}

/// One derived size of an attachment. Materialized and stub records share
/// this shape; only the existence of `file` on disk tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRecord {
    /// Derived filename, relative to the original's directory.
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

/// Dimensions of the original plus its size records, keyed by size name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub sizes: BTreeMap<String, SizeRecord>,
}

impl AttachmentMetadata {
    /// Overlay `other`: dimensions are replaced, size records with the same
    /// name are overwritten, others are kept. Returns whether anything changed.
    pub fn merge(&mut self, other: AttachmentMetadata) -> bool {
        let mut changed = self.width != other.width || self.height != other.height;
        self.width = other.width;
        self.height = other.height;
        for (name, record) in other.sizes {
            if self.sizes.get(&name) != Some(&record) {
                self.sizes.insert(name, record);
                changed = true;
            }
        }
        changed
    }
}

/// A registered original, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AssetId,
    /// Path relative to the uploads directory (`2023/05/photo.jpg`).
    pub file: String,
    pub mime_type: String,
    #[serde(default)]
    pub metadata: AttachmentMetadata,
}

/// A resolved asset: identity, storage-absolute original path, current sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub path: PathBuf,
    pub mime_type: String,
    pub sizes: BTreeMap<String, SizeRecord>,
}

/// Storage index the resolver, materializer and upload pipeline depend on.
pub trait AssetIndex: Send + Sync {
    /// Reverse lookup of an original's public URL.
    fn find_by_url(&self, url: &str) -> Option<AssetId>;

    /// Public URL of a file relative to the uploads directory.
    fn url_for(&self, file: &str) -> String;

    /// Storage-absolute path of an attachment's original file.
    fn attached_file(&self, id: AssetId) -> Option<PathBuf>;

    fn attachment(&self, id: AssetId) -> Option<Attachment>;

    /// Register a new original at `file` (relative to the uploads directory).
    fn insert(&self, file: &str, mime_type: &str) -> Result<AssetId, LibraryError>;

    /// Merge metadata into an attachment. Returns whether stored state changed.
    fn merge_metadata(
        &self,
        id: AssetId,
        metadata: AttachmentMetadata,
    ) -> Result<bool, LibraryError>;
}

/// On-disk manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryManifest {
    pub version: u32,
    pub next_id: AssetId,
    pub attachments: BTreeMap<AssetId, Attachment>,
    /// Runtime reverse index: relative file → id. Never serialized.
    #[serde(skip)]
    file_index: HashMap<String, AssetId>,
}

impl LibraryManifest {
    pub fn empty() -> Self {
        Self {
            version: LIBRARY_VERSION,
            next_id: 1,
            attachments: BTreeMap::new(),
            file_index: HashMap::new(),
        }
    }

    /// Load from the uploads directory. A missing file is an empty library;
    /// an unparseable file or a version mismatch is an error.
    pub fn load(uploads_dir: &Path) -> Result<Self, LibraryError> {
        let path = uploads_dir.join(LIBRARY_FILENAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(e) => return Err(e.into()),
        };
        let mut manifest: Self = serde_json::from_str(&content)?;
        if manifest.version != LIBRARY_VERSION {
            return Err(LibraryError::Version {
                found: manifest.version,
                expected: LIBRARY_VERSION,
            });
        }
        manifest.file_index = build_file_index(&manifest.attachments);
        Ok(manifest)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, uploads_dir: &Path) -> Result<(), LibraryError> {
        std::fs::create_dir_all(uploads_dir)?;
        let path = uploads_dir.join(LIBRARY_FILENAME);
        let tmp = uploads_dir.join(format!("{LIBRARY_FILENAME}.tmp"));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn find_by_file(&self, file: &str) -> Option<AssetId> {
        self.file_index.get(file).copied()
    }

    fn insert(&mut self, file: &str, mime_type: &str) -> Result<AssetId, LibraryError> {
        if self.file_index.contains_key(file) {
            return Err(LibraryError::Duplicate(file.to_string()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.file_index.insert(file.to_string(), id);
        self.attachments.insert(
            id,
            Attachment {
                id,
                file: file.to_string(),
                mime_type: mime_type.to_string(),
                metadata: AttachmentMetadata::default(),
            },
        );
        Ok(id)
    }
}

fn build_file_index(attachments: &BTreeMap<AssetId, Attachment>) -> HashMap<String, AssetId> {
    attachments
        .values()
        .map(|a| (a.file.clone(), a.id))
        .collect()
}

/// JSON-backed [`AssetIndex`] rooted at the uploads directory.
pub struct LibraryStore {
    uploads_dir: PathBuf,
    base_url: String,
    manifest: RwLock<LibraryManifest>,
}

impl LibraryStore {
    /// Open the library in `uploads_dir`, publicly reachable under `base_url`.
    pub fn open(uploads_dir: impl Into<PathBuf>, base_url: &str) -> Result<Self, LibraryError> {
        let uploads_dir = uploads_dir.into();
        let manifest = LibraryManifest::load(&uploads_dir)?;
        Ok(Self {
            uploads_dir,
            base_url: base_url.trim_end_matches('/').to_string(),
            manifest: RwLock::new(manifest),
        })
    }

    /// Snapshot of every attachment, ordered by id.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.manifest.read().attachments.values().cloned().collect()
    }

    /// Size records whose files are not on disk yet, per attachment.
    pub fn pending_sizes(&self) -> Vec<PendingSizes> {
        let manifest = self.manifest.read();
        manifest
            .attachments
            .values()
            .filter_map(|attachment| {
                let dir = self
                    .uploads_dir
                    .join(&attachment.file)
                    .parent()
                    .map(Path::to_path_buf)?;
                let missing: Vec<(String, String)> = attachment
                    .metadata
                    .sizes
                    .iter()
                    .filter(|(_, record)| !dir.join(&record.file).exists())
                    .map(|(name, record)| (name.clone(), record.file.clone()))
                    .collect();
                (!missing.is_empty()).then(|| PendingSizes {
                    id: attachment.id,
                    file: attachment.file.clone(),
                    missing,
                })
            })
            .collect()
    }
}

/// Stub records of one attachment: `(size name, derived filename)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSizes {
    pub id: AssetId,
    pub file: String,
    pub missing: Vec<(String, String)>,
}

impl AssetIndex for LibraryStore {
    fn find_by_url(&self, url: &str) -> Option<AssetId> {
        let file = url.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        self.manifest.read().find_by_file(file)
    }

    fn url_for(&self, file: &str) -> String {
        format!("{}/{}", self.base_url, file.trim_start_matches('/'))
    }

    fn attached_file(&self, id: AssetId) -> Option<PathBuf> {
        let manifest = self.manifest.read();
        let attachment = manifest.attachments.get(&id)?;
        Some(self.uploads_dir.join(&attachment.file))
    }

    fn attachment(&self, id: AssetId) -> Option<Attachment> {
        self.manifest.read().attachments.get(&id).cloned()
    }

    fn insert(&self, file: &str, mime_type: &str) -> Result<AssetId, LibraryError> {
        let mut manifest = self.manifest.write();
        let id = manifest.insert(file, mime_type)?;
        manifest.save(&self.uploads_dir)?;
        Ok(id)
    }

    fn merge_metadata(
        &self,
        id: AssetId,
        metadata: AttachmentMetadata,
    ) -> Result<bool, LibraryError> {
        let mut manifest = self.manifest.write();
        let attachment = manifest
            .attachments
            .get_mut(&id)
            .ok_or(LibraryError::UnknownAttachment(id))?;
        let changed = attachment.metadata.merge(metadata);
        if changed {
            manifest.save(&self.uploads_dir)?;
        }
        Ok(changed)
    }
}
