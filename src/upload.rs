//! Host-side upload pipeline.
//!
//! Ingesting a file copies it into the uploads directory, then runs the host's
//! size generation wrapped by the three deferral hooks:
//!
//! 1. `pre_upload` (may hide custom sizes)
//! 2. generate the visible sizes
//! 3. `post_metadata` (may add stub records)
//! 4. `thumbnail_args`
//!
//! Only then is the file registered as an attachment with the resulting
//! metadata. A file that fails generation is removed again and never
//! registered.
//!
//! [`Uploader::adopt_existing`] registers originals that are already in the
//! uploads directory, without generating anything.

use crate::deferral::{UploadAction, UploadHooks, UploadSizeDeferral};
use crate::imaging::{
    BackendError, GenerateOptions, ImageBackend, Quality, generate_attachment_metadata,
    get_dimensions, plan_size,
};
use crate::library::{AssetId, AssetIndex, AttachmentMetadata, LibraryError};
use crate::naming::{derived_base, mime_type_for_extension, split_file_name};
use crate::sizes::{SizeDefinition, SizeRegistry};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
    #[error("Image processing failed: {0}")]
    Processing(#[from] BackendError),
    #[error("Not a file name: {}", .0.display())]
    InvalidName(PathBuf),
    #[error("Unsupported file type: {0}")]
    Unsupported(String),
}

/// What an ingest did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub id: AssetId,
    /// Stored path relative to the uploads directory.
    pub file: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Sizes written during the upload.
    pub generated: Vec<String>,
    /// Sizes recorded as stubs, to be materialized on first request.
    pub deferred: Vec<String>,
}

pub struct Uploader<B: ImageBackend> {
    backend: B,
    index: Arc<dyn AssetIndex>,
    registry: Arc<SizeRegistry>,
    deferral: UploadSizeDeferral,
    uploads_dir: PathBuf,
    date_folders: bool,
    quality: Quality,
}

impl<B: ImageBackend> Uploader<B> {
    pub fn new(
        backend: B,
        index: Arc<dyn AssetIndex>,
        registry: Arc<SizeRegistry>,
        deferral: UploadSizeDeferral,
        uploads_dir: impl Into<PathBuf>,
        date_folders: bool,
        quality: Quality,
    ) -> Self {
        Self {
            backend,
            index,
            registry,
            deferral,
            uploads_dir: uploads_dir.into(),
            date_folders,
            quality,
        }
    }

    /// Ingest `source` as an attachment upload.
    pub fn ingest(&self, source: &Path) -> Result<IngestReport, UploadError> {
        self.ingest_as(source, UploadAction::AttachmentUpload, Local::now())
    }

    pub fn ingest_as(
        &self,
        source: &Path,
        action: UploadAction,
        now: DateTime<Local>,
    ) -> Result<IngestReport, UploadError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::InvalidName(source.to_path_buf()))?;
        let (stem, ext) = split_file_name(file_name)
            .ok_or_else(|| UploadError::Unsupported(file_name.to_string()))?;
        let mime_type = mime_type_for_extension(ext)
            .ok_or_else(|| UploadError::Unsupported(file_name.to_string()))?;

        let folder = if self.date_folders {
            now.format("%Y/%m").to_string()
        } else {
            String::new()
        };
        let dir = self.uploads_dir.join(&folder);
        std::fs::create_dir_all(&dir)?;
        let stored_stem = unique_stem(&dir, stem, ext);
        let stored_name = format!("{stored_stem}.{ext}");
        let dest = dir.join(&stored_name);
        std::fs::copy(source, &dest)?;

        let file = if folder.is_empty() {
            stored_name
        } else {
            format!("{folder}/{stored_name}")
        };

        let mut ctx = self.deferral.arm(action, mime_type);
        self.deferral.pre_upload(&mut ctx, &self.registry);

        let visible = ctx.visible_sizes(&self.registry);
        let base = match generate_attachment_metadata(
            &self.backend,
            &dest,
            &visible,
            &GenerateOptions::new(self.quality),
        ) {
            Ok(base) => base,
            Err(e) => {
                self.discard(&dest, &visible, &stored_stem, ext);
                return Err(e.into());
            }
        };
        let generated: Vec<String> = base.sizes.keys().cloned().collect();

        let metadata = self
            .deferral
            .post_metadata(&mut ctx, base, &stored_stem, ext, mime_type);
        self.deferral.thumbnail_args(&mut ctx);

        let deferred: Vec<String> = metadata
            .sizes
            .keys()
            .filter(|name| !generated.contains(*name))
            .cloned()
            .collect();
        let (width, height) = (metadata.width, metadata.height);
        let id = match self.index.insert(&file, mime_type) {
            Ok(id) => id,
            Err(e) => {
                self.discard(&dest, &visible, &stored_stem, ext);
                return Err(e.into());
            }
        };
        self.index.merge_metadata(id, metadata)?;

        info!(
            id,
            file = %file,
            generated = generated.len(),
            deferred = deferred.len(),
            "ingested"
        );

        Ok(IngestReport {
            id,
            url: self.index.url_for(&file),
            file,
            width,
            height,
            generated,
            deferred,
        })
    }

    /// Remove a copied original that never became an attachment, along with
    /// any variants already written next to it.
    fn discard(&self, dest: &Path, sizes: &[SizeDefinition], stem: &str, ext: &str) {
        if let Ok(original) = get_dimensions(&self.backend, dest) {
            for plan in sizes.iter().filter_map(|s| plan_size(original, s, stem, ext)) {
                let _ = std::fs::remove_file(dest.with_file_name(&plan.file));
            }
        }
        if let Err(e) = std::fs::remove_file(dest) {
            warn!(path = %dest.display(), error = %e, "failed to remove discarded upload");
        }
    }
}

/// What adopting an existing uploads directory did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdoptReport {
    /// Newly registered originals, relative to the uploads directory.
    pub adopted: Vec<String>,
    /// Originals that were already registered.
    pub known: usize,
    /// Derived variants of an original in the same directory.
    pub variants: usize,
}

impl<B: ImageBackend> Uploader<B> {
    /// Register every raster original already in the uploads directory.
    ///
    /// Dot files, non-raster files and files named like a derived variant of
    /// a sibling original are skipped. Adopted originals start with no size
    /// records; their sizes are materialized on first request.
    pub fn adopt_existing(&self) -> Result<AdoptReport, UploadError> {
        let mut report = AdoptReport::default();
        let files = WalkDir::new(&self.uploads_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file());

        for entry in files {
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(mime_type) =
                split_file_name(name).and_then(|(_, ext)| mime_type_for_extension(ext))
            else {
                continue;
            };
            if is_variant_of_sibling(entry.path(), name) {
                report.variants += 1;
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.uploads_dir) else {
                continue;
            };
            let file = rel.to_string_lossy().replace('\\', "/");
            if self.index.find_by_url(&self.index.url_for(&file)).is_some() {
                report.known += 1;
                continue;
            }

            let (width, height) = get_dimensions(&self.backend, entry.path())?;
            let id = self.index.insert(&file, mime_type)?;
            self.index.merge_metadata(
                id,
                AttachmentMetadata {
                    width,
                    height,
                    sizes: Default::default(),
                },
            )?;
            info!(id, file = %file, "adopted");
            report.adopted.push(file);
        }
        Ok(report)
    }
}

/// Whether `name` looks like `<base>-WxH.<ext>` next to an existing `<base>.<ext>`.
fn is_variant_of_sibling(path: &Path, name: &str) -> bool {
    let (Some(base), Some((_, ext))) = (derived_base(name), split_file_name(name)) else {
        return false;
    };
    path.with_file_name(format!("{base}.{ext}")).is_file()
}

/// `stem`, or `stem-N` for the first N that does not clobber an existing file.
fn unique_stem(dir: &Path, stem: &str, ext: &str) -> String {
    let mut candidate = stem.to_string();
    let mut n = 1;
    while dir.join(format!("{candidate}.{ext}")).exists() {
        candidate = format!("{stem}-{n}");
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::library::LibraryStore;
    use crate::sizes::{CropMode, SizeDefinition};
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        store: Arc<LibraryStore>,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let uploads = tmp.path().join("uploads");
        fs::create_dir_all(&uploads).unwrap();
        let source = tmp.path().join("photo.jpg");
        fs::write(&source, b"original").unwrap();
        let store = Arc::new(LibraryStore::open(&uploads, "/wp-content/uploads").unwrap());
        Fixture { tmp, store, source }
    }

    fn registry() -> Arc<SizeRegistry> {
        Arc::new(SizeRegistry::new(
            vec![SizeDefinition::new("thumbnail", 150, 150, CropMode::Fill)],
            vec![SizeDefinition::new("medium", 300, 200, CropMode::Fill)],
        ))
    }

    fn uploader(f: &Fixture, defer: bool, date_folders: bool) -> Uploader<MockBackend> {
        uploader_with(f, MockBackend::writing(1200, 800), defer, date_folders)
    }

    fn uploader_with(
        f: &Fixture,
        backend: MockBackend,
        defer: bool,
        date_folders: bool,
    ) -> Uploader<MockBackend> {
        Uploader::new(
            backend,
            f.store.clone(),
            registry(),
            UploadSizeDeferral::new(defer),
            f.tmp.path().join("uploads"),
            date_folders,
            Quality::default(),
        )
    }

    fn may_2023() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 5, 14, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn ingest_without_deferral_generates_everything() {
        let f = fixture();
        let report = uploader(&f, false, true)
            .ingest_as(&f.source, UploadAction::AttachmentUpload, may_2023())
            .unwrap();

        assert_eq!(report.file, "2023/05/photo.jpg");
        assert_eq!(report.url, "/wp-content/uploads/2023/05/photo.jpg");
        assert_eq!(report.generated, vec!["medium", "thumbnail"]);
        assert!(report.deferred.is_empty());

        let uploads = f.tmp.path().join("uploads/2023/05");
        assert!(uploads.join("photo.jpg").exists());
        assert!(uploads.join("photo-300x200.jpg").exists());
        assert!(uploads.join("photo-150x150.jpg").exists());
    }

    #[test]
    fn ingest_with_deferral_stubs_custom_sizes() {
        let f = fixture();
        let report = uploader(&f, true, true)
            .ingest_as(&f.source, UploadAction::AttachmentUpload, may_2023())
            .unwrap();

        assert_eq!(report.generated, vec!["thumbnail"]);
        assert_eq!(report.deferred, vec!["medium"]);

        let uploads = f.tmp.path().join("uploads/2023/05");
        assert!(uploads.join("photo-150x150.jpg").exists());
        assert!(!uploads.join("photo-300x200.jpg").exists());

        let stored = f.store.attachment(report.id).unwrap().metadata;
        assert_eq!(stored.sizes["medium"].file, "photo-300x200.jpg");
        assert_eq!((stored.width, stored.height), (1200, 800));
    }

    #[test]
    fn non_upload_action_is_not_deferred() {
        let f = fixture();
        let report = uploader(&f, true, false)
            .ingest_as(&f.source, UploadAction::Other, may_2023())
            .unwrap();
        assert_eq!(report.file, "photo.jpg");
        assert!(report.deferred.is_empty());
        assert_eq!(report.generated.len(), 2);
    }

    #[test]
    fn repeated_ingest_gets_unique_name() {
        let f = fixture();
        let up = uploader(&f, true, false);
        let first = up.ingest(&f.source).unwrap();
        let second = up.ingest(&f.source).unwrap();

        assert_eq!(first.file, "photo.jpg");
        assert_eq!(second.file, "photo-1.jpg");
        assert_ne!(first.id, second.id);
        let stored = f.store.attachment(second.id).unwrap().metadata;
        assert_eq!(stored.sizes["medium"].file, "photo-1-300x200.jpg");
    }

    #[test]
    fn unsupported_type_is_rejected_before_copy() {
        let f = fixture();
        let doc = f.tmp.path().join("notes.pdf");
        fs::write(&doc, b"%PDF").unwrap();

        let result = uploader(&f, true, false).ingest(&doc);
        assert!(matches!(result, Err(UploadError::Unsupported(_))));
        assert!(!f.tmp.path().join("uploads/notes.pdf").exists());
        assert!(f.store.attachments().is_empty());
    }

    #[test]
    fn undecodable_upload_leaves_no_attachment_or_file() {
        let f = fixture();
        let result = uploader_with(&f, MockBackend::new(), false, false).ingest(&f.source);

        assert!(matches!(result, Err(UploadError::Processing(_))));
        assert!(f.store.attachments().is_empty());
        assert!(!f.tmp.path().join("uploads/photo.jpg").exists());

        // The name is free for the next attempt.
        let report = uploader(&f, false, false).ingest(&f.source).unwrap();
        assert_eq!(report.file, "photo.jpg");
    }

    #[test]
    fn failed_generation_removes_copied_original() {
        let f = fixture();
        let result =
            uploader_with(&f, MockBackend::failing(1200, 800), false, true).ingest_as(
                &f.source,
                UploadAction::AttachmentUpload,
                may_2023(),
            );

        assert!(matches!(result, Err(UploadError::Processing(_))));
        assert!(f.store.attachments().is_empty());
        let leftover: Vec<_> = fs::read_dir(f.tmp.path().join("uploads/2023/05"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftover.is_empty(), "{leftover:?}");
    }

    #[test]
    fn adopt_registers_originals_and_skips_variants() {
        let f = fixture();
        let uploads = f.tmp.path().join("uploads");
        fs::create_dir_all(uploads.join("2023/05")).unwrap();
        fs::write(uploads.join("2023/05/photo.jpg"), b"o").unwrap();
        fs::write(uploads.join("2023/05/photo-300x200.jpg"), b"v").unwrap();
        fs::write(uploads.join("2023/05/sunset-2x1.png"), b"o").unwrap();
        fs::write(uploads.join("2023/05/notes.txt"), b"t").unwrap();

        let up = uploader(&f, true, true);
        let report = up.adopt_existing().unwrap();
        assert_eq!(report.adopted, vec!["2023/05/photo.jpg", "2023/05/sunset-2x1.png"]);
        assert_eq!(report.variants, 1);
        assert_eq!(report.known, 0);

        let id = f.store.find_by_url("/wp-content/uploads/2023/05/photo.jpg").unwrap();
        let stored = f.store.attachment(id).unwrap().metadata;
        assert_eq!((stored.width, stored.height), (1200, 800));
        assert!(stored.sizes.is_empty());

        let again = up.adopt_existing().unwrap();
        assert!(again.adopted.is_empty());
        assert_eq!(again.known, 2);
    }
}
