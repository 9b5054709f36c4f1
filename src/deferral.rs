//! Upload-time deferral of custom size generation.
//!
//! When deferral is on, an upload only pays for the built-in sizes. The
//! custom sizes are recorded as stubs: metadata entries named exactly like
//! the files the on-demand path will later produce, with no pixels behind
//! them yet.
//!
//! The state for one upload lives in an [`UploadContext`] that the upload
//! pipeline threads through the three hook points:
//!
//! ```text
//! Armed ──pre_upload──▶ Snapshotted ──post_metadata──▶ Restored
//!                           │                              ▲
//!                           └───────thumbnail_args─────────┘
//! ```
//!
//! A context only starts `Armed` when deferral is enabled, the request is an
//! attachment upload and the file is an accepted raster type
//! ([`UploadSizeDeferral::arm`]). Any other request gets an `Inactive`
//! context and every hook passes through.
//!
//! The shared [`SizeRegistry`] is never touched; while snapshotted the
//! context simply reports the built-in sizes as the visible set.

use crate::imaging::plan_size;
use crate::library::AttachmentMetadata;
use crate::naming::ACCEPTED_MIME_TYPES;
use crate::sizes::{SizeDefinition, SizeRegistry};
use tracing::debug;

/// Request-scoped deferral state for one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UploadContext {
    #[default]
    Inactive,
    /// Deferral applies to this request; nothing captured yet.
    Armed,
    /// Custom sizes captured and hidden from the upload's own generation.
    Snapshotted(Vec<SizeDefinition>),
    /// Custom sizes visible again; the snapshot is kept for stub fabrication.
    Restored(Vec<SizeDefinition>),
}

impl UploadContext {
    /// The sizes the host pipeline should generate for this upload.
    pub fn visible_sizes(&self, registry: &SizeRegistry) -> Vec<SizeDefinition> {
        match self {
            UploadContext::Snapshotted(_) => registry.builtin().to_vec(),
            _ => registry.all(),
        }
    }

    fn restore(&mut self) -> Option<&[SizeDefinition]> {
        if let UploadContext::Snapshotted(sizes) = self {
            *self = UploadContext::Restored(std::mem::take(sizes));
        }
        match self {
            UploadContext::Restored(sizes) => Some(sizes.as_slice()),
            _ => None,
        }
    }
}

/// What the inbound request declares it is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAction {
    /// A new original being added to the library.
    AttachmentUpload,
    /// Anything else that happens to carry a file (imports, replacements).
    Other,
}

/// The three callback slots an upload pipeline invokes.
pub trait UploadHooks {
    /// Before the upload is processed.
    fn pre_upload(&self, ctx: &mut UploadContext, registry: &SizeRegistry);

    /// After the host computed base metadata; returns the metadata to store.
    fn post_metadata(
        &self,
        ctx: &mut UploadContext,
        metadata: AttachmentMetadata,
        stem: &str,
        ext: &str,
        mime_type: &str,
    ) -> AttachmentMetadata;

    /// Before thumbnail arguments are built. Idempotent.
    fn thumbnail_args(&self, ctx: &mut UploadContext);
}

/// Hooks that postpone custom sizes when `enabled`.
#[derive(Debug, Clone, Copy)]
pub struct UploadSizeDeferral {
    enabled: bool,
}

impl UploadSizeDeferral {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Initial context for a request.
    pub fn arm(&self, action: UploadAction, mime_type: &str) -> UploadContext {
        if self.enabled
            && action == UploadAction::AttachmentUpload
            && ACCEPTED_MIME_TYPES.contains(&mime_type)
        {
            UploadContext::Armed
        } else {
            UploadContext::Inactive
        }
    }
}

impl UploadHooks for UploadSizeDeferral {
    fn pre_upload(&self, ctx: &mut UploadContext, registry: &SizeRegistry) {
        if !matches!(ctx, UploadContext::Armed) {
            return;
        }
        debug!(deferred = registry.custom().len(), "deferring custom sizes");
        *ctx = UploadContext::Snapshotted(registry.custom().to_vec());
    }

    fn post_metadata(
        &self,
        ctx: &mut UploadContext,
        mut metadata: AttachmentMetadata,
        stem: &str,
        ext: &str,
        mime_type: &str,
    ) -> AttachmentMetadata {
        let Some(snapshot) = ctx.restore() else {
            return metadata;
        };
        let original = (metadata.width, metadata.height);
        for size in snapshot {
            if let Some(plan) = plan_size(original, size, stem, ext) {
                metadata
                    .sizes
                    .entry(plan.name.clone())
                    .or_insert_with(|| plan.into_record(mime_type));
            }
        }
        metadata
    }

    fn thumbnail_args(&self, ctx: &mut UploadContext) {
        ctx.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::{GenerateOptions, Quality, generate_attachment_metadata};
    use crate::library::SizeRecord;
    use crate::sizes::CropMode;

    fn registry() -> SizeRegistry {
        SizeRegistry::new(
            vec![SizeDefinition::new("thumbnail", 150, 150, CropMode::Fill)],
            vec![
                SizeDefinition::new("hero", 1000, 500, CropMode::Fill),
                SizeDefinition::new("card", 400, 0, CropMode::Fit),
                SizeDefinition::new("poster", 3000, 3000, CropMode::Fit),
            ],
        )
    }

    fn base_metadata() -> AttachmentMetadata {
        AttachmentMetadata {
            width: 1200,
            height: 800,
            sizes: [(
                "thumbnail".to_string(),
                SizeRecord {
                    file: "photo-150x150.jpg".into(),
                    width: 150,
                    height: 150,
                    mime_type: "image/jpeg".into(),
                },
            )]
            .into(),
        }
    }

    fn armed(hooks: &UploadSizeDeferral) -> UploadContext {
        hooks.arm(UploadAction::AttachmentUpload, "image/jpeg")
    }

    #[test]
    fn arm_requires_flag_action_and_raster_mime() {
        let on = UploadSizeDeferral::new(true);
        let off = UploadSizeDeferral::new(false);

        assert_eq!(armed(&on), UploadContext::Armed);
        assert_eq!(on.arm(UploadAction::AttachmentUpload, "image/gif"), UploadContext::Armed);
        assert_eq!(armed(&off), UploadContext::Inactive);
        assert_eq!(on.arm(UploadAction::Other, "image/jpeg"), UploadContext::Inactive);
        assert_eq!(
            on.arm(UploadAction::AttachmentUpload, "application/pdf"),
            UploadContext::Inactive
        );
    }

    #[test]
    fn disabled_deferral_never_arms() {
        let hooks = UploadSizeDeferral::new(false);
        let registry = registry();
        let mut ctx = armed(&hooks);

        hooks.pre_upload(&mut ctx, &registry);
        assert_eq!(ctx, UploadContext::Inactive);
        assert_eq!(ctx.visible_sizes(&registry).len(), 4);

        let meta = hooks.post_metadata(&mut ctx, base_metadata(), "photo", "jpg", "image/jpeg");
        assert_eq!(meta, base_metadata());
    }

    #[test]
    fn snapshot_hides_custom_sizes_without_touching_registry() {
        let hooks = UploadSizeDeferral::new(true);
        let registry = registry();
        let mut ctx = armed(&hooks);

        hooks.pre_upload(&mut ctx, &registry);
        assert!(matches!(ctx, UploadContext::Snapshotted(_)));
        let visible: Vec<_> = ctx
            .visible_sizes(&registry)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(visible, vec!["thumbnail"]);
        assert_eq!(registry.custom().len(), 3);

        // A second upload's context is unaffected.
        assert_eq!(UploadContext::default().visible_sizes(&registry).len(), 4);
    }

    #[test]
    fn post_metadata_fabricates_applicable_stubs() {
        let hooks = UploadSizeDeferral::new(true);
        let registry = registry();
        let mut ctx = armed(&hooks);
        hooks.pre_upload(&mut ctx, &registry);

        let meta = hooks.post_metadata(&mut ctx, base_metadata(), "photo", "jpg", "image/jpeg");

        assert_eq!(meta.sizes["hero"].file, "photo-1000x500.jpg");
        assert_eq!(meta.sizes["card"].file, "photo-400x267.jpg");
        assert!(!meta.sizes.contains_key("poster"));
        assert_eq!(meta.sizes["thumbnail"].file, "photo-150x150.jpg");
        assert!(matches!(ctx, UploadContext::Restored(_)));
        assert_eq!(ctx.visible_sizes(&registry).len(), 4);
    }

    #[test]
    fn post_metadata_keeps_existing_records() {
        let hooks = UploadSizeDeferral::new(true);
        let registry = SizeRegistry::new(
            vec![],
            vec![SizeDefinition::new("thumbnail", 100, 100, CropMode::Fill)],
        );
        let mut ctx = armed(&hooks);
        hooks.pre_upload(&mut ctx, &registry);

        let meta = hooks.post_metadata(&mut ctx, base_metadata(), "photo", "jpg", "image/jpeg");
        assert_eq!(meta.sizes["thumbnail"].file, "photo-150x150.jpg");
    }

    #[test]
    fn thumbnail_args_restores_idempotently() {
        let hooks = UploadSizeDeferral::new(true);
        let registry = registry();
        let mut ctx = armed(&hooks);
        hooks.pre_upload(&mut ctx, &registry);

        hooks.thumbnail_args(&mut ctx);
        let once = ctx.clone();
        hooks.thumbnail_args(&mut ctx);
        assert_eq!(ctx, once);
        assert!(matches!(ctx, UploadContext::Restored(_)));

        // Stubs are still fabricated after an early restore.
        let meta = hooks.post_metadata(&mut ctx, base_metadata(), "photo", "jpg", "image/jpeg");
        assert!(meta.sizes.contains_key("hero"));
    }

    #[test]
    fn stub_filenames_match_materialized_filenames() {
        let hooks = UploadSizeDeferral::new(true);
        let registry = registry();
        let mut ctx = armed(&hooks);
        hooks.pre_upload(&mut ctx, &registry);
        let stubs = hooks.post_metadata(&mut ctx, base_metadata(), "photo", "jpg", "image/jpeg");

        let tmp = tempfile::TempDir::new().unwrap();
        let backend = MockBackend::writing(1200, 800);
        let generated = generate_attachment_metadata(
            &backend,
            &tmp.path().join("photo.jpg"),
            registry.custom(),
            &GenerateOptions::new(Quality::default()),
        )
        .unwrap();

        for (name, record) in &generated.sizes {
            assert_eq!(&stubs.sizes[name], record, "size {name}");
        }
        assert_eq!(generated.sizes.len(), 2);
    }
}
