//! The not-found hook: turn a miss on a derived-variant URL into a response.
//!
//! ```text
//! path ─▶ parse ─▶ resolve ─▶ materialize ─▶ pick file ─▶ open
//!           │         │            │             │          │
//!           └─────────┴────────────┴─────────────┴──────────┴─▶ Declined
//! ```
//!
//! Every step may decline. A declined request leaves the host's own
//! not-found handling untouched and nothing has been written to the client.

use crate::imaging::ImageBackend;
use crate::library::AttachmentMetadata;
use crate::materialize::SizeMaterializer;
use crate::naming::{NamingConvention, ParsedRequest, derived_filename};
use crate::resolve::AssetResolver;
use crate::response::{ImageResponse, ResponseEmitter};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Result of the not-found hook.
#[derive(Debug)]
pub enum Outcome {
    /// The response is ready; the host must send it and do nothing else.
    Handled(ImageResponse),
    /// Not ours, or failed; the host proceeds with its default not-found.
    Declined,
}

impl Outcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled(_))
    }
}

pub struct RequestInterceptor<B: ImageBackend> {
    naming: NamingConvention,
    resolver: AssetResolver,
    materializer: SizeMaterializer<B>,
    emitter: ResponseEmitter,
    uploads_dir: PathBuf,
}

impl<B: ImageBackend> RequestInterceptor<B> {
    pub fn new(
        naming: NamingConvention,
        resolver: AssetResolver,
        materializer: SizeMaterializer<B>,
        emitter: ResponseEmitter,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            naming,
            resolver,
            materializer,
            emitter,
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn on_not_found(&self, request_path: &str) -> Outcome {
        let Some(request) = self.naming.parse(request_path) else {
            debug!(path = request_path, "not a derived-size request");
            return Outcome::Declined;
        };

        let Some(asset) = self
            .resolver
            .resolve(&request.folder, &request.base, &request.extension)
        else {
            return Outcome::Declined;
        };

        let generated = match self.materializer.materialize(&asset) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(id = asset.id, error = %e, "declining after failed materialization");
                return Outcome::Declined;
            }
        };

        let Some(file_name) = requested_file(&request, &generated) else {
            debug!(
                id = asset.id,
                width = request.width,
                "no unambiguous generated size with the requested width"
            );
            return Outcome::Declined;
        };

        let path = self
            .uploads_dir
            .join(request.folder.trim_start_matches('/'))
            .join(&file_name);
        match self.emitter.open(&path, &request.extension) {
            Ok(response) => {
                info!(path = %path.display(), bytes = response.content_length, "serving on-demand size");
                Outcome::Handled(response)
            }
            Err(e) => {
                warn!(id = asset.id, error = %e, "derived file unavailable after materialization");
                Outcome::Declined
            }
        }
    }
}

/// The derived filename the request refers to.
///
/// With an explicit height the URL names the file directly. Without one, the
/// height comes from the generated sizes with the requested width; when they
/// disagree on the height the request is ambiguous and nothing is picked.
fn requested_file(request: &ParsedRequest, generated: &AttachmentMetadata) -> Option<String> {
    let height = match request.height {
        Some(h) => h,
        None => {
            let mut heights = generated
                .sizes
                .values()
                .filter(|record| record.width == request.width)
                .map(|record| record.height);
            let first = heights.next()?;
            if heights.any(|h| h != first) {
                return None;
            }
            first
        }
    };
    Some(derived_filename(
        &request.base,
        request.width,
        height,
        &request.extension,
    ))
}
