//! Opening a derived file for streaming back to the client.

use crate::naming::mime_type_for_extension;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The content type reported by legacy deployments for every derived image.
pub const LEGACY_CONTENT_TYPE: &str = "image/jpg";

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Derived file missing: {}", .0.display())]
    Missing(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How the `Content-Type` of an on-demand response is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentTypePolicy {
    /// From the requested file's extension.
    #[default]
    Extension,
    /// Always `image/jpg`, whatever the format.
    LegacyJpg,
}

impl ContentTypePolicy {
    pub fn content_type(self, ext: &str) -> &'static str {
        match self {
            ContentTypePolicy::Extension => {
                mime_type_for_extension(ext).unwrap_or("application/octet-stream")
            }
            ContentTypePolicy::LegacyJpg => LEGACY_CONTENT_TYPE,
        }
    }
}

/// An opened derived file plus the headers to send with it.
#[derive(Debug)]
pub struct ImageResponse {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub content_length: u64,
    pub body: File,
}

impl ImageResponse {
    /// The body reader, limited to the advertised length.
    pub fn into_reader(self) -> io::Take<File> {
        self.body.take(self.content_length)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEmitter {
    policy: ContentTypePolicy,
}

impl ResponseEmitter {
    pub fn new(policy: ContentTypePolicy) -> Self {
        Self { policy }
    }

    /// Open `path` for streaming. A missing file is [`EmitError::Missing`],
    /// never a partial response.
    pub fn open(&self, path: &Path, ext: &str) -> Result<ImageResponse, EmitError> {
        let body = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EmitError::Missing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = body.metadata()?;
        if !metadata.is_file() {
            return Err(EmitError::Missing(path.to_path_buf()));
        }
        Ok(ImageResponse {
            path: path.to_path_buf(),
            content_type: self.policy.content_type(ext),
            content_length: metadata.len(),
            body,
        })
    }
}
