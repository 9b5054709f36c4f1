//! The derived-filename convention and its inverse request-path parser.
//!
//! Every resized variant of an original lives next to it and is named
//! `<base>-<width>x<height>.<ext>`:
//!
//! - `photo.jpg` at 300×200 → `photo-300x200.jpg`
//! - `my-photo.png` at 1024×683 → `my-photo-1024x683.png`
//!
//! [`derived_filename`] is the only place that format is spelled out. The
//! materializer, the upload-time stub fabrication and the response lookup all
//! go through it, so a stub record always names the file the on-demand path
//! will later produce.
//!
//! ## Request paths
//!
//! Incoming not-found paths are matched against
//!
//! ```text
//! .../<marker>/<segment>[/<yyyy>/<mm>]/<base>-<width>x<height?>.<ext>
//! ```
//!
//! where `<marker>` is the library-root directory (`wp-content` by default),
//! `<height>` may be empty and `<ext>` is one of [`ACCEPTED_EXTENSIONS`],
//! case-insensitive. Only the date partition is kept as the folder; the
//! segment after the marker is not part of the stored layout.

use percent_encoding::percent_decode_str;
use regex::Regex;

/// Raster extensions the on-demand path answers for.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Mime types of [`ACCEPTED_EXTENSIONS`].
pub const ACCEPTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

/// A not-found request path split into its naming-convention parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Date partition including the leading slash (`/2023/05`), or empty.
    pub folder: String,
    /// Original file stem (`photo` for `photo-300x200.jpg`).
    pub base: String,
    pub width: u32,
    /// `None` when the URL carried no height token (`photo-300x.jpg`).
    pub height: Option<u32>,
    /// Extension exactly as it appeared in the URL.
    pub extension: String,
}

/// Request-path matcher bound to a library-root marker directory.
#[derive(Debug, Clone)]
pub struct NamingConvention {
    pattern: Regex,
}

impl NamingConvention {
    pub fn new(marker: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"^(?:.*/)?{}/[^/]+(/[0-9]{{4}}/[0-9]{{2}})?/([^/]+)-([0-9]+)x([0-9]*)\.((?i:jpe?g|png|gif))$",
            regex::escape(marker)
        ))?;
        Ok(Self { pattern })
    }

    /// Parse a request path (query string allowed, percent-encoding decoded).
    ///
    /// Returns `None` for anything that is not a derived-variant request;
    /// the caller must then leave the not-found response alone.
    pub fn parse(&self, request_path: &str) -> Option<ParsedRequest> {
        let path = request_path
            .split(['?', '#'])
            .next()
            .unwrap_or(request_path);
        let path = percent_decode_str(path).decode_utf8().ok()?;
        let caps = self.pattern.captures(&path)?;

        let width = caps[3].parse().ok()?;
        let height = match &caps[4] {
            "" => None,
            h => Some(h.parse().ok()?),
        };

        Some(ParsedRequest {
            folder: caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            base: caps[2].to_string(),
            width,
            height,
            extension: caps[5].to_string(),
        })
    }
}

/// Filename of a derived variant: `<base>-<width>x<height>.<ext>`.
pub fn derived_filename(base: &str, width: u32, height: u32, ext: &str) -> String {
    format!("{base}-{width}x{height}.{ext}")
}

/// Public path of a derived variant, the inverse of [`NamingConvention::parse`].
///
/// An absent height produces the empty height token (`photo-300x.jpg`).
pub fn request_path(
    marker: &str,
    segment: &str,
    folder: &str,
    base: &str,
    width: u32,
    height: Option<u32>,
    ext: &str,
) -> String {
    let height = height.map(|h| h.to_string()).unwrap_or_default();
    format!("/{marker}/{segment}{folder}/{base}-{width}x{height}.{ext}")
}

/// Split `photo.jpg` into `("photo", "jpg")`. Returns `None` without an extension.
pub fn split_file_name(file_name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((stem, ext))
}

/// If `file_name` follows the derived convention, return the stem of the
/// original it would belong to (`photo-300x200.jpg` → `photo`).
pub fn derived_base(file_name: &str) -> Option<&str> {
    let (stem, _) = split_file_name(file_name)?;
    let (base, dims) = stem.rsplit_once('-')?;
    let (w, h) = dims.split_once('x')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    (all_digits(w) && all_digits(h) && !base.is_empty()).then_some(base)
}

/// Mime type for an accepted raster extension (case-insensitive).
pub fn mime_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
