//! # Sizes on Demand
//!
//! Lazily materializes resized image variants. A request for a derived size
//! that is not on disk is traced back to its original, every registered size
//! of that original is regenerated, and the requested file is streamed back
//! in the same response. Optionally, uploads only write the built-in sizes
//! and leave stub records for the custom ones.
//!
//! # Request Flow
//!
//! ```text
//! GET /wp-content/uploads/2023/05/photo-300x200.jpg   (file missing)
//!
//! 1. naming       path       → folder /2023/05, base photo, 300x200, jpg
//! 2. resolve      original   → /wp-content/uploads/2023/05/photo.jpg → asset #1
//! 3. materialize  asset #1   → every registered size written + merged
//! 4. response     file       → uploads/2023/05/photo-300x200.jpg, streamed
//! ```
//!
//! Any step can decline. A declined request falls through to the host's
//! normal 404 with nothing written and no metadata changed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`naming`] | Derived-variant URL grammar and filename helpers |
//! | [`sizes`] | Size definitions and the built-in/custom registry |
//! | [`imaging`] | Scaling math, the pixel backend, metadata generation |
//! | [`library`] | The attachment store (`.library.json`) behind [`library::AssetIndex`] |
//! | [`resolve`] | Maps a parsed request back to its original asset |
//! | [`flight`] | Collapses concurrent work on the same key |
//! | [`materialize`] | Time-bounded regeneration of all sizes for one asset |
//! | [`deferral`] | Upload-time hooks that defer custom sizes to first request |
//! | [`upload`] | Host-side ingest and adoption of existing originals |
//! | [`response`] | Opens a derived file with its content type and length |
//! | [`intercept`] | The not-found hook tying the request flow together |
//! | [`serve`] | `tiny_http` host serving the uploads directory |
//! | [`config`] | `config.toml` loading, validation, stock defaults |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Whole-Asset Regeneration
//!
//! A miss on one size regenerates every registered size of that original.
//! Sibling sizes are then already on disk for the next request, and the
//! stored metadata never records a mix of stale and fresh sizes.
//!
//! ## The Registry Is Never Mutated
//!
//! Deferral hides custom sizes from upload-time generation through a
//! request-scoped [`deferral::UploadContext`], not by editing the shared
//! [`sizes::SizeRegistry`]. Concurrent requests always see the full registry.
//!
//! ## Stub Names Match Generated Names
//!
//! Stub records are computed with the same scaling rules the generator uses
//! ([`imaging::plan_size`]), so the URL a page links to is exactly the file
//! on-demand generation later writes.

pub mod config;
pub mod deferral;
pub mod flight;
pub mod imaging;
pub mod intercept;
pub mod library;
pub mod materialize;
pub mod naming;
pub mod output;
pub mod resolve;
pub mod response;
pub mod serve;
pub mod sizes;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_helpers;
