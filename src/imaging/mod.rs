//! Image processing in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Fit resize** | Lanczos3 `resize_exact` to policy-computed dimensions |
//! | **Fill resize** | `resize_to_fill` (scale then center-crop) |
//!
//! The module is split into:
//! - **Calculations**: the size scaling policy (pure, unit testable)
//! - **Parameters**: data structures describing one resize
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: planning and generating every registered size for an original

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{compute_target_dimensions, constrain_dimensions};
pub use operations::{
    GenerateOptions, PlannedSize, generate_attachment_metadata, get_dimensions, plan_size,
};
pub use params::{Quality, ResizeParams};
pub use rust_backend::RustBackend;
