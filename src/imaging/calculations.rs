//! Pure calculation functions for derived-size dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::sizes::CropMode;

/// Fit `current` inside a `max` box, preserving aspect ratio.
///
/// A zero bound leaves that axis unconstrained; both zero returns `current`.
/// Never upscales and never returns a zero dimension.
///
/// # Examples
/// ```
/// # use sizes_on_demand::imaging::constrain_dimensions;
/// assert_eq!(constrain_dimensions((1200, 800), (300, 300)), (300, 200));
/// assert_eq!(constrain_dimensions((1200, 800), (768, 0)), (768, 512));
/// ```
pub fn constrain_dimensions(current: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (cur_w, cur_h) = current;
    let (max_w, max_h) = max;

    if max_w == 0 && max_h == 0 {
        return current;
    }

    let width_ratio = if max_w > 0 && cur_w > max_w {
        max_w as f64 / cur_w as f64
    } else {
        1.0
    };
    let height_ratio = if max_h > 0 && cur_h > max_h {
        max_h as f64 / cur_h as f64
    } else {
        1.0
    };

    let smaller = width_ratio.min(height_ratio);
    let larger = width_ratio.max(height_ratio);

    // The larger ratio only wins if it still fits both bounds; an unbounded
    // axis (0) never fits, which forces the smaller ratio.
    let fits = |ratio: f64| {
        (cur_w as f64 * ratio).round() as u32 <= max_w
            && (cur_h as f64 * ratio).round() as u32 <= max_h
    };
    let ratio = if fits(larger) { larger } else { smaller };

    let w = ((cur_w as f64 * ratio).round() as u32).max(1);
    let h = ((cur_h as f64 * ratio).round() as u32).max(1);
    (w, h)
}

/// Output dimensions for a derived size, or `None` when the size is not
/// applicable to this original.
///
/// - `Fill`: the target box, clamped to the original on each axis. A zero
///   target axis is derived from the other through the original's aspect ratio.
/// - `Fit`: the largest aspect-preserving size inside the target box.
///
/// Not applicable when the original or both targets are zero, or when the
/// result would be at least as large as the original on both axes (no
/// downscale happens) unless the target matches the original exactly on an axis.
/// A result identical to the original is never applicable.
pub fn compute_target_dimensions(
    original: (u32, u32),
    target: (u32, u32),
    crop: CropMode,
) -> Option<(u32, u32)> {
    let (orig_w, orig_h) = original;
    let (dest_w, dest_h) = target;

    if orig_w == 0 || orig_h == 0 || (dest_w == 0 && dest_h == 0) {
        return None;
    }

    let (new_w, new_h) = match crop {
        CropMode::Fill => {
            let aspect = orig_w as f64 / orig_h as f64;
            let mut w = dest_w.min(orig_w);
            let mut h = dest_h.min(orig_h);
            if w == 0 {
                w = ((h as f64 * aspect).round() as u32).max(1);
            }
            if h == 0 {
                h = ((w as f64 / aspect).round() as u32).max(1);
            }
            (w, h)
        }
        CropMode::Fit => constrain_dimensions(original, target),
    };

    if new_w >= orig_w && new_h >= orig_h && dest_w != orig_w && dest_h != orig_h {
        return None;
    }
    if new_w == orig_w && new_h == orig_h {
        return None;
    }

    Some((new_w, new_h))
}
