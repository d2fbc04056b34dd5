//! Min-max rescaling of raw estimator output onto the 0-255 grid.
//!
//! ```text
//! out = trunc((v - min) / (max - min) × 255)
//! ```
//!
//! The minimum maps to exactly 0 and the maximum to exactly 255.
//! Truncation keeps the mapping monotonic.
//!
//! A constant field (`max == min`) has no relief to rescale. Instead of
//! dividing by zero it becomes a field of [`DEGENERATE_FILL`], i.e. no
//! relief at all, which the sampler then treats as background.

use crate::types::{DepthField, RawDepthField};

/// Value written to every cell of a constant input field.
pub const DEGENERATE_FILL: u8 = 0;

/// Rescale a raw depth field into `[0, 255]`.
///
/// This is the first stage in the pipeline.
#[must_use = "returns the normalized depth field"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn normalize(raw: &RawDepthField) -> DepthField {
    let dims = raw.dimensions();
    let (min, max) = raw.range();
    let (min, max) = (f64::from(min), f64::from(max));
    let span = max - min;

    if span <= 0.0 {
        tracing::warn!(
            width = dims.width,
            height = dims.height,
            value = min,
            "constant depth field, using degenerate fill"
        );
        return DepthField::from_pixel(dims.width, dims.height, image::Luma([DEGENERATE_FILL]));
    }

    let pixels = raw
        .values()
        .iter()
        .map(|&v| ((f64::from(v) - min) / span * 255.0) as u8)
        .collect();

    // Buffer length was checked by `RawDepthField::new`.
    DepthField::from_raw(dims.width, dims.height, pixels).unwrap_or_else(|| {
        DepthField::from_pixel(dims.width, dims.height, image::Luma([DEGENERATE_FILL]))
    })
}

/// Whether `raw` would take the constant-field fallback.
#[must_use]
pub fn is_degenerate(raw: &RawDepthField) -> bool {
    let (min, max) = raw.range();
    max <= min
}
