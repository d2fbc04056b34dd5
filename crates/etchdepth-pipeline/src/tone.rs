//! Contrast and brightness adjustment.
//!
//! Contrast scales each value around mid-gray, then brightness applies a
//! gain of `1 + brightness / 100`. Both steps round and re-clip to
//! `[0, 255]`:
//!
//! ```text
//! v' = clip((v − 128) × contrast + 128)
//! v'' = clip(v' × (1 + brightness / 100))
//! ```

use crate::types::DepthField;

/// Pivot for contrast scaling.
pub const MID_GRAY: f64 = 128.0;

/// Whether `(contrast, brightness)` leaves every value unchanged.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_identity(contrast: f64, brightness: i32) -> bool {
    contrast == 1.0 && brightness == 0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clip(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Apply contrast then brightness to a depth field.
#[must_use = "returns the adjusted depth field"]
pub fn adjust_tone(field: &DepthField, contrast: f64, brightness: i32) -> DepthField {
    let gain = 1.0 + f64::from(brightness) / 100.0;
    let mut lut = [0u8; 256];
    for (v, slot) in (0u8..=255).zip(lut.iter_mut()) {
        let contrasted = clip((f64::from(v) - MID_GRAY).mul_add(contrast, MID_GRAY));
        *slot = clip(f64::from(contrasted) * gain);
    }
    DepthField::from_fn(field.width(), field.height(), |x, y| {
        image::Luma([lut[usize::from(field.get_pixel(x, y).0[0])]])
    })
}
