//! Gaussian smoothing of the depth field.
//!
//! Suppresses estimator noise before the tone, edge and zone stages.
//! The user-facing `blur_amount` selects an odd kernel size
//!
//! ```text
//! k = max(3, round(blur_amount × 2) + 1), bumped to the next odd value
//! ```
//!
//! and the kernel size in turn selects the Gaussian sigma with the usual
//! `0.3 × ((k − 1) / 2 − 1) + 0.8` rule. The k taps are normalized to sum
//! to 1 and applied in both directions with
//! [`imageproc::filter::separable_filter_equal`] over `f32` samples, with
//! edge pixels replicated. Results are rounded back to `u8` once, so a
//! flat region keeps its exact level.

use image::{ImageBuffer, Luma};

use crate::types::DepthField;

/// Smallest kernel the blur stage ever uses.
pub const MIN_KERNEL_SIZE: u32 = 3;

/// Odd kernel size for a given blur amount.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn kernel_size(blur_amount: f64) -> u32 {
    let k = ((blur_amount.max(0.0) * 2.0).round() as u32 + 1).max(MIN_KERNEL_SIZE);
    if k % 2 == 0 { k + 1 } else { k }
}

/// Gaussian sigma matching an odd kernel size.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3f32.mul_add((kernel_size as f32 - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Normalized 1-D Gaussian taps for an odd `kernel_size`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
pub fn gaussian_kernel(kernel_size: u32) -> Vec<f32> {
    let sigma = sigma_for_kernel(kernel_size);
    let radius = (kernel_size / 2) as i32;
    let taps: Vec<f32> = (-radius..=radius)
        .map(|i| {
            let d = i as f32;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.into_iter().map(|w| w / sum).collect()
}

/// Blur a depth field.
///
/// A non-positive `blur_amount` returns the field unchanged; the filter
/// chain skips this stage entirely in that case.
#[must_use = "returns the blurred depth field"]
pub fn blur_depth(field: &DepthField, blur_amount: f64) -> DepthField {
    if blur_amount <= 0.0 {
        return field.clone();
    }
    let kernel = gaussian_kernel(kernel_size(blur_amount));
    let samples: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(field.width(), field.height(), |x, y| {
            Luma([f32::from(field.get_pixel(x, y).0[0])])
        });
    let blurred = imageproc::filter::separable_filter_equal(&samples, &kernel);
    DepthField::from_fn(field.width(), field.height(), |x, y| {
        Luma([round_to_level(blurred.get_pixel(x, y).0[0])])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_to_level(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
