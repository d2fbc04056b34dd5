//! Image decoding and luma extraction.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the RGB
//! photo handed to the depth estimator and the luma field used by the
//! background classifier.

use image::DynamicImage;

use crate::types::{GrayImage, PipelineError, RgbImage};

/// Decode raw image bytes into a [`DynamicImage`].
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateInput`] if `bytes` is empty or the
/// decoded image has zero area, and [`PipelineError::ImageDecode`] if
/// the format is unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::DegenerateInput(
            "input image data is empty".to_owned(),
        ));
    }
    let img = image::load_from_memory(bytes)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(PipelineError::DegenerateInput(format!(
            "image has zero area ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(img)
}

/// Decode a photo into 8-bit RGB.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    Ok(decode(bytes)?.to_rgb8())
}

/// Luma of an RGB photo (`0.299 R + 0.587 G + 0.114 B`).
#[must_use = "returns the luma field"]
pub fn luma(photo: &RgbImage) -> GrayImage {
    image::imageops::grayscale(photo)
}
