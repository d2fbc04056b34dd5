//! Preview rendering: normalized and filtered depth as an in-memory PNG.
//!
//! In preview mode, cells at or below the background threshold are
//! painted with a coarse checker so the user can see what the sampler
//! will drop. The overlay is display-only and never feeds back into
//! sampling.

use std::sync::Arc;

use image::ImageEncoder;
use image::codecs::png::PngEncoder;

use crate::types::{DepthField, ParameterSet, PipelineError, RawDepthField};

/// Checker block edge length in cells.
pub const CHECKER_BLOCK: u32 = 5;

/// Checker period in cells.
pub const CHECKER_STRIDE: u32 = 10;

/// Light checker value.
pub const CHECKER_LIGHT: u8 = 200;

/// Dark checker value.
pub const CHECKER_DARK: u8 = 100;

/// An encoded preview image. Immutable once built; clones share the
/// encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewPayload {
    /// PNG-encoded grayscale image.
    pub png: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

/// Paint the checker over cells at or below `threshold`.
///
/// A `threshold` of 0 leaves the field unchanged.
#[must_use = "returns the field with the background overlay"]
pub fn checker_overlay(field: &DepthField, threshold: u8) -> DepthField {
    if threshold == 0 {
        return field.clone();
    }
    DepthField::from_fn(field.width(), field.height(), |x, y| {
        let v = field.get_pixel(x, y).0[0];
        if v > threshold {
            return image::Luma([v]);
        }
        let light = (x % CHECKER_STRIDE < CHECKER_BLOCK) == (y % CHECKER_STRIDE < CHECKER_BLOCK);
        image::Luma([if light { CHECKER_LIGHT } else { CHECKER_DARK }])
    })
}

/// Encode a depth field as an 8-bit grayscale PNG.
///
/// # Errors
///
/// Returns [`PipelineError::ImageEncode`] if the encoder fails.
pub fn encode_png(field: &DepthField) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(
            field.as_raw(),
            field.width(),
            field.height(),
            image::ExtendedColorType::L8,
        )
        .map_err(PipelineError::ImageEncode)?;
    Ok(buf)
}

/// Normalize, filter, optionally overlay, and encode.
///
/// # Errors
///
/// Returns [`PipelineError::ImageEncode`] if PNG encoding fails.
pub fn render_preview(
    raw: &RawDepthField,
    params: &ParameterSet,
    preview_mode: bool,
) -> Result<PreviewPayload, PipelineError> {
    let normalized = crate::normalize::normalize(raw);
    let mut field = crate::filter::apply_filters(&normalized, params);
    if preview_mode && params.background_threshold() > 0 {
        field = checker_overlay(&field, params.background_threshold());
    }
    let png = encode_png(&field)?;
    tracing::debug!(
        width = field.width(),
        height = field.height(),
        bytes = png.len(),
        preview_mode,
        "rendered preview"
    );
    Ok(PreviewPayload {
        png: png.into(),
        width: field.width(),
        height: field.height(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RawParameters;

    fn ramp() -> RawDepthField {
        RawDepthField::from_fn(20, 20, |x, _| f32::from(u16::try_from(x).unwrap())).unwrap()
    }

    #[test]
    fn overlay_only_touches_background() {
        let field = DepthField::from_fn(20, 20, |x, _| image::Luma([if x < 10 { 5 } else { 180 }]));
        let out = checker_overlay(&field, 10);
        assert_eq!(out.get_pixel(0, 0).0[0], CHECKER_LIGHT);
        assert_eq!(out.get_pixel(5, 0).0[0], CHECKER_DARK);
        assert_eq!(out.get_pixel(5, 5).0[0], CHECKER_LIGHT);
        for y in 0..20 {
            for x in 10..20 {
                assert_eq!(out.get_pixel(x, y).0[0], 180);
            }
        }
    }

    #[test]
    fn zero_threshold_overlay_is_identity() {
        let field = DepthField::from_pixel(4, 4, image::Luma([0]));
        assert_eq!(checker_overlay(&field, 0), field);
    }

    #[test]
    fn preview_decodes_to_filtered_field() {
        let params = ParameterSet::default();
        let payload = render_preview(&ramp(), &params, false).unwrap();
        let decoded = image::load_from_memory(&payload.png).unwrap().to_luma8();
        let expected = crate::normalize::normalize(&ramp());
        assert_eq!(decoded, expected);
        assert_eq!((payload.width, payload.height), (20, 20));
    }

    #[test]
    fn preview_mode_adds_overlay() {
        let params = ParameterSet::try_from(RawParameters {
            background_threshold: 40,
            ..RawParameters::default()
        })
        .unwrap();
        let plain = render_preview(&ramp(), &params, false).unwrap();
        let overlaid = render_preview(&ramp(), &params, true).unwrap();
        assert_ne!(plain.png, overlaid.png);
    }

    #[test]
    fn payload_clones_share_png_bytes() {
        let payload = render_preview(&ramp(), &ParameterSet::default(), false).unwrap();
        let copy = payload.clone();
        assert!(Arc::ptr_eq(&payload.png, &copy.png));
        assert_eq!(copy, payload);
    }
}
