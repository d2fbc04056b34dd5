//! Edge enhancement and depth inversion.
//!
//! [`enhance_edges`] runs [`imageproc::edges::canny`] on the depth field
//! with fixed hysteresis thresholds and adds the binary edge map back
//! into the field, so depth discontinuities etch as ridges.
//!
//! [`invert_depth`] flips near and far (`255 − v`).

use imageproc::edges::canny;

use crate::types::{DepthField, GrayImage};

/// Canny low hysteresis threshold.
pub const EDGE_LOW_THRESHOLD: f32 = 50.0;

/// Canny high hysteresis threshold.
pub const EDGE_HIGH_THRESHOLD: f32 = 150.0;

/// Blend weight per unit of `edge_enhancement`.
pub const EDGE_BLEND_SCALE: f64 = 0.3;

const _: () = assert!(0.0 < EDGE_LOW_THRESHOLD && EDGE_LOW_THRESHOLD <= EDGE_HIGH_THRESHOLD);

/// Add a weighted binary edge map to the depth field.
///
/// Each edge pixel gains `255 × strength × 0.3`, rounded and clipped.
#[must_use = "returns the edge-enhanced depth field"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn enhance_edges(field: &DepthField, strength: f64) -> DepthField {
    let edges = canny(field, EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD);
    let weight = strength * EDGE_BLEND_SCALE;
    DepthField::from_fn(field.width(), field.height(), |x, y| {
        let v = f64::from(field.get_pixel(x, y).0[0]);
        let e = f64::from(edges.get_pixel(x, y).0[0]);
        image::Luma([e.mul_add(weight, v).round().clamp(0.0, 255.0) as u8])
    })
}

/// Invert a depth field (`255 − v`).
#[must_use = "returns the inverted depth field"]
pub fn invert_depth(field: &DepthField) -> DepthField {
    DepthField::from_fn(field.width(), field.height(), |x, y| {
        image::Luma([!field.get_pixel(x, y).0[0]])
    })
}

/// Number of non-zero pixels in a binary map.
#[must_use]
pub fn count_edge_pixels(edges: &GrayImage) -> u64 {
    edges.pixels().map(|p| u64::from(p.0[0] > 0)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20x20 field with a sharp vertical step at x = 10.
    fn step_field() -> DepthField {
        DepthField::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([40])
            } else {
                image::Luma([200])
            }
        })
    }

    #[test]
    fn uniform_field_has_no_edges() {
        let field = DepthField::from_pixel(20, 20, image::Luma([128]));
        let edges = canny(&field, EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD);
        assert_eq!(count_edge_pixels(&edges), 0);
    }

    #[test]
    fn step_produces_edges() {
        let edges = canny(&step_field(), EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD);
        assert!(count_edge_pixels(&edges) > 0);
    }

    #[test]
    fn enhancement_only_raises_edge_pixels() {
        let field = step_field();
        let edges = canny(&field, EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD);
        let out = enhance_edges(&field, 1.0);
        for ((orig, edge), new) in field.pixels().zip(edges.pixels()).zip(out.pixels()) {
            if edge.0[0] > 0 {
                // 255 * 0.3 = 76.5, rounds to +77.
                assert_eq!(new.0[0], orig.0[0].saturating_add(77));
            } else {
                assert_eq!(new.0[0], orig.0[0]);
            }
        }
    }

    #[test]
    fn enhancement_saturates_instead_of_wrapping() {
        let field = DepthField::from_fn(20, 20, |x, _| {
            if x < 10 { image::Luma([0]) } else { image::Luma([250]) }
        });
        let out = enhance_edges(&field, 1.0);
        for (orig, new) in field.pixels().zip(out.pixels()) {
            assert!(new.0[0] >= orig.0[0]);
        }
    }

    #[test]
    fn invert_maps_extremes() {
        let field = DepthField::from_fn(2, 1, |x, _| image::Luma([if x == 0 { 0 } else { 200 }]));
        let inv = invert_depth(&field);
        assert_eq!(inv.get_pixel(0, 0).0[0], 255);
        assert_eq!(inv.get_pixel(1, 0).0[0], 55);
    }

    #[test]
    fn double_invert_is_identity() {
        let field = step_field();
        assert_eq!(invert_depth(&invert_depth(&field)), field);
    }

    #[test]
    fn enhancement_adds_the_fixed_threshold_edge_map() {
        let field = step_field();
        let edges = canny(&field, EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD);
        let zero = enhance_edges(&field, 0.0);
        assert_eq!(zero, field);
        let half = enhance_edges(&field, 0.5);
        for ((orig, edge), new) in field.pixels().zip(edges.pixels()).zip(half.pixels()) {
            // 255 * 0.5 * 0.3 = 38.25, rounds to +38.
            let gain = if edge.0[0] > 0 { 38 } else { 0 };
            assert_eq!(new.0[0], orig.0[0].saturating_add(gain));
        }
    }
}
