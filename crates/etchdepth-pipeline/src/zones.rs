//! Polygon zone overrides.
//!
//! Each visible `Flat`/`Custom` zone is rasterized into a mask and every
//! cell under the mask is overwritten with the zone's constant depth.
//! Zones are applied in list order, so on overlap the later zone wins.
//! `ThreeD` zones leave the field untouched.
//!
//! # Rasterization rule
//!
//! Scanline fill with the even-odd rule, sampled at pixel centers: cell
//! `(x, y)` is inside when the point `(x + 0.5, y + 0.5)` is. Edge
//! crossings use a half-open interval in `y` and the span test is
//! half-open in `x`, so a polygon edge passing exactly through a pixel
//! center includes the pixel on its left/top side and excludes it on the
//! right/bottom side. Vertices outside the grid are clipped.

use crate::types::{DepthField, Dimensions, GrayImage, PathPoint, Zone};

/// Mask value for cells inside a polygon.
pub const MASK_INSIDE: u8 = 255;

/// Rasterize a closed polygon into a binary mask (255 inside, 0 outside).
///
/// The path is treated as closed; repeating the first vertex at the end
/// is allowed and has no effect.
#[must_use = "returns the polygon mask"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rasterize_polygon(path: &[PathPoint], dimensions: Dimensions) -> GrayImage {
    let mut mask = GrayImage::new(dimensions.width, dimensions.height);
    if path.len() < 3 {
        return mask;
    }
    let width = f64::from(dimensions.width);
    let mut crossings: Vec<f64> = Vec::with_capacity(path.len());

    for y in 0..dimensions.height {
        let cy = f64::from(y) + 0.5;
        crossings.clear();
        for (i, a) in path.iter().enumerate() {
            let b = path[(i + 1) % path.len()];
            if (a.y <= cy) != (b.y <= cy) {
                let t = (cy - a.y) / (b.y - a.y);
                crossings.push(t.mul_add(b.x - a.x, a.x));
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            // Cell x is inside iff span[0] <= x + 0.5 < span[1].
            let start = (span[0] - 0.5).ceil().clamp(0.0, width) as u32;
            let end = (span[1] - 0.5).ceil().clamp(0.0, width) as u32;
            for x in start..end {
                mask.put_pixel(x, y, image::Luma([MASK_INSIDE]));
            }
        }
    }
    mask
}

/// Apply zone overrides in list order.
///
/// Invisible zones and `ThreeD` zones are skipped. An empty list returns
/// an unchanged copy. Zones were validated when they were built, so this
/// step cannot fail.
#[must_use = "returns the depth field with zone overrides applied"]
pub fn apply_zones(field: &DepthField, zones: &[Zone]) -> DepthField {
    let dimensions = Dimensions::of(field);
    let mut out = field.clone();
    for zone in zones.iter().filter(|z| z.visible()) {
        let Some(value) = zone.depth_value() else {
            continue;
        };
        let mask = rasterize_polygon(zone.path(), dimensions);
        let mut cells = 0u64;
        for (px, m) in out.pixels_mut().zip(mask.pixels()) {
            if m.0[0] == MASK_INSIDE {
                px.0[0] = value;
                cells += 1;
            }
        }
        tracing::trace!(zone = zone.id(), value, cells, "zone override applied");
    }
    out
}

/// Number of zones that will overwrite depth values.
#[must_use]
pub fn overriding_zone_count(zones: &[Zone]) -> usize {
    zones
        .iter()
        .filter(|z| z.visible() && z.depth_value().is_some())
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ZoneKind;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<PathPoint> {
        vec![
            PathPoint::new(x0, y0),
            PathPoint::new(x1, y0),
            PathPoint::new(x1, y1),
            PathPoint::new(x0, y1),
        ]
    }

    fn inside(mask: &GrayImage) -> Vec<(u32, u32)> {
        mask.enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] == MASK_INSIDE)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    fn zone(id: i64, kind: ZoneKind, depth_mm: f64, path: Vec<PathPoint>) -> Zone {
        Zone::new(id, kind, depth_mm, true, path).unwrap()
    }

    #[test]
    fn rectangle_covers_pixel_centers_inside() {
        let mask = rasterize_polygon(&rect(2.0, 2.0, 6.0, 6.0), dims(10, 10));
        let cells = inside(&mask);
        assert_eq!(cells.len(), 16);
        assert!(cells.iter().all(|&(x, y)| (2..6).contains(&x) && (2..6).contains(&y)));
    }

    #[test]
    fn closing_vertex_is_harmless() {
        let mut path = rect(1.0, 1.0, 5.0, 4.0);
        path.push(path[0]);
        assert_eq!(
            rasterize_polygon(&path, dims(8, 8)),
            rasterize_polygon(&rect(1.0, 1.0, 5.0, 4.0), dims(8, 8))
        );
    }

    #[test]
    fn triangle_is_filled_symmetrically() {
        let path = vec![
            PathPoint::new(0.0, 0.0),
            PathPoint::new(8.0, 0.0),
            PathPoint::new(0.0, 8.0),
        ];
        let mask = rasterize_polygon(&path, dims(8, 8));
        // Cell centers with x + y + 1 < 8 are strictly inside.
        for (x, y, p) in mask.enumerate_pixels() {
            let expected = x + y + 1 < 8;
            assert_eq!(p.0[0] == MASK_INSIDE, expected, "cell ({x},{y})");
        }
    }

    #[test]
    fn polygon_outside_grid_is_clipped() {
        let mask = rasterize_polygon(&rect(-5.0, -5.0, 3.0, 2.0), dims(4, 4));
        assert_eq!(inside(&mask).len(), 6);
    }

    #[test]
    fn flat_zone_overrides_cells_under_mask_only() {
        let field = DepthField::from_pixel(10, 10, image::Luma([200]));
        let z = zone(1, ZoneKind::Flat, 0.0, rect(0.0, 0.0, 5.0, 10.0));
        let out = apply_zones(&field, &[z]);
        assert_eq!(out.get_pixel(2, 5).0[0], 73);
        assert_eq!(out.get_pixel(7, 5).0[0], 200);
    }

    #[test]
    fn later_zone_wins_on_overlap() {
        let field = DepthField::from_pixel(10, 10, image::Luma([0]));
        let first = zone(1, ZoneKind::Flat, -10.0, rect(0.0, 0.0, 6.0, 6.0));
        let second = zone(2, ZoneKind::Flat, 25.0, rect(4.0, 4.0, 10.0, 10.0));
        let out = apply_zones(&field, &[first.clone(), second.clone()]);
        assert_eq!(out.get_pixel(5, 5).0[0], 255);
        assert_eq!(out.get_pixel(1, 1).0[0], 0);

        let reversed = apply_zones(&field, &[second, first]);
        assert_eq!(reversed.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn three_d_zone_never_changes_values() {
        let field = DepthField::from_fn(10, 10, |x, y| image::Luma([u8::try_from(x * 20 + y).unwrap_or(0)]));
        let z = zone(1, ZoneKind::ThreeD, 0.0, rect(0.0, 0.0, 10.0, 10.0));
        assert_eq!(apply_zones(&field, &[z]), field);
    }

    #[test]
    fn invisible_zone_is_skipped() {
        let field = DepthField::from_pixel(6, 6, image::Luma([9]));
        let z = Zone::new(1, ZoneKind::Custom, 5.0, false, rect(0.0, 0.0, 6.0, 6.0)).unwrap();
        assert_eq!(apply_zones(&field, &[z]), field);
    }

    #[test]
    fn empty_zone_list_is_noop() {
        let field = DepthField::from_pixel(3, 3, image::Luma([42]));
        assert_eq!(apply_zones(&field, &[]), field);
    }

    #[test]
    fn overriding_count_ignores_pass_through() {
        let zones = [
            zone(1, ZoneKind::ThreeD, 0.0, rect(0.0, 0.0, 1.0, 1.0)),
            zone(2, ZoneKind::Flat, 0.0, rect(0.0, 0.0, 1.0, 1.0)),
            Zone::new(3, ZoneKind::Custom, 0.0, false, rect(0.0, 0.0, 1.0, 1.0)).unwrap(),
        ];
        assert_eq!(overriding_zone_count(&zones), 1);
    }
}
