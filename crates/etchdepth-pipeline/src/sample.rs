//! Background classification and point sampling.
//!
//! For every visited cell the classifier decides whether the cell is
//! subject or background, and the sampler maps surviving cells into
//! physical millimetre coordinates.
//!
//! # Classification
//!
//! With the original photo's luma available, a cell is kept iff
//! `luma > threshold && depth > 0`. Without it, iff
//! `depth > threshold && depth > 0`. The photo is preferred because the
//! depth values have already been filtered and zoned by this point.
//!
//! # Coordinates
//!
//! ```text
//! x_mm = (x − width / 2) × scale
//! y_mm = (height / 2 − y) × scale
//! z_mm = d / 255 × max_depth − max_depth / 4
//! ```
//!
//! Y is flipped so that +Y points up. The Z offset centers the usable
//! depth range in the etching volume, so Z can be negative.
//!
//! Rows are sampled in parallel with `rayon` and reassembled in row
//! order, so the output is identical to a sequential row-major scan.

use rayon::prelude::*;

use crate::types::{
    CloudPoint, DepthField, Dimensions, GrayImage, PipelineError, PointCloud, SamplingConfig,
};

/// Inclusion rule for a single cell.
#[must_use]
pub fn include_cell(depth: u8, luma: Option<u8>, threshold: u8) -> bool {
    if depth == 0 {
        return false;
    }
    luma.map_or(depth > threshold, |l| l > threshold)
}

/// Millimetre depth for a grid value.
#[must_use]
pub fn depth_to_z(depth: u8, max_depth_mm: f64) -> f64 {
    (f64::from(depth) / 255.0).mul_add(max_depth_mm, -max_depth_mm / 4.0)
}

/// Millimetre XY position of a cell, origin at the grid center, Y up.
#[must_use]
pub fn cell_to_xy(x: u32, y: u32, dimensions: Dimensions, mm_per_px: f64) -> (f64, f64) {
    let half_w = f64::from(dimensions.width) / 2.0;
    let half_h = f64::from(dimensions.height) / 2.0;
    (
        (f64::from(x) - half_w) * mm_per_px,
        (half_h - f64::from(y)) * mm_per_px,
    )
}

/// Check that the luma field (if any) matches the depth grid.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] on a size mismatch.
pub fn check_luma(dimensions: Dimensions, luma: Option<&GrayImage>) -> Result<(), PipelineError> {
    if let Some(luma) = luma {
        let luma_dims = Dimensions::of(luma);
        if luma_dims != dimensions {
            return Err(PipelineError::Validation(format!(
                "photo is {}x{} but depth field is {}x{}",
                luma_dims.width, luma_dims.height, dimensions.width, dimensions.height
            )));
        }
    }
    Ok(())
}

/// Classify and sample every `stride`-th cell of `field`.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] if `config` is invalid or
/// `luma` does not match the field's dimensions. Both are checked before
/// any cell is visited.
pub fn sample_points(
    field: &DepthField,
    luma: Option<&GrayImage>,
    threshold: u8,
    config: &SamplingConfig,
) -> Result<PointCloud, PipelineError> {
    config.validate()?;
    let dimensions = Dimensions::of(field);
    check_luma(dimensions, luma)?;

    let (mm_per_px, max_depth_mm) = config.resolve(dimensions);
    let stride = config.stride as usize;
    let rows: Vec<u32> = (0..dimensions.height).step_by(stride).collect();

    let per_row: Vec<Vec<CloudPoint>> = rows
        .par_iter()
        .map(|&y| {
            (0..dimensions.width)
                .step_by(stride)
                .filter_map(|x| {
                    let d = field.get_pixel(x, y).0[0];
                    let l = luma.map(|img| img.get_pixel(x, y).0[0]);
                    include_cell(d, l, threshold).then(|| {
                        let (px, py) = cell_to_xy(x, y, dimensions, mm_per_px);
                        CloudPoint::new(px, py, depth_to_z(d, max_depth_mm))
                    })
                })
                .collect()
        })
        .collect();

    let points: Vec<CloudPoint> = per_row.into_iter().flatten().collect();
    tracing::debug!(
        width = dimensions.width,
        height = dimensions.height,
        stride,
        points = points.len(),
        with_photo = luma.is_some(),
        "sampled point cloud"
    );
    Ok(PointCloud::new(points))
}

/// Number of cells a scan with `stride` visits.
#[must_use]
pub fn visited_cells(dimensions: Dimensions, stride: u32) -> u64 {
    let stride = stride.max(1);
    u64::from(dimensions.width.div_ceil(stride)) * u64::from(dimensions.height.div_ceil(stride))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::CrystalDimensions;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn luma_at_or_below_threshold_excludes_regardless_of_depth() {
        assert!(!include_cell(255, Some(10), 10));
        assert!(!include_cell(255, Some(0), 10));
        assert!(include_cell(1, Some(11), 10));
    }

    #[test]
    fn zero_depth_is_always_excluded() {
        assert!(!include_cell(0, Some(255), 10));
        assert!(!include_cell(0, None, 0));
    }

    #[test]
    fn depth_threshold_applies_without_photo() {
        assert!(!include_cell(10, None, 10));
        assert!(include_cell(11, None, 10));
    }

    #[test]
    fn center_and_corner_mapping() {
        let (x, y) = cell_to_xy(50, 50, dims(100, 100), 0.1);
        assert!(x.abs() < 1e-12 && y.abs() < 1e-12);
        let (x, y) = cell_to_xy(0, 0, dims(100, 100), 0.1);
        assert!((x + 5.0).abs() < 1e-12);
        assert!((y - 5.0).abs() < 1e-12);
    }

    #[test]
    fn z_is_recentered() {
        assert!((depth_to_z(0, 40.0) + 10.0).abs() < 1e-12);
        assert!((depth_to_z(255, 40.0) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_luma_is_rejected_before_sampling() {
        let field = DepthField::from_pixel(4, 4, image::Luma([100]));
        let luma = GrayImage::from_pixel(4, 5, image::Luma([100]));
        let err = sample_points(&field, Some(&luma), 0, &SamplingConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn photo_decides_background() {
        let field = DepthField::from_pixel(4, 1, image::Luma([200]));
        let luma = GrayImage::from_fn(4, 1, |x, _| image::Luma([if x < 2 { 5 } else { 250 }]));
        let cloud = sample_points(&field, Some(&luma), 10, &SamplingConfig::default()).unwrap();
        assert_eq!(cloud.len(), 2);
        assert!(cloud.points().iter().all(|p| p.x >= 0.0));
    }

    #[test]
    fn stride_skips_rows_and_columns() {
        let field = DepthField::from_pixel(10, 7, image::Luma([128]));
        let config = SamplingConfig {
            stride: 3,
            ..SamplingConfig::default()
        };
        let cloud = sample_points(&field, None, 0, &config).unwrap();
        assert_eq!(cloud.len(), 4 * 3);
        assert_eq!(visited_cells(dims(10, 7), 3), 12);
    }

    #[test]
    fn output_is_row_major() {
        let field = DepthField::from_pixel(5, 40, image::Luma([128]));
        let cloud = sample_points(&field, None, 0, &SamplingConfig::default()).unwrap();
        let ys: Vec<f64> = cloud.points().iter().map(|p| p.y).collect();
        assert!(ys.windows(2).all(|w| w[0] >= w[1]));
        let first_row: Vec<f64> = cloud.points()[..5].iter().map(|p| p.x).collect();
        assert!(first_row.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn crystal_scaling_fits_face() {
        let field = DepthField::from_pixel(200, 100, image::Luma([255]));
        let config = SamplingConfig {
            crystal: Some(CrystalDimensions::new(80.0, 100.0, 60.0).unwrap()),
            ..SamplingConfig::default()
        };
        let cloud = sample_points(&field, None, 0, &config).unwrap();
        let b = cloud.bounds().unwrap();
        // 80 mm / 200 px = 0.4 mm/px; x spans [-40, 39.6].
        assert!((b.min.x + 40.0).abs() < 1e-9);
        assert!(b.max.x < 40.0);
        assert!((b.max.z - 45.0).abs() < 1e-9);
    }
}
