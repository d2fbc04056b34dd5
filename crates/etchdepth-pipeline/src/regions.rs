//! Text-like region detection.
//!
//! Finds compact, wider-than-tall blobs of edges in a photo so the user
//! can turn them into flat zones. Canny edges are traced with
//! `imageproc::contours::find_contours` and only outermost borders are
//! kept.

use imageproc::contours::{BorderType, Contour};
use serde::{Deserialize, Serialize};

use crate::types::GrayImage;

/// Smallest accepted width / height ratio (exclusive).
pub const MIN_ASPECT: f64 = 0.5;

/// Largest accepted width / height ratio (exclusive).
pub const MAX_ASPECT: f64 = 20.0;

/// Smallest accepted bounding-box area in pixels (exclusive).
pub const MIN_AREA: u64 = 100;

/// Maximum number of regions returned.
pub const MAX_REGIONS: usize = 20;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextRegion {
    fn bounding(contour: &Contour<u32>) -> Option<Self> {
        let first = contour.points.first()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for p in &contour.points {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        })
    }

    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[must_use]
    pub fn aspect(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    fn looks_like_text(&self) -> bool {
        let aspect = self.aspect();
        MIN_ASPECT < aspect && aspect < MAX_ASPECT && self.area() > MIN_AREA
    }
}

/// Detect up to [`MAX_REGIONS`] text-like regions in a luma image, in
/// contour discovery order.
#[must_use = "returns the detected regions"]
pub fn detect_text_regions(gray: &GrayImage) -> Vec<TextRegion> {
    let edges = imageproc::edges::canny(
        gray,
        crate::edge::EDGE_LOW_THRESHOLD,
        crate::edge::EDGE_HIGH_THRESHOLD,
    );
    let contours: Vec<Contour<u32>> = imageproc::contours::find_contours(&edges);
    let regions: Vec<TextRegion> = contours
        .iter()
        .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
        .filter_map(TextRegion::bounding)
        .filter(TextRegion::looks_like_text)
        .take(MAX_REGIONS)
        .collect();
    tracing::debug!(
        contours = contours.len(),
        regions = regions.len(),
        "detected text regions"
    );
    regions
}
