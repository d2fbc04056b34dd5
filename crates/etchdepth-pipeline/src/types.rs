//! Shared types for the etchdepth pipeline.
//!
//! Everything that crosses a module boundary lives here: the depth
//! grids, the validated request entities ([`ParameterSet`], [`Zone`],
//! [`CrystalDimensions`]), the sampling configuration and the output
//! [`PointCloud`].
//!
//! Request entities are validated once, at construction. Their fields
//! are private so an invalid value can never reach a pipeline stage.
//! The serde impls go through the same validation (`try_from`), which
//! makes JSON the only loosely-typed surface and keeps it at the edge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference depth grids
/// and luma fields without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` for the source photo handed to the estimator.
pub use image::RgbImage;

/// A depth grid of integer scalars in `[0, 255]`.
///
/// Every stage takes a `&DepthField` and returns a new one, so a grid
/// is never mutated after it has been handed to the next stage.
pub type DepthField = GrayImage;

/// Boxed error used at the seams to external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Layer name carried by every emitted point.
pub const DEPTH_LAYER: &str = "ETCH_DEPTH";

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total number of cells.
    #[must_use]
    pub const fn cell_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// ───────────────────────── Raw depth field ───────────────────────────

/// Unbounded per-pixel depth values as produced by a depth estimator.
///
/// Construction rejects zero-area grids, mismatched buffer lengths and
/// non-finite values, so [`normalize`](crate::normalize::normalize) only
/// ever sees a well-formed field.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDepthField {
    dimensions: Dimensions,
    values: Vec<f32>,
}

impl RawDepthField {
    /// Wrap a row-major buffer of raw depth values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateInput`] for a zero-area grid and
    /// [`PipelineError::Validation`] if `values.len()` does not equal
    /// `width * height` or any value is NaN or infinite.
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self, PipelineError> {
        let dimensions = Dimensions { width, height };
        if dimensions.cell_count() == 0 {
            return Err(PipelineError::DegenerateInput(format!(
                "depth field has zero area ({width}x{height})"
            )));
        }
        let expected = usize::try_from(dimensions.cell_count()).map_err(|_| {
            PipelineError::Validation(format!("depth field {width}x{height} is too large"))
        })?;
        if values.len() != expected {
            return Err(PipelineError::Validation(format!(
                "depth field {width}x{height} needs {expected} values, got {}",
                values.len()
            )));
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::Validation(format!(
                "depth field contains a non-finite value at index {index}"
            )));
        }
        Ok(Self { dimensions, values })
    }

    /// Build a field by evaluating `f(x, y)` for every cell.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RawDepthField::new`].
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> f32,
    ) -> Result<Self, PipelineError> {
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(f(x, y));
            }
        }
        Self::new(width, height, values)
    }

    /// Interpret a 16-bit grayscale raster as raw depth.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RawDepthField::new`].
    pub fn from_luma16(image: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>) -> Result<Self, PipelineError> {
        let values = image.as_raw().iter().map(|&v| f32::from(v)).collect();
        Self::new(image.width(), image.height(), values)
    }

    /// Grid dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Raw value at `(x, y)`, or `None` outside the grid.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        self.values
            .get(y as usize * self.dimensions.width as usize + x as usize)
            .copied()
    }

    /// Row-major values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Minimum and maximum value.
    #[must_use]
    pub fn range(&self) -> (f32, f32) {
        self.values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

// ───────────────────────── ParameterSet ──────────────────────────────

/// Unvalidated parameter payload, mirroring the request JSON.
///
/// Convert into a [`ParameterSet`] with `ParameterSet::try_from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawParameters {
    pub blur_amount: f64,
    pub contrast: f64,
    pub brightness: i64,
    pub edge_enhancement: f64,
    pub invert_depth: bool,
    pub background_threshold: i64,
}

impl Default for RawParameters {
    fn default() -> Self {
        Self {
            blur_amount: ParameterSet::DEFAULT_BLUR_AMOUNT,
            contrast: ParameterSet::DEFAULT_CONTRAST,
            brightness: i64::from(ParameterSet::DEFAULT_BRIGHTNESS),
            edge_enhancement: ParameterSet::DEFAULT_EDGE_ENHANCEMENT,
            invert_depth: false,
            background_threshold: i64::from(ParameterSet::DEFAULT_BACKGROUND_THRESHOLD),
        }
    }
}

/// Validated depth-processing parameters.
///
/// Out-of-range values are rejected, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameters", into = "RawParameters")]
pub struct ParameterSet {
    blur_amount: f64,
    contrast: f64,
    brightness: i32,
    edge_enhancement: f64,
    invert_depth: bool,
    background_threshold: u8,
}

impl ParameterSet {
    pub const DEFAULT_BLUR_AMOUNT: f64 = 0.0;
    pub const DEFAULT_CONTRAST: f64 = 1.0;
    pub const DEFAULT_BRIGHTNESS: i32 = 0;
    pub const DEFAULT_EDGE_ENHANCEMENT: f64 = 0.0;
    pub const DEFAULT_BACKGROUND_THRESHOLD: u8 = 10;

    pub const BLUR_RANGE: (f64, f64) = (0.0, 10.0);
    pub const CONTRAST_RANGE: (f64, f64) = (0.5, 2.0);
    pub const BRIGHTNESS_RANGE: (i64, i64) = (-50, 50);
    pub const EDGE_RANGE: (f64, f64) = (0.0, 1.0);

    /// Gaussian blur amount in `[0, 10]`.
    #[must_use]
    pub const fn blur_amount(&self) -> f64 {
        self.blur_amount
    }

    /// Contrast multiplier in `[0.5, 2.0]`.
    #[must_use]
    pub const fn contrast(&self) -> f64 {
        self.contrast
    }

    /// Brightness adjustment in `[-50, 50]`.
    #[must_use]
    pub const fn brightness(&self) -> i32 {
        self.brightness
    }

    /// Edge enhancement strength in `[0, 1]`.
    #[must_use]
    pub const fn edge_enhancement(&self) -> f64 {
        self.edge_enhancement
    }

    /// Whether the depth values are inverted.
    #[must_use]
    pub const fn invert_depth(&self) -> bool {
        self.invert_depth
    }

    /// Background cutoff in `[0, 255]`.
    #[must_use]
    pub const fn background_threshold(&self) -> u8 {
        self.background_threshold
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            blur_amount: Self::DEFAULT_BLUR_AMOUNT,
            contrast: Self::DEFAULT_CONTRAST,
            brightness: Self::DEFAULT_BRIGHTNESS,
            edge_enhancement: Self::DEFAULT_EDGE_ENHANCEMENT,
            invert_depth: false,
            background_threshold: Self::DEFAULT_BACKGROUND_THRESHOLD,
        }
    }
}

fn check_range(name: &str, value: f64, (lo, hi): (f64, f64)) -> Result<f64, PipelineError> {
    if (lo..=hi).contains(&value) {
        Ok(value)
    } else {
        Err(PipelineError::Validation(format!(
            "{name} must be within [{lo}, {hi}], got {value}"
        )))
    }
}

impl TryFrom<RawParameters> for ParameterSet {
    type Error = PipelineError;

    fn try_from(raw: RawParameters) -> Result<Self, Self::Error> {
        let blur_amount = check_range("blur_amount", raw.blur_amount, Self::BLUR_RANGE)?;
        let contrast = check_range("contrast", raw.contrast, Self::CONTRAST_RANGE)?;
        let edge_enhancement =
            check_range("edge_enhancement", raw.edge_enhancement, Self::EDGE_RANGE)?;

        let (lo, hi) = Self::BRIGHTNESS_RANGE;
        let brightness = i32::try_from(raw.brightness)
            .ok()
            .filter(|b| (lo..=hi).contains(&i64::from(*b)))
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "brightness must be within [{lo}, {hi}], got {}",
                    raw.brightness
                ))
            })?;
        let background_threshold = u8::try_from(raw.background_threshold).map_err(|_| {
            PipelineError::Validation(format!(
                "background_threshold must be within [0, 255], got {}",
                raw.background_threshold
            ))
        })?;

        Ok(Self {
            blur_amount,
            contrast,
            brightness,
            edge_enhancement,
            invert_depth: raw.invert_depth,
            background_threshold,
        })
    }
}

impl From<ParameterSet> for RawParameters {
    fn from(p: ParameterSet) -> Self {
        Self {
            blur_amount: p.blur_amount,
            contrast: p.contrast,
            brightness: i64::from(p.brightness),
            edge_enhancement: p.edge_enhancement,
            invert_depth: p.invert_depth,
            background_threshold: i64::from(p.background_threshold),
        }
    }
}

// ───────────────────────── Zones ─────────────────────────────────────

/// How a zone treats the depth values under its polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    /// Keep the filtered depth (pass-through).
    #[serde(rename = "3d")]
    ThreeD,
    /// Replace the depth with a constant.
    #[serde(rename = "flat")]
    Flat,
    /// Replace the depth with a user-chosen constant.
    #[serde(rename = "custom")]
    Custom,
}

impl ZoneKind {
    /// Whether zones of this kind overwrite depth values.
    #[must_use]
    pub const fn overrides_depth(self) -> bool {
        matches!(self, Self::Flat | Self::Custom)
    }
}

/// A polygon vertex in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
}

impl PathPoint {
    /// Create a new vertex.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Unvalidated zone payload, mirroring the request JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawZone {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ZoneKind,
    #[serde(alias = "depth_mm")]
    pub depth: f64,
    pub visible: bool,
    pub path: Vec<PathPoint>,
}

/// A validated user-drawn depth zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawZone", into = "RawZone")]
pub struct Zone {
    id: i64,
    kind: ZoneKind,
    depth_mm: f64,
    visible: bool,
    path: Vec<PathPoint>,
    depth_value: Option<u8>,
}

impl Zone {
    /// Lowest accepted override depth in millimetres.
    pub const DEPTH_OFFSET_MM: f64 = 10.0;
    /// Millimetre span mapped onto `[0, 255]`.
    pub const DEPTH_SPAN_MM: f64 = 35.0;

    /// Validate and build a zone.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] if the path has fewer than
    /// three vertices, a vertex is not finite, or (for `Flat`/`Custom`
    /// zones) `depth_mm` scales outside `[0, 255]`.
    pub fn new(
        id: i64,
        kind: ZoneKind,
        depth_mm: f64,
        visible: bool,
        path: Vec<PathPoint>,
    ) -> Result<Self, PipelineError> {
        if path.len() < 3 {
            return Err(PipelineError::Validation(format!(
                "zone {id} needs at least 3 path points, got {}",
                path.len()
            )));
        }
        if path.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(PipelineError::Validation(format!(
                "zone {id} has a non-finite path point"
            )));
        }
        let depth_value = if kind.overrides_depth() {
            Some(Self::scale_depth(depth_mm).ok_or_else(|| {
                PipelineError::Validation(format!(
                    "zone {id} depth {depth_mm} mm is outside [{}, {}] mm",
                    -Self::DEPTH_OFFSET_MM,
                    Self::DEPTH_SPAN_MM - Self::DEPTH_OFFSET_MM,
                ))
            })?)
        } else {
            None
        };
        Ok(Self {
            id,
            kind,
            depth_mm,
            visible,
            path,
            depth_value,
        })
    }

    /// Map a millimetre depth onto the 0-255 grid scale.
    ///
    /// Returns `None` when the rounded value falls outside `[0, 255]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scale_depth(depth_mm: f64) -> Option<u8> {
        let scaled = ((depth_mm + Self::DEPTH_OFFSET_MM) / Self::DEPTH_SPAN_MM * 255.0).round();
        (0.0..=255.0).contains(&scaled).then_some(scaled as u8)
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> ZoneKind {
        self.kind
    }

    #[must_use]
    pub const fn depth_mm(&self) -> f64 {
        self.depth_mm
    }

    #[must_use]
    pub const fn visible(&self) -> bool {
        self.visible
    }

    #[must_use]
    pub fn path(&self) -> &[PathPoint] {
        &self.path
    }

    /// The grid value this zone writes, or `None` for pass-through zones.
    #[must_use]
    pub const fn depth_value(&self) -> Option<u8> {
        self.depth_value
    }
}

impl TryFrom<RawZone> for Zone {
    type Error = PipelineError;

    fn try_from(raw: RawZone) -> Result<Self, Self::Error> {
        Self::new(raw.id, raw.kind, raw.depth, raw.visible, raw.path)
    }
}

impl From<Zone> for RawZone {
    fn from(z: Zone) -> Self {
        Self {
            id: z.id,
            kind: z.kind,
            depth: z.depth_mm,
            visible: z.visible,
            path: z.path,
        }
    }
}

// ───────────────────────── Crystal + sampling config ─────────────────

/// Physical bounding box of the target crystal, in millimetres.
///
/// Serialized as a `[width, height, depth]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 3]", into = "[f64; 3]")]
pub struct CrystalDimensions {
    width_mm: f64,
    height_mm: f64,
    depth_mm: f64,
}

impl CrystalDimensions {
    /// Validate and build crystal dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] unless all three sides are
    /// finite and strictly positive.
    pub fn new(width_mm: f64, height_mm: f64, depth_mm: f64) -> Result<Self, PipelineError> {
        for (name, v) in [("width", width_mm), ("height", height_mm), ("depth", depth_mm)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(PipelineError::Validation(format!(
                    "crystal {name} must be a positive number of millimetres, got {v}"
                )));
            }
        }
        Ok(Self {
            width_mm,
            height_mm,
            depth_mm,
        })
    }

    #[must_use]
    pub const fn width_mm(&self) -> f64 {
        self.width_mm
    }

    #[must_use]
    pub const fn height_mm(&self) -> f64 {
        self.height_mm
    }

    #[must_use]
    pub const fn depth_mm(&self) -> f64 {
        self.depth_mm
    }
}

impl TryFrom<[f64; 3]> for CrystalDimensions {
    type Error = PipelineError;

    fn try_from([w, h, d]: [f64; 3]) -> Result<Self, Self::Error> {
        Self::new(w, h, d)
    }
}

impl From<CrystalDimensions> for [f64; 3] {
    fn from(c: CrystalDimensions) -> Self {
        [c.width_mm, c.height_mm, c.depth_mm]
    }
}

/// Configuration for the background classifier and point sampler.
///
/// When `crystal` is set it takes precedence over `mm_per_px` and
/// `max_depth_mm`: the image is scaled to fit the crystal face while
/// keeping its aspect ratio, and the crystal depth becomes the depth
/// range. See [`SamplingConfig::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Physical depth range mapped onto grid values 0-255.
    pub max_depth_mm: f64,
    /// Pixel-to-millimetre scale.
    pub mm_per_px: f64,
    /// Visit every `stride`-th row and column.
    pub stride: u32,
    /// Optional physical box the output is fitted into.
    pub crystal: Option<CrystalDimensions>,
}

impl SamplingConfig {
    pub const DEFAULT_MAX_DEPTH_MM: f64 = 50.0;
    pub const DEFAULT_MM_PER_PX: f64 = 0.1;
    pub const DEFAULT_STRIDE: u32 = 1;

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] for a zero stride or a
    /// non-positive or non-finite scale or depth.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.stride == 0 {
            return Err(PipelineError::Validation(
                "sampling stride must be at least 1".to_owned(),
            ));
        }
        if !(self.mm_per_px.is_finite() && self.mm_per_px > 0.0) {
            return Err(PipelineError::Validation(format!(
                "mm_per_px must be positive, got {}",
                self.mm_per_px
            )));
        }
        if !(self.max_depth_mm.is_finite() && self.max_depth_mm > 0.0) {
            return Err(PipelineError::Validation(format!(
                "max_depth_mm must be positive, got {}",
                self.max_depth_mm
            )));
        }
        Ok(())
    }

    /// Effective `(mm_per_px, max_depth_mm)` for a grid of `dimensions`.
    #[must_use]
    pub fn resolve(&self, dimensions: Dimensions) -> (f64, f64) {
        self.crystal.map_or((self.mm_per_px, self.max_depth_mm), |c| {
            let fit_w = c.width_mm() / f64::from(dimensions.width.max(1));
            let fit_h = c.height_mm() / f64::from(dimensions.height.max(1));
            (fit_w.min(fit_h), c.depth_mm())
        })
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_depth_mm: Self::DEFAULT_MAX_DEPTH_MM,
            mm_per_px: Self::DEFAULT_MM_PER_PX,
            stride: Self::DEFAULT_STRIDE,
            crystal: None,
        }
    }
}

// ───────────────────────── Point cloud ───────────────────────────────

/// A single output point in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CloudPoint {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Axis-aligned bounds of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: CloudPoint,
    pub max: CloudPoint,
}

/// Ordered points on a single named layer.
///
/// Point order is row-major over the sampled grid and is stable across
/// runs, including parallel ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    layer: String,
    points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Create a cloud on [`DEPTH_LAYER`].
    #[must_use]
    pub fn new(points: Vec<CloudPoint>) -> Self {
        Self {
            layer: DEPTH_LAYER.to_owned(),
            points,
        }
    }

    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    #[must_use]
    pub fn points(&self) -> &[CloudPoint] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Per-axis extent, or `None` for an empty cloud.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold(
            Bounds {
                min: first,
                max: first,
            },
            |b, p| Bounds {
                min: CloudPoint::new(b.min.x.min(p.x), b.min.y.min(p.y), b.min.z.min(p.z)),
                max: CloudPoint::new(b.max.x.max(p.x), b.max.y.max(p.y), b.max.z.max(p.z)),
            },
        ))
    }
}

// ───────────────────────── Errors ────────────────────────────────────

/// Errors that can occur anywhere in the pipeline.
///
/// `stage` fields name the step that failed (`"load"`, `"estimate"`,
/// `"encode"`, `"finalize"`, ...) so a caller can tell an unreadable
/// photo apart from an unwritable output file.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A parameter, zone or other request field is out of range or malformed.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The input has no usable content (empty or zero-area image).
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// The depth estimator failed.
    #[error("depth estimation failed during {stage}: {source}")]
    EstimationFailure {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    /// The depth estimator did not answer within the caller's timeout.
    #[error("depth estimation timed out after {timeout:?}")]
    EstimationTimedOut { timeout: Duration },

    /// The point-cloud encoder rejected a point or could not finish the file.
    #[error("point cloud encoding failed during {stage}: {source}")]
    EncodingFailure {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Failed to encode a preview raster.
    #[error("failed to encode preview image: {0}")]
    ImageEncode(#[source] image::ImageError),
}
