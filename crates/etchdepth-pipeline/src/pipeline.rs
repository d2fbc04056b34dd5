//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate grid before continuing.
//!
//! Unlike [`crate::process_staged`] which runs everything in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use etchdepth_pipeline::{Pipeline, ParameterSet, PipelineError, RawDepthField, SamplingConfig};
//! # fn run(raw: RawDepthField) -> Result<(), PipelineError> {
//! let sampled = Pipeline::new(raw, ParameterSet::default())
//!     .normalize()
//!     .filter()
//!     .apply_zones(&[])
//!     .sample(None, &SamplingConfig::default())?;
//!
//! let staged = sampled.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, so the
//! order normalize → filter → zones → sample is enforced by the types.
//! Only sampling can fail.

use crate::diagnostics::StageMetrics;
use crate::filter::FilterStage;
use crate::types::{
    DepthField, Dimensions, GrayImage, ParameterSet, PipelineError, PointCloud, RawDepthField,
    SamplingConfig, Zone,
};

/// Every intermediate of a completed run.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Min-max normalized grid.
    pub normalized: DepthField,
    /// After the filter chain.
    pub filtered: DepthField,
    /// After zone overrides. This is what was sampled.
    pub zoned: DepthField,
    /// Output points.
    pub cloud: PointCloud,
    pub dimensions: Dimensions,
}

/// Entry point for the typestate pipeline.
///
/// Each stage method consumes the current state and returns the next,
/// so skipping a stage or running stages out of order does not compile.
pub struct Pipeline;

impl Pipeline {
    /// Start a run over `raw` with `params`. Nothing is computed yet.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(raw: RawDepthField, params: ParameterSet) -> Pending {
        Pending { params, raw }
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Raw estimator output, not yet touched.
#[must_use = "pipeline stages are consumed by advancing; call .normalize() to continue"]
pub struct Pending {
    params: ParameterSet,
    raw: RawDepthField,
}

impl Pending {
    #[must_use]
    pub const fn raw(&self) -> &RawDepthField {
        &self.raw
    }

    /// Rescale to 0-255 and advance to [`Normalized`].
    pub fn normalize(self) -> Normalized {
        let normalized = crate::normalize::normalize(&self.raw);
        Normalized {
            params: self.params,
            range: self.raw.range(),
            degenerate: crate::normalize::is_degenerate(&self.raw),
            normalized,
        }
    }
}

// ───────────────────────── Stage 1: Normalized ───────────────────────

/// Grid after min-max normalization.
#[must_use = "pipeline stages are consumed by advancing; call .filter() to continue"]
pub struct Normalized {
    params: ParameterSet,
    range: (f32, f32),
    degenerate: bool,
    normalized: DepthField,
}

impl Normalized {
    #[must_use]
    pub const fn normalized(&self) -> &DepthField {
        &self.normalized
    }

    /// Whether the raw field was constant.
    #[must_use]
    pub const fn degenerate(&self) -> bool {
        self.degenerate
    }

    /// Run the filter chain and advance to [`Filtered`].
    pub fn filter(self) -> Filtered {
        let active = crate::filter::active_stages(&self.params);
        let filtered = crate::filter::apply_filters(&self.normalized, &self.params);
        Filtered {
            params: self.params,
            normalized: self.normalized,
            active,
            filtered,
        }
    }
}

// ───────────────────────── Stage 2: Filtered ─────────────────────────

/// Grid after blur, tone, edge enhancement and inversion.
#[must_use = "pipeline stages are consumed by advancing; call .apply_zones() to continue"]
pub struct Filtered {
    params: ParameterSet,
    normalized: DepthField,
    active: Vec<FilterStage>,
    filtered: DepthField,
}

impl Filtered {
    #[must_use]
    pub const fn filtered(&self) -> &DepthField {
        &self.filtered
    }

    /// Filter stages that ran.
    #[must_use]
    pub fn active(&self) -> &[FilterStage] {
        &self.active
    }

    /// Apply zone overrides and advance to [`Zoned`].
    pub fn apply_zones(self, zones: &[Zone]) -> Zoned {
        let zoned = crate::zones::apply_zones(&self.filtered, zones);
        Zoned {
            params: self.params,
            normalized: self.normalized,
            filtered: self.filtered,
            zone_count: zones.len(),
            overriding: crate::zones::overriding_zone_count(zones),
            zoned,
        }
    }
}

// ───────────────────────── Stage 3: Zoned ────────────────────────────

/// Grid with zone overrides applied.
#[must_use = "pipeline stages are consumed by advancing; call .sample() to continue"]
pub struct Zoned {
    params: ParameterSet,
    normalized: DepthField,
    filtered: DepthField,
    zone_count: usize,
    overriding: usize,
    zoned: DepthField,
}

impl Zoned {
    #[must_use]
    pub const fn zoned(&self) -> &DepthField {
        &self.zoned
    }

    /// Classify and sample cells, advancing to [`Sampled`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] if `config` is invalid or
    /// `luma` does not match the grid.
    pub fn sample(
        self,
        luma: Option<&GrayImage>,
        config: &SamplingConfig,
    ) -> Result<Sampled, PipelineError> {
        let cloud = crate::sample::sample_points(
            &self.zoned,
            luma,
            self.params.background_threshold(),
            config,
        )?;
        Ok(Sampled {
            dimensions: Dimensions::of(&self.zoned),
            normalized: self.normalized,
            filtered: self.filtered,
            zoned: self.zoned,
            stride: config.stride,
            used_photo: luma.is_some(),
            cloud,
        })
    }
}

// ───────────────────────── Stage 4: Sampled ──────────────────────────

/// Final stage: the point cloud.
pub struct Sampled {
    dimensions: Dimensions,
    normalized: DepthField,
    filtered: DepthField,
    zoned: DepthField,
    stride: u32,
    used_photo: bool,
    cloud: PointCloud,
}

impl Sampled {
    #[must_use]
    pub const fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            normalized: self.normalized,
            filtered: self.filtered,
            zoned: self.zoned,
            cloud: self.cloud,
            dimensions: self.dimensions,
        }
    }

    /// Consume the pipeline and return only the point cloud.
    #[must_use]
    pub fn into_cloud(self) -> PointCloud {
        self.cloud
    }
}

// ───────────────────────── PipelineStage trait ───────────────────────

/// Total number of stages, including [`Pending`].
pub const STAGE_COUNT: usize = 5;

/// Implemented by every stage for uniform naming and diagnostics.
pub trait PipelineStage {
    /// Human-readable name (e.g. `"normalize"`).
    const NAME: &str;

    /// Zero-based position, `0` for [`Pending`].
    const INDEX: usize;

    /// Metrics for the work done to reach this stage, `None` for
    /// [`Pending`].
    fn metrics(&self) -> Option<StageMetrics>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }
}

impl PipelineStage for Normalized {
    const NAME: &str = "normalize";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Normalize {
            width: self.normalized.width(),
            height: self.normalized.height(),
            raw_min: self.range.0,
            raw_max: self.range.1,
            degenerate: self.degenerate,
        })
    }
}

impl PipelineStage for Filtered {
    const NAME: &str = "filter";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Filter {
            active: self.active.iter().map(ToString::to_string).collect(),
        })
    }
}

impl PipelineStage for Zoned {
    const NAME: &str = "zones";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Zones {
            zone_count: self.zone_count,
            overriding: self.overriding,
        })
    }
}

impl PipelineStage for Sampled {
    const NAME: &str = "sample";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Sample {
            stride: self.stride,
            cells_visited: crate::sample::visited_cells(self.dimensions, self.stride),
            points_emitted: self.cloud.len(),
            used_photo: self.used_photo,
        })
    }
}

const _: () = {
    assert!(<Pending as PipelineStage>::INDEX == 0);
    assert!(<Normalized as PipelineStage>::INDEX == <Pending as PipelineStage>::INDEX + 1);
    assert!(<Filtered as PipelineStage>::INDEX == <Normalized as PipelineStage>::INDEX + 1);
    assert!(<Zoned as PipelineStage>::INDEX == <Filtered as PipelineStage>::INDEX + 1);
    assert!(<Sampled as PipelineStage>::INDEX == <Zoned as PipelineStage>::INDEX + 1);
    assert!(<Sampled as PipelineStage>::INDEX + 1 == STAGE_COUNT);
};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{PathPoint, RawParameters, ZoneKind};

    fn raw() -> RawDepthField {
        RawDepthField::from_fn(16, 12, |x, y| f32::from(u16::try_from(x * 3 + y).unwrap())).unwrap()
    }

    #[test]
    fn stage_names_and_indices() {
        assert_eq!(Pending::NAME, "source");
        assert_eq!(Sampled::INDEX, STAGE_COUNT - 1);
    }

    #[test]
    fn stages_expose_intermediates() {
        let params = ParameterSet::try_from(RawParameters {
            invert_depth: true,
            background_threshold: 0,
            ..RawParameters::default()
        })
        .unwrap();
        let normalized = Pipeline::new(raw(), params).normalize();
        assert!(normalized.metrics().is_some());
        let n = normalized.normalized().clone();
        let filtered = normalized.filter();
        assert_eq!(filtered.active(), &[FilterStage::Invert]);
        assert_eq!(filtered.filtered(), &crate::edge::invert_depth(&n));

        let zone = Zone::new(
            1,
            ZoneKind::Flat,
            25.0,
            true,
            vec![
                PathPoint::new(0.0, 0.0),
                PathPoint::new(4.0, 0.0),
                PathPoint::new(4.0, 4.0),
                PathPoint::new(0.0, 4.0),
            ],
        )
        .unwrap();
        let zoned = filtered.apply_zones(&[zone]);
        assert_eq!(zoned.zoned().get_pixel(1, 1).0[0], 255);

        let sampled = zoned.sample(None, &SamplingConfig::default()).unwrap();
        let Some(StageMetrics::Sample { cells_visited, .. }) = sampled.metrics() else {
            unreachable!("sample stage reports sample metrics");
        };
        assert_eq!(cells_visited, 16 * 12);
        let result = sampled.into_result();
        assert_eq!(result.normalized, n);
        assert_eq!(result.dimensions, Dimensions { width: 16, height: 12 });
    }

    #[test]
    fn degenerate_input_is_flagged() {
        let flat = RawDepthField::new(3, 3, vec![2.5; 9]).unwrap();
        let normalized = Pipeline::new(flat, ParameterSet::default()).normalize();
        assert!(normalized.degenerate());
    }

    #[test]
    fn sampling_rejects_bad_stride() {
        let config = SamplingConfig {
            stride: 0,
            ..SamplingConfig::default()
        };
        let err = Pipeline::new(raw(), ParameterSet::default())
            .normalize()
            .filter()
            .apply_zones(&[])
            .sample(None, &config);
        assert!(matches!(err, Err(PipelineError::Validation(_))));
    }
}
