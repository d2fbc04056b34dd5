//! etchdepth-pipeline: depth field to point cloud, sans-IO.
//!
//! Turns the raw output of a depth estimator into a millimetre point
//! cloud for laser etching:
//! normalize -> filter chain -> zone overrides -> background
//! classification and sampling.
//!
//! Everything here operates on in-memory data. Reading photos and
//! writing CAD files lives in the CLI and `etchdepth-export`.
//!
//! The estimator and the preview cache are explicit service objects
//! ([`EstimatorService`], [`PreviewCache`]) built once by the caller
//! and passed to whoever needs them.

pub mod blur;
pub mod cache;
pub mod diagnostics;
pub mod edge;
pub mod estimator;
pub mod filter;
pub mod grayscale;
pub mod normalize;
pub mod pipeline;
pub mod preview;
pub mod regions;
pub mod sample;
pub mod tone;
pub mod types;
pub mod zones;

pub use cache::{CacheConfig, PreviewCache, PreviewKey, SourceIdentity};
pub use diagnostics::{Clock, PipelineDiagnostics, WebClock};
pub use estimator::{DepthEstimator, EstimatorConfig, EstimatorService, RasterDepthEstimator};
pub use filter::FilterStage;
pub use pipeline::{Pipeline, StagedResult};
pub use preview::{PreviewPayload, render_preview};
pub use regions::{TextRegion, detect_text_regions};
pub use types::{
    CloudPoint, CrystalDimensions, DEPTH_LAYER, DepthField, Dimensions, ParameterSet, PathPoint,
    PipelineError, PointCloud, RawDepthField, RawParameters, RawZone, SamplingConfig, Zone,
    ZoneKind,
};

use diagnostics::{PipelineSummary, StageDiagnostics};
use pipeline::PipelineStage;
use types::GrayImage;

/// Run the full pipeline and return the point cloud.
///
/// # Pipeline steps
///
/// 1. Min-max normalization to 0-255
/// 2. Filter chain (blur, tone, edge enhancement, inversion)
/// 3. Zone overrides in list order
/// 4. Background classification and sampling
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] if `config` is invalid or
/// `luma` does not match the depth field. Both are checked before any
/// computation.
pub fn process(
    raw: &RawDepthField,
    params: &ParameterSet,
    zones: &[Zone],
    luma: Option<&GrayImage>,
    config: &SamplingConfig,
) -> Result<PointCloud, PipelineError> {
    validate_request(raw, luma, config)?;
    let cloud = Pipeline::new(raw.clone(), *params)
        .normalize()
        .filter()
        .apply_zones(zones)
        .sample(luma, config)?
        .into_cloud();
    Ok(cloud)
}

/// Run the full pipeline, keeping every intermediate and timing each
/// stage with `clock`.
///
/// # Errors
///
/// Same as [`process`].
pub fn process_staged<C: Clock>(
    raw: &RawDepthField,
    params: &ParameterSet,
    zones: &[Zone],
    luma: Option<&GrayImage>,
    config: &SamplingConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    validate_request(raw, luma, config)?;
    let total_start = clock.now();

    let start = clock.now();
    let normalized = Pipeline::new(raw.clone(), *params).normalize();
    let normalize = timed(clock, &start, &normalized);

    let start = clock.now();
    let filtered = normalized.filter();
    let filter = timed(clock, &start, &filtered);

    let start = clock.now();
    let zoned = filtered.apply_zones(zones);
    let zones_diag = timed(clock, &start, &zoned);

    let start = clock.now();
    let sampled = zoned.sample(luma, config)?;
    let sample = timed(clock, &start, &sampled);

    let result = sampled.into_result();
    let diagnostics = PipelineDiagnostics {
        normalize,
        filter,
        zones: zones_diag,
        sample,
        total_duration: clock.elapsed(&total_start),
        summary: PipelineSummary {
            width: result.dimensions.width,
            height: result.dimensions.height,
            point_count: result.cloud.len(),
            bounds: result.cloud.bounds(),
        },
    };
    tracing::info!(
        width = result.dimensions.width,
        height = result.dimensions.height,
        points = result.cloud.len(),
        elapsed = ?diagnostics.total_duration,
        "pipeline complete"
    );
    Ok((result, diagnostics))
}

fn validate_request(
    raw: &RawDepthField,
    luma: Option<&GrayImage>,
    config: &SamplingConfig,
) -> Result<(), PipelineError> {
    config.validate()?;
    sample::check_luma(raw.dimensions(), luma)
}

/// Build a stage's diagnostics. Every stage after `Pending` has metrics.
fn timed<C: Clock, S: PipelineStage>(clock: &C, start: &C::Instant, stage: &S) -> StageDiagnostics {
    let duration = clock.elapsed(start);
    tracing::debug!(stage = S::NAME, ?duration, "stage finished");
    StageDiagnostics {
        duration,
        #[allow(clippy::unreachable)]
        metrics: stage
            .metrics()
            .unwrap_or_else(|| unreachable!("{} reports no metrics", S::NAME)),
    }
}
