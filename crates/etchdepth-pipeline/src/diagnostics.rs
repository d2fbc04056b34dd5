//! Pipeline diagnostics: timing and counts for each stage.
//!
//! Every call to [`process_staged`](crate::process_staged) collects
//! diagnostics alongside the results. Timestamps come from a [`Clock`];
//! [`WebClock`] uses the `web-time` crate, which is `performance.now()`
//! on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) rather than
//! serde's default `{secs, nanos}` struct, so reports stay readable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Bounds;

/// Source of monotonic timestamps.
///
/// Abstracted so the preview cache and diagnostics can run against a
/// manually advanced clock in tests.
pub trait Clock {
    /// Timestamp type.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: min-max normalization.
    pub normalize: StageDiagnostics,
    /// Stage 2: filter chain.
    pub filter: StageDiagnostics,
    /// Stage 3: zone overrides.
    pub zones: StageDiagnostics,
    /// Stage 4: background classification and sampling.
    pub sample: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Normalization metrics.
    Normalize {
        width: u32,
        height: u32,
        /// Smallest raw value.
        raw_min: f32,
        /// Largest raw value.
        raw_max: f32,
        /// Whether the constant-field fallback was used.
        degenerate: bool,
    },
    /// Filter chain metrics.
    Filter {
        /// Names of the stages that ran, in order.
        active: Vec<String>,
    },
    /// Zone override metrics.
    Zones {
        /// Zones in the request.
        zone_count: usize,
        /// Visible zones that overwrote depth values.
        overriding: usize,
    },
    /// Sampling metrics.
    Sample {
        stride: u32,
        /// Cells inspected by the classifier.
        cells_visited: u64,
        /// Points that survived classification.
        points_emitted: usize,
        /// Whether the photo's luma drove classification.
        used_photo: bool,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub width: u32,
    pub height: u32,
    pub point_count: usize,
    /// Extent of the output cloud in millimetres.
    pub bounds: Option<Bounds>,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Depth field: {}x{}",
            self.summary.width, self.summary.height
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in [
            ("Normalize", &self.normalize),
            ("Filter", &self.filter),
            ("Zones", &self.zones),
            ("Sample", &self.sample),
        ] {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Points: {}", self.summary.point_count));
        if let Some(b) = self.summary.bounds {
            lines.push(format!(
                "Bounds: X {:.3}..{:.3}  Y {:.3}..{:.3}  Z {:.3}..{:.3} mm",
                b.min.x, b.max.x, b.min.y, b.max.y, b.min.z, b.max.z
            ));
        }
        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Normalize {
            raw_min,
            raw_max,
            degenerate,
            ..
        } => {
            let fallback = if *degenerate { " (constant, fallback)" } else { "" };
            format!("raw {raw_min:.3}..{raw_max:.3}{fallback}")
        }
        StageMetrics::Filter { active } if active.is_empty() => "identity".to_owned(),
        StageMetrics::Filter { active } => active.join(" -> "),
        StageMetrics::Zones {
            zone_count,
            overriding,
        } => format!("{overriding}/{zone_count} zones override"),
        StageMetrics::Sample {
            stride,
            cells_visited,
            points_emitted,
            used_photo,
        } => {
            let source = if *used_photo { "photo" } else { "depth" };
            format!("stride={stride} {points_emitted}/{cells_visited} cells kept (by {source})")
        }
    }
}
