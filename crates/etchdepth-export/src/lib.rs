//! etchdepth-export: point-cloud encoders.
//!
//! Translates a [`PointCloud`] into CAD point files. The encoders are
//! plain [`std::io::Write`] consumers; [`dxf::write_dxf_file`] adds an
//! atomic write to disk so a failed export never leaves a half-written
//! file at the destination.
//!
//! [`PointCloud`]: etchdepth_pipeline::PointCloud

pub mod dxf;

use etchdepth_pipeline::{CloudPoint, PipelineError};

pub use dxf::{DxfWriter, to_dxf, write_dxf, write_dxf_file};

/// Errors raised while encoding a point cloud.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Writing to the output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Flushing, syncing or moving the finished file failed.
    #[error("could not finalize output: {0}")]
    Finalize(#[source] std::io::Error),

    /// The layer name cannot be represented in the format.
    #[error("invalid layer name {0:?}")]
    InvalidLayer(String),

    /// A coordinate is NaN or infinite.
    #[error("point {index} has a non-finite coordinate: {point:?}")]
    NonFinite { index: usize, point: CloudPoint },
}

impl ExportError {
    /// Step that failed, for [`PipelineError::EncodingFailure`].
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Io(_) => "write",
            Self::Finalize(_) => "finalize",
            Self::InvalidLayer(_) | Self::NonFinite { .. } => "encode",
        }
    }
}

impl From<ExportError> for PipelineError {
    fn from(e: ExportError) -> Self {
        Self::EncodingFailure {
            stage: e.stage(),
            source: Box::new(e),
        }
    }
}

/// A sink that accepts points one at a time.
pub trait PointEncoder {
    /// What [`finish`](Self::finish) hands back besides the count.
    type Output;

    /// Append one point.
    ///
    /// # Errors
    ///
    /// Returns an [`ExportError`] if the point is rejected or cannot be
    /// written. The encoder should not be used after an error.
    fn add_point(&mut self, point: &CloudPoint) -> Result<(), ExportError>;

    /// Write any trailer and flush, returning the number of points.
    ///
    /// # Errors
    ///
    /// Returns an [`ExportError`] if the trailer cannot be written.
    fn finish(self) -> Result<(usize, Self::Output), ExportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_errors_become_encoding_failures() {
        let err: PipelineError = ExportError::InvalidLayer(String::new()).into();
        assert!(matches!(
            err,
            PipelineError::EncodingFailure { stage: "encode", .. }
        ));
        let io: PipelineError =
            ExportError::Finalize(std::io::Error::other("disk full")).into();
        assert!(io.to_string().contains("finalize"));
        assert!(io.to_string().contains("disk full"));
    }
}
