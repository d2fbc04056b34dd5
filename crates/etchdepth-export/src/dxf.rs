//! ASCII DXF (R12) point-cloud encoder.
//!
//! Emits one `POINT` entity per cloud point on a single named layer,
//! in millimetres:
//!
//! ```text
//! 0 SECTION / 2 HEADER    $ACADVER AC1009, $INSUNITS 4 (mm)
//! 0 SECTION / 2 TABLES    one LAYER entry
//! 0 SECTION / 2 ENTITIES  POINT: 8 layer, 10 x, 20 y, 30 z
//! 0 EOF
//! ```
//!
//! Each group is a code line followed by a value line. Coordinates are
//! written with 6 decimals.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use etchdepth_pipeline::{CloudPoint, PointCloud};

use crate::{ExportError, PointEncoder};

/// `$ACADVER` value for AutoCAD R12.
pub const ACAD_VERSION: &str = "AC1009";

/// `$INSUNITS` value for millimetres.
pub const UNITS_MILLIMETRES: u8 = 4;

/// Streaming DXF writer.
///
/// The header and layer table are written by [`DxfWriter::new`]; the
/// trailer by [`PointEncoder::finish`]. Dropping the writer without
/// finishing leaves an incomplete file.
pub struct DxfWriter<W: Write> {
    out: W,
    layer: String,
    written: usize,
}

/// Check a layer name against the R12 character set.
///
/// # Errors
///
/// Returns [`ExportError::InvalidLayer`] for an empty name or one with
/// characters other than ASCII letters, digits, `_`, `-` and `$`.
pub fn validate_layer(layer: &str) -> Result<(), ExportError> {
    let valid = !layer.is_empty()
        && layer
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$'));
    if valid {
        Ok(())
    } else {
        Err(ExportError::InvalidLayer(layer.to_owned()))
    }
}

impl<W: Write> DxfWriter<W> {
    /// Validate `layer` and write the file header.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidLayer`] or [`ExportError::Io`].
    pub fn new(mut out: W, layer: &str) -> Result<Self, ExportError> {
        validate_layer(layer)?;
        write_header(&mut out, layer)?;
        Ok(Self {
            out,
            layer: layer.to_owned(),
            written: 0,
        })
    }

    /// Points written so far.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Return the underlying writer without writing the trailer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn group(out: &mut impl Write, code: u16, value: &str) -> io::Result<()> {
    writeln!(out, "{code}\n{value}")
}

fn write_header(out: &mut impl Write, layer: &str) -> io::Result<()> {
    group(out, 0, "SECTION")?;
    group(out, 2, "HEADER")?;
    group(out, 9, "$ACADVER")?;
    group(out, 1, ACAD_VERSION)?;
    group(out, 9, "$INSUNITS")?;
    group(out, 70, &UNITS_MILLIMETRES.to_string())?;
    group(out, 0, "ENDSEC")?;

    group(out, 0, "SECTION")?;
    group(out, 2, "TABLES")?;
    group(out, 0, "TABLE")?;
    group(out, 2, "LAYER")?;
    group(out, 70, "1")?;
    group(out, 0, "LAYER")?;
    group(out, 2, layer)?;
    group(out, 70, "0")?;
    group(out, 62, "7")?;
    group(out, 6, "CONTINUOUS")?;
    group(out, 0, "ENDTAB")?;
    group(out, 0, "ENDSEC")?;

    group(out, 0, "SECTION")?;
    group(out, 2, "ENTITIES")
}

impl<W: Write> PointEncoder for DxfWriter<W> {
    type Output = W;

    fn add_point(&mut self, point: &CloudPoint) -> Result<(), ExportError> {
        if !(point.x.is_finite() && point.y.is_finite() && point.z.is_finite()) {
            return Err(ExportError::NonFinite {
                index: self.written,
                point: *point,
            });
        }
        write!(
            self.out,
            "0\nPOINT\n8\n{}\n10\n{:.6}\n20\n{:.6}\n30\n{:.6}\n",
            self.layer, point.x, point.y, point.z
        )?;
        self.written += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<(usize, W), ExportError> {
        group(&mut self.out, 0, "ENDSEC")?;
        group(&mut self.out, 0, "EOF")?;
        self.out.flush().map_err(ExportError::Finalize)?;
        Ok((self.written, self.out))
    }
}

/// Encode `cloud` into `out`, returning the number of points written.
///
/// # Errors
///
/// Returns the first error from the encoder. Output written before the
/// error is left in `out`.
pub fn write_dxf<W: Write>(out: W, cloud: &PointCloud) -> Result<(usize, W), ExportError> {
    let mut writer = DxfWriter::new(out, cloud.layer())?;
    for point in cloud.points() {
        writer.add_point(point)?;
    }
    writer.finish()
}

/// Encode `cloud` as a DXF string.
///
/// # Errors
///
/// Returns [`ExportError::InvalidLayer`] or [`ExportError::NonFinite`].
pub fn to_dxf(cloud: &PointCloud) -> Result<String, ExportError> {
    let (_, bytes) = write_dxf(Vec::new(), cloud)?;
    // Every byte written above is ASCII.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Directory that receives the temporary sibling of `path`.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Write `cloud` to `path` as DXF, returning the number of points
/// written.
///
/// The file is written to a uniquely named temporary sibling and moved
/// over `path` only after it has been flushed and synced, so concurrent
/// writers to the same destination never share a file and `path` always
/// holds one complete export. On any error the temporary file is removed
/// and `path` is left untouched.
///
/// # Errors
///
/// Returns the first encoder or I/O error.
pub fn write_dxf_file(path: &Path, cloud: &PointCloud) -> Result<usize, ExportError> {
    let name = path
        .file_name()
        .map_or_else(|| "export".into(), |n| n.to_string_lossy().into_owned());
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(parent_dir(path))?;

    // Dropping `tmp` on an early return deletes the temporary file.
    let (count, buffered) = write_dxf(BufWriter::new(tmp.as_file_mut()), cloud)?;
    buffered
        .into_inner()
        .map_err(|e| ExportError::Finalize(e.into_error()))?;
    tmp.as_file().sync_all().map_err(ExportError::Finalize)?;
    tmp.persist(path).map_err(|e| ExportError::Finalize(e.error))?;

    tracing::info!(path = %path.display(), points = count, "wrote DXF");
    Ok(count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cloud(points: Vec<CloudPoint>) -> PointCloud {
        PointCloud::new(points)
    }

    #[test]
    fn empty_cloud_is_a_valid_document() {
        let text = to_dxf(&cloud(vec![])).unwrap();
        assert!(text.starts_with("0\nSECTION\n2\nHEADER\n"));
        assert!(text.contains("$ACADVER\n1\nAC1009\n"));
        assert!(text.contains("$INSUNITS\n70\n4\n"));
        assert!(text.ends_with("0\nENDSEC\n0\nEOF\n"));
        assert!(!text.contains("POINT"));
    }

    #[test]
    fn point_groups_use_six_decimals() {
        let text = to_dxf(&cloud(vec![CloudPoint::new(-5.0, 5.0, 0.25)])).unwrap();
        assert!(text.contains(
            "0\nPOINT\n8\nETCH_DEPTH\n10\n-5.000000\n20\n5.000000\n30\n0.250000\n"
        ));
    }

    #[test]
    fn layer_is_declared_in_table() {
        let text = to_dxf(&cloud(vec![])).unwrap();
        assert!(text.contains("0\nLAYER\n2\nETCH_DEPTH\n"));
    }

    #[test]
    fn non_finite_point_aborts() {
        let err = to_dxf(&cloud(vec![
            CloudPoint::new(0.0, 0.0, 0.0),
            CloudPoint::new(f64::NAN, 0.0, 0.0),
        ]))
        .unwrap_err();
        assert!(matches!(err, ExportError::NonFinite { index: 1, .. }));
    }

    #[test]
    fn bad_layer_names_are_rejected() {
        assert!(validate_layer("ETCH_DEPTH").is_ok());
        assert!(validate_layer("").is_err());
        assert!(validate_layer("a b").is_err());
        assert!(validate_layer("x\n0").is_err());
    }

    #[test]
    fn writer_counts_points() {
        let mut w = DxfWriter::new(Vec::new(), "L1").unwrap();
        w.add_point(&CloudPoint::new(1.0, 2.0, 3.0)).unwrap();
        w.add_point(&CloudPoint::new(4.0, 5.0, 6.0)).unwrap();
        assert_eq!(w.written(), 2);
        let (count, bytes) = w.finish().unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            String::from_utf8(bytes).unwrap().matches("\nPOINT\n").count(),
            2
        );
    }
}
