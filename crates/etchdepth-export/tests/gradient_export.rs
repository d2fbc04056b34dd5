//! Integration test: run a synthetic depth gradient through the full
//! pipeline and export it to DXF on disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use etchdepth_export::{ExportError, to_dxf, write_dxf_file};
use etchdepth_pipeline::{
    CloudPoint, ParameterSet, PathPoint, PointCloud, RawDepthField, RawParameters, SamplingConfig,
    Zone, ZoneKind,
};

/// `d(x, y) = x * 16` on a 4x4 grid.
fn gradient() -> RawDepthField {
    RawDepthField::from_fn(4, 4, |x, _| f32::from(u16::try_from(x * 16).unwrap())).unwrap()
}

fn params(threshold: i64) -> ParameterSet {
    ParameterSet::try_from(RawParameters {
        background_threshold: threshold,
        ..RawParameters::default()
    })
    .unwrap()
}

fn config() -> SamplingConfig {
    SamplingConfig {
        max_depth_mm: 50.0,
        stride: 1,
        ..SamplingConfig::default()
    }
}

#[test]
fn gradient_pipeline_to_dxf() {
    let cloud = etchdepth_pipeline::process(&gradient(), &params(0), &[], None, &config())
        .expect("pipeline should succeed");

    // Column 0 normalizes to depth 0, which is never emitted.
    assert_eq!(cloud.len(), 12);
    let rows: Vec<&[CloudPoint]> = cloud.points().chunks(3).collect();
    for row in &rows {
        assert!(row.windows(2).all(|w| w[0].z < w[1].z), "z rises with x");
    }
    for row in &rows[1..] {
        for (a, b) in row.iter().zip(rows[0]) {
            assert!((a.z - b.z).abs() < 1e-12, "z is constant in y");
        }
    }

    let dxf = to_dxf(&cloud).unwrap();
    eprintln!("DXF: {} bytes, {} points", dxf.len(), cloud.len());
    assert_eq!(dxf.matches("\nPOINT\n").count(), 12);
    // Rightmost column is depth 255: z = 50 - 12.5.
    assert!(dxf.contains("30\n37.500000\n"));
}

#[test]
fn flat_zone_survives_export() {
    let zone = Zone::new(
        7,
        ZoneKind::Flat,
        0.0,
        true,
        vec![
            PathPoint::new(0.0, 0.0),
            PathPoint::new(4.0, 0.0),
            PathPoint::new(4.0, 4.0),
            PathPoint::new(0.0, 4.0),
        ],
    )
    .unwrap();
    let cloud = etchdepth_pipeline::process(&gradient(), &params(0), &[zone], None, &config())
        .unwrap();
    assert_eq!(cloud.len(), 16);
    // 0 mm scales to 73: z = 73 / 255 * 50 - 12.5.
    let expected = 73.0 / 255.0 * 50.0 - 12.5;
    assert!(cloud.points().iter().all(|p| (p.z - expected).abs() < 1e-9));
}

#[test]
fn file_write_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cloud.dxf");
    let cloud = etchdepth_pipeline::process(&gradient(), &params(0), &[], None, &config()).unwrap();

    let count = write_dxf_file(&path, &cloud).unwrap();
    assert_eq!(count, cloud.len());
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, to_dxf(&cloud).unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn failed_write_leaves_destination_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cloud.dxf");
    std::fs::write(&path, "previous export").unwrap();

    let bad = PointCloud::new(vec![
        CloudPoint::new(0.0, 0.0, 0.0),
        CloudPoint::new(0.0, f64::INFINITY, 0.0),
    ]);
    let err = write_dxf_file(&path, &bad).unwrap_err();
    assert!(matches!(err, ExportError::NonFinite { index: 1, .. }));

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous export");
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "temporary file removed: {leftovers:?}");
}

#[test]
fn concurrent_writers_leave_one_complete_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cloud.dxf");
    let clouds: Vec<PointCloud> = (0..8u32)
        .map(|w| {
            PointCloud::new(
                (0..5_000u32)
                    .map(|i| CloudPoint::new(f64::from(w), f64::from(i), f64::from(w * i)))
                    .collect(),
            )
        })
        .collect();
    let expected: Vec<String> = clouds.iter().map(|c| to_dxf(c).unwrap()).collect();

    for _ in 0..5 {
        std::thread::scope(|s| {
            for cloud in &clouds {
                let path = &path;
                s.spawn(move || write_dxf_file(path, cloud).unwrap());
            }
        });
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(
            expected.contains(&written),
            "destination is not any single export ({} bytes)",
            written.len()
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

#[test]
fn missing_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no-such-dir").join("cloud.dxf");
    let err = write_dxf_file(&path, &PointCloud::new(vec![])).unwrap_err();
    let pipeline_err: etchdepth_pipeline::PipelineError = err.into();
    assert!(pipeline_err.to_string().contains("during write"));
}
