//! Full on-disk flow: raw projection files in, slice files out.

use std::f32::consts::TAU;
use std::sync::Arc;

use cbct_compute::{Engine, EngineConfig};
use cbct_core::DetectorGeometry;
use cbct_io::{raw, DirectorySource, SliceFileSink};
use cbct_tests::{forward_project, Phantom};

#[test]
fn test_disk_scan_reconstructs_to_slice_files() {
    let det = DetectorGeometry {
        n_h: 16,
        n_v: 4,
        pitch_h: 2.0,
        pitch_v: 2.0,
        d_so: 200.0,
        d_sd: 400.0,
        delta_phi: TAU / 24.0,
        num_projections: 24,
    };

    let scan_dir = tempfile::tempdir().unwrap();
    for (index, view) in forward_project(&Phantom::sphere(6.0, 1.0), &det)
        .iter()
        .enumerate()
    {
        let path = scan_dir.path().join(format!("proj_{index:04}.raw"));
        raw::write_image(&path, view.data()).unwrap();
    }

    let out_dir = tempfile::tempdir().unwrap();
    let source = DirectorySource::open(scan_dir.path(), det.n_h, det.n_v, det.num_projections)
        .unwrap();
    let sink = SliceFileSink::new(out_dir.path(), "vol");

    let engine = Engine::new(EngineConfig::new(det).with_devices(1)).unwrap();
    let plan = engine.run(Arc::new(source), Box::new(sink)).unwrap();

    // One slice file per z index, of the planned xy size, finite values.
    for z in 0..plan.vol_geo.n_z {
        let path = out_dir.path().join(format!("vol_{z:06}.raw"));
        let slice = raw::read_image(&path, plan.vol_geo.n_x, plan.vol_geo.n_y)
            .unwrap_or_else(|e| panic!("slice {z}: {e}"));
        assert!(slice.data().iter().all(|v| v.is_finite()));
    }

    // The central slice carries the sphere.
    let mid = out_dir
        .path()
        .join(format!("vol_{:06}.raw", plan.vol_geo.n_z / 2));
    let slice = raw::read_image(&mid, plan.vol_geo.n_x, plan.vol_geo.n_y).unwrap();
    let center = slice.at(plan.vol_geo.n_x / 2, plan.vol_geo.n_y / 2);
    assert!(center > 0.5, "sphere center reconstructed as {center}");
}
