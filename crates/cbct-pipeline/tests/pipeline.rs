use cbct_core::synthetic::{circular_orbit_poses, sphere_phantom};
use cbct_core::{CameraPose, Sphere, SphereCollection, VolumeGeometry};
use cbct_geometry::{resolve_geometry, Intrinsics, ResolveOptions};
use cbct_pipeline::persist::{read_json, read_npy, ConvergenceRecord};
use cbct_pipeline::{
    load_projections, run_evaluation, run_reconstruction, EvaluateConfig, EvaluationReport,
    FrameSelection, GeometryRecord, LoadError, ReconstructConfig,
};
use cbct_recon::{CpuEngine, SolveOptions};
use image::{GrayImage, Luma};
use serde_json::json;
use std::fs;
use std::path::Path;

const SIZE: u32 = 16;
const FOCAL: f64 = 24.0;

fn frame_json(pose: &CameraPose) -> serde_json::Value {
    json!({
        "file_path": pose.file_path().to_string_lossy(),
        "transform_matrix": pose.to_rows(),
    })
}

fn write_transforms(dir: &Path, poses: &[CameraPose]) {
    let doc = json!({
        "fl_x": FOCAL,
        "fl_y": FOCAL,
        "w": SIZE,
        "h": SIZE,
        "frames": poses.iter().map(frame_json).collect::<Vec<_>>(),
    });
    fs::write(dir.join("transforms.json"), doc.to_string()).unwrap();
}

/// Frames with a constant gray value of `10 * index`.
fn write_flat_scan(dir: &Path, n: usize) -> Vec<CameraPose> {
    fs::create_dir_all(dir.join("images")).unwrap();
    let poses = circular_orbit_poses(n, 3.0, 0.0);
    for (i, pose) in poses.iter().enumerate() {
        let img = GrayImage::from_pixel(SIZE, SIZE, Luma([(10 * i) as u8]));
        img.save(dir.join(pose.file_path())).unwrap();
    }
    poses
}

/// Simulated scan of a sphere, written the way a camera would record it.
fn write_phantom_scan(dir: &Path, n_frames: usize, resolution: usize) {
    fs::create_dir_all(dir.join("images")).unwrap();
    let poses = circular_orbit_poses(n_frames, 3.0, 0.3);
    let intrinsics = Intrinsics {
        fl_x: FOCAL,
        fl_y: FOCAL,
        w: SIZE as f64,
        h: SIZE as f64,
    };
    let length_scale = resolution as f64 / 2.0;
    let resolved = resolve_geometry(
        &poses,
        &intrinsics,
        &ResolveOptions {
            length_scale,
            ..ResolveOptions::default()
        },
    )
    .unwrap();
    let spheres = SphereCollection::new(vec![Sphere {
        center: [0.15, 0.0, -0.1],
        radius: 0.5,
        rho: 1.0,
    }]);
    let truth = sphere_phantom(&spheres, VolumeGeometry::cube(resolution), length_scale);
    let stack = CpuEngine::forward_project(&resolved.geometry, &truth).unwrap();
    let peak = stack.data().iter().cloned().fold(0.0f32, f32::max).max(1e-6);

    for (i, pose) in poses.iter().enumerate() {
        let frame = stack.frame(i);
        let rows = frame.nrows() as u32;
        let img = GrayImage::from_fn(SIZE, SIZE, |x, y| {
            // the loader flips vertically
            let p = frame[[(rows - 1 - y) as usize, x as usize]] / peak;
            Luma([((1.0 - p) * 255.0).round().clamp(0.0, 255.0) as u8])
        });
        img.save(dir.join(pose.file_path())).unwrap();
    }
    write_transforms(dir, &poses);
}

#[test]
fn loader_orders_by_file_name_not_document_order() {
    let dir = tempfile::tempdir().unwrap();
    let poses = write_flat_scan(dir.path(), 5);
    write_transforms(dir.path(), &poses);
    let in_order = load_projections(dir.path(), &|_: usize, _: &str| true, 1.0).unwrap();

    let mut shuffled = poses.clone();
    shuffled.swap(0, 3);
    shuffled.swap(1, 4);
    write_transforms(dir.path(), &shuffled);
    let reordered = load_projections(dir.path(), &|_: usize, _: &str| true, 1.0).unwrap();

    assert_eq!(in_order.stack, reordered.stack);
    assert_eq!(in_order.image_filenames, reordered.image_filenames);
    assert_eq!(reordered.image_filenames[0], "images/train_00.png");
    for (a, b) in in_order.poses.iter().zip(&reordered.poses) {
        assert_eq!(a.camera_to_world(), b.camera_to_world());
    }
    // frame i was written with gray 10*i, stored inverted
    let v = reordered.stack.data()[[0, 3, 0]];
    assert!((v - (1.0 - 30.0 / 255.0)).abs() < 1e-6);
}

#[test]
fn frame_selection_and_downscale() {
    let dir = tempfile::tempdir().unwrap();
    let poses = write_flat_scan(dir.path(), 6);
    write_transforms(dir.path(), &poses);
    let sel = FrameSelection {
        imin: 1,
        imax: 5,
        istep: 2,
    };
    let loaded = load_projections(dir.path(), &sel, 2.0).unwrap();
    assert_eq!(loaded.stack.shape(), [8, 3, 8]);
    assert_eq!(
        loaded.image_filenames,
        vec!["images/train_01.png", "images/train_03.png", "images/train_05.png"]
    );
}

#[test]
fn missing_and_mismatched_images_are_reported_with_their_frame() {
    let dir = tempfile::tempdir().unwrap();
    let poses = write_flat_scan(dir.path(), 3);
    write_transforms(dir.path(), &poses);

    GrayImage::new(SIZE, SIZE + 2)
        .save(dir.path().join("images/train_02.png"))
        .unwrap();
    match load_projections(dir.path(), &FrameSelection::default(), 1.0) {
        Err(LoadError::ShapeMismatch { frame, .. }) => assert_eq!(frame, 2),
        other => panic!("unexpected {other:?}"),
    }

    fs::remove_file(dir.path().join("images/train_01.png")).unwrap();
    match load_projections(dir.path(), &FrameSelection::default(), 1.0) {
        Err(LoadError::MissingImage { frame, .. }) => assert_eq!(frame, 1),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn reconstruction_writes_all_artefacts_and_evaluates_against_itself() {
    let _ = env_logger::builder().is_test(true).try_init();
    let scan = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let resolution = 10;
    write_phantom_scan(scan.path(), 16, resolution);

    let config = ReconstructConfig {
        resolution,
        solve: SolveOptions {
            max_checks: 6,
            ..SolveOptions::default()
        },
        ..ReconstructConfig::new(scan.path(), out.path())
    };
    let report = run_reconstruction(&config).unwrap();

    assert!(report.checks >= 1 && report.checks <= 6);
    assert_eq!(report.iterations, report.checks * 2);
    assert_eq!(report.frames, 16);
    for f in [
        &report.files.config,
        &report.files.volume_raw,
        &report.files.volume_npy,
        &report.files.slice,
        &report.files.projection,
        &report.files.convergence,
    ] {
        assert!(f.is_file(), "{} missing", f.display());
    }
    assert_eq!(
        fs::metadata(&report.files.volume_raw).unwrap().len(),
        (resolution.pow(3) * 4) as u64
    );

    let record: GeometryRecord = read_json(&report.files.config).unwrap();
    assert_eq!(record.kind, "cone");
    assert_eq!(record.algorithm, "SIRT");
    assert_eq!(record.image_filenames.len(), 16);
    assert_eq!(record.to_geometry().unwrap().num_frames(), 16);

    let curve: ConvergenceRecord = read_json(&report.files.convergence).unwrap();
    assert_eq!(curve.residuals, report.residual_history);
    assert_eq!(curve.iterations[0], 2);

    let vol = read_npy(&report.files.volume_npy).unwrap();
    assert_eq!(vol.dim(), (resolution, resolution, resolution));
    let max = vol.iter().cloned().fold(f32::MIN, f32::max);
    assert!((max - 255.0).abs() < 1e-3);

    let eval = EvaluateConfig {
        options: cbct_pipeline::EvaluationOptions {
            resolution: 8,
            ..Default::default()
        },
        ..EvaluateConfig::new(&report.files.volume_npy, &report.files.volume_npy)
    };
    let metrics = run_evaluation(&eval).unwrap();
    assert_eq!(metrics.volumetric_loss, 0.0);
    assert!((metrics.normed_correlation.unwrap() - 1.0).abs() < 1e-9);
    let written: EvaluationReport = read_json(&out.path().join("eval_loss.json")).unwrap();
    assert_eq!(written, metrics);
    assert!(out.path().join("slices_eval.png").is_file());
}
