//! End-to-end reconstruction run: load, resolve, solve, normalise, persist.

use crate::loader::{load_projections, FrameSelection};
use crate::normalize::{normalize_volume, ValueRange};
use crate::persist::{
    canonical_to_zyx, write_json, write_npy, write_projection_png, write_raw_f32,
    write_slice_png, ConvergenceRecord, GeometryRecord,
};
use crate::progress::ProgressTable;
use anyhow::{Context, Result};
use cbct_core::VolumeGeometry;
use cbct_geometry::{resolve_geometry, ResolveOptions};
use cbct_recon::{
    solve_with_observer, CpuEngine, ReconstructionEngine, SolveOptions, StopReason,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings of one reconstruction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructConfig {
    /// Directory holding one `transforms*.json`, or the document itself.
    pub input: PathBuf,
    pub output: PathBuf,
    /// World-to-voxel length scale; `resolution / 2` when unset.
    pub length_scale: Option<f64>,
    pub downscale: f64,
    /// Voxels per side of the reconstruction cube.
    pub resolution: usize,
    pub selection: FrameSelection,
    /// Relative tolerance for orbit-plane and radius checks.
    pub tolerance: f64,
    pub solve: SolveOptions,
    /// Rewrite `slice.png` after every check.
    pub snapshots: bool,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            length_scale: None,
            downscale: 1.0,
            resolution: 256,
            selection: FrameSelection::default(),
            tolerance: ResolveOptions::default().tolerance,
            solve: SolveOptions::default(),
            snapshots: true,
        }
    }
}

impl ReconstructConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn effective_length_scale(&self) -> f64 {
        self.length_scale
            .unwrap_or(self.resolution as f64 / 2.0)
    }
}

/// Paths of everything a run writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFiles {
    pub config: PathBuf,
    pub volume_raw: PathBuf,
    pub volume_npy: PathBuf,
    pub slice: PathBuf,
    pub projection: PathBuf,
    pub convergence: PathBuf,
}

impl OutputFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config: dir.join("config.json"),
            volume_raw: dir.join("vol_zyx.raw"),
            volume_npy: dir.join("vol_zyx.npy"),
            slice: dir.join("slice.png"),
            projection: dir.join("projection.png"),
            convergence: dir.join("convergence.json"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionReport {
    pub stop_reason: StopReason,
    pub converged: bool,
    pub checks: usize,
    pub iterations: usize,
    pub residual_history: Vec<f64>,
    pub frames: usize,
    /// Value range of the solver output before rescaling.
    pub value_range: ValueRange,
    pub files: OutputFiles,
}

/// Run with the CPU engine.
pub fn run_reconstruction(config: &ReconstructConfig) -> Result<ReconstructionReport> {
    let mut engine = CpuEngine::new();
    run_reconstruction_with(config, &mut engine)
}

/// Run with a caller-supplied engine.
pub fn run_reconstruction_with<E: ReconstructionEngine + ?Sized>(
    config: &ReconstructConfig,
    engine: &mut E,
) -> Result<ReconstructionReport> {
    fs::create_dir_all(&config.output)
        .with_context(|| format!("failed to create {}", config.output.display()))?;
    info!("output folder: {}", config.output.display());
    let files = OutputFiles::in_dir(&config.output);
    let length_scale = config.effective_length_scale();

    let loaded = load_projections(&config.input, &config.selection, config.downscale)
        .with_context(|| format!("failed to load projections from {}", config.input.display()))?;
    let resolved = resolve_geometry(
        &loaded.poses,
        &loaded.intrinsics,
        &ResolveOptions {
            tolerance: config.tolerance,
            downscale: config.downscale,
            length_scale,
        },
    )
    .with_context(|| format!("invalid geometry in {}", loaded.document.display()))?;
    let geometry = &resolved.geometry;
    info!(
        "{} frames, orbit radius {:.4}, detector {}x{}",
        geometry.num_frames(),
        resolved.orbit_radius,
        geometry.detector_pixel_count_x(),
        geometry.detector_pixel_count_y()
    );
    write_projection_png(&files.projection, &loaded.stack)?;

    let table = ProgressTable::new(&["Iteration", "Error", "de/rng"], 12);
    table.log_header();
    let volume = VolumeGeometry::cube(config.resolution);
    let state = solve_with_observer(
        geometry,
        volume,
        &loaded.stack,
        engine,
        &config.solve,
        |report| {
            table.update(&[
                ("Iteration", report.iterations.into()),
                ("Error", report.residual.into()),
                ("de/rng", report.delta_over_range.unwrap_or(0.0).into()),
            ]);
            if config.snapshots {
                let snapshot = normalize_volume(report.volume);
                if let Err(err) = write_slice_png(&files.slice, &snapshot.data) {
                    warn!("check {}: {err}", report.check);
                }
            }
        },
    )
    .context("reconstruction failed")?;

    let normalized = normalize_volume(&state.volume);
    let zyx = canonical_to_zyx(&normalized.data);
    write_raw_f32(&files.volume_raw, &zyx)?;
    write_npy(&files.volume_npy, &zyx)?;
    write_slice_png(&files.slice, &normalized.data)?;
    write_json(
        &files.convergence,
        &ConvergenceRecord::from_state(&state, config.solve.steps_per_check),
    )?;
    let record = GeometryRecord::new(
        geometry,
        loaded.image_filenames,
        config.solve.algorithm.name(),
    );
    write_json(&files.config, &record)?;
    info!("wrote {}", files.volume_raw.display());

    Ok(ReconstructionReport {
        stop_reason: state.stop_reason,
        converged: state.converged,
        checks: state.checks(),
        iterations: state.iteration_count,
        residual_history: state.residual_history,
        frames: geometry.num_frames(),
        value_range: normalized.range,
        files,
    })
}
