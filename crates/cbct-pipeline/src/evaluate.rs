//! Volumetric Evaluator.
//!
//! Both fields are sampled on the same `N×N×N` grid spanning an extent
//! (default: the unit cube) and compared with three scalar metrics. A
//! zero-variance field only invalidates the correlation; the losses are still
//! reported.

use crate::persist::{array_to_gray, load_density_field, save_gray, side_by_side, write_json, RawDtype};
use anyhow::{Context, Result};
use cbct_core::{DensityField, Extent3, Pt3, Real};
use log::{info, warn};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("correlation is undefined for a constant field (candidate constant: {candidate}, reference constant: {reference})")]
    ZeroVariance { candidate: bool, reference: bool },
    #[error("evaluation resolution must be at least 1")]
    ZeroResolution,
    #[error("fields have {candidate} and {reference} samples")]
    LengthMismatch { candidate: usize, reference: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// Grid points per axis.
    pub resolution: usize,
    pub extent: Extent3,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            resolution: 200,
            extent: Extent3::unit_cube(),
        }
    }
}

/// The three metrics, as written to `eval_loss.json`.
///
/// `normed_correlation` is `null` when either field is constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub volumetric_loss: f64,
    pub scaled_volumetric_loss: f64,
    pub normed_correlation: Option<f64>,
}

/// Metrics plus the sampled grids, indexed `[i, j, k]` along x, y, z.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub report: EvaluationReport,
    pub correlation_error: Option<EvaluationError>,
    pub candidate: Array3<f64>,
    pub reference: Array3<f64>,
}

/// `n` evenly spaced values from `lo` to `hi` inclusive.
pub fn linspace(lo: Real, hi: Real, n: usize) -> Vec<Real> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n)
            .map(|i| lo + (hi - lo) * i as Real / (n - 1) as Real)
            .collect(),
    }
}

/// Sample `field` on the evaluation grid; x varies slowest.
pub fn sample_on_grid(field: &DensityField, options: &EvaluationOptions) -> Result<Array3<f64>, EvaluationError> {
    let n = options.resolution;
    if n == 0 {
        return Err(EvaluationError::ZeroResolution);
    }
    let e = &options.extent;
    let xs = linspace(e.min[0], e.max[0], n);
    let ys = linspace(e.min[1], e.max[1], n);
    let zs = linspace(e.min[2], e.max[2], n);

    let mut values = Vec::with_capacity(n * n * n);
    let mut plane = Vec::with_capacity(n * n);
    for x in &xs {
        plane.clear();
        for y in &ys {
            plane.extend(zs.iter().map(|z| Pt3::new(*x, *y, *z)));
        }
        values.extend(field.density(&plane));
    }
    let got = values.len();
    Array3::from_shape_vec((n, n, n), values).map_err(|_| EvaluationError::LengthMismatch {
        candidate: got,
        reference: n * n * n,
    })
}

fn check_lengths(a: &[f64], b: &[f64]) -> Result<(), EvaluationError> {
    if a.len() != b.len() {
        return Err(EvaluationError::LengthMismatch {
            candidate: a.len(),
            reference: b.len(),
        });
    }
    Ok(())
}

fn mse(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / a.len() as f64
}

/// Mean squared error of the raw values.
pub fn volumetric_loss(candidate: &[f64], reference: &[f64]) -> Result<f64, EvaluationError> {
    check_lengths(candidate, reference)?;
    Ok(mse(candidate, reference))
}

/// Values mapped to `[0, 1]` by their own min and max; constant input maps to 0.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let span = hi - lo;
    if span > 0.0 {
        values.iter().map(|v| (v - lo) / span).collect()
    } else {
        vec![0.0; values.len()]
    }
}

/// MSE after min-max normalising each field independently.
pub fn scaled_volumetric_loss(candidate: &[f64], reference: &[f64]) -> Result<f64, EvaluationError> {
    check_lengths(candidate, reference)?;
    Ok(mse(&min_max_normalize(candidate), &min_max_normalize(reference)))
}

fn is_constant(values: &[f64]) -> bool {
    match values.split_first() {
        Some((first, rest)) => rest.iter().all(|v| v == first),
        None => true,
    }
}

/// Pearson correlation coefficient.
///
/// A field whose values are all equal yields `ZeroVariance`, whatever
/// rounding its mean picks up.
pub fn normed_correlation(candidate: &[f64], reference: &[f64]) -> Result<f64, EvaluationError> {
    check_lengths(candidate, reference)?;
    let (flat_x, flat_y) = (is_constant(candidate), is_constant(reference));
    if flat_x || flat_y {
        return Err(EvaluationError::ZeroVariance {
            candidate: flat_x,
            reference: flat_y,
        });
    }
    let n = candidate.len() as f64;
    let mx = candidate.iter().sum::<f64>() / n;
    let my = reference.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in candidate.iter().zip(reference) {
        let dx = x - mx;
        let dy = y - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return Err(EvaluationError::ZeroVariance {
            candidate: sxx <= 0.0,
            reference: syy <= 0.0,
        });
    }
    Ok(sxy / (sxx * syy).sqrt())
}

/// Compare two flattened fields.
pub fn compare_values(
    candidate: &[f64],
    reference: &[f64],
) -> Result<(EvaluationReport, Option<EvaluationError>), EvaluationError> {
    let volumetric_loss = volumetric_loss(candidate, reference)?;
    let scaled_volumetric_loss = scaled_volumetric_loss(candidate, reference)?;
    let (normed_correlation, correlation_error) = match normed_correlation(candidate, reference) {
        Ok(c) => (Some(c), None),
        Err(e @ EvaluationError::ZeroVariance { .. }) => (None, Some(e)),
        Err(e) => return Err(e),
    };
    Ok((
        EvaluationReport {
            volumetric_loss,
            scaled_volumetric_loss,
            normed_correlation,
        },
        correlation_error,
    ))
}

/// Sample both fields and compute the metrics.
pub fn evaluate(
    candidate: &DensityField,
    reference: &DensityField,
    options: &EvaluationOptions,
) -> Result<Evaluation, EvaluationError> {
    let c = sample_on_grid(candidate, options)?;
    let r = sample_on_grid(reference, options)?;
    let (report, correlation_error) = compare_values(
        c.as_slice().unwrap_or(&[]),
        r.as_slice().unwrap_or(&[]),
    )?;
    if let Some(err) = &correlation_error {
        warn!("{err}");
    }
    Ok(Evaluation {
        report,
        correlation_error,
        candidate: c,
        reference: r,
    })
}

impl Evaluation {
    /// Reference (left) and candidate (right) slices at the middle z index.
    pub fn write_slices(&self, path: &Path) -> Result<(), crate::persist::PersistError> {
        let k = self.reference.len_of(Axis(2)) / 2;
        let left = array_to_gray(&self.reference.index_axis(Axis(2), k).to_owned());
        let right = array_to_gray(&self.candidate.index_axis(Axis(2), k).to_owned());
        save_gray(path, &side_by_side(&left, &right))
    }
}

/// Inputs of the `evaluate` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateConfig {
    pub candidate: PathBuf,
    pub reference: PathBuf,
    #[serde(default)]
    pub candidate_resolution: Option<usize>,
    #[serde(default)]
    pub candidate_dtype: Option<RawDtype>,
    #[serde(default)]
    pub reference_resolution: Option<usize>,
    #[serde(default)]
    pub reference_dtype: Option<RawDtype>,
    #[serde(default)]
    pub options: EvaluationOptions,
    #[serde(default = "default_true")]
    pub write_slices: bool,
}

fn default_true() -> bool {
    true
}

impl EvaluateConfig {
    pub fn new(candidate: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> Self {
        Self {
            candidate: candidate.into(),
            reference: reference.into(),
            candidate_resolution: None,
            candidate_dtype: None,
            reference_resolution: None,
            reference_dtype: None,
            options: EvaluationOptions::default(),
            write_slices: true,
        }
    }

    /// Directory the outputs are written to: next to the reference.
    pub fn output_dir(&self) -> PathBuf {
        self.reference
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Load both fields, evaluate, and write `eval_loss.json` (and
/// `slices_eval.png`) next to the reference.
pub fn run_evaluation(config: &EvaluateConfig) -> Result<EvaluationReport> {
    info!("loading candidate from {}", config.candidate.display());
    let candidate = load_density_field(
        &config.candidate,
        config.candidate_resolution,
        config.candidate_dtype,
    )
    .with_context(|| format!("failed to load candidate {}", config.candidate.display()))?;
    info!("loading reference from {}", config.reference.display());
    let reference = load_density_field(
        &config.reference,
        config.reference_resolution,
        config.reference_dtype,
    )
    .with_context(|| format!("failed to load reference {}", config.reference.display()))?;

    let evaluation = evaluate(&candidate, &reference, &config.options)
        .context("evaluation failed")?;
    let out = config.output_dir();
    if config.write_slices {
        evaluation
            .write_slices(&out.join("slices_eval.png"))
            .context("failed to write slice preview")?;
    }
    write_json(&out.join("eval_loss.json"), &evaluation.report)
        .context("failed to write eval_loss.json")?;
    info!("{:?}", evaluation.report);
    Ok(evaluation.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_core::{Sphere, SphereCollection, VoxelGrid};

    fn field() -> Vec<f64> {
        (0..50).map(|i| ((i * 7) % 13) as f64 * 0.3).collect()
    }

    #[test]
    fn correlation_with_self_and_negation() {
        let f = field();
        let neg: Vec<f64> = f.iter().map(|v| -v).collect();
        assert!((normed_correlation(&f, &f).unwrap() - 1.0).abs() < 1e-12);
        assert!((normed_correlation(&f, &neg).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_fields_have_no_correlation_but_keep_losses() {
        let a = vec![2.0; 10];
        let b = vec![5.0; 10];
        assert_eq!(
            normed_correlation(&a, &b),
            Err(EvaluationError::ZeroVariance {
                candidate: true,
                reference: true
            })
        );
        let (report, err) = compare_values(&a, &b).unwrap();
        assert_eq!(report.volumetric_loss, 9.0);
        assert_eq!(report.scaled_volumetric_loss, 0.0);
        assert_eq!(report.normed_correlation, None);
        assert!(err.is_some());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["normed_correlation"].is_null());
    }

    #[test]
    fn inexact_constant_is_still_constant() {
        // ten 0.1s sum to 0.9999999999999999
        let a = vec![0.1; 10];
        assert_eq!(
            normed_correlation(&a, &a),
            Err(EvaluationError::ZeroVariance {
                candidate: true,
                reference: true
            })
        );
        let f = field();
        assert_eq!(
            normed_correlation(&f, &a[..1].repeat(f.len())),
            Err(EvaluationError::ZeroVariance {
                candidate: false,
                reference: true
            })
        );
    }

    #[test]
    fn offset_only_matters_before_scaling() {
        let f = field();
        let shifted: Vec<f64> = f.iter().map(|v| v + 100.0).collect();
        assert!(scaled_volumetric_loss(&f, &shifted).unwrap() < 1e-20);
        assert!((volumetric_loss(&f, &shifted).unwrap() - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn grid_hits_voxel_grid_samples_exactly() {
        let data = Array3::from_shape_fn((3, 3, 3), |(z, y, x)| (z * 9 + y * 3 + x) as f32);
        let grid: DensityField = VoxelGrid::unit(data.clone()).unwrap().into();
        let opts = EvaluationOptions {
            resolution: 3,
            ..EvaluationOptions::default()
        };
        let sampled = sample_on_grid(&grid, &opts).unwrap();
        // evaluation grid is [x, y, z], voxel data is [z, y, x]
        for ((i, j, k), v) in sampled.indexed_iter() {
            assert!((v - data[[k, j, i]] as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn identical_sphere_fields_evaluate_perfectly() {
        let s: DensityField = SphereCollection::new(vec![Sphere {
            center: [0.5, 0.5, 0.5],
            radius: 0.3,
            rho: 2.0,
        }])
        .into();
        let opts = EvaluationOptions {
            resolution: 12,
            ..EvaluationOptions::default()
        };
        let eval = evaluate(&s, &s, &opts).unwrap();
        assert_eq!(eval.report.volumetric_loss, 0.0);
        assert!((eval.report.normed_correlation.unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(eval.candidate.dim(), (12, 12, 12));
    }

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
        assert_eq!(linspace(0.2, 1.0, 1), vec![0.2]);
    }
}
