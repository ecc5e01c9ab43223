//! Convergence-controlled solve loop.
//!
//! [`solve`] opens an [`EngineSession`], runs `steps_per_check` iterations per
//! check, reads the residual, pulls a volume snapshot, and consults the
//! [`ConvergenceMonitor`]. Engine handles are released when the session goes
//! out of scope, whichever way the loop exits.

use crate::convergence::{ConvergenceMonitor, StopReason};
use crate::engine::{Algorithm, EngineError, EngineSession, ReconstructionEngine};
use cbct_core::{AcquisitionGeometry, ProjectionStack, StackShapeError, VolumeGeometry};
use log::{debug, info};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Shared flag for cooperative cancellation between checks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Solve loop options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Solver iterations between two residual checks (>= 1).
    pub steps_per_check: usize,
    /// Hard ceiling on the number of checks (>= 1).
    pub max_checks: usize,
    /// Stop once `-delta / range` drops below this (> 0).
    pub relative_improvement_floor: f64,
    pub algorithm: Algorithm,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            steps_per_check: 2,
            max_checks: 50,
            relative_improvement_floor: 1e-3,
            algorithm: Algorithm::Sirt,
            cancel: None,
        }
    }
}

impl SolveOptions {
    pub fn validate(&self) -> Result<(), SolveError> {
        if self.steps_per_check == 0 {
            return Err(SolveError::InvalidOptions(
                "steps_per_check must be at least 1".into(),
            ));
        }
        if self.max_checks == 0 {
            return Err(SolveError::InvalidOptions(
                "max_checks must be at least 1".into(),
            ));
        }
        if !(self.relative_improvement_floor > 0.0) || !self.relative_improvement_floor.is_finite()
        {
            return Err(SolveError::InvalidOptions(format!(
                "relative_improvement_floor must be positive and finite, got {}",
                self.relative_improvement_floor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("invalid solve options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Shape(#[from] StackShapeError),
    #[error("engine failed while setting up the solve")]
    Setup(#[source] EngineError),
    #[error("engine failed at check {check}")]
    Engine {
        check: usize,
        #[source]
        source: EngineError,
    },
}

/// Result of one solve run.
#[derive(Debug, Clone)]
pub struct SolveState {
    /// Total solver iterations performed.
    pub iteration_count: usize,
    /// One residual per completed check.
    pub residual_history: Vec<f64>,
    /// Last volume snapshot, indexed `[z, y, x]`.
    pub volume: Array3<f32>,
    pub converged: bool,
    pub stop_reason: StopReason,
}

impl SolveState {
    pub fn checks(&self) -> usize {
        self.residual_history.len()
    }

    /// `(iterations, residual)` pairs, one per check.
    pub fn convergence_curve(&self, steps_per_check: usize) -> Vec<(usize, f64)> {
        self.residual_history
            .iter()
            .enumerate()
            .map(|(i, r)| ((i + 1) * steps_per_check, *r))
            .collect()
    }
}

/// Progress snapshot handed to the observer after every check.
#[derive(Debug)]
pub struct CheckReport<'a> {
    /// 1-based check index.
    pub check: usize,
    pub iterations: usize,
    pub residual: f64,
    pub delta_over_range: Option<f64>,
    pub elapsed_secs: f64,
    pub volume: &'a Array3<f32>,
}

/// Run the loop without an observer.
pub fn solve<E: ReconstructionEngine + ?Sized>(
    geometry: &AcquisitionGeometry,
    volume: VolumeGeometry,
    projections: &ProjectionStack,
    engine: &mut E,
    options: &SolveOptions,
) -> Result<SolveState, SolveError> {
    solve_with_observer(geometry, volume, projections, engine, options, |_| {})
}

/// Run the loop, calling `observer` after every check.
///
/// Options and the stack shape are validated before any engine resource is
/// acquired. Stopping (converged, diverging, ceiling or cancelled) is an
/// `Ok` outcome; only engine failures are errors.
pub fn solve_with_observer<E, F>(
    geometry: &AcquisitionGeometry,
    volume: VolumeGeometry,
    projections: &ProjectionStack,
    engine: &mut E,
    options: &SolveOptions,
    mut observer: F,
) -> Result<SolveState, SolveError>
where
    E: ReconstructionEngine + ?Sized,
    F: FnMut(&CheckReport<'_>),
{
    options.validate()?;
    projections.check_geometry(geometry)?;

    let mut session = EngineSession::open(
        engine,
        geometry,
        &volume,
        projections,
        options.algorithm,
    )
    .map_err(SolveError::Setup)?;
    info!(
        "{} on {}: {} frames, volume {:?}, {} steps/check, at most {} checks",
        options.algorithm,
        session.engine_name(),
        geometry.num_frames(),
        volume.shape(),
        options.steps_per_check,
        options.max_checks
    );

    let mut monitor = ConvergenceMonitor::new(options.relative_improvement_floor, options.max_checks);
    let mut iteration_count = 0;
    let mut snapshot = Array3::zeros(volume.shape());
    let start = Instant::now();

    let stop_reason = loop {
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            break monitor.cancel();
        }
        let check = monitor.checks() + 1;
        let engine_err = |source| SolveError::Engine { check, source };

        session.run(options.steps_per_check).map_err(engine_err)?;
        iteration_count += options.steps_per_check;
        let residual = session.residual_norm().map_err(engine_err)?;
        snapshot = session.volume().map_err(engine_err)?;

        let verdict = monitor.push(residual);
        observer(&CheckReport {
            check,
            iterations: iteration_count,
            residual,
            delta_over_range: verdict.delta_over_range,
            elapsed_secs: start.elapsed().as_secs_f64(),
            volume: &snapshot,
        });
        if let Some(reason) = verdict.stop {
            break reason;
        }
    };
    drop(session);

    info!(
        "stopped after {} checks ({} iterations): {}",
        monitor.checks(),
        iteration_count,
        stop_reason
    );
    debug!("residual history: {:?}", monitor.history());

    Ok(SolveState {
        iteration_count,
        residual_history: monitor.history().to_vec(),
        volume: snapshot,
        converged: stop_reason == StopReason::Converged,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        SolveOptions::default().validate().unwrap();
    }

    #[test]
    fn zero_steps_or_checks_are_rejected() {
        let opts = SolveOptions {
            steps_per_check: 0,
            ..SolveOptions::default()
        };
        assert!(matches!(opts.validate(), Err(SolveError::InvalidOptions(_))));
        let opts = SolveOptions {
            max_checks: 0,
            ..SolveOptions::default()
        };
        assert!(matches!(opts.validate(), Err(SolveError::InvalidOptions(_))));
        let opts = SolveOptions {
            relative_improvement_floor: 0.0,
            ..SolveOptions::default()
        };
        assert!(matches!(opts.validate(), Err(SolveError::InvalidOptions(_))));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: SolveOptions =
            serde_json::from_str(r#"{"max_checks": 5, "algorithm": "cgls"}"#).unwrap();
        assert_eq!(opts.max_checks, 5);
        assert_eq!(opts.steps_per_check, 2);
        assert_eq!(opts.algorithm, Algorithm::Cgls);
        assert!(opts.cancel.is_none());
    }

    #[test]
    fn cancel_token_is_shared() {
        let t = CancelToken::new();
        let c = t.clone();
        c.cancel();
        assert!(t.is_cancelled());
    }
}
