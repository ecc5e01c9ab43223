//! Relative-improvement stopping rule over a residual series.
//!
//! The rule is evaluated once per check (not per solver iteration). With at
//! least two residuals recorded, let `range = max - min` over the whole history
//! and `delta = last - previous`:
//!
//! - `delta > 0` stops with [`StopReason::Diverging`];
//! - `range == 0` stops with [`StopReason::Converged`];
//! - `-delta / range < floor` stops with [`StopReason::Converged`].
//!
//! Reaching the check ceiling stops with [`StopReason::MaxIterations`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a solve ended. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// The check ceiling was reached before the residual flattened.
    MaxIterations,
    /// Relative improvement dropped below the floor.
    Converged,
    /// The residual increased between two checks.
    Diverging,
    /// A cancel request was observed between checks.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::MaxIterations => "MAX_ITERATIONS",
            StopReason::Converged => "CONVERGED",
            StopReason::Diverging => "DIVERGING",
            StopReason::Cancelled => "CANCELLED",
        })
    }
}

/// Outcome of feeding one residual to a [`ConvergenceMonitor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckVerdict {
    /// `delta / range` for this check, when defined.
    pub delta_over_range: Option<f64>,
    /// `Some` once the loop must stop.
    pub stop: Option<StopReason>,
}

/// Pure state machine implementing the stopping rule.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    relative_improvement_floor: f64,
    max_checks: usize,
    history: Vec<f64>,
    min: f64,
    max: f64,
    stopped: Option<StopReason>,
}

impl ConvergenceMonitor {
    pub fn new(relative_improvement_floor: f64, max_checks: usize) -> Self {
        Self {
            relative_improvement_floor,
            max_checks,
            history: Vec::new(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            stopped: None,
        }
    }

    /// Residuals recorded so far, oldest first.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn checks(&self) -> usize {
        self.history.len()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Record the residual of the next check and decide whether to stop.
    ///
    /// After a stop has been decided further pushes are still recorded but
    /// keep reporting the first stop reason.
    pub fn push(&mut self, residual: f64) -> CheckVerdict {
        self.history.push(residual);
        self.min = self.min.min(residual);
        self.max = self.max.max(residual);

        let (delta_over_range, decided) = self.evaluate(residual);
        if self.stopped.is_none() {
            self.stopped = decided;
        }
        CheckVerdict {
            delta_over_range,
            stop: self.stopped,
        }
    }

    /// Mark the run as cancelled unless it already stopped.
    pub fn cancel(&mut self) -> StopReason {
        *self.stopped.get_or_insert(StopReason::Cancelled)
    }

    fn evaluate(&self, residual: f64) -> (Option<f64>, Option<StopReason>) {
        // NaN/inf never compares as an improvement
        if !residual.is_finite() {
            return (None, Some(StopReason::Diverging));
        }
        let n = self.history.len();
        let mut ratio = None;
        if n >= 2 {
            let delta = residual - self.history[n - 2];
            let range = self.max - self.min;
            if delta > 0.0 {
                if range > 0.0 {
                    ratio = Some(delta / range);
                }
                return (ratio, Some(StopReason::Diverging));
            }
            if range <= 0.0 {
                return (None, Some(StopReason::Converged));
            }
            let r = delta / range;
            ratio = Some(r);
            if -r < self.relative_improvement_floor {
                return (ratio, Some(StopReason::Converged));
            }
        }
        if n >= self.max_checks {
            return (ratio, Some(StopReason::MaxIterations));
        }
        (ratio, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(series: &[f64], floor: f64, max_checks: usize) -> (usize, StopReason) {
        let mut m = ConvergenceMonitor::new(floor, max_checks);
        for (i, r) in series.iter().enumerate() {
            if let Some(reason) = m.push(*r).stop {
                return (i + 1, reason);
            }
        }
        (series.len(), StopReason::MaxIterations)
    }

    #[test]
    fn stops_when_improvement_flattens() {
        let (checks, reason) = run(&[10.0, 5.0, 2.0, 1.001, 1.0, 0.9999], 1e-3, 50);
        // 1.001 -> 1.0 improves by 0.001 over a range of 9.0
        assert_eq!(reason, StopReason::Converged);
        assert_eq!(checks, 5);
    }

    #[test]
    fn first_increase_is_diverging() {
        let (checks, reason) = run(&[5.0, 3.0, 4.0], 1e-3, 50);
        assert_eq!(reason, StopReason::Diverging);
        assert_eq!(checks, 3);
    }

    #[test]
    fn constant_series_converges_on_second_check() {
        let (checks, reason) = run(&[2.0, 2.0, 2.0], 1e-3, 50);
        assert_eq!(reason, StopReason::Converged);
        assert_eq!(checks, 2);
    }

    #[test]
    fn ceiling_is_hard() {
        let series: Vec<f64> = (0..100).map(|i| 100.0 - i as f64).collect();
        let (checks, reason) = run(&series, 1e-6, 7);
        assert_eq!(reason, StopReason::MaxIterations);
        assert_eq!(checks, 7);
    }

    #[test]
    fn single_check_ceiling_stops_immediately() {
        let (checks, reason) = run(&[3.0, 1.0], 1e-3, 1);
        assert_eq!(reason, StopReason::MaxIterations);
        assert_eq!(checks, 1);
    }

    #[test]
    fn non_finite_residual_is_diverging() {
        let (checks, reason) = run(&[3.0, f64::NAN], 1e-3, 10);
        assert_eq!(reason, StopReason::Diverging);
        assert_eq!(checks, 2);
    }

    #[test]
    fn first_stop_reason_sticks() {
        let mut m = ConvergenceMonitor::new(1e-3, 10);
        m.push(5.0);
        assert_eq!(m.push(6.0).stop, Some(StopReason::Diverging));
        assert_eq!(m.push(1.0).stop, Some(StopReason::Diverging));
        assert_eq!(m.cancel(), StopReason::Diverging);
        assert_eq!(m.history(), &[5.0, 6.0, 1.0]);
    }

    #[test]
    fn delta_over_range_is_reported() {
        let mut m = ConvergenceMonitor::new(1e-3, 10);
        assert_eq!(m.push(10.0).delta_over_range, None);
        let v = m.push(6.0);
        assert_eq!(v.delta_over_range, Some(-1.0));
        assert_eq!(v.stop, None);
    }

    #[test]
    fn stop_reason_serializes_upper_case() {
        let s = serde_json::to_string(&StopReason::MaxIterations).unwrap();
        assert_eq!(s, "\"MAX_ITERATIONS\"");
    }
}
