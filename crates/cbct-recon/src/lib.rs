//! Iterative reconstruction for cone-beam CT.
//!
//! - [`engine`]: the handle-based [`ReconstructionEngine`] interface, the
//!   RAII [`EngineSession`], and the multi-threaded [`CpuEngine`].
//! - [`convergence`]: the relative-improvement stopping rule.
//! - [`solve`](mod@solve): the loop that drives an engine under that rule.

pub mod convergence;
pub mod engine;
pub mod solve;

pub use convergence::{CheckVerdict, ConvergenceMonitor, StopReason};
pub use engine::{
    Algorithm, AlgorithmId, CpuEngine, DataId, EngineError, EngineSession, Handle,
    ReconstructionEngine,
};
pub use solve::{
    solve, solve_with_observer, CancelToken, CheckReport, SolveError, SolveOptions, SolveState,
};
