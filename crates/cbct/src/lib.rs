//! High-level entry crate for `cbct-rs`.
//!
//! Turns a set of projection images with known camera poses into a 3D
//! density volume, and compares volumes against references.
//!
//! ## One call
//!
//! ```no_run
//! use cbct::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ReconstructConfig::new("data/scan", "out/scan");
//! let report = run_reconstruction(&config)?;
//! println!("{} after {} iterations", report.stop_reason, report.iterations);
//! # Ok(())
//! # }
//! ```
//!
//! ## Step by step
//!
//! ```no_run
//! use cbct::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loaded = load_projections("data/scan".as_ref(), &FrameSelection::default(), 2.0)?;
//! let resolved = resolve_geometry(
//!     &loaded.poses,
//!     &loaded.intrinsics,
//!     &ResolveOptions { downscale: 2.0, length_scale: 64.0, ..Default::default() },
//! )?;
//!
//! let mut engine = CpuEngine::new();
//! let state = solve(
//!     &resolved.geometry,
//!     VolumeGeometry::cube(128),
//!     &loaded.stack,
//!     &mut engine,
//!     &SolveOptions::default(),
//! )?;
//! let canonical = normalize_volume(&state.volume);
//! println!("{:?}: {:?}", state.stop_reason, canonical.data.dim());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - **[`core`]**: math aliases, poses, geometry, stacks, density fields
//! - **[`geometry`]**: the Pose-to-Geometry Resolver
//! - **[`recon`]**: engines and the convergence-controlled solve loop
//! - **[`pipeline`]**: loading, normalisation, persistence, evaluation
//! - **[`prelude`]**: common imports

/// Math aliases and the shared data model.
pub mod core {
    pub use cbct_core::*;
}

/// Camera poses and intrinsics to cone-beam geometry.
pub mod geometry {
    pub use cbct_geometry::*;
}

/// Reconstruction engines and the solve loop.
pub mod recon {
    pub use cbct_recon::*;
}

/// File-facing stages and full runs.
pub mod pipeline {
    pub use cbct_pipeline::*;
}

/// Convenient re-exports for common use cases.
pub mod prelude {
    pub use crate::core::{
        AcquisitionGeometry, CameraPose, DensityField, Extent3, ProjectionStack, SphereCollection,
        VolumeGeometry, VoxelGrid,
    };

    pub use crate::geometry::{resolve_geometry, GeometryError, Intrinsics, ResolveOptions};

    pub use crate::recon::{
        solve, solve_with_observer, Algorithm, CpuEngine, ReconstructionEngine, SolveOptions,
        SolveState, StopReason,
    };

    pub use crate::pipeline::{
        evaluate, load_projections, normalize_volume, run_evaluation, run_reconstruction,
        EvaluateConfig, EvaluationOptions, EvaluationReport, FrameSelection, ReconstructConfig,
        ReconstructionReport,
    };
}
