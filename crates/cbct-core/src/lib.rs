//! Core math and data model for `cbct-rs`.
//!
//! This crate provides the building blocks shared by every other crate in the
//! workspace:
//!
//! - linear algebra type aliases (`Real`, `Vec3`, `Pt3`, `Mat4`, ...),
//! - camera poses as read from transforms documents ([`CameraPose`]),
//! - the derived cone-beam acquisition geometry ([`AcquisitionGeometry`]),
//! - dense 3D arrays for projection stacks and volumes,
//! - density fields that can be queried at arbitrary points ([`DensityField`]).
//!
//! Array conventions:
//! - projection stacks are indexed `[row, frame, col]`,
//! - solver-native volumes are indexed `[z, y, x]`.
//!
//! # Modules
//!
//! - \[`math`\]: type aliases and angle helpers.
//! - \[`synthetic`\]: deterministic orbits and phantoms for tests and demos.

/// Linear algebra type aliases and helpers.
mod math;
/// Camera poses.
mod pose;
/// Cone-beam acquisition geometry.
mod geometry;
/// Projection stacks.
mod projection;
/// Voxel volumes and their geometry.
mod volume;
/// Density fields (voxel grids and analytic objects).
mod density;
/// Deterministic synthetic data generation helpers.
///
/// Circular orbits and sphere phantoms used by workspace tests and demos.
pub mod synthetic;

pub use density::*;
pub use geometry::*;
pub use math::*;
pub use pose::*;
pub use projection::*;
pub use volume::*;
