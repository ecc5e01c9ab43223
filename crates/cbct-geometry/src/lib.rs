//! Acquisition geometry from camera poses.
//!
//! Converts per-frame camera-to-world matrices plus pinhole intrinsics into a
//! circular-orbit [`AcquisitionGeometry`](cbct_core::AcquisitionGeometry).
//! All functions are pure; nothing is cached between calls.

pub mod downscale;
pub mod intrinsics;
pub mod resolver;

pub use downscale::{infer_downscale_factor, infer_downscale_factor_from_image, DownscaleError};
pub use intrinsics::Intrinsics;
pub use resolver::{resolve_geometry, GeometryError, ResolveOptions, ResolvedGeometry};
