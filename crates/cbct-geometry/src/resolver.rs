//! Pose-to-geometry resolution for circular cone-beam orbits.
//!
//! Every camera eye must lie on one circle around the world `z` axis:
//! 1. eyes are the images of the camera-space origin,
//! 2. all eyes share one `z` (the orbit plane),
//! 3. all eyes share one distance `R` to the axis,
//! 4. the frame angle is `atan2(y, x)` wrapped into `[0, 2π)`.
//!
//! The detector is placed at `2R` from the source, symmetric to the source
//! about the axis. Its physical size follows from the field of view:
//! `size = 2 · 2R / f` with `f = fl_x / (w / 2)`.

use crate::Intrinsics;
use cbct_core::{
    approx_eq_rel, normalize_angle, AcquisitionGeometry, CameraPose, InvalidGeometry, Real,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Radii below this are treated as a degenerate orbit.
const MIN_RADIUS: Real = 1e-9;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("need at least one camera pose")]
    NoPoses,
    #[error("intrinsics must be isotropic on a square sensor (fl_x={fl_x}, fl_y={fl_y}, w={w}, h={h})")]
    AnisotropicIntrinsics {
        fl_x: Real,
        fl_y: Real,
        w: Real,
        h: Real,
    },
    #[error("intrinsics must be positive and finite (fl_x={fl_x}, w={w}, h={h})")]
    NonPositiveIntrinsics { fl_x: Real, w: Real, h: Real },
    #[error("frame {frame} ({file}): eye z={z} is off the orbit plane z={expected}")]
    NonCoplanarPoses {
        frame: usize,
        file: String,
        z: Real,
        expected: Real,
    },
    #[error("frame {frame} ({file}): orbit radius {radius} differs from {expected}")]
    InconsistentRadius {
        frame: usize,
        file: String,
        radius: Real,
        expected: Real,
    },
    #[error("orbit radius {0} is too small")]
    DegenerateOrbit(Real),
    #[error("invalid resolve option: {0}")]
    InvalidOption(String),
    #[error(transparent)]
    Invalid(#[from] InvalidGeometry),
}

/// Options for [`resolve_geometry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Relative tolerance (w.r.t. the first frame's radius) for both the
    /// orbit-plane and the radius checks.
    pub tolerance: Real,
    /// Image downscale factor applied by the loader.
    pub downscale: Real,
    /// Scene units to volume units.
    pub length_scale: Real,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            downscale: 1.0,
            length_scale: 1.0,
        }
    }
}

/// Resolved geometry plus the measured orbit, in scene units.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGeometry {
    pub geometry: AcquisitionGeometry,
    /// Eye-to-axis distance `R` before length scaling.
    pub orbit_radius: Real,
    /// Common `z` of all eyes.
    pub orbit_plane_z: Real,
}

/// Derive the cone-beam geometry from camera poses and intrinsics.
///
/// Angles are returned in the order of `poses`.
///
/// # Errors
///
/// - [`GeometryError::NonPositiveIntrinsics`] / [`GeometryError::AnisotropicIntrinsics`]
///   before any pose is inspected,
/// - [`GeometryError::NonCoplanarPoses`] / [`GeometryError::InconsistentRadius`]
///   naming the first offending frame.
pub fn resolve_geometry(
    poses: &[CameraPose],
    intrinsics: &Intrinsics,
    opts: &ResolveOptions,
) -> Result<ResolvedGeometry, GeometryError> {
    intrinsics.validate()?;
    if !(opts.downscale > 0.0) || !(opts.length_scale > 0.0) || !(opts.tolerance >= 0.0) {
        return Err(GeometryError::InvalidOption(format!(
            "downscale={}, length_scale={}, tolerance={}",
            opts.downscale, opts.length_scale, opts.tolerance
        )));
    }
    let first = poses.first().ok_or(GeometryError::NoPoses)?;

    let eyes: Vec<_> = poses.iter().map(CameraPose::eye).collect();
    let radius = eyes[0].coords.xy().norm();
    if radius < MIN_RADIUS {
        return Err(GeometryError::DegenerateOrbit(radius));
    }
    let plane_z = eyes[0].z;

    for (idx, (eye, pose)) in eyes.iter().zip(poses).enumerate() {
        if !approx_eq_rel(eye.z, plane_z, radius, opts.tolerance, MIN_RADIUS) {
            return Err(GeometryError::NonCoplanarPoses {
                frame: idx,
                file: pose.file_path().display().to_string(),
                z: eye.z,
                expected: plane_z,
            });
        }
        let r = eye.coords.xy().norm();
        if !approx_eq_rel(r, radius, radius, opts.tolerance, MIN_RADIUS) {
            return Err(GeometryError::InconsistentRadius {
                frame: idx,
                file: pose.file_path().display().to_string(),
                radius: r,
                expected: radius,
            });
        }
    }
    if !approx_eq_rel(plane_z, 0.0, radius, opts.tolerance, MIN_RADIUS) {
        warn!(
            "orbit plane z={plane_z:.6} is offset from the volume centre ({}); offset ignored",
            first.file_path().display()
        );
    }

    let angles: Vec<Real> = eyes
        .iter()
        .map(|e| normalize_angle(e.y.atan2(e.x)))
        .collect();

    let f = intrinsics.normalized_focal();
    let detector_size = 2.0 * 2.0 * radius / f;
    let pixel_x = detector_size / intrinsics.w * opts.downscale * opts.length_scale;
    let pixel_y = detector_size / intrinsics.h * opts.downscale * opts.length_scale;
    let count_x = (intrinsics.w / opts.downscale).floor() as usize;
    let count_y = (intrinsics.h / opts.downscale).floor() as usize;

    let geometry = AcquisitionGeometry::new(
        (count_x, count_y),
        (pixel_x, pixel_y),
        radius * opts.length_scale,
        2.0 * radius * opts.length_scale,
        angles,
    )?;

    debug!(
        "resolved {} frames: R={radius:.6}, detector {}x{} @ {:.6}, SOD={:.4}, SDD={:.4}",
        geometry.num_frames(),
        count_x,
        count_y,
        pixel_x,
        geometry.source_to_object_distance(),
        geometry.source_to_detector_distance(),
    );

    Ok(ResolvedGeometry {
        geometry,
        orbit_radius: radius,
        orbit_plane_z: plane_z,
    })
}
