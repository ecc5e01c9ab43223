//! Mathematical utilities and type definitions.

use nalgebra::{Matrix4, Point3, Vector3};
use std::f64::consts::TAU;

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 4×4 matrix with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;

/// Wrap an angle in radians into `[0, 2π)`.
pub fn normalize_angle(theta: Real) -> Real {
    let wrapped = theta.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Transform a 3D point by a homogeneous 4×4 matrix.
///
/// The result is de-homogenised; the caller is responsible for ensuring that
/// the last row of `m` does not map the point to `w = 0`.
pub fn transform_point_h(m: &Mat4, p: &Pt3) -> Pt3 {
    let v = m * p.to_homogeneous();
    Pt3::new(v.x / v.w, v.y / v.w, v.z / v.w)
}

/// Check `|a - b| <= rel_tol * scale`, with `scale` floored at `abs_floor`.
pub fn approx_eq_rel(a: Real, b: Real, scale: Real, rel_tol: Real, abs_floor: Real) -> bool {
    (a - b).abs() <= (rel_tol * scale.abs()).max(abs_floor)
}
