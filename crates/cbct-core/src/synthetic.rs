//! Synthetic circular orbits and sphere phantoms.
//!
//! Everything here is deterministic for a given input (noise takes an
//! explicit seed) so it can back regression tests.

use crate::{CameraPose, Mat4, Pt3, Real, SphereCollection, Vec3, VolumeGeometry};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

/// `n` equispaced angles starting at `start`, covering a full turn.
pub fn orbit_angles(n: usize, start: Real) -> Vec<Real> {
    (0..n)
        .map(|i| start + TAU * i as Real / n as Real)
        .collect()
}

/// Camera-to-world pose of a camera at `eye` looking at the origin.
///
/// Uses the OpenGL convention: the camera looks down its local `-z` axis with
/// `+y` up, and world `+z` is the orbit axis.
pub fn look_at_origin(eye: Pt3) -> Mat4 {
    let back = eye.coords.normalize();
    let world_up = Vec3::z();
    let right = world_up.cross(&back).normalize();
    let up = back.cross(&right);
    let mut m = Mat4::identity();
    for r in 0..3 {
        m[(r, 0)] = right[r];
        m[(r, 1)] = up[r];
        m[(r, 2)] = back[r];
        m[(r, 3)] = eye[r];
    }
    m
}

/// Poses on a circle of `radius` in the `z = 0` plane, named `train_XX.png`.
pub fn circular_orbit_poses(n: usize, radius: Real, start: Real) -> Vec<CameraPose> {
    orbit_angles(n, start)
        .into_iter()
        .enumerate()
        .map(|(i, theta)| {
            let eye = Pt3::new(radius * theta.cos(), radius * theta.sin(), 0.0);
            CameraPose::new(look_at_origin(eye), format!("images/train_{i:02}.png"))
        })
        .collect()
}

/// Rasterise spheres given in normalised coordinates into a `[z, y, x]` grid.
///
/// A voxel centre `c` (volume units) is tested at `c / length_scale`, so with
/// `length_scale = resolution / 2` the unit cube `[-1, 1]^3` fills the grid.
pub fn sphere_phantom(
    spheres: &SphereCollection,
    geometry: VolumeGeometry,
    length_scale: Real,
) -> Array3<f32> {
    Array3::from_shape_fn(geometry.shape(), |(z, y, x)| {
        let c = geometry.voxel_center(z, y, x);
        spheres.sample(&Pt3::from(c.coords / length_scale)) as f32
    })
}

/// Add seeded uniform noise in `[-amplitude, amplitude]`, clamping at zero.
///
/// Works for both densities and simulated line integrals, neither of which
/// can be negative. A non-positive or non-finite amplitude leaves `data`
/// untouched.
pub fn add_uniform_noise(data: &mut Array3<f32>, amplitude: f32, seed: u64) {
    if !(amplitude.is_finite() && amplitude > 0.0) {
        return;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for v in data.iter_mut() {
        let n: f32 = rng.gen_range(-amplitude..=amplitude);
        *v = (*v + n).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sphere;

    #[test]
    fn orbit_poses_share_radius_and_plane() {
        let poses = circular_orbit_poses(8, 4.0, 0.3);
        for pose in &poses {
            let eye = pose.eye();
            assert!(eye.z.abs() < 1e-12);
            assert!((eye.coords.xy().norm() - 4.0).abs() < 1e-12);
            // camera -z axis points at the origin
            let forward = -pose.camera_to_world().fixed_view::<3, 1>(0, 2).into_owned();
            let to_origin = -eye.coords.normalize();
            assert!((forward - to_origin).norm() < 1e-12);
        }
        assert_eq!(poses[3].file_path().to_str(), Some("images/train_03.png"));
    }

    #[test]
    fn phantom_fills_sphere_voxels() {
        let spheres = SphereCollection::new(vec![Sphere {
            center: [0.0, 0.0, 0.0],
            radius: 0.5,
            rho: 1.0,
        }]);
        let vol = sphere_phantom(&spheres, VolumeGeometry::cube(8), 4.0);
        assert_eq!(vol[[4, 4, 4]], 1.0);
        assert_eq!(vol[[0, 0, 0]], 0.0);
    }

    #[test]
    fn noise_is_seeded_bounded_and_non_negative() {
        let base = Array3::from_elem((4, 5, 6), 0.5f32);
        let mut a = base.clone();
        let mut b = base.clone();
        add_uniform_noise(&mut a, 0.1, 7);
        add_uniform_noise(&mut b, 0.1, 7);
        assert_eq!(a, b);
        assert_ne!(a, base);
        assert!(a.iter().all(|v| (v - 0.5).abs() <= 0.1 + 1e-6));

        let mut low = Array3::from_elem((2, 2, 2), 0.0f32);
        add_uniform_noise(&mut low, 1.0, 3);
        assert!(low.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn invalid_noise_amplitude_is_a_no_op() {
        let base = Array3::from_elem((2, 3, 4), 0.25f32);
        for amplitude in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let mut data = base.clone();
            add_uniform_noise(&mut data, amplitude, 1);
            assert_eq!(data, base);
        }
    }
}
