//! Ray-driven cone-beam projector.
//!
//! Each detector pixel defines a ray from the source through the pixel centre.
//! The ray is clipped to the volume box and sampled at (at most) half-voxel
//! spacing; each sample contributes trilinear weights times the sample length.
//! The back projector scatters with exactly the same weights, so it is the
//! adjoint of the forward projector.

use cbct_core::{AcquisitionGeometry, ConeVectors, Pt3, Real, Vec3, VolumeGeometry};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;

/// Maximum sample spacing along a ray, in voxels.
const SAMPLE_STEP: Real = 0.5;

#[derive(Debug, Clone)]
pub(crate) struct ConeProjector {
    vectors: Vec<ConeVectors>,
    rows: usize,
    cols: usize,
    volume: VolumeGeometry,
}

impl ConeProjector {
    pub(crate) fn new(geometry: &AcquisitionGeometry, volume: VolumeGeometry) -> Self {
        let vectors = (0..geometry.num_frames())
            .filter_map(|i| geometry.cone_vectors(i))
            .collect();
        Self {
            vectors,
            rows: geometry.detector_pixel_count_y(),
            cols: geometry.detector_pixel_count_x(),
            volume,
        }
    }

    pub(crate) fn projection_shape(&self) -> (usize, usize, usize) {
        (self.rows, self.vectors.len(), self.cols)
    }

    pub(crate) fn volume_shape(&self) -> (usize, usize, usize) {
        self.volume.shape()
    }

    /// Visit `(flat voxel index, weight)` pairs along the ray of one pixel.
    fn trace<F: FnMut(usize, f32)>(&self, frame: usize, row: usize, col: usize, mut visit: F) {
        let cv = &self.vectors[frame];
        let pixel = cv.detector_center
            + cv.u * (col as Real + 0.5 - 0.5 * self.cols as Real)
            + cv.v * (row as Real + 0.5 - 0.5 * self.rows as Real);
        let span = pixel - cv.source;
        let length = span.norm();
        if length <= 0.0 {
            return;
        }
        let dir = span / length;
        let Some((t0, t1)) = clip_to_box(&cv.source, &dir, self.volume.bounds(), length) else {
            return;
        };

        let n = ((t1 - t0) / SAMPLE_STEP).ceil().max(1.0) as usize;
        let dt = (t1 - t0) / n as Real;
        let (nz, ny, nx) = self.volume.shape();
        for k in 0..n {
            let p = cv.source + dir * (t0 + (k as Real + 0.5) * dt);
            let [fx, fy, fz] = self.volume.world_to_voxel(&p);
            let (x0, y0, z0) = (fx.floor(), fy.floor(), fz.floor());
            let (tx, ty, tz) = (fx - x0, fy - y0, fz - z0);
            for (dz, wz) in [(0i64, 1.0 - tz), (1, tz)] {
                let z = z0 as i64 + dz;
                if z < 0 || z >= nz as i64 || wz == 0.0 {
                    continue;
                }
                for (dy, wy) in [(0i64, 1.0 - ty), (1, ty)] {
                    let y = y0 as i64 + dy;
                    if y < 0 || y >= ny as i64 || wy == 0.0 {
                        continue;
                    }
                    for (dx, wx) in [(0i64, 1.0 - tx), (1, tx)] {
                        let x = x0 as i64 + dx;
                        if x < 0 || x >= nx as i64 || wx == 0.0 {
                            continue;
                        }
                        let idx = ((z as usize) * ny + y as usize) * nx + x as usize;
                        visit(idx, (wx * wy * wz * dt) as f32);
                    }
                }
            }
        }
    }

    fn forward_frame(&self, volume: &[f32], frame: usize) -> Array2<f32> {
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| {
            let mut acc = 0.0f32;
            self.trace(frame, r, c, |idx, w| acc += w * volume[idx]);
            acc
        })
    }

    /// `A·x`: volume (`[z, y, x]`, standard layout) to projections `[row, frame, col]`.
    pub(crate) fn forward(&self, volume: &[f32]) -> Array3<f32> {
        let frames: Vec<Array2<f32>> = (0..self.vectors.len())
            .into_par_iter()
            .map(|a| self.forward_frame(volume, a))
            .collect();
        let mut out = Array3::<f32>::zeros(self.projection_shape());
        for (a, frame) in frames.iter().enumerate() {
            out.index_axis_mut(Axis(1), a).assign(frame);
        }
        out
    }

    /// `Aᵀ·p`: projections `[row, frame, col]` to a flat `[z, y, x]` volume.
    pub(crate) fn backward(&self, projections: &Array3<f32>) -> Vec<f32> {
        let n = self.volume.num_voxels();
        (0..self.vectors.len())
            .into_par_iter()
            .fold(
                || vec![0.0f32; n],
                |mut acc, a| {
                    for r in 0..self.rows {
                        for c in 0..self.cols {
                            let value = projections[[r, a, c]];
                            if value != 0.0 {
                                self.trace(a, r, c, |idx, w| acc[idx] += w * value);
                            }
                        }
                    }
                    acc
                },
            )
            .reduce(
                || vec![0.0f32; n],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(&b) {
                        *x += *y;
                    }
                    a
                },
            )
    }
}

/// Intersect the segment `origin + t·dir`, `t ∈ [0, max_t]`, with an axis-aligned box.
fn clip_to_box(origin: &Pt3, dir: &Vec3, bounds: (Pt3, Pt3), max_t: Real) -> Option<(Real, Real)> {
    let (lo, hi) = bounds;
    let mut t0: Real = 0.0;
    let mut t1: Real = max_t;
    for a in 0..3 {
        if dir[a].abs() < 1e-12 {
            if origin[a] < lo[a] || origin[a] > hi[a] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / dir[a];
        let (mut ta, mut tb) = ((lo[a] - origin[a]) * inv, (hi[a] - origin[a]) * inv);
        if ta > tb {
            std::mem::swap(&mut ta, &mut tb);
        }
        t0 = t0.max(ta);
        t1 = t1.min(tb);
        if t0 >= t1 {
            return None;
        }
    }
    Some((t0, t1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn small_setup() -> ConeProjector {
        let angles = (0..6).map(|i| i as f64 * PI / 3.0).collect();
        let geometry = AcquisitionGeometry::new((12, 10), (2.0, 2.0), 20.0, 40.0, angles).unwrap();
        ConeProjector::new(&geometry, VolumeGeometry::cube(8))
    }

    #[test]
    fn central_ray_through_uniform_volume_measures_its_length() {
        let geometry =
            AcquisitionGeometry::new((2, 2), (0.01, 0.01), 20.0, 40.0, vec![0.0]).unwrap();
        let p = ConeProjector::new(&geometry, VolumeGeometry::cube(8));
        let ones = vec![1.0f32; 8 * 8 * 8];
        let proj = p.forward(&ones);
        // near-central rays cross the full 8-voxel cube; the outermost half
        // voxel on each side only picks up a partial trilinear weight
        for v in proj.iter() {
            assert!((*v - 7.75).abs() < 0.05, "ray sum {v}");
        }
    }

    #[test]
    fn back_projection_is_adjoint() {
        let p = small_setup();
        let (nz, ny, nx) = p.volume_shape();
        let x: Vec<f32> = (0..nz * ny * nx).map(|i| ((i * 37) % 11) as f32 / 11.0).collect();
        let y = Array3::from_shape_fn(p.projection_shape(), |(r, a, c)| {
            ((r * 7 + a * 3 + c) % 5) as f32 / 5.0
        });
        let ax = p.forward(&x);
        let aty = p.backward(&y);
        let lhs: f64 = ax.iter().zip(y.iter()).map(|(a, b)| (*a as f64) * (*b as f64)).sum();
        let rhs: f64 = x
            .iter()
            .zip(aty.iter())
            .map(|(a, b)| (*a as f64) * (*b as f64))
            .sum();
        assert!((lhs - rhs).abs() <= 1e-3 * lhs.abs().max(1.0), "{lhs} vs {rhs}");
    }

    #[test]
    fn rays_missing_the_volume_contribute_nothing() {
        assert!(clip_to_box(
            &Pt3::new(-10.0, 5.0, 0.0),
            &Vec3::x(),
            (Pt3::new(-1.0, -1.0, -1.0), Pt3::new(1.0, 1.0, 1.0)),
            20.0
        )
        .is_none());
        let (t0, t1) = clip_to_box(
            &Pt3::new(-10.0, 0.0, 0.0),
            &Vec3::x(),
            (Pt3::new(-1.0, -1.0, -1.0), Pt3::new(1.0, 1.0, 1.0)),
            20.0,
        )
        .unwrap();
        assert!((t0 - 9.0).abs() < 1e-12 && (t1 - 11.0).abs() < 1e-12);
    }
}
