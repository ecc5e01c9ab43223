use crate::{Pt3, Real};
use serde::{Deserialize, Serialize};

/// Voxel grid of the reconstruction, centred on the rotation axis.
///
/// Arrays over this grid are indexed `[z, y, x]` (slice, row, column) and
/// voxels are one length unit wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    pub cols: usize,
    pub rows: usize,
    pub slices: usize,
}

impl VolumeGeometry {
    /// Cubic grid with `resolution` voxels per side.
    pub fn cube(resolution: usize) -> Self {
        Self {
            cols: resolution,
            rows: resolution,
            slices: resolution,
        }
    }

    /// Array shape `(z, y, x)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.slices, self.rows, self.cols)
    }

    pub fn num_voxels(&self) -> usize {
        self.cols * self.rows * self.slices
    }

    /// Continuous voxel coordinates of a world point: `x` maps to column, etc.
    ///
    /// Voxel `(k, j, i)` has its centre at integer coordinates `(i, j, k)`.
    pub fn world_to_voxel(&self, p: &Pt3) -> [Real; 3] {
        [
            p.x + 0.5 * self.cols as Real - 0.5,
            p.y + 0.5 * self.rows as Real - 0.5,
            p.z + 0.5 * self.slices as Real - 0.5,
        ]
    }

    /// World-space centre of voxel `[z, y, x]`.
    pub fn voxel_center(&self, z: usize, y: usize, x: usize) -> Pt3 {
        Pt3::new(
            x as Real + 0.5 - 0.5 * self.cols as Real,
            y as Real + 0.5 - 0.5 * self.rows as Real,
            z as Real + 0.5 - 0.5 * self.slices as Real,
        )
    }

    /// Axis-aligned bounds `(min, max)` of the grid in world units.
    pub fn bounds(&self) -> (Pt3, Pt3) {
        let half = Pt3::new(
            0.5 * self.cols as Real,
            0.5 * self.rows as Real,
            0.5 * self.slices as Real,
        );
        (Pt3::from(-half.coords), half)
    }
}

/// Per-axis coordinate range `[min, max]` in `(x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent3 {
    pub min: [Real; 3],
    pub max: [Real; 3],
}

impl Extent3 {
    pub fn new(min: [Real; 3], max: [Real; 3]) -> Self {
        Self { min, max }
    }

    pub fn unit_cube() -> Self {
        Self::new([0.0; 3], [1.0; 3])
    }

    pub fn size(&self) -> [Real; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn contains(&self, p: &Pt3) -> bool {
        (0..3).all(|a| p[a] >= self.min[a] && p[a] <= self.max[a])
    }
}

impl Default for Extent3 {
    fn default() -> Self {
        Self::unit_cube()
    }
}
