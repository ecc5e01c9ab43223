//! Density fields that can be sampled at arbitrary points.
//!
//! Two variants share the single `density(points)` capability:
//! - [`VoxelGrid`]: dense `[z, y, x]` array spanning an explicit extent,
//! - [`SphereCollection`]: analytic union of constant-density spheres.

use crate::{Extent3, Pt3, Real};
use log::{debug, warn};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DensityFieldError {
    #[error("voxel grid must have at least one voxel per axis, got {0:?}")]
    EmptyGrid([usize; 3]),
    #[error("extent must have positive size on every axis, got {0:?}")]
    DegenerateExtent(Extent3),
    #[error("failed to parse object collection YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse object collection JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A field queryable at batches of 3D points.
#[derive(Debug, Clone)]
pub enum DensityField {
    VoxelGrid(VoxelGrid),
    Spheres(SphereCollection),
}

impl DensityField {
    /// Density at every point, in input order.
    pub fn density(&self, points: &[Pt3]) -> Vec<Real> {
        match self {
            DensityField::VoxelGrid(grid) => points.iter().map(|p| grid.sample(p)).collect(),
            DensityField::Spheres(spheres) => points.iter().map(|p| spheres.sample(p)).collect(),
        }
    }
}

impl From<VoxelGrid> for DensityField {
    fn from(grid: VoxelGrid) -> Self {
        DensityField::VoxelGrid(grid)
    }
}

impl From<SphereCollection> for DensityField {
    fn from(spheres: SphereCollection) -> Self {
        DensityField::Spheres(spheres)
    }
}

/// Dense voxel grid indexed `[z, y, x]`.
///
/// Corner voxels sit exactly on the extent bounds (`align_corners` sampling),
/// so an `N`-point regular grid over the extent hits voxel centres exactly.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    data: Array3<f32>,
    extent: Extent3,
}

impl VoxelGrid {
    pub fn new(data: Array3<f32>, extent: Extent3) -> Result<Self, DensityFieldError> {
        let (nz, ny, nx) = data.dim();
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(DensityFieldError::EmptyGrid([nz, ny, nx]));
        }
        if extent.size().iter().any(|s| !(*s > 0.0)) {
            return Err(DensityFieldError::DegenerateExtent(extent));
        }
        Ok(Self { data, extent })
    }

    /// Grid over the unit cube.
    pub fn unit(data: Array3<f32>) -> Result<Self, DensityFieldError> {
        Self::new(data, Extent3::unit_cube())
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn extent(&self) -> &Extent3 {
        &self.extent
    }

    /// Trilinear sample; zero outside the extent.
    pub fn sample(&self, p: &Pt3) -> Real {
        if !self.extent.contains(p) {
            return 0.0;
        }
        let (nz, ny, nx) = self.data.dim();
        let size = self.extent.size();
        let to_index = |axis: usize, n: usize| -> Real {
            (p[axis] - self.extent.min[axis]) / size[axis] * (n - 1) as Real
        };
        let fx = to_index(0, nx);
        let fy = to_index(1, ny);
        let fz = to_index(2, nz);

        let split = |f: Real, n: usize| -> (usize, usize, Real) {
            let i0 = (f.floor() as usize).min(n - 1);
            let i1 = (i0 + 1).min(n - 1);
            (i0, i1, f - i0 as Real)
        };
        let (x0, x1, tx) = split(fx, nx);
        let (y0, y1, ty) = split(fy, ny);
        let (z0, z1, tz) = split(fz, nz);

        let at = |z: usize, y: usize, x: usize| self.data[[z, y, x]] as Real;
        let lerp = |a: Real, b: Real, t: Real| a + (b - a) * t;

        let c00 = lerp(at(z0, y0, x0), at(z0, y0, x1), tx);
        let c01 = lerp(at(z0, y1, x0), at(z0, y1, x1), tx);
        let c10 = lerp(at(z1, y0, x0), at(z1, y0, x1), tx);
        let c11 = lerp(at(z1, y1, x0), at(z1, y1, x1), tx);
        lerp(lerp(c00, c01, ty), lerp(c10, c11, ty), tz)
    }
}

/// Constant-density sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub center: [Real; 3],
    pub radius: Real,
    #[serde(default = "default_rho")]
    pub rho: Real,
}

fn default_rho() -> Real {
    1.0
}

impl Sphere {
    pub fn contains(&self, p: &Pt3) -> bool {
        let c = Pt3::from(self.center);
        (p - c).norm_squared() <= self.radius * self.radius
    }
}

/// Object description documents: `{type: object_collection, objects: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneObject {
    Sphere(Sphere),
    ObjectCollection { objects: Vec<SceneObject> },
}

impl SceneObject {
    fn collect_spheres(&self, out: &mut Vec<Sphere>) {
        match self {
            SceneObject::Sphere(s) => out.push(*s),
            SceneObject::ObjectCollection { objects } => {
                for obj in objects {
                    obj.collect_spheres(out);
                }
            }
        }
    }
}

/// Union of spheres; overlapping spheres add their densities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SphereCollection {
    spheres: Vec<Sphere>,
}

impl SphereCollection {
    pub fn new(spheres: Vec<Sphere>) -> Self {
        Self { spheres }
    }

    pub fn spheres(&self) -> &[Sphere] {
        &self.spheres
    }

    pub fn from_object(object: &SceneObject) -> Self {
        let mut spheres = Vec::new();
        object.collect_spheres(&mut spheres);
        if spheres.is_empty() {
            warn!("object collection has no spheres; density is zero everywhere");
        } else {
            debug!("object collection with {} spheres", spheres.len());
        }
        Self { spheres }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, DensityFieldError> {
        let object: SceneObject = serde_yaml::from_str(s)?;
        Ok(Self::from_object(&object))
    }

    pub fn from_json_str(s: &str) -> Result<Self, DensityFieldError> {
        let object: SceneObject = serde_json::from_str(s)?;
        Ok(Self::from_object(&object))
    }

    pub fn to_object(&self) -> SceneObject {
        SceneObject::ObjectCollection {
            objects: self.spheres.iter().copied().map(SceneObject::Sphere).collect(),
        }
    }

    pub fn sample(&self, p: &Pt3) -> Real {
        self.spheres
            .iter()
            .filter(|s| s.contains(p))
            .map(|s| s.rho)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_grid_hits_voxel_values_at_aligned_points() {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (100 * z + 10 * y + x) as f32);
        let grid = VoxelGrid::unit(data).unwrap();
        let p = Pt3::new(1.0 / 3.0, 0.5, 1.0);
        assert!((grid.sample(&p) - 111.0).abs() < 1e-9);
        // halfway between x=1 and x=2
        let q = Pt3::new(0.5, 0.0, 0.0);
        assert!((grid.sample(&q) - 1.5).abs() < 1e-9);
        assert_eq!(grid.sample(&Pt3::new(1.5, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn spheres_parse_from_yaml_and_overlap_additively() {
        let yaml = "\
type: object_collection
objects:
- type: sphere
  center: [0.0, 0.0, 0.0]
  radius: 0.5
  rho: 1.0
- type: sphere
  center: [0.25, 0.0, 0.0]
  radius: 0.5
  rho: 2.0
";
        let spheres = SphereCollection::from_yaml_str(yaml).unwrap();
        assert_eq!(spheres.spheres().len(), 2);
        let field = DensityField::from(spheres);
        let d = field.density(&[
            Pt3::new(0.1, 0.0, 0.0),
            Pt3::new(-0.4, 0.0, 0.0),
            Pt3::new(2.0, 0.0, 0.0),
        ]);
        assert_eq!(d, vec![3.0, 1.0, 0.0]);
    }

    #[test]
    fn scene_object_json_round_trip() {
        let spheres = SphereCollection::new(vec![Sphere {
            center: [0.5, -0.5, 0.5],
            radius: 0.15,
            rho: 1.0,
        }]);
        let json = serde_json::to_string(&spheres.to_object()).unwrap();
        assert!(json.contains("object_collection"));
        let back = SphereCollection::from_json_str(&json).unwrap();
        assert_eq!(back, spheres);
    }

    #[test]
    fn empty_and_nested_collections_flatten() {
        let empty = SphereCollection::from_yaml_str("type: object_collection\nobjects: []\n").unwrap();
        assert!(empty.spheres().is_empty());
        assert_eq!(empty.sample(&Pt3::origin()), 0.0);

        let nested = r#"{"type": "object_collection", "objects": [
            {"type": "object_collection", "objects": [
                {"type": "sphere", "center": [0, 0, 0], "radius": 1.0, "rho": 0.5}
            ]}
        ]}"#;
        let spheres = SphereCollection::from_json_str(nested).unwrap();
        assert_eq!(spheres.spheres().len(), 1);
        assert_eq!(spheres.sample(&Pt3::origin()), 0.5);
    }
}
