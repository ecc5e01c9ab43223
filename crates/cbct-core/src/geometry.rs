//! Circular-orbit cone-beam acquisition geometry.
//!
//! Lengths are in volume units (one unit per voxel once the length scale has
//! been applied). The rotation axis is the volume `z` axis through the origin.

use crate::{Pt3, Real, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidGeometry {
    #[error("detector pixel count must be positive, got {x}x{y}")]
    EmptyDetector { x: usize, y: usize },
    #[error("detector pixel size must be positive, got {x}x{y}")]
    NonPositivePixelSize { x: Real, y: Real },
    #[error("source-to-object distance must be positive, got {0}")]
    NonPositiveSourceDistance(Real),
    #[error("source-to-detector distance {sdd} must exceed source-to-object distance {sod}")]
    DetectorInsideOrbit { sod: Real, sdd: Real },
    #[error("need at least one projection angle")]
    NoAngles,
}

/// Derived, immutable description of one circular cone-beam scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeometry")]
pub struct AcquisitionGeometry {
    detector_pixel_count_x: usize,
    detector_pixel_count_y: usize,
    detector_pixel_size_x: Real,
    detector_pixel_size_y: Real,
    source_to_object_distance: Real,
    source_to_detector_distance: Real,
    projection_angles: Vec<Real>,
}

#[derive(Deserialize)]
struct RawGeometry {
    detector_pixel_count_x: usize,
    detector_pixel_count_y: usize,
    detector_pixel_size_x: Real,
    detector_pixel_size_y: Real,
    source_to_object_distance: Real,
    source_to_detector_distance: Real,
    projection_angles: Vec<Real>,
}

impl TryFrom<RawGeometry> for AcquisitionGeometry {
    type Error = InvalidGeometry;

    fn try_from(raw: RawGeometry) -> Result<Self, Self::Error> {
        AcquisitionGeometry::new(
            (raw.detector_pixel_count_x, raw.detector_pixel_count_y),
            (raw.detector_pixel_size_x, raw.detector_pixel_size_y),
            raw.source_to_object_distance,
            raw.source_to_detector_distance,
            raw.projection_angles,
        )
    }
}

/// Per-frame source and detector placement, as used by ray-driven projectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeVectors {
    pub source: Pt3,
    /// Centre of the detector plane.
    pub detector_center: Pt3,
    /// Step of one detector column.
    pub u: Vec3,
    /// Step of one detector row.
    pub v: Vec3,
}

impl AcquisitionGeometry {
    pub fn new(
        pixel_count: (usize, usize),
        pixel_size: (Real, Real),
        source_to_object_distance: Real,
        source_to_detector_distance: Real,
        projection_angles: Vec<Real>,
    ) -> Result<Self, InvalidGeometry> {
        let (nx, ny) = pixel_count;
        let (sx, sy) = pixel_size;
        if nx == 0 || ny == 0 {
            return Err(InvalidGeometry::EmptyDetector { x: nx, y: ny });
        }
        if !(sx > 0.0 && sy > 0.0) {
            return Err(InvalidGeometry::NonPositivePixelSize { x: sx, y: sy });
        }
        if !(source_to_object_distance > 0.0) {
            return Err(InvalidGeometry::NonPositiveSourceDistance(
                source_to_object_distance,
            ));
        }
        if !(source_to_detector_distance > source_to_object_distance) {
            return Err(InvalidGeometry::DetectorInsideOrbit {
                sod: source_to_object_distance,
                sdd: source_to_detector_distance,
            });
        }
        if projection_angles.is_empty() {
            return Err(InvalidGeometry::NoAngles);
        }
        Ok(Self {
            detector_pixel_count_x: nx,
            detector_pixel_count_y: ny,
            detector_pixel_size_x: sx,
            detector_pixel_size_y: sy,
            source_to_object_distance,
            source_to_detector_distance,
            projection_angles,
        })
    }

    /// Detector columns.
    pub fn detector_pixel_count_x(&self) -> usize {
        self.detector_pixel_count_x
    }

    /// Detector rows.
    pub fn detector_pixel_count_y(&self) -> usize {
        self.detector_pixel_count_y
    }

    pub fn detector_pixel_size_x(&self) -> Real {
        self.detector_pixel_size_x
    }

    pub fn detector_pixel_size_y(&self) -> Real {
        self.detector_pixel_size_y
    }

    pub fn source_to_object_distance(&self) -> Real {
        self.source_to_object_distance
    }

    pub fn source_to_detector_distance(&self) -> Real {
        self.source_to_detector_distance
    }

    /// Distance from the rotation axis to the detector plane.
    pub fn object_to_detector_distance(&self) -> Real {
        self.source_to_detector_distance - self.source_to_object_distance
    }

    pub fn projection_angles(&self) -> &[Real] {
        &self.projection_angles
    }

    pub fn num_frames(&self) -> usize {
        self.projection_angles.len()
    }

    /// Expected projection stack shape `[rows, frames, cols]`.
    pub fn projection_shape(&self) -> [usize; 3] {
        [
            self.detector_pixel_count_y,
            self.num_frames(),
            self.detector_pixel_count_x,
        ]
    }

    /// Source/detector placement of frame `index`.
    ///
    /// The source orbits at `(sin θ, -cos θ, 0)·d_so`; the detector faces it from
    /// the opposite side. Returns `None` for an out-of-range index.
    pub fn cone_vectors(&self, index: usize) -> Option<ConeVectors> {
        let theta = *self.projection_angles.get(index)?;
        let (s, c) = theta.sin_cos();
        let d_so = self.source_to_object_distance;
        let d_od = self.object_to_detector_distance();
        Some(ConeVectors {
            source: Pt3::new(s * d_so, -c * d_so, 0.0),
            detector_center: Pt3::new(-s * d_od, c * d_od, 0.0),
            u: Vec3::new(c * self.detector_pixel_size_x, s * self.detector_pixel_size_x, 0.0),
            v: Vec3::new(0.0, 0.0, self.detector_pixel_size_y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn sample() -> AcquisitionGeometry {
        AcquisitionGeometry::new((64, 48), (2.0, 2.0), 100.0, 200.0, vec![0.0, FRAC_PI_2])
            .unwrap()
    }

    #[test]
    fn rejects_detector_inside_orbit() {
        let err = AcquisitionGeometry::new((4, 4), (1.0, 1.0), 10.0, 10.0, vec![0.0]);
        assert!(matches!(err, Err(InvalidGeometry::DetectorInsideOrbit { .. })));
    }

    #[test]
    fn projection_shape_is_rows_frames_cols() {
        assert_eq!(sample().projection_shape(), [48, 2, 64]);
    }

    #[test]
    fn cone_vectors_face_each_other_through_axis() {
        let g = sample();
        for i in 0..g.num_frames() {
            let cv = g.cone_vectors(i).unwrap();
            let dist = (cv.detector_center - cv.source).norm();
            assert!((dist - 200.0).abs() < 1e-9);
            // detector u axis is perpendicular to the central ray
            let ray = cv.detector_center - cv.source;
            assert!(ray.dot(&cv.u).abs() < 1e-9);
        }
        assert!(g.cone_vectors(2).is_none());
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{
            "detector_pixel_count_x": 0, "detector_pixel_count_y": 4,
            "detector_pixel_size_x": 1.0, "detector_pixel_size_y": 1.0,
            "source_to_object_distance": 1.0, "source_to_detector_distance": 2.0,
            "projection_angles": [0.0]
        }"#;
        assert!(serde_json::from_str::<AcquisitionGeometry>(json).is_err());

        let g = sample();
        let back: AcquisitionGeometry =
            serde_json::from_str(&serde_json::to_string(&g).unwrap()).unwrap();
        assert_eq!(back, g);
    }
}
