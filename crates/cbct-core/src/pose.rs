use crate::{transform_point_h, Mat4, Pt3, Real};
use std::path::{Path, PathBuf};

/// Camera-to-world transform of one acquisition frame.
///
/// Immutable once loaded: the matrix, the image it belongs to and its
/// acquisition time label are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    camera_to_world: Mat4,
    file_path: PathBuf,
    time: Real,
}

impl CameraPose {
    pub fn new(camera_to_world: Mat4, file_path: impl Into<PathBuf>) -> Self {
        Self {
            camera_to_world,
            file_path: file_path.into(),
            time: 0.0,
        }
    }

    /// Build a pose from a row-major nested array as stored in transforms documents.
    pub fn from_rows(rows: &[[Real; 4]; 4], file_path: impl Into<PathBuf>) -> Self {
        let m = Mat4::from_fn(|r, c| rows[r][c]);
        Self::new(m, file_path)
    }

    pub fn with_time(mut self, time: Real) -> Self {
        self.time = time;
        self
    }

    pub fn camera_to_world(&self) -> &Mat4 {
        &self.camera_to_world
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn time(&self) -> Real {
        self.time
    }

    /// Camera centre in world coordinates (the image of the camera-space origin).
    pub fn eye(&self) -> Pt3 {
        transform_point_h(&self.camera_to_world, &Pt3::origin())
    }

    /// Row-major nested representation, the inverse of [`CameraPose::from_rows`].
    pub fn to_rows(&self) -> [[Real; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.camera_to_world[(r, c)];
            }
        }
        rows
    }
}
