//! Transforms documents: intrinsics plus one camera pose per frame.
//!
//! ```json
//! {
//!   "fl_x": 1111.0, "fl_y": 1111.0, "w": 800, "h": 800,
//!   "frames": [
//!     { "file_path": "images/train_00.png", "transform_matrix": [[...], ...], "time": 0.0 }
//!   ]
//! }
//! ```

use crate::loader::LoadError;
use cbct_core::{CameraPose, Real};
use cbct_geometry::Intrinsics;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Image path relative to the document's directory.
    pub file_path: String,
    /// Camera-to-world transform, row major.
    pub transform_matrix: [[Real; 4]; 4],
    #[serde(default)]
    pub time: Real,
}

impl FrameRecord {
    pub fn pose(&self) -> CameraPose {
        CameraPose::from_rows(&self.transform_matrix, &self.file_path).with_time(self.time)
    }

    /// File name without directory and extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.file_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformsDocument {
    #[serde(flatten)]
    pub intrinsics: Intrinsics,
    pub frames: Vec<FrameRecord>,
}

impl TransformsDocument {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A located transforms document and the directory its image paths are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformsLocation {
    pub document: PathBuf,
    pub base_dir: PathBuf,
}

/// Find the transforms document for `input`.
///
/// A directory must contain exactly one `transforms*.json`; a path with a
/// `.json` extension is used as is.
pub fn locate_transforms(input: &Path) -> Result<TransformsLocation, LoadError> {
    if input.is_dir() {
        let entries = fs::read_dir(input).map_err(|source| LoadError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension().is_some_and(|e| e == "json")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("transforms"))
            })
            .collect();
        found.sort();
        return match found.len() {
            1 => Ok(TransformsLocation {
                document: found.remove(0),
                base_dir: input.to_path_buf(),
            }),
            0 => Err(LoadError::NoTransforms(input.to_path_buf())),
            _ => Err(LoadError::AmbiguousTransforms {
                dir: input.to_path_buf(),
                found,
            }),
        };
    }
    if input.extension().is_some_and(|e| e == "json") {
        let base_dir = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        return Ok(TransformsLocation {
            document: input.to_path_buf(),
            base_dir,
        });
    }
    Err(LoadError::InvalidInput(input.to_path_buf()))
}
