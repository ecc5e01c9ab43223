//! Projection Set Loader.
//!
//! Frames are filtered by a [`FrameFilter`], ordered by file name (never by
//! their position in the transforms document), decoded as grayscale,
//! box-filtered by `1 / downscale`, inverted to `1 - v / 255`, flipped upside
//! down and stacked as `[row, frame, col]`.

use crate::transforms::{locate_transforms, FrameRecord, TransformsDocument};
use cbct_core::{CameraPose, ProjectionStack, StackShapeError};
use cbct_geometry::Intrinsics;
use image::ImageReader;
use log::{debug, info};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no transforms*.json found in {0}")]
    NoTransforms(PathBuf),
    #[error("expected exactly one transforms*.json in {dir}, found {found:?}")]
    AmbiguousTransforms { dir: PathBuf, found: Vec<PathBuf> },
    #[error("{0} is neither a directory nor a .json file")]
    InvalidInput(PathBuf),
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame name {stem:?} has no trailing _<index>")]
    BadFrameName { stem: String },
    #[error("no frames selected from {0}")]
    NoFrames(PathBuf),
    #[error("downscale factor must be positive and finite, got {0}")]
    InvalidDownscale(f64),
    #[error("image for frame {frame} not found: {path}")]
    MissingImage { frame: usize, path: PathBuf },
    #[error("failed to decode image for frame {frame}: {path}")]
    Decode {
        frame: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {frame} ({path}) is {got:?} pixels, expected {expected:?}")]
    ShapeMismatch {
        frame: usize,
        path: PathBuf,
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error(transparent)]
    Stack(#[from] StackShapeError),
}

/// Decides which frames of a transforms document are loaded.
///
/// `index` is the frame's position in the document, `stem` its file name
/// without extension.
pub trait FrameFilter {
    fn accept(&self, index: usize, stem: &str) -> Result<bool, LoadError>;
}

impl<F: Fn(usize, &str) -> bool> FrameFilter for F {
    fn accept(&self, index: usize, stem: &str) -> Result<bool, LoadError> {
        Ok(self(index, stem))
    }
}

/// Index-range selection on the number after the last `_` of the file stem.
///
/// Frame `i` is selected iff `imin <= i <= imax` and `(i - imin) % istep == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSelection {
    pub imin: usize,
    pub imax: usize,
    pub istep: usize,
}

impl Default for FrameSelection {
    fn default() -> Self {
        Self {
            imin: 0,
            imax: 1 << 26,
            istep: 1,
        }
    }
}

impl FrameSelection {
    /// Frame number encoded in a stem such as `train_042`.
    pub fn frame_number(stem: &str) -> Option<usize> {
        stem.rsplit('_').next()?.parse().ok()
    }

    pub fn contains(&self, i: usize) -> bool {
        let step = self.istep.max(1);
        i >= self.imin && i <= self.imax && (i - self.imin) % step == 0
    }
}

impl FrameFilter for FrameSelection {
    fn accept(&self, _index: usize, stem: &str) -> Result<bool, LoadError> {
        let i = Self::frame_number(stem).ok_or_else(|| LoadError::BadFrameName {
            stem: stem.to_string(),
        })?;
        Ok(self.contains(i))
    }
}

/// Everything the loader produces, aligned frame by frame.
#[derive(Debug, Clone)]
pub struct LoadedProjections {
    pub stack: ProjectionStack,
    /// Poses in stack order.
    pub poses: Vec<CameraPose>,
    /// Image paths as written in the document, in stack order.
    pub image_filenames: Vec<String>,
    pub intrinsics: Intrinsics,
    pub document: PathBuf,
}

/// Load and stack the selected frames of the transforms document at `input`.
pub fn load_projections<F: FrameFilter + ?Sized>(
    input: &Path,
    filter: &F,
    downscale: f64,
) -> Result<LoadedProjections, LoadError> {
    if !(downscale > 0.0) || !downscale.is_finite() {
        return Err(LoadError::InvalidDownscale(downscale));
    }
    let location = locate_transforms(input)?;
    let doc = TransformsDocument::load(&location.document)?;

    let selected = select_frames(&doc.frames, filter)?;
    if selected.is_empty() {
        return Err(LoadError::NoFrames(location.document));
    }
    info!(
        "loading {} of {} images from {}",
        selected.len(),
        doc.frames.len(),
        location.base_dir.display()
    );

    let mut images = Vec::with_capacity(selected.len());
    let mut expected = None;
    for (frame, record) in &selected {
        let path = location.base_dir.join(&record.file_path);
        let image = load_projection_image(*frame, &path, &mut expected, downscale)?;
        debug!("frame {frame}: {}", path.display());
        images.push(image);
    }

    Ok(LoadedProjections {
        stack: ProjectionStack::from_frames(&images)?,
        poses: selected.iter().map(|(_, r)| r.pose()).collect(),
        image_filenames: selected.iter().map(|(_, r)| r.file_path.clone()).collect(),
        intrinsics: doc.intrinsics,
        document: location.document,
    })
}

/// Filtered frames with their document index, sorted by file path.
pub fn select_frames<'a, F: FrameFilter + ?Sized>(
    frames: &'a [FrameRecord],
    filter: &F,
) -> Result<Vec<(usize, &'a FrameRecord)>, LoadError> {
    let mut selected = Vec::new();
    for (i, record) in frames.iter().enumerate() {
        if filter.accept(i, record.stem())? {
            selected.push((i, record));
        }
    }
    selected.sort_by(|a, b| a.1.file_path.cmp(&b.1.file_path));
    Ok(selected)
}

fn load_projection_image(
    frame: usize,
    path: &Path,
    expected: &mut Option<(u32, u32)>,
    downscale: f64,
) -> Result<Array2<f32>, LoadError> {
    if !path.is_file() {
        return Err(LoadError::MissingImage {
            frame,
            path: path.to_path_buf(),
        });
    }
    let decode_err = |source| LoadError::Decode {
        frame,
        path: path.to_path_buf(),
        source,
    };
    let gray = ImageReader::open(path)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(decode_err)?
        .into_luma8();

    let got = gray.dimensions();
    match *expected {
        None => *expected = Some(got),
        Some(e) if e != got => {
            return Err(LoadError::ShapeMismatch {
                frame,
                path: path.to_path_buf(),
                expected: e,
                got,
            })
        }
        Some(_) => {}
    }

    let (w, h) = (got.0 as usize, got.1 as usize);
    let inverted = Array2::from_shape_fn((h, w), |(r, c)| {
        1.0 - gray.get_pixel(c as u32, r as u32).0[0] as f32 / 255.0
    });
    let resized = if downscale == 1.0 {
        inverted
    } else {
        let out_h = scaled_len(h, downscale);
        let out_w = scaled_len(w, downscale);
        resize_area(&inverted, out_h, out_w)
    };
    Ok(resized.slice(s![..;-1, ..]).to_owned())
}

/// Output length for `1 / downscale` resizing; matches the detector pixel count.
pub fn scaled_len(n: usize, downscale: f64) -> usize {
    ((n as f64 / downscale).floor() as usize).max(1)
}

/// Box-filter resize: each output pixel averages the exact (fractional)
/// footprint it covers in the input.
pub fn resize_area(input: &Array2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (in_h, in_w) = input.dim();
    let wy = area_weights(in_h, out_h);
    let wx = area_weights(in_w, out_w);

    let mut rows = Array2::<f32>::zeros((out_h, in_w));
    for (o, taps) in wy.iter().enumerate() {
        for &(i, w) in taps {
            rows.row_mut(o).scaled_add(w, &input.row(i));
        }
    }
    let mut out = Array2::<f32>::zeros((out_h, out_w));
    for (o, taps) in wx.iter().enumerate() {
        for &(i, w) in taps {
            out.column_mut(o).scaled_add(w, &rows.column(i));
        }
    }
    out
}

/// Per output index, the input indices it overlaps and normalised weights.
fn area_weights(n_in: usize, n_out: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = n_in as f64 / n_out as f64;
    (0..n_out)
        .map(|o| {
            let lo = o as f64 * scale;
            let hi = (o + 1) as f64 * scale;
            let first = lo.floor() as usize;
            let last = (hi.ceil() as usize).min(n_in);
            (first..last)
                .filter_map(|i| {
                    let overlap = (hi.min((i + 1) as f64) - lo.max(i as f64)).max(0.0);
                    (overlap > 0.0).then(|| (i, (overlap / scale) as f32))
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_selection_uses_trailing_number() {
        let sel = FrameSelection {
            imin: 2,
            imax: 8,
            istep: 3,
        };
        let picked: Vec<usize> = (0..12).filter(|i| sel.contains(*i)).collect();
        assert_eq!(picked, vec![2, 5, 8]);
        assert_eq!(FrameSelection::frame_number("r_train_007"), Some(7));
        assert!(sel.accept(0, "train_05").unwrap());
        assert!(!sel.accept(0, "train_06").unwrap());
        assert!(matches!(
            sel.accept(0, "train"),
            Err(LoadError::BadFrameName { .. })
        ));
    }

    #[test]
    fn closures_are_filters() {
        let only_even = |i: usize, _: &str| i % 2 == 0;
        assert!(only_even.accept(4, "x").unwrap());
        assert!(!only_even.accept(3, "x").unwrap());
    }

    #[test]
    fn integer_area_resize_averages_blocks() {
        let input = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let out = resize_area(&input, 2, 2);
        assert_eq!(out.dim(), (2, 2));
        assert!((out[[0, 0]] - 2.5).abs() < 1e-6);
        assert!((out[[1, 1]] - 12.5).abs() < 1e-6);
    }

    #[test]
    fn fractional_area_resize_preserves_mean() {
        let input = Array2::from_shape_fn((5, 7), |(r, c)| ((r * 7 + c) % 4) as f32);
        let out = resize_area(&input, 2, 3);
        let mean_in = input.mean().unwrap();
        let mean_out = out.mean().unwrap();
        assert!((mean_in - mean_out).abs() < 1e-5, "{mean_in} vs {mean_out}");
    }

    #[test]
    fn scaled_len_floors() {
        assert_eq!(scaled_len(800, 3.0), 266);
        assert_eq!(scaled_len(2, 4.0), 1);
    }
}
