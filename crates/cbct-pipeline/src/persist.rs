//! On-disk artefacts of a run and readers for evaluation inputs.
//!
//! - `config.json`: geometry and provenance ([`GeometryRecord`]).
//! - `vol_zyx.raw`: little-endian `f32`, canonical volume with axes 0 and 2 swapped.
//! - `vol_zyx.npy`: the same array as NumPy `.npy` (v1.0, `<f4`, C order).
//! - `slice.png`, `projection.png`: quick-look images.
//! - `convergence.json`: residual per check.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use cbct_core::{
    AcquisitionGeometry, DensityField, DensityFieldError, InvalidGeometry, ProjectionStack, Real,
    SphereCollection, VoxelGrid,
};
use cbct_recon::{SolveState, StopReason};
use image::{GrayImage, Luma};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write image {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{path}: {reason}")]
    Npy { path: PathBuf, reason: String },
    #[error("{path} holds {got} values, expected {expected}")]
    Size {
        path: PathBuf,
        expected: usize,
        got: usize,
    },
    #[error("{path}: {reason}")]
    Input { path: PathBuf, reason: String },
    #[error("invalid density field in {path}")]
    Density {
        path: PathBuf,
        #[source]
        source: DensityFieldError,
    },
    #[error(transparent)]
    Geometry(#[from] InvalidGeometry),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `config.json`: the acquisition geometry in ASTRA `cone` naming plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "DetectorSpacingX")]
    pub detector_spacing_x: Real,
    #[serde(rename = "DetectorSpacingY")]
    pub detector_spacing_y: Real,
    #[serde(rename = "DetectorRowCount")]
    pub detector_row_count: usize,
    #[serde(rename = "DetectorColCount")]
    pub detector_col_count: usize,
    #[serde(rename = "ProjectionAngles")]
    pub projection_angles: Vec<Real>,
    #[serde(rename = "DistanceOriginSource")]
    pub distance_origin_source: Real,
    #[serde(rename = "DistanceOriginDetector")]
    pub distance_origin_detector: Real,
    pub image_filenames: Vec<String>,
    pub algorithm: String,
}

impl GeometryRecord {
    pub fn new(
        geometry: &AcquisitionGeometry,
        image_filenames: Vec<String>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            kind: "cone".to_string(),
            detector_spacing_x: geometry.detector_pixel_size_x(),
            detector_spacing_y: geometry.detector_pixel_size_y(),
            detector_row_count: geometry.detector_pixel_count_y(),
            detector_col_count: geometry.detector_pixel_count_x(),
            projection_angles: geometry.projection_angles().to_vec(),
            distance_origin_source: geometry.source_to_object_distance(),
            distance_origin_detector: geometry.object_to_detector_distance(),
            image_filenames,
            algorithm: algorithm.into(),
        }
    }

    pub fn to_geometry(&self) -> Result<AcquisitionGeometry, InvalidGeometry> {
        AcquisitionGeometry::new(
            (self.detector_col_count, self.detector_row_count),
            (self.detector_spacing_x, self.detector_spacing_y),
            self.distance_origin_source,
            self.distance_origin_source + self.distance_origin_detector,
            self.projection_angles.clone(),
        )
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err(path))
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&text).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// `convergence.json` contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub iterations: Vec<usize>,
    pub residuals: Vec<f64>,
    pub stop_reason: StopReason,
    pub converged: bool,
}

impl ConvergenceRecord {
    pub fn from_state(state: &SolveState, steps_per_check: usize) -> Self {
        let (iterations, residuals) = state.convergence_curve(steps_per_check).into_iter().unzip();
        Self {
            iterations,
            residuals,
            stop_reason: state.stop_reason,
            converged: state.converged,
        }
    }
}

/// Swap axes 0 and 2 of a canonical volume, giving the `vol_zyx` layout.
pub fn canonical_to_zyx(canonical: &Array3<f32>) -> Array3<f32> {
    let mut v = canonical.view();
    v.swap_axes(0, 2);
    v.as_standard_layout().into_owned()
}

/// Flat little-endian `f32` dump in C order.
pub fn write_raw_f32(path: &Path, volume: &Array3<f32>) -> Result<(), PersistError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut w = BufWriter::new(file);
    for v in volume.iter() {
        w.write_f32::<LittleEndian>(*v).map_err(io_err(path))?;
    }
    w.flush().map_err(io_err(path))
}

/// Element type of a headerless raw volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawDtype {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl RawDtype {
    pub const ALL: [RawDtype; 10] = [
        RawDtype::U8,
        RawDtype::U16,
        RawDtype::U32,
        RawDtype::U64,
        RawDtype::I8,
        RawDtype::I16,
        RawDtype::I32,
        RawDtype::I64,
        RawDtype::F32,
        RawDtype::F64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RawDtype::U8 => "u8",
            RawDtype::U16 => "u16",
            RawDtype::U32 => "u32",
            RawDtype::U64 => "u64",
            RawDtype::I8 => "i8",
            RawDtype::I16 => "i16",
            RawDtype::I32 => "i32",
            RawDtype::I64 => "i64",
            RawDtype::F32 => "f32",
            RawDtype::F64 => "f64",
        }
    }

    pub fn size(&self) -> usize {
        match self {
            RawDtype::U8 | RawDtype::I8 => 1,
            RawDtype::U16 | RawDtype::I16 => 2,
            RawDtype::U32 | RawDtype::I32 | RawDtype::F32 => 4,
            RawDtype::U64 | RawDtype::I64 | RawDtype::F64 => 8,
        }
    }

    fn read_one<R: Read>(&self, r: &mut R) -> io::Result<f32> {
        Ok(match self {
            RawDtype::U8 => r.read_u8()? as f32,
            RawDtype::U16 => r.read_u16::<LittleEndian>()? as f32,
            RawDtype::U32 => r.read_u32::<LittleEndian>()? as f32,
            RawDtype::U64 => r.read_u64::<LittleEndian>()? as f32,
            RawDtype::I8 => r.read_i8()? as f32,
            RawDtype::I16 => r.read_i16::<LittleEndian>()? as f32,
            RawDtype::I32 => r.read_i32::<LittleEndian>()? as f32,
            RawDtype::I64 => r.read_i64::<LittleEndian>()? as f32,
            RawDtype::F32 => r.read_f32::<LittleEndian>()?,
            RawDtype::F64 => r.read_f64::<LittleEndian>()? as f32,
        })
    }
}

impl fmt::Display for RawDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RawDtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let alias = match lower.as_str() {
            "uint8" => "u8",
            "uint16" => "u16",
            "uint32" => "u32",
            "uint64" => "u64",
            "int8" => "i8",
            "int16" => "i16",
            "int32" => "i32",
            "int64" => "i64",
            "float32" => "f32",
            "float64" => "f64",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|d| d.name() == alias)
            .ok_or_else(|| format!("unknown dtype {s:?}"))
    }
}

/// Read an `N×N×N` headerless little-endian volume, indexed `[z, y, x]`.
pub fn read_raw_volume(
    path: &Path,
    resolution: usize,
    dtype: RawDtype,
) -> Result<Array3<f32>, PersistError> {
    let expected = resolution.pow(3);
    let len = fs::metadata(path).map_err(io_err(path))?.len() as usize;
    if len != expected * dtype.size() {
        return Err(PersistError::Size {
            path: path.to_path_buf(),
            expected,
            got: len / dtype.size(),
        });
    }
    let mut r = BufReader::new(File::open(path).map_err(io_err(path))?);
    let mut values = Vec::with_capacity(expected);
    for _ in 0..expected {
        values.push(dtype.read_one(&mut r).map_err(io_err(path))?);
    }
    Array3::from_shape_vec((resolution, resolution, resolution), values).map_err(|e| {
        PersistError::Input {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Write a C-order `<f4` array as `.npy` version 1.0.
pub fn write_npy(path: &Path, volume: &Array3<f32>) -> Result<(), PersistError> {
    let (a, b, c) = volume.dim();
    let mut header =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({a}, {b}, {c}), }}");
    // magic(6) + version(2) + length(2) + header, padded to 64 bytes with '\n' last
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let file = File::create(path).map_err(io_err(path))?;
    let mut w = BufWriter::new(file);
    let write = |w: &mut BufWriter<File>| -> io::Result<()> {
        w.write_all(NPY_MAGIC)?;
        w.write_all(&[1, 0])?;
        w.write_u16::<LittleEndian>(header.len() as u16)?;
        w.write_all(header.as_bytes())?;
        for v in volume.iter() {
            w.write_f32::<LittleEndian>(*v)?;
        }
        w.flush()
    };
    write(&mut w).map_err(io_err(path))
}

/// Read a 3D `<f4` or `<f8` `.npy` array as `f32`.
pub fn read_npy(path: &Path) -> Result<Array3<f32>, PersistError> {
    let npy_err = |reason: String| PersistError::Npy {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = fs::read(path).map_err(io_err(path))?;
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(npy_err("not a .npy file".into()));
    }
    let (header_len, offset) = match bytes[6] {
        1 => ((&bytes[8..10]).read_u16::<LittleEndian>().map_err(io_err(path))? as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            (&bytes[8..12]).read_u32::<LittleEndian>().map_err(io_err(path))? as usize,
            12,
        ),
        v => return Err(npy_err(format!("unsupported .npy version {v}"))),
    };
    let body = offset + header_len;
    let header = bytes
        .get(offset..body)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| npy_err("truncated header".into()))?;
    let header = NpyHeader::parse(header).map_err(npy_err)?;
    let [a, b, c] = match header.shape.as_slice() {
        [a, b, c] => [*a, *b, *c],
        other => return Err(npy_err(format!("expected a 3D array, got shape {other:?}"))),
    };
    let count = a * b * c;
    let width = match header.descr.as_str() {
        "<f4" => 4,
        "<f8" => 8,
        other => return Err(npy_err(format!("unsupported dtype {other}"))),
    };
    let data = bytes.get(body..).unwrap_or_default();
    if data.len() < count * width {
        return Err(PersistError::Size {
            path: path.to_path_buf(),
            expected: count,
            got: data.len() / width,
        });
    }
    let mut r = data;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let v = if width == 4 {
            r.read_f32::<LittleEndian>()
        } else {
            r.read_f64::<LittleEndian>().map(|v| v as f32)
        };
        values.push(v.map_err(io_err(path))?);
    }
    let shape_err = |e: ndarray::ShapeError| npy_err(e.to_string());
    if header.fortran_order {
        let arr = Array3::from_shape_vec((c, b, a), values).map_err(shape_err)?;
        Ok(arr.reversed_axes().as_standard_layout().into_owned())
    } else {
        Array3::from_shape_vec((a, b, c), values).map_err(shape_err)
    }
}

struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

impl NpyHeader {
    /// Parse the Python dict literal of a `.npy` header.
    fn parse(header: &str) -> Result<Self, String> {
        fn value_after<'h>(header: &'h str, key: &str) -> Result<&'h str, String> {
            let pat = format!("'{key}':");
            let at = header
                .find(&pat)
                .ok_or_else(|| format!("header lacks {key:?}"))?;
            Ok(header[at + pat.len()..].trim_start())
        }
        let descr = value_after(header, "descr")?;
        let descr = descr
            .strip_prefix('\'')
            .and_then(|d| d.split('\'').next())
            .ok_or("malformed descr")?
            .to_string();
        let fortran_order = value_after(header, "fortran_order")?.starts_with("True");
        let shape = value_after(header, "shape")?;
        let inner = shape
            .strip_prefix('(')
            .and_then(|s| s.split(')').next())
            .ok_or("malformed shape")?;
        let shape = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<usize>().map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            descr,
            fortran_order,
            shape,
        })
    }
}

/// Load a density field for evaluation, dispatching on the file extension.
///
/// `.raw` needs `resolution` and `dtype` and spans the unit cube; `.npy` is a
/// unit-cube voxel grid; `.yaml`/`.yml`/`.json` are sphere collections.
pub fn load_density_field(
    path: &Path,
    resolution: Option<usize>,
    dtype: Option<RawDtype>,
) -> Result<DensityField, PersistError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let input_err = |reason: &str| PersistError::Input {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let density_err = |source| PersistError::Density {
        path: path.to_path_buf(),
        source,
    };
    if ext == "raw" {
        let (Some(resolution), Some(dtype)) = (resolution, dtype) else {
            return Err(input_err("raw volumes need a resolution and a dtype"));
        };
        let grid = VoxelGrid::unit(read_raw_volume(path, resolution, dtype)?).map_err(density_err)?;
        return Ok(grid.into());
    }
    if resolution.is_some() || dtype.is_some() {
        return Err(input_err("resolution and dtype only apply to .raw volumes"));
    }
    match ext.as_str() {
        "npy" => Ok(VoxelGrid::unit(read_npy(path)?)
            .map_err(density_err)?
            .into()),
        "yaml" | "yml" => {
            let text = fs::read_to_string(path).map_err(io_err(path))?;
            Ok(SphereCollection::from_yaml_str(&text)
                .map_err(density_err)?
                .into())
        }
        "json" => {
            let text = fs::read_to_string(path).map_err(io_err(path))?;
            Ok(SphereCollection::from_json_str(&text)
                .map_err(density_err)?
                .into())
        }
        _ => Err(input_err("unsupported file format")),
    }
}

/// Min-max scale a 2D slice to 8-bit gray.
pub fn slice_to_gray<T: Copy + Into<f64>>(slice: ArrayView2<'_, T>) -> GrayImage {
    let (h, w) = slice.dim();
    let (lo, hi) = slice
        .iter()
        .map(|v| (*v).into())
        .filter(|v: &f64| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let span = if hi > lo { hi - lo } else { 1.0 };
    let mut img = GrayImage::new(w as u32, h as u32);
    for ((r, c), v) in slice.indexed_iter() {
        let v: f64 = (*v).into();
        let g = if v.is_finite() && lo.is_finite() {
            ((v - lo) / span * 255.0).clamp(0.0, 255.0)
        } else {
            0.0
        };
        img.put_pixel(c as u32, r as u32, Luma([g.round() as u8]));
    }
    img
}

pub fn save_gray(path: &Path, img: &GrayImage) -> Result<(), PersistError> {
    img.save(path).map_err(|source| PersistError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Middle slice along the last axis of a canonical volume.
pub fn write_slice_png(path: &Path, canonical: &Array3<f32>) -> Result<(), PersistError> {
    let mid = canonical.len_of(Axis(2)) / 2;
    save_gray(path, &slice_to_gray(canonical.index_axis(Axis(2), mid)))
}

/// First projection frame as `[row, col]`.
pub fn write_projection_png(path: &Path, stack: &ProjectionStack) -> Result<(), PersistError> {
    save_gray(path, &slice_to_gray(stack.frame(0)))
}

/// Place images side by side with a one-pixel gap.
pub fn side_by_side(left: &GrayImage, right: &GrayImage) -> GrayImage {
    let h = left.height().max(right.height());
    let mut out = GrayImage::new(left.width() + 1 + right.width(), h);
    for (x, y, p) in left.enumerate_pixels() {
        out.put_pixel(x, y, *p);
    }
    for (x, y, p) in right.enumerate_pixels() {
        out.put_pixel(left.width() + 1 + x, y, *p);
    }
    out
}

/// Convenience for 2D `f64` arrays.
pub fn array_to_gray(a: &Array2<f64>) -> GrayImage {
    slice_to_gray(a.view())
}
