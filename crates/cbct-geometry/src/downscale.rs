//! Pick an integer image downscale so the larger side lands near a target size.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownscaleError {
    #[error("image {path} not found")]
    Missing { path: PathBuf },
    #[error("failed to read image size of {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("target size must be positive")]
    ZeroTarget,
}

/// `round(max(width, height) / target_size)`, never below 1.
pub fn infer_downscale_factor(
    width: u32,
    height: u32,
    target_size: u32,
) -> Result<u32, DownscaleError> {
    if target_size == 0 {
        return Err(DownscaleError::ZeroTarget);
    }
    let factor = (width.max(height) as f64 / target_size as f64).round() as u32;
    Ok(factor.max(1))
}

/// [`infer_downscale_factor`] for the dimensions of an image on disk.
pub fn infer_downscale_factor_from_image(
    path: &Path,
    target_size: u32,
) -> Result<u32, DownscaleError> {
    if !path.is_file() {
        return Err(DownscaleError::Missing {
            path: path.to_path_buf(),
        });
    }
    let (w, h) = image::image_dimensions(path).map_err(|source| DownscaleError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    infer_downscale_factor(w, h, target_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_factor() {
        assert_eq!(infer_downscale_factor(500, 500, 250).unwrap(), 2);
        assert_eq!(infer_downscale_factor(800, 600, 250).unwrap(), 3);
        assert_eq!(infer_downscale_factor(100, 80, 250).unwrap(), 1);
        assert!(infer_downscale_factor(100, 80, 0).is_err());
    }

    #[test]
    fn reads_dimensions_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        image::GrayImage::new(1000, 400).save(&path).unwrap();
        assert_eq!(infer_downscale_factor_from_image(&path, 250).unwrap(), 4);
        assert!(matches!(
            infer_downscale_factor_from_image(&dir.path().join("nope.png"), 250),
            Err(DownscaleError::Missing { .. })
        ));
    }
}
