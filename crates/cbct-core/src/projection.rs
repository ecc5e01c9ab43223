use crate::AcquisitionGeometry;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackShapeError {
    #[error("projection stack needs at least one frame")]
    Empty,
    #[error("frame {frame} has shape {got:?}, expected {expected:?}")]
    FrameShape {
        frame: usize,
        expected: [usize; 2],
        got: [usize; 2],
    },
    #[error("projection stack shape {got:?} does not match geometry {expected:?}")]
    GeometryMismatch { expected: [usize; 3], got: [usize; 3] },
}

/// Projection images stacked as `[row, frame, col]`.
///
/// Values are inverted, normalised intensities in `[0, 1]` (1 = dense).
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionStack {
    data: Array3<f32>,
}

impl ProjectionStack {
    pub fn new(data: Array3<f32>) -> Result<Self, StackShapeError> {
        if data.len_of(Axis(1)) == 0 {
            return Err(StackShapeError::Empty);
        }
        Ok(Self { data })
    }

    /// Stack `[row, col]` frames along the middle axis.
    pub fn from_frames(frames: &[Array2<f32>]) -> Result<Self, StackShapeError> {
        let first = frames.first().ok_or(StackShapeError::Empty)?;
        let (rows, cols) = first.dim();
        let mut data = Array3::<f32>::zeros((rows, frames.len(), cols));
        for (idx, frame) in frames.iter().enumerate() {
            if frame.dim() != (rows, cols) {
                return Err(StackShapeError::FrameShape {
                    frame: idx,
                    expected: [rows, cols],
                    got: [frame.nrows(), frame.ncols()],
                });
            }
            data.index_axis_mut(Axis(1), idx).assign(frame);
        }
        Ok(Self { data })
    }

    pub fn rows(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn frames(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn cols(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.rows(), self.frames(), self.cols()]
    }

    /// One projection image as `[row, col]`.
    pub fn frame(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(1), index)
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }

    /// Verify the stack matches the detector and angle count of `geometry`.
    pub fn check_geometry(&self, geometry: &AcquisitionGeometry) -> Result<(), StackShapeError> {
        let expected = geometry.projection_shape();
        if self.shape() != expected {
            return Err(StackShapeError::GeometryMismatch {
                expected,
                got: self.shape(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_stack_along_middle_axis() {
        let a = Array2::from_elem((3, 5), 0.25f32);
        let b = Array2::from_elem((3, 5), 0.75f32);
        let stack = ProjectionStack::from_frames(&[a, b]).unwrap();
        assert_eq!(stack.shape(), [3, 2, 5]);
        assert_eq!(stack.frame(1)[[2, 4]], 0.75);
    }

    #[test]
    fn mismatched_frame_reports_index() {
        let a = Array2::zeros((3, 5));
        let b = Array2::zeros((3, 4));
        let err = ProjectionStack::from_frames(&[a.clone(), a, b]).unwrap_err();
        assert_eq!(
            err,
            StackShapeError::FrameShape {
                frame: 2,
                expected: [3, 5],
                got: [3, 4]
            }
        );
    }

    #[test]
    fn geometry_mismatch_is_detected() {
        let g = AcquisitionGeometry::new((5, 3), (1.0, 1.0), 10.0, 20.0, vec![0.0]).unwrap();
        let ok = ProjectionStack::from_frames(&[Array2::zeros((3, 5))]).unwrap();
        assert!(ok.check_geometry(&g).is_ok());
        let bad = ProjectionStack::from_frames(&[Array2::zeros((5, 3))]).unwrap();
        assert!(bad.check_geometry(&g).is_err());
    }
}
