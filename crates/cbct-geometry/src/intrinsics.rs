use crate::GeometryError;
use cbct_core::Real;
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics as stored in a transforms document.
///
/// Focal lengths and sensor size are in pixels. A cone-beam detector needs
/// square pixels on a square sensor, see [`Intrinsics::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fl_x: Real,
    pub fl_y: Real,
    pub w: Real,
    pub h: Real,
}

impl Intrinsics {
    pub fn validate(&self) -> Result<(), GeometryError> {
        let positive = [self.fl_x, self.w, self.h]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        if !positive {
            return Err(GeometryError::NonPositiveIntrinsics {
                fl_x: self.fl_x,
                w: self.w,
                h: self.h,
            });
        }
        let fl_equal = (self.fl_x - self.fl_y).abs() <= 1e-9 * self.fl_x.abs().max(1.0);
        if !fl_equal || self.w != self.h {
            return Err(GeometryError::AnisotropicIntrinsics {
                fl_x: self.fl_x,
                fl_y: self.fl_y,
                w: self.w,
                h: self.h,
            });
        }
        Ok(())
    }

    /// Focal length relative to the sensor half-width.
    pub fn normalized_focal(&self) -> Real {
        self.fl_x / (self.w / 2.0)
    }
}
