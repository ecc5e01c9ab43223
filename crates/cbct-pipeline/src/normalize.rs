//! Volume Normalizer: canonical value range and orientation.
//!
//! A solver-native volume indexed `[z, y, x]` is rescaled to
//! `[0, CANONICAL_MAX]`, its axes permuted by `(1, 2, 0)` and the new axis 0
//! mirrored. [`denormalize`] undoes all three steps exactly.

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

/// Upper end of the canonical value range.
pub const CANONICAL_MAX: f32 = 255.0;

/// Canonical volume plus the value range it was rescaled from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVolume {
    pub data: Array3<f32>,
    pub range: ValueRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    /// Finite min and max of `values`; `(0, 0)` when there are none.
    pub fn of<'a>(values: impl IntoIterator<Item = &'a f32>) -> Self {
        let (min, max) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        if min > max {
            Self { min: 0.0, max: 0.0 }
        } else {
            Self { min, max }
        }
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }
}

pub fn normalize_volume(raw: &Array3<f32>) -> NormalizedVolume {
    let range = ValueRange::of(raw.iter());
    let span = range.span();
    let rescaled = if span > 0.0 {
        raw.mapv(|v| (v - range.min) / span * CANONICAL_MAX)
    } else {
        Array3::zeros(raw.dim())
    };
    NormalizedVolume {
        data: to_canonical_order(rescaled),
        range,
    }
}

/// Invert [`normalize_volume`], returning the solver-native `[z, y, x]` volume.
pub fn denormalize(volume: &NormalizedVolume) -> Array3<f32> {
    let range = volume.range;
    from_canonical_order(volume.data.clone())
        .mapv_into(|v| v / CANONICAL_MAX * range.span() + range.min)
}

/// Permute `(1, 2, 0)` then mirror axis 0.
pub fn to_canonical_order(mut a: Array3<f32>) -> Array3<f32> {
    a = a.permuted_axes([1, 2, 0]);
    a.invert_axis(Axis(0));
    a.as_standard_layout().into_owned()
}

/// Inverse of [`to_canonical_order`].
pub fn from_canonical_order(mut a: Array3<f32>) -> Array3<f32> {
    a.invert_axis(Axis(0));
    a.permuted_axes([2, 0, 1]).as_standard_layout().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| (z * 100 + y * 10 + x) as f32 * 0.5 - 3.0)
    }

    #[test]
    fn rescales_to_canonical_range() {
        let n = normalize_volume(&ramp((2, 3, 4)));
        let r = ValueRange::of(n.data.iter());
        assert_eq!(r.min, 0.0);
        assert_eq!(r.max, CANONICAL_MAX);
        assert_eq!(n.range.min, -3.0);
    }

    #[test]
    fn orientation_matches_index_mapping() {
        let raw = ramp((2, 3, 4));
        let n = normalize_volume(&raw);
        // [z, y, x] -> [y, x, z] with y mirrored
        assert_eq!(n.data.dim(), (3, 4, 2));
        let span = n.range.span();
        for ((z, y, x), v) in raw.indexed_iter() {
            let c = n.data[[2 - y, x, z]];
            assert!(((v - n.range.min) / span * CANONICAL_MAX - c).abs() < 1e-4);
        }
    }

    #[test]
    fn round_trip_recovers_values() {
        let raw = ramp((3, 5, 4));
        let back = denormalize(&normalize_volume(&raw));
        assert_eq!(back.dim(), raw.dim());
        for (a, b) in raw.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn constant_volume_becomes_zeros_and_round_trips() {
        let raw = Array3::from_elem((2, 2, 2), 7.0f32);
        let n = normalize_volume(&raw);
        assert!(n.data.iter().all(|v| *v == 0.0));
        assert_eq!(denormalize(&n), raw);
    }
}
