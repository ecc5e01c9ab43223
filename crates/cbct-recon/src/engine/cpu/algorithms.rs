//! SIRT and CGLS update rules on top of [`ConeProjector`].

use super::projector::ConeProjector;
use ndarray::Array3;

/// Ray/voxel weight sums below this are treated as "not covered".
const WEIGHT_EPS: f32 = 1e-6;

#[derive(Debug, Clone)]
pub(crate) enum AlgorithmState {
    Sirt(Sirt),
    Cgls(Cgls),
}

impl AlgorithmState {
    pub(crate) fn iterate(&mut self, projector: &ConeProjector, b: &Array3<f32>, x: &mut [f32]) {
        match self {
            AlgorithmState::Sirt(s) => s.iterate(projector, b, x),
            AlgorithmState::Cgls(c) => c.iterate(projector, b, x),
        }
    }

    pub(crate) fn residual(&self) -> Option<f64> {
        match self {
            AlgorithmState::Sirt(s) => s.residual,
            AlgorithmState::Cgls(c) => c.residual,
        }
    }

    /// Extra storage held by the algorithm, in `f32` elements.
    pub(crate) fn footprint(projector: &ConeProjector) -> usize {
        let (r, a, c) = projector.projection_shape();
        let (z, y, x) = projector.volume_shape();
        r * a * c + z * y * x
    }
}

fn norm(v: &Array3<f32>) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn invert(v: f32) -> f32 {
    if v > WEIGHT_EPS {
        1.0 / v
    } else {
        0.0
    }
}

/// `x ← x + C·Aᵀ·R·(b − A·x)` with `R`, `C` the inverse row and column sums of `A`.
///
/// The reported residual is `‖b − A·x‖` measured at the start of the last
/// iteration, which comes for free with the update.
#[derive(Debug, Clone)]
pub(crate) struct Sirt {
    inv_row: Array3<f32>,
    inv_col: Vec<f32>,
    residual: Option<f64>,
}

impl Sirt {
    pub(crate) fn new(projector: &ConeProjector) -> Self {
        let (z, y, x) = projector.volume_shape();
        let row = projector.forward(&vec![1.0f32; z * y * x]);
        let col = projector.backward(&Array3::from_elem(projector.projection_shape(), 1.0f32));
        Self {
            inv_row: row.mapv(invert),
            inv_col: col.into_iter().map(invert).collect(),
            residual: None,
        }
    }

    fn iterate(&mut self, projector: &ConeProjector, b: &Array3<f32>, x: &mut [f32]) {
        let ax = projector.forward(x);
        let mut r = b - &ax;
        self.residual = Some(norm(&r));
        r *= &self.inv_row;
        let correction = projector.backward(&r);
        for ((xi, g), c) in x.iter_mut().zip(&correction).zip(&self.inv_col) {
            *xi += g * c;
        }
    }
}

/// Conjugate gradients on the normal equations `AᵀA·x = Aᵀ·b`.
///
/// State is initialised lazily on the first iteration from the current
/// volume, so a warm start is honoured.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cgls {
    r: Option<Array3<f32>>,
    d: Vec<f32>,
    gamma: f64,
    residual: Option<f64>,
}

impl Cgls {
    fn iterate(&mut self, projector: &ConeProjector, b: &Array3<f32>, x: &mut [f32]) {
        if self.r.is_none() {
            let r = b - &projector.forward(x);
            self.d = projector.backward(&r);
            self.gamma = dot(&self.d, &self.d);
            self.residual = Some(norm(&r));
            self.r = Some(r);
        }
        let Some(r) = self.r.as_mut() else {
            return;
        };
        // stationary point reached; further steps are no-ops
        if self.gamma <= 0.0 {
            return;
        }
        let q = projector.forward(&self.d);
        let qq = norm(&q).powi(2);
        if qq <= 0.0 {
            return;
        }
        let alpha = self.gamma / qq;
        for (xi, di) in x.iter_mut().zip(&self.d) {
            *xi += (alpha as f32) * di;
        }
        r.scaled_add(-(alpha as f32), &q);
        let s = projector.backward(r);
        let gamma_new = dot(&s, &s);
        let beta = (gamma_new / self.gamma) as f32;
        for (di, si) in self.d.iter_mut().zip(&s) {
            *di = si + beta * *di;
        }
        self.gamma = gamma_new;
        self.residual = Some(norm(r));
    }
}
