//! Reconstruction engine interface.
//!
//! Engines own the (possibly device-side) buffers of a reconstruction and are
//! driven through opaque handles, in the style of ASTRA:
//! `create_projection_stack`, `create_volume`, `create_algorithm`, `run`,
//! `residual_norm`, `get_volume`, `delete`.
//!
//! [`EngineSession`] wraps the handles of one run and releases them on drop,
//! so every exit path (normal stop, early return, panic unwinding) frees the
//! engine's resources.

pub mod cpu;

use cbct_core::{AcquisitionGeometry, ProjectionStack, StackShapeError, VolumeGeometry};
use log::debug;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use cpu::CpuEngine;

/// Handle to a data object (projection stack or volume) owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataId(pub u64);

/// Handle to an algorithm instance owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmId(pub u64);

/// Any engine handle, for [`ReconstructionEngine::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Data(DataId),
    Algorithm(AlgorithmId),
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Data(id) => write!(f, "data#{}", id.0),
            Handle::Algorithm(id) => write!(f, "algorithm#{}", id.0),
        }
    }
}

/// Iterative update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Simultaneous iterative reconstruction technique.
    #[default]
    Sirt,
    /// Conjugate gradient least squares.
    Cgls,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sirt => "SIRT",
            Algorithm::Cgls => "CGLS",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown handle {0}")]
    UnknownHandle(Handle),
    #[error("out of engine memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error(transparent)]
    Shape(#[from] StackShapeError),
    #[error("volume {volume:?} does not match the algorithm's volume geometry {expected:?}")]
    VolumeMismatch {
        volume: (usize, usize, usize),
        expected: (usize, usize, usize),
    },
    #[error("{engine} does not support {what}")]
    Unsupported { engine: String, what: String },
    #[error("engine failure: {0}")]
    Backend(String),
}

/// Opaque iterative solver driven through handles.
///
/// Implementations must tolerate `delete` on any handle they issued, in any
/// order, exactly once.
pub trait ReconstructionEngine {
    /// Human-readable engine name for logs.
    fn name(&self) -> &str;

    /// Upload measured projections for `geometry`.
    fn create_projection_stack(
        &mut self,
        geometry: &AcquisitionGeometry,
        projections: &ProjectionStack,
    ) -> Result<DataId, EngineError>;

    /// Allocate a zero-initialised volume.
    fn create_volume(&mut self, geometry: &VolumeGeometry) -> Result<DataId, EngineError>;

    /// Bind an update rule to a volume and a projection stack.
    fn create_algorithm(
        &mut self,
        algorithm: Algorithm,
        volume: DataId,
        projections: DataId,
    ) -> Result<AlgorithmId, EngineError>;

    /// Perform `n_steps` iterations; blocks until done.
    fn run(&mut self, algorithm: AlgorithmId, n_steps: usize) -> Result<(), EngineError>;

    /// Norm of the projection-space residual after the last iteration.
    fn residual_norm(&self, algorithm: AlgorithmId) -> Result<f64, EngineError>;

    /// Copy of the current volume, indexed `[z, y, x]`.
    fn get_volume(&self, volume: DataId) -> Result<Array3<f32>, EngineError>;

    /// Release a handle and its resources.
    fn delete(&mut self, handle: Handle);
}

impl<E: ReconstructionEngine + ?Sized> ReconstructionEngine for &mut E {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn create_projection_stack(
        &mut self,
        geometry: &AcquisitionGeometry,
        projections: &ProjectionStack,
    ) -> Result<DataId, EngineError> {
        (**self).create_projection_stack(geometry, projections)
    }

    fn create_volume(&mut self, geometry: &VolumeGeometry) -> Result<DataId, EngineError> {
        (**self).create_volume(geometry)
    }

    fn create_algorithm(
        &mut self,
        algorithm: Algorithm,
        volume: DataId,
        projections: DataId,
    ) -> Result<AlgorithmId, EngineError> {
        (**self).create_algorithm(algorithm, volume, projections)
    }

    fn run(&mut self, algorithm: AlgorithmId, n_steps: usize) -> Result<(), EngineError> {
        (**self).run(algorithm, n_steps)
    }

    fn residual_norm(&self, algorithm: AlgorithmId) -> Result<f64, EngineError> {
        (**self).residual_norm(algorithm)
    }

    fn get_volume(&self, volume: DataId) -> Result<Array3<f32>, EngineError> {
        (**self).get_volume(volume)
    }

    fn delete(&mut self, handle: Handle) {
        (**self).delete(handle)
    }
}

/// Scoped ownership of all engine handles used by one reconstruction.
///
/// Handles are created in [`EngineSession::open`] and deleted in reverse
/// order when the session is dropped. A failure half-way through `open`
/// releases whatever was already created.
pub struct EngineSession<'e, E: ReconstructionEngine + ?Sized> {
    engine: &'e mut E,
    projections: Option<DataId>,
    volume: Option<DataId>,
    algorithm: Option<AlgorithmId>,
}

impl<'e, E: ReconstructionEngine + ?Sized> EngineSession<'e, E> {
    pub fn open(
        engine: &'e mut E,
        geometry: &AcquisitionGeometry,
        volume_geometry: &VolumeGeometry,
        projections: &ProjectionStack,
        algorithm: Algorithm,
    ) -> Result<Self, EngineError> {
        let mut session = Self {
            engine,
            projections: None,
            volume: None,
            algorithm: None,
        };
        let proj_id = session
            .engine
            .create_projection_stack(geometry, projections)?;
        session.projections = Some(proj_id);
        let vol_id = session.engine.create_volume(volume_geometry)?;
        session.volume = Some(vol_id);
        let alg_id = session
            .engine
            .create_algorithm(algorithm, vol_id, proj_id)?;
        session.algorithm = Some(alg_id);
        debug!(
            "{}: acquired {} / {} / {}",
            session.engine.name(),
            Handle::Data(proj_id),
            Handle::Data(vol_id),
            Handle::Algorithm(alg_id)
        );
        Ok(session)
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    fn algorithm_id(&self) -> Result<AlgorithmId, EngineError> {
        self.algorithm
            .ok_or_else(|| EngineError::Backend("session has no algorithm".into()))
    }

    pub fn run(&mut self, n_steps: usize) -> Result<(), EngineError> {
        let id = self.algorithm_id()?;
        self.engine.run(id, n_steps)
    }

    pub fn residual_norm(&self) -> Result<f64, EngineError> {
        self.engine.residual_norm(self.algorithm_id()?)
    }

    pub fn volume(&self) -> Result<Array3<f32>, EngineError> {
        let id = self
            .volume
            .ok_or_else(|| EngineError::Backend("session has no volume".into()))?;
        self.engine.get_volume(id)
    }
}

impl<E: ReconstructionEngine + ?Sized> Drop for EngineSession<'_, E> {
    fn drop(&mut self) {
        if let Some(id) = self.algorithm.take() {
            self.engine.delete(Handle::Algorithm(id));
        }
        if let Some(id) = self.volume.take() {
            self.engine.delete(Handle::Data(id));
        }
        if let Some(id) = self.projections.take() {
            self.engine.delete(Handle::Data(id));
        }
        debug!("{}: released session handles", self.engine.name());
    }
}
