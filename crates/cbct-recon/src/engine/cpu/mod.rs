//! Multi-threaded CPU reference engine.
//!
//! Buffers live in host memory; an optional byte budget models the limited
//! memory of an accelerator so that allocation failures can be exercised.

mod algorithms;
mod projector;

use super::{
    Algorithm, AlgorithmId, DataId, EngineError, Handle, ReconstructionEngine,
};
use algorithms::{AlgorithmState, Cgls, Sirt};
use cbct_core::{AcquisitionGeometry, ProjectionStack, VolumeGeometry};
use log::debug;
use ndarray::Array3;
use projector::ConeProjector;
use std::collections::HashMap;
use std::mem::size_of;

#[derive(Debug)]
struct ProjectionSlot {
    geometry: AcquisitionGeometry,
    data: Array3<f32>,
}

#[derive(Debug)]
struct VolumeSlot {
    geometry: VolumeGeometry,
    /// Standard-layout `[z, y, x]` values.
    data: Vec<f32>,
}

#[derive(Debug)]
struct AlgorithmSlot {
    volume: DataId,
    projections: DataId,
    projector: ConeProjector,
    state: AlgorithmState,
    iterations: usize,
    bytes: usize,
}

/// CPU implementation of [`ReconstructionEngine`].
#[derive(Debug, Default)]
pub struct CpuEngine {
    next_id: u64,
    memory_limit: Option<usize>,
    allocated: usize,
    projections: HashMap<u64, ProjectionSlot>,
    volumes: HashMap<u64, VolumeSlot>,
    algorithms: HashMap<u64, AlgorithmSlot>,
}

impl CpuEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that refuses allocations beyond `bytes` in total.
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    /// Bytes currently held by live handles.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Number of live handles of any kind.
    pub fn live_handles(&self) -> usize {
        self.projections.len() + self.volumes.len() + self.algorithms.len()
    }

    /// Iterations run so far by `algorithm`.
    pub fn iterations(&self, algorithm: AlgorithmId) -> Result<usize, EngineError> {
        self.algorithms
            .get(&algorithm.0)
            .map(|a| a.iterations)
            .ok_or(EngineError::UnknownHandle(Handle::Algorithm(algorithm)))
    }

    /// Simulate the projections of a `[z, y, x]` volume, e.g. for synthetic
    /// scans. The volume is centred on the rotation axis like every
    /// reconstruction volume.
    pub fn forward_project(
        geometry: &AcquisitionGeometry,
        volume: &Array3<f32>,
    ) -> Result<ProjectionStack, EngineError> {
        let (slices, rows, cols) = volume.dim();
        let projector = ConeProjector::new(geometry, VolumeGeometry { cols, rows, slices });
        let flat: Vec<f32> = volume.iter().copied().collect();
        Ok(ProjectionStack::new(projector.forward(&flat))?)
    }

    fn reserve(&mut self, elements: usize) -> Result<usize, EngineError> {
        let bytes = elements * size_of::<f32>();
        if let Some(limit) = self.memory_limit {
            let available = limit.saturating_sub(self.allocated);
            if bytes > available {
                return Err(EngineError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }
        self.allocated += bytes;
        Ok(bytes)
    }

    fn release(&mut self, bytes: usize) {
        self.allocated = self.allocated.saturating_sub(bytes);
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl ReconstructionEngine for CpuEngine {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_projection_stack(
        &mut self,
        geometry: &AcquisitionGeometry,
        projections: &ProjectionStack,
    ) -> Result<DataId, EngineError> {
        projections.check_geometry(geometry)?;
        self.reserve(projections.data().len())?;
        let id = self.next_id();
        self.projections.insert(
            id,
            ProjectionSlot {
                geometry: geometry.clone(),
                data: projections.data().as_standard_layout().into_owned(),
            },
        );
        Ok(DataId(id))
    }

    fn create_volume(&mut self, geometry: &VolumeGeometry) -> Result<DataId, EngineError> {
        let n = geometry.num_voxels();
        if n == 0 {
            return Err(EngineError::Unsupported {
                engine: self.name().to_string(),
                what: "empty volumes".to_string(),
            });
        }
        self.reserve(n)?;
        let id = self.next_id();
        self.volumes.insert(
            id,
            VolumeSlot {
                geometry: *geometry,
                data: vec![0.0; n],
            },
        );
        Ok(DataId(id))
    }

    fn create_algorithm(
        &mut self,
        algorithm: Algorithm,
        volume: DataId,
        projections: DataId,
    ) -> Result<AlgorithmId, EngineError> {
        let vol_geometry = self
            .volumes
            .get(&volume.0)
            .ok_or(EngineError::UnknownHandle(Handle::Data(volume)))?
            .geometry;
        let projector = {
            let proj = self
                .projections
                .get(&projections.0)
                .ok_or(EngineError::UnknownHandle(Handle::Data(projections)))?;
            ConeProjector::new(&proj.geometry, vol_geometry)
        };
        let bytes = self.reserve(AlgorithmState::footprint(&projector))?;
        let state = match algorithm {
            Algorithm::Sirt => AlgorithmState::Sirt(Sirt::new(&projector)),
            Algorithm::Cgls => AlgorithmState::Cgls(Cgls::default()),
        };
        let id = self.next_id();
        debug!("cpu: created {algorithm} algorithm#{id} ({bytes} bytes)");
        self.algorithms.insert(
            id,
            AlgorithmSlot {
                volume,
                projections,
                projector,
                state,
                iterations: 0,
                bytes,
            },
        );
        Ok(AlgorithmId(id))
    }

    fn run(&mut self, algorithm: AlgorithmId, n_steps: usize) -> Result<(), EngineError> {
        let slot = self
            .algorithms
            .get_mut(&algorithm.0)
            .ok_or(EngineError::UnknownHandle(Handle::Algorithm(algorithm)))?;
        let proj = self
            .projections
            .get(&slot.projections.0)
            .ok_or(EngineError::UnknownHandle(Handle::Data(slot.projections)))?;
        let vol = self
            .volumes
            .get_mut(&slot.volume.0)
            .ok_or(EngineError::UnknownHandle(Handle::Data(slot.volume)))?;
        for _ in 0..n_steps {
            slot.state.iterate(&slot.projector, &proj.data, &mut vol.data);
            slot.iterations += 1;
        }
        Ok(())
    }

    fn residual_norm(&self, algorithm: AlgorithmId) -> Result<f64, EngineError> {
        let slot = self
            .algorithms
            .get(&algorithm.0)
            .ok_or(EngineError::UnknownHandle(Handle::Algorithm(algorithm)))?;
        match slot.state.residual() {
            Some(r) => Ok(r),
            None => {
                // before the first iteration the residual is ‖b‖ minus the start volume
                let proj = self
                    .projections
                    .get(&slot.projections.0)
                    .ok_or(EngineError::UnknownHandle(Handle::Data(slot.projections)))?;
                let vol = self
                    .volumes
                    .get(&slot.volume.0)
                    .ok_or(EngineError::UnknownHandle(Handle::Data(slot.volume)))?;
                let r = &proj.data - &slot.projector.forward(&vol.data);
                Ok(r.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt())
            }
        }
    }

    fn get_volume(&self, volume: DataId) -> Result<Array3<f32>, EngineError> {
        let slot = self
            .volumes
            .get(&volume.0)
            .ok_or(EngineError::UnknownHandle(Handle::Data(volume)))?;
        Array3::from_shape_vec(slot.geometry.shape(), slot.data.clone())
            .map_err(|e| EngineError::Backend(e.to_string()))
    }

    fn delete(&mut self, handle: Handle) {
        let freed = match handle {
            Handle::Data(id) => self
                .projections
                .remove(&id.0)
                .map(|p| p.data.len() * size_of::<f32>())
                .or_else(|| {
                    self.volumes
                        .remove(&id.0)
                        .map(|v| v.data.len() * size_of::<f32>())
                }),
            Handle::Algorithm(id) => self.algorithms.remove(&id.0).map(|a| a.bytes),
        };
        match freed {
            Some(bytes) => self.release(bytes),
            None => debug!("cpu: delete of unknown {handle} ignored"),
        }
    }
}
