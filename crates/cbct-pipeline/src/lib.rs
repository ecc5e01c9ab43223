//! File-facing stages of a cone-beam CT run.
//!
//! - [`transforms`] / [`loader`]: transforms documents and the Projection Set Loader.
//! - [`normalize`]: canonical value range and orientation of volumes.
//! - [`persist`]: `config.json`, `vol_zyx.{raw,npy}`, previews, evaluation inputs.
//! - [`evaluate`]: the Volumetric Evaluator.
//! - [`progress`]: the per-check progress table.
//! - [`reconstruct`]: the full load → resolve → solve → normalise → persist run.

pub mod evaluate;
pub mod loader;
pub mod normalize;
pub mod persist;
pub mod progress;
pub mod reconstruct;
pub mod transforms;

pub use evaluate::{
    evaluate, run_evaluation, EvaluateConfig, Evaluation, EvaluationError, EvaluationOptions,
    EvaluationReport,
};
pub use loader::{load_projections, FrameFilter, FrameSelection, LoadError, LoadedProjections};
pub use normalize::{denormalize, normalize_volume, NormalizedVolume, ValueRange, CANONICAL_MAX};
pub use persist::{load_density_field, GeometryRecord, PersistError, RawDtype};
pub use progress::ProgressTable;
pub use reconstruct::{
    run_reconstruction, run_reconstruction_with, OutputFiles, ReconstructConfig,
    ReconstructionReport,
};
pub use transforms::{locate_transforms, FrameRecord, TransformsDocument};
