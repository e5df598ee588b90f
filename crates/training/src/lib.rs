#![recursion_limit = "256"]
//! Training orchestration for two-domain style translation.
//!
//! [`Trainer`] owns the generator, discriminator and classifier pairs together
//! with their optimizers and learning-rate schedules. Each update is one call
//! (`generator_step`, `discriminator_step`, `classifier_step`) that returns its
//! own loss record. Checkpoints live in [`checkpoint`], per-image export in
//! [`export`], and the `train`/`export` binaries are thin wrappers over [`util`].

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod export;
pub mod losses;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use checkpoint::{
    CheckpointManifest, OptimizerStateIds, ResumeReport, ResumeSource, SavedCheckpoint,
};
pub use config::{LossWeights, LrPolicy, ScheduleConfig, TrainSection, TrainerConfig};
pub use error::{TrainError, TrainResult};
pub use export::ExportDirs;
pub use schedule::Schedule;
pub use trainer::{
    sample_style, ClassifierLosses, DiscriminatorLosses, GeneratorLosses, ParameterDigests,
    SampleOutputs, Trainer,
};
pub use util::{run_export, run_train, ExportArgs, TrainArgs};

/// Backend alias for training/export (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
