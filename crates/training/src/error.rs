use std::path::PathBuf;

use domain_dataset::DatasetError;
use models::ModelError;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("config parse error at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no {prefix} checkpoint found in {dir}")]
    CheckpointNotFound { dir: PathBuf, prefix: &'static str },
    #[error("cannot read an iteration number from {0}")]
    CheckpointName(PathBuf),
    #[error("optimizer bundle {path} holds {found} slots, expected {expected}")]
    OptimizerBundle {
        path: PathBuf,
        found: usize,
        expected: usize,
    },
    #[error("recorder error at {path}: {reason}")]
    Recorder { path: PathBuf, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest error at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },
    #[error("checksum mismatch for {path}: manifest has {expected}, file hashes to {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("batch of {requested} exceeds display_size {display_size}")]
    DisplayBatch {
        requested: usize,
        display_size: usize,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| TrainError::Io { path, source }
    }

    pub(crate) fn recorder<E: std::fmt::Display>(path: impl Into<PathBuf>) -> impl FnOnce(E) -> Self {
        let path = path.into();
        move |err| TrainError::Recorder {
            path,
            reason: err.to_string(),
        }
    }
}
