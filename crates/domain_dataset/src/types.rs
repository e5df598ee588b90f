//! Core types and error definitions for domain_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no images found under {path}")]
    Empty { path: PathBuf },
    #[error("index {index} out of range for dataset of {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("unsupported channel count {0}; expected 1 or 3")]
    Channels(usize),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("{0}")]
    Other(String),
}

/// One decoded, transformed image with its class index.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImage {
    /// CHW layout, scaled to [-1, 1].
    pub chw: Vec<f32>,
    pub channels: usize,
    pub width: u32,
    pub height: u32,
    pub label: usize,
}

impl LabeledImage {
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height as usize, self.width as usize]
    }
}

/// Random-access labeled image source for one domain.
///
/// `rng` drives per-sample augmentation; deterministic sources ignore it.
pub trait DomainDataset {
    fn len(&self) -> usize;

    fn get(&self, index: usize, rng: &mut dyn rand::RngCore) -> DatasetResult<LabeledImage>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dataset backed by already-decoded samples.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<LabeledImage>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<LabeledImage>) -> Self {
        Self { samples }
    }
}

impl DomainDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize, _rng: &mut dyn rand::RngCore) -> DatasetResult<LabeledImage> {
        self.samples
            .get(index)
            .cloned()
            .ok_or(DatasetError::OutOfRange {
                index,
                len: self.samples.len(),
            })
    }
}
