//! Labeled image datasets, batching and image writers for two-domain translation.
//!
//! This crate provides utilities for:
//! - Indexing class-per-directory image folders
//! - Resize / crop / flip transforms into [-1, 1] CHW samples
//! - Seeded, shuffled, Burn-compatible batch iteration
//! - Writing tensors back out as images and sample grids

pub mod aug;
pub mod folder;
pub mod types;
pub mod writer;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use aug::{to_labeled, TransformPipeline};
pub use folder::ImageFolder;
pub use types::*;
pub use writer::{chw_to_image, grid, save_image};

#[cfg(feature = "burn-runtime")]
pub use batch::{BatchConfig, BatchIter, DomainBatch};
#[cfg(feature = "burn-runtime")]
pub use writer::{save_grid, save_tensor, tensor_to_images};
