//! Error type shared by the translation collaborators.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("style code has {actual} channels but the decoder expects {expected}")]
    StyleDimMismatch { expected: usize, actual: usize },
    #[error("content batch {content} does not match style batch {style}")]
    BatchMismatch { content: usize, style: usize },
    #[error("no {mode} classifications recorded yet")]
    NoClassifications { mode: &'static str },
}
