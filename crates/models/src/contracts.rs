//! Collaborator contracts consumed by the trainer.

use burn::tensor::{backend::Backend, Int, Tensor};

use crate::error::{ModelError, ModelResult};

/// Content/style autoencoder for one domain.
pub trait StyleAutoencoder<B: Backend> {
    /// Returns `(content, style)`; style is `[N, style_dim, 1, 1]`.
    fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>);
    /// Fails when `style` does not carry `style_dim` channels.
    fn decode(&self, content: Tensor<B, 4>, style: Tensor<B, 4>) -> ModelResult<Tensor<B, 4>>;
    fn style_dim(&self) -> usize;
}

/// Realism critic for one domain.
pub trait RealismCritic<B: Backend> {
    fn calc_gen_loss(&self, fake: Tensor<B, 4>) -> Tensor<B, 1>;
    fn calc_dis_loss(&self, fake: Tensor<B, 4>, real: Tensor<B, 4>) -> Tensor<B, 1>;
}

/// Which accuracy counters a classification call feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClsMode {
    /// Translated images scored against their source labels.
    Gen,
    /// Real images scored against their own labels.
    Cls,
}

impl ClsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClsMode::Gen => "gen",
            ClsMode::Cls => "cls",
        }
    }
}

/// Supervised label classifier that counts its own hits.
pub trait LabelClassifier<B: Backend> {
    fn calc_cls_loss(
        &mut self,
        images: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
        mode: ClsMode,
    ) -> Tensor<B, 1>;
    fn tally(&self) -> &AccuracyTally;
}

/// Fixed feature network for the perceptual term.
pub trait FeatureExtractor<B: Backend> {
    fn extract(&self, preprocessed: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Running correct/total counts, one pair per [`ClsMode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccuracyTally {
    pub gen_count: u64,
    pub gen_total: u64,
    pub cls_count: u64,
    pub cls_total: u64,
}

impl AccuracyTally {
    pub fn record(&mut self, mode: ClsMode, correct: u64, total: u64) {
        match mode {
            ClsMode::Gen => {
                self.gen_count += correct;
                self.gen_total += total;
            }
            ClsMode::Cls => {
                self.cls_count += correct;
                self.cls_total += total;
            }
        }
    }

    /// correct / total for `mode`; errors until something has been classified.
    pub fn accuracy(&self, mode: ClsMode) -> ModelResult<f64> {
        let (count, total) = match mode {
            ClsMode::Gen => (self.gen_count, self.gen_total),
            ClsMode::Cls => (self.cls_count, self.cls_total),
        };
        if total == 0 {
            return Err(ModelError::NoClassifications {
                mode: mode.as_str(),
            });
        }
        Ok(count as f64 / total as f64)
    }
}
