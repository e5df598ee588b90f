//! Seeded, shuffled batch iteration producing Burn tensors.

use crate::types::{DatasetError, DatasetResult, DomainDataset};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Images `[N, C, H, W]` in [-1, 1] with their class indices `[N]`.
#[derive(Debug, Clone)]
pub struct DomainBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> DomainBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Seed for shuffling and augmentation; `None` draws one from the thread rng.
    pub seed: Option<u64>,
    /// Drop the trailing partial batch of each epoch.
    pub drop_last: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: true,
            seed: None,
            drop_last: true,
        }
    }
}

pub struct BatchIter<D: DomainDataset> {
    dataset: D,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    cfg: BatchConfig,
    rng: StdRng,
}

impl<D: DomainDataset> BatchIter<D> {
    pub fn new(dataset: D, cfg: BatchConfig) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::Other("batch_size must be positive".to_string()));
        }
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let order = (0..dataset.len()).collect();
        let mut iter = Self {
            dataset,
            order,
            cursor: 0,
            epoch: 0,
            cfg,
            rng,
        };
        iter.reshuffle();
        Ok(iter)
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn reshuffle(&mut self) {
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Rewind to the start of a new epoch.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
        self.reshuffle();
    }

    /// Next batch of the current epoch, `None` once it is exhausted.
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<DomainBatch<B>>> {
        let remaining = self.order.len().saturating_sub(self.cursor);
        if remaining == 0 || (self.cfg.drop_last && remaining < self.cfg.batch_size) {
            return Ok(None);
        }
        let end = (self.cursor + self.cfg.batch_size).min(self.order.len());
        let picks: Vec<usize> = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        let mut images = Vec::new();
        let mut labels = Vec::with_capacity(picks.len());
        let mut shape: Option<[usize; 3]> = None;
        for idx in picks {
            let sample = self.dataset.get(idx, &mut self.rng)?;
            match shape {
                None => shape = Some(sample.shape()),
                Some(s) if s != sample.shape() => {
                    return Err(DatasetError::Shape(format!(
                        "sample {idx} has shape {:?}, batch started with {s:?}",
                        sample.shape()
                    )));
                }
                _ => {}
            }
            images.extend_from_slice(&sample.chw);
            labels.push(sample.label as i64);
        }
        let [c, h, w] = shape.unwrap_or([0, 0, 0]);
        let n = labels.len();
        Ok(Some(DomainBatch {
            images: Tensor::from_data(TensorData::new(images, [n, c, h, w]), device),
            labels: Tensor::from_data(TensorData::new(labels, [n]), device),
        }))
    }

    /// Endless iteration: starts a new epoch whenever the current one runs dry.
    pub fn next_batch_cycling<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<DomainBatch<B>> {
        if let Some(batch) = self.next_batch(device)? {
            return Ok(batch);
        }
        self.restart();
        tracing::debug!(epoch = self.epoch, "dataset epoch rollover");
        self.next_batch(device)?.ok_or_else(|| {
            DatasetError::Other(format!(
                "dataset of {} samples cannot fill a batch of {}",
                self.dataset.len(),
                self.cfg.batch_size
            ))
        })
    }
}
