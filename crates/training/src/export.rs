//! Per-example translation export over two test datasets.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use domain_dataset::{save_tensor, DomainDataset, LabeledImage};
use models::{ModeGuard, StyleAutoencoder};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::{TrainError, TrainResult};
use crate::trainer::{sample_style, Trainer};

/// Seed of the style generator shared by both export loops.
const EXPORT_STYLE_SEED: u64 = 1;

/// Output directories of one export, keyed by `iteration + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDirs {
    pub a_recon: PathBuf,
    pub ab: PathBuf,
    pub b_recon: PathBuf,
    pub ba: PathBuf,
}

impl ExportDirs {
    pub fn new(out_dir: &Path, iteration: u64) -> Self {
        let keyed = iteration + 1;
        Self {
            a_recon: out_dir.join(format!("a_recon_{keyed:08}")),
            ab: out_dir.join(format!("ab_{keyed:08}")),
            b_recon: out_dir.join(format!("b_recon_{keyed:08}")),
            ba: out_dir.join(format!("ba_{keyed:08}")),
        }
    }

    fn create(&self) -> TrainResult<()> {
        for dir in [&self.a_recon, &self.ab, &self.b_recon, &self.ba] {
            fs::create_dir_all(dir).map_err(TrainError::io(dir))?;
        }
        Ok(())
    }
}

fn image_file(index: usize) -> String {
    format!("{index:05}.jpg")
}

fn to_tensor<B: Backend>(sample: LabeledImage, device: &B::Device) -> Tensor<B, 4> {
    let [c, h, w] = sample.shape();
    Tensor::from_data(TensorData::new(sample.chw, [1, c, h, w]), device)
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Write the self-reconstruction and one cross translation of every example in
    /// `dataset_a` and `dataset_b`. Cross styles are drawn from a generator seeded
    /// with 1 that is shared by both loops; `data_rng` only feeds the datasets'
    /// transforms.
    pub fn export_translations<DA, DB>(
        &mut self,
        dataset_a: &DA,
        dataset_b: &DB,
        out_dir: impl AsRef<Path>,
        iteration: u64,
        data_rng: &mut dyn RngCore,
    ) -> TrainResult<ExportDirs>
    where
        DA: DomainDataset,
        DB: DomainDataset,
    {
        let dirs = ExportDirs::new(out_dir.as_ref(), iteration);
        dirs.create()?;
        let mut style_rng = StdRng::seed_from_u64(EXPORT_STYLE_SEED);
        let style_dim = self.style_dim();
        let device = self.device.clone();

        let this = ModeGuard::eval(self);
        let gens = this.generators.valid();
        for index in 0..dataset_a.len() {
            let x = to_tensor::<B::InnerBackend>(dataset_a.get(index, data_rng)?, &device);
            let (content, style) = gens.a.encode(x);
            let s_b = sample_style::<B::InnerBackend, _>(1, style_dim, &mut style_rng, &device);
            save_tensor(
                gens.a.decode(content.clone(), style)?,
                dirs.a_recon.join(image_file(index)),
            )?;
            save_tensor(gens.b.decode(content, s_b)?, dirs.ab.join(image_file(index)))?;
        }
        for index in 0..dataset_b.len() {
            let x = to_tensor::<B::InnerBackend>(dataset_b.get(index, data_rng)?, &device);
            let (content, style) = gens.b.encode(x);
            let s_a = sample_style::<B::InnerBackend, _>(1, style_dim, &mut style_rng, &device);
            save_tensor(
                gens.b.decode(content.clone(), style)?,
                dirs.b_recon.join(image_file(index)),
            )?;
            save_tensor(gens.a.decode(content, s_a)?, dirs.ba.join(image_file(index)))?;
        }
        tracing::info!(
            a = dataset_a.len(),
            b = dataset_b.len(),
            iteration = iteration + 1,
            "exported translations"
        );
        Ok(dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_are_keyed_by_next_iteration() {
        let dirs = ExportDirs::new(Path::new("out"), 41);
        assert_eq!(dirs.a_recon, Path::new("out/a_recon_00000042"));
        assert_eq!(dirs.ba, Path::new("out/ba_00000042"));
        assert_eq!(image_file(3), "00003.jpg");
    }
}
