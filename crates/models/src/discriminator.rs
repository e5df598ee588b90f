//! Multi-scale patch critic.

use burn::module::{Ignored, Module};
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::tensor::activation::leaky_relu;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::contracts::RealismCritic;
use crate::init::InitPolicy;
use crate::ops::{conv2d, softplus};

/// Adversarial objective family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GanType {
    /// Least squares.
    #[default]
    Lsgan,
    /// Non-saturating, binary cross entropy on logits.
    Nsgan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiScaleDiscriminatorConfig {
    pub dim: usize,
    pub n_layer: usize,
    pub num_scales: usize,
    #[serde(default)]
    pub gan_type: GanType,
}

impl Default for MultiScaleDiscriminatorConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            n_layer: 4,
            num_scales: 3,
            gan_type: GanType::Lsgan,
        }
    }
}

#[derive(Module, Debug)]
pub struct CriticScale<B: Backend> {
    convs: Vec<Conv2d<B>>,
    head: Conv2d<B>,
}

impl<B: Backend> CriticScale<B> {
    fn new(input_dim: usize, dim: usize, n_layer: usize, init: &Initializer, device: &B::Device) -> Self {
        let mut convs = vec![conv2d([input_dim, dim], 4, 2, 1, init, device)];
        let mut dim = dim;
        for _ in 1..n_layer {
            convs.push(conv2d([dim, dim * 2], 4, 2, 1, init, device));
            dim *= 2;
        }
        let head = conv2d([dim, 1], 1, 1, 0, init, device);
        Self { convs, head }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for conv in &self.convs {
            x = leaky_relu(conv.forward(x), 0.2);
        }
        self.head.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct MultiScaleDiscriminator<B: Backend> {
    scales: Vec<CriticScale<B>>,
    downsample: AvgPool2d,
    gan_type: Ignored<GanType>,
}

impl<B: Backend> MultiScaleDiscriminator<B> {
    pub fn new(
        input_dim: usize,
        cfg: &MultiScaleDiscriminatorConfig,
        init: InitPolicy,
        device: &B::Device,
    ) -> Self {
        let init = init.initializer();
        let scales = (0..cfg.num_scales)
            .map(|_| CriticScale::new(input_dim, cfg.dim, cfg.n_layer, &init, device))
            .collect();
        let downsample = AvgPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_count_include_pad(false)
            .init();
        Self {
            scales,
            downsample,
            gan_type: Ignored(cfg.gan_type),
        }
    }

    /// One patch map per scale, finest first.
    pub fn forward(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut outputs = Vec::with_capacity(self.scales.len());
        let mut x = x;
        for (i, scale) in self.scales.iter().enumerate() {
            outputs.push(scale.forward(x.clone()));
            if i + 1 < self.scales.len() {
                x = self.downsample.forward(x);
            }
        }
        outputs
    }

    fn sum_scales(
        &self,
        terms: impl Iterator<Item = Tensor<B, 1>>,
        device: &B::Device,
    ) -> Tensor<B, 1> {
        terms
            .reduce(|acc, term| acc + term)
            .unwrap_or_else(|| Tensor::zeros([1], device))
    }
}

impl<B: Backend> RealismCritic<B> for MultiScaleDiscriminator<B> {
    fn calc_gen_loss(&self, fake: Tensor<B, 4>) -> Tensor<B, 1> {
        let device = fake.device();
        let gan_type = self.gan_type.0;
        let terms = self.forward(fake).into_iter().map(move |out| match gan_type {
            GanType::Lsgan => out.sub_scalar(1.0).powf_scalar(2.0).mean(),
            GanType::Nsgan => softplus(out.neg()).mean(),
        });
        self.sum_scales(terms, &device)
    }

    fn calc_dis_loss(&self, fake: Tensor<B, 4>, real: Tensor<B, 4>) -> Tensor<B, 1> {
        let device = fake.device();
        let gan_type = self.gan_type.0;
        let terms = self
            .forward(fake)
            .into_iter()
            .zip(self.forward(real))
            .map(move |(out_fake, out_real)| match gan_type {
                GanType::Lsgan => {
                    out_fake.powf_scalar(2.0).mean()
                        + out_real.sub_scalar(1.0).powf_scalar(2.0).mean()
                }
                GanType::Nsgan => softplus(out_fake).mean() + softplus(out_real.neg()).mean(),
            });
        self.sum_scales(terms, &device)
    }
}

#[derive(Module, Debug)]
pub struct DiscriminatorPair<B: Backend> {
    pub a: MultiScaleDiscriminator<B>,
    pub b: MultiScaleDiscriminator<B>,
}

impl<B: Backend> DiscriminatorPair<B> {
    pub fn new(
        input_dims: [usize; 2],
        cfg: &MultiScaleDiscriminatorConfig,
        init: InitPolicy,
        device: &B::Device,
    ) -> Self {
        Self {
            a: MultiScaleDiscriminator::new(input_dims[0], cfg, init, device),
            b: MultiScaleDiscriminator::new(input_dims[1], cfg, init, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::scalar;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn cfg(gan_type: GanType) -> MultiScaleDiscriminatorConfig {
        MultiScaleDiscriminatorConfig {
            dim: 4,
            n_layer: 2,
            num_scales: 2,
            gan_type,
        }
    }

    #[test]
    fn one_output_per_scale() {
        let device = Default::default();
        let dis = MultiScaleDiscriminator::<B>::new(3, &cfg(GanType::Lsgan), InitPolicy::Gaussian, &device);
        let outs = dis.forward(Tensor::zeros([2, 3, 8, 8], &device));
        assert_eq!(outs.len(), 2);
        assert_eq!(outs[0].dims(), [2, 1, 2, 2]);
        assert_eq!(outs[1].dims(), [2, 1, 1, 1]);
    }

    #[test]
    fn losses_are_non_negative_for_both_gan_types() {
        let device = Default::default();
        for gan_type in [GanType::Lsgan, GanType::Nsgan] {
            let dis = MultiScaleDiscriminator::<B>::new(3, &cfg(gan_type), InitPolicy::Gaussian, &device);
            let fake = Tensor::<B, 4>::ones([2, 3, 8, 8], &device).mul_scalar(0.5);
            let real = Tensor::<B, 4>::ones([2, 3, 8, 8], &device).neg();
            let gen_loss = scalar(dis.calc_gen_loss(fake.clone()));
            let dis_loss = scalar(dis.calc_dis_loss(fake, real));
            assert!(gen_loss.is_finite() && gen_loss >= 0.0, "{gan_type:?} gen {gen_loss}");
            assert!(dis_loss.is_finite() && dis_loss >= 0.0, "{gan_type:?} dis {dis_loss}");
        }
    }
}
