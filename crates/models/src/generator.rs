//! AdaIN content/style autoencoder.
//!
//! The style encoder squeezes an image down to a `[N, style_dim, 1, 1]` code. The
//! content encoder keeps a spatial map normalized per instance. The decoder re-injects
//! style through adaptive instance norm whose affine parameters come from an MLP over
//! the style code.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::module::{Ignored, Module};
use burn::nn::conv::Conv2d;
use burn::nn::{Initializer, Linear};
use burn::tensor::activation::{relu, tanh};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::contracts::StyleAutoencoder;
use crate::error::{ModelError, ModelResult};
use crate::init::InitPolicy;
use crate::ops::{adaptive_instance_norm, conv2d, instance_norm, linear, upsample_nearest2x};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaInGeneratorConfig {
    /// Channels after the stem conv; doubles with every downsample.
    pub dim: usize,
    pub style_dim: usize,
    pub mlp_dim: usize,
    pub n_downsample: usize,
    pub n_res: usize,
}

impl Default for AdaInGeneratorConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            style_dim: 8,
            mlp_dim: 256,
            n_downsample: 2,
            n_res: 4,
        }
    }
}

impl AdaInGeneratorConfig {
    pub fn content_dim(&self) -> usize {
        self.dim << self.n_downsample
    }
}

#[derive(Module, Debug)]
pub struct StyleEncoder<B: Backend> {
    stem: Conv2d<B>,
    downs: Vec<Conv2d<B>>,
    head: Conv2d<B>,
}

impl<B: Backend> StyleEncoder<B> {
    fn new(
        input_dim: usize,
        cfg: &AdaInGeneratorConfig,
        init: &Initializer,
        device: &B::Device,
    ) -> Self {
        let stem = conv2d([input_dim, cfg.dim], 7, 1, 3, init, device);
        let mut dim = cfg.dim;
        let mut downs = Vec::with_capacity(cfg.n_downsample);
        for i in 0..cfg.n_downsample {
            // Width stops growing after two steps; extra steps only shrink the map.
            let next = if i < 2 { dim * 2 } else { dim };
            downs.push(conv2d([dim, next], 4, 2, 1, init, device));
            dim = next;
        }
        let head = conv2d([dim, cfg.style_dim], 1, 1, 0, init, device);
        Self { stem, downs, head }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = relu(self.stem.forward(x));
        for down in &self.downs {
            x = relu(down.forward(x));
        }
        let [n, c, h, w] = x.dims();
        let pooled = x.reshape([n, c, h * w]).mean_dim(2).reshape([n, c, 1, 1]);
        self.head.forward(pooled)
    }
}

#[derive(Module, Debug)]
pub struct ResBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> ResBlock<B> {
    fn new(dim: usize, init: &Initializer, device: &B::Device) -> Self {
        Self {
            conv1: conv2d([dim, dim], 3, 1, 1, init, device),
            conv2: conv2d([dim, dim], 3, 1, 1, init, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let y = relu(instance_norm(self.conv1.forward(x.clone())));
        let y = instance_norm(self.conv2.forward(y));
        x + y
    }
}

#[derive(Module, Debug)]
pub struct ContentEncoder<B: Backend> {
    stem: Conv2d<B>,
    downs: Vec<Conv2d<B>>,
    blocks: Vec<ResBlock<B>>,
}

impl<B: Backend> ContentEncoder<B> {
    fn new(
        input_dim: usize,
        cfg: &AdaInGeneratorConfig,
        init: &Initializer,
        device: &B::Device,
    ) -> Self {
        let stem = conv2d([input_dim, cfg.dim], 7, 1, 3, init, device);
        let mut dim = cfg.dim;
        let mut downs = Vec::with_capacity(cfg.n_downsample);
        for _ in 0..cfg.n_downsample {
            downs.push(conv2d([dim, dim * 2], 4, 2, 1, init, device));
            dim *= 2;
        }
        let blocks = (0..cfg.n_res)
            .map(|_| ResBlock::new(dim, init, device))
            .collect();
        Self {
            stem,
            downs,
            blocks,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = relu(instance_norm(self.stem.forward(x)));
        for down in &self.downs {
            x = relu(instance_norm(down.forward(x)));
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct AdaInResBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    dim: usize,
}

impl<B: Backend> AdaInResBlock<B> {
    fn new(dim: usize, init: &Initializer, device: &B::Device) -> Self {
        Self {
            conv1: conv2d([dim, dim], 3, 1, 1, init, device),
            conv2: conv2d([dim, dim], 3, 1, 1, init, device),
            dim,
        }
    }

    /// Number of AdaIN parameters this block consumes (mean and std for two norms).
    fn param_count(&self) -> usize {
        4 * self.dim
    }

    /// `params` is the `[N, 4 * dim]` slice owned by this block.
    fn forward(&self, x: Tensor<B, 4>, params: Tensor<B, 2>) -> Tensor<B, 4> {
        let d = self.dim;
        let mean1 = params.clone().narrow(1, 0, d);
        let std1 = params.clone().narrow(1, d, d);
        let mean2 = params.clone().narrow(1, 2 * d, d);
        let std2 = params.narrow(1, 3 * d, d);
        let y = relu(adaptive_instance_norm(
            self.conv1.forward(x.clone()),
            mean1,
            std1,
        ));
        let y = adaptive_instance_norm(self.conv2.forward(y), mean2, std2);
        x + y
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    blocks: Vec<AdaInResBlock<B>>,
    ups: Vec<Conv2d<B>>,
    out: Conv2d<B>,
}

impl<B: Backend> Decoder<B> {
    fn new(
        output_dim: usize,
        cfg: &AdaInGeneratorConfig,
        init: &Initializer,
        device: &B::Device,
    ) -> Self {
        let mut dim = cfg.content_dim();
        let blocks = (0..cfg.n_res)
            .map(|_| AdaInResBlock::new(dim, init, device))
            .collect();
        let mut ups = Vec::with_capacity(cfg.n_downsample);
        for _ in 0..cfg.n_downsample {
            ups.push(conv2d([dim, dim / 2], 5, 1, 2, init, device));
            dim /= 2;
        }
        let out = conv2d([dim, output_dim], 7, 1, 3, init, device);
        Self { blocks, ups, out }
    }

    fn adain_param_count(&self) -> usize {
        self.blocks.iter().map(AdaInResBlock::param_count).sum()
    }

    fn forward(&self, content: Tensor<B, 4>, adain: Tensor<B, 2>) -> Tensor<B, 4> {
        let mut x = content;
        let mut offset = 0;
        for block in &self.blocks {
            let count = block.param_count();
            x = block.forward(x, adain.clone().narrow(1, offset, count));
            offset += count;
        }
        for up in &self.ups {
            x = relu(instance_norm(up.forward(upsample_nearest2x(x))));
        }
        tanh(self.out.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct StyleMlp<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> StyleMlp<B> {
    fn new(
        style_dim: usize,
        hidden: usize,
        output: usize,
        init: &Initializer,
        device: &B::Device,
    ) -> Self {
        let layers = vec![
            linear(style_dim, hidden, init, device),
            linear(hidden, hidden, init, device),
            linear(hidden, output, init, device),
        ];
        Self { layers }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = x;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = relu(x);
            }
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct AdaInGenerator<B: Backend> {
    style_encoder: StyleEncoder<B>,
    content_encoder: ContentEncoder<B>,
    decoder: Decoder<B>,
    mlp: StyleMlp<B>,
    style_dim: usize,
    decodes: Ignored<Arc<AtomicUsize>>,
}

impl<B: Backend> AdaInGenerator<B> {
    pub fn new(
        input_dim: usize,
        cfg: &AdaInGeneratorConfig,
        init: InitPolicy,
        device: &B::Device,
    ) -> Self {
        let init = init.initializer();
        let style_encoder = StyleEncoder::new(input_dim, cfg, &init, device);
        let content_encoder = ContentEncoder::new(input_dim, cfg, &init, device);
        let decoder = Decoder::new(input_dim, cfg, &init, device);
        let mlp = StyleMlp::new(
            cfg.style_dim,
            cfg.mlp_dim,
            decoder.adain_param_count(),
            &init,
            device,
        );
        Self {
            style_encoder,
            content_encoder,
            decoder,
            mlp,
            style_dim: cfg.style_dim,
            decodes: Ignored(Arc::new(AtomicUsize::new(0))),
        }
    }

    /// Decode calls made through this generator and every clone of it.
    pub fn decode_count(&self) -> usize {
        self.decodes.0.load(Ordering::Relaxed)
    }
}

impl<B: Backend> StyleAutoencoder<B> for AdaInGenerator<B> {
    fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let style = self.style_encoder.forward(images.clone());
        let content = self.content_encoder.forward(images);
        (content, style)
    }

    fn decode(&self, content: Tensor<B, 4>, style: Tensor<B, 4>) -> ModelResult<Tensor<B, 4>> {
        let [n, s, h, w] = style.dims();
        if s * h * w != self.style_dim {
            return Err(ModelError::StyleDimMismatch {
                expected: self.style_dim,
                actual: s * h * w,
            });
        }
        let [content_n, _, _, _] = content.dims();
        if content_n != n {
            return Err(ModelError::BatchMismatch {
                content: content_n,
                style: n,
            });
        }
        self.decodes.0.fetch_add(1, Ordering::Relaxed);
        let adain = self.mlp.forward(style.reshape([n, s * h * w]));
        Ok(self.decoder.forward(content, adain))
    }

    fn style_dim(&self) -> usize {
        self.style_dim
    }
}

/// Generators for domains `a` and `b`; the record is keyed by those field names.
#[derive(Module, Debug)]
pub struct GeneratorPair<B: Backend> {
    pub a: AdaInGenerator<B>,
    pub b: AdaInGenerator<B>,
}

impl<B: Backend> GeneratorPair<B> {
    pub fn new(
        input_dims: [usize; 2],
        cfg: &AdaInGeneratorConfig,
        init: InitPolicy,
        device: &B::Device,
    ) -> Self {
        Self {
            a: AdaInGenerator::new(input_dims[0], cfg, init, device),
            b: AdaInGenerator::new(input_dims[1], cfg, init, device),
        }
    }

    pub fn decode_count(&self) -> usize {
        self.a.decode_count() + self.b.decode_count()
    }
}
