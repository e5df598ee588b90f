//! Frozen convolutional feature extractor for the perceptual term.

use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

use crate::contracts::FeatureExtractor;
use crate::init::InitPolicy;
use crate::ops::conv2d;

/// Two 3x3 conv stages with ReLU, one 2x downsample. Parameters never receive
/// gradients; inputs still do, so the perceptual term trains the generator.
#[derive(Module, Debug)]
pub struct ConvFeatures<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

impl<B: Backend> ConvFeatures<B> {
    pub fn new(input_dim: usize, width: usize, device: &B::Device) -> Self {
        let init = InitPolicy::Kaiming.initializer();
        let convs = vec![
            conv2d([input_dim, width], 3, 1, 1, &init, device),
            conv2d([width, width * 2], 3, 2, 1, &init, device),
        ];
        Self { convs }.no_grad()
    }
}

impl<B: Backend> FeatureExtractor<B> for ConvFeatures<B> {
    fn extract(&self, preprocessed: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = preprocessed;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        x
    }
}
