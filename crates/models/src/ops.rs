//! Layer builders and parameter-free tensor helpers shared by the networks.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::{backend::Backend, Tensor};

const EPS: f64 = 1e-5;

pub(crate) fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    init: &Initializer,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_initializer(init.clone())
        .init(device)
}

pub(crate) fn linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    init: &Initializer,
    device: &B::Device,
) -> Linear<B> {
    LinearConfig::new(d_input, d_output)
        .with_initializer(init.clone())
        .init(device)
}

/// First element of a tensor as `f32` (0.0 for an empty tensor).
pub fn scalar<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f32 {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0)
}

/// Instance normalization over the spatial dims of an `[N, C, H, W]` tensor.
pub fn instance_norm<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    let flat = x.reshape([n, c, h * w]);
    let mean = flat.clone().mean_dim(2);
    let centered = flat - mean;
    let var = centered.clone().powf_scalar(2.0).mean_dim(2);
    let normed = centered / var.add_scalar(EPS).sqrt();
    normed.reshape([n, c, h, w])
}

/// Adaptive instance norm: normalize `x`, then scale by `std` and shift by `mean`.
/// `mean` and `std` are `[N, C]`.
pub fn adaptive_instance_norm<B: Backend>(
    x: Tensor<B, 4>,
    mean: Tensor<B, 2>,
    std: Tensor<B, 2>,
) -> Tensor<B, 4> {
    let [n, c, _, _] = x.dims();
    let normed = instance_norm(x);
    normed * std.reshape([n, c, 1, 1]) + mean.reshape([n, c, 1, 1])
}

/// Nearest-neighbour 2x upsampling.
pub fn upsample_nearest2x<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    x.reshape([n, c, h, 1, w, 1])
        .repeat_dim(3, 2)
        .repeat_dim(5, 2)
        .reshape([n, c, h * 2, w * 2])
}

/// Numerically stable `ln(1 + e^x)`.
pub fn softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let tail = x.clone().abs().neg().exp().log1p();
    burn::tensor::activation::relu(x) + tail
}

/// Global average pool to `[N, C]`.
pub fn global_avg_pool<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [n, c, h, w] = x.dims();
    x.reshape([n, c, h * w]).mean_dim(2).reshape([n, c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn values(t: Tensor<B, 4>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap_or_default()
    }

    #[test]
    fn instance_norm_zero_mean_unit_var_per_channel() {
        let device = Default::default();
        let data: Vec<f32> = (0..32).map(|v| v as f32 * 0.5 - 3.0).collect();
        let x = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 2, 4, 4]), &device);
        let out = values(instance_norm(x));
        for channel in out.chunks(16) {
            let mean: f32 = channel.iter().sum::<f32>() / 16.0;
            let var: f32 = channel.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 16.0;
            assert!(mean.abs() < 1e-4, "mean {mean}");
            assert!((var - 1.0).abs() < 1e-2, "var {var}");
        }
    }

    #[test]
    fn softplus_matches_closed_form() {
        let device = Default::default();
        let x = Tensor::<B, 1>::from_data(TensorData::new(vec![-30.0f32, 0.0, 2.0], [3]), &device);
        let out = softplus(x).into_data().convert::<f32>().to_vec::<f32>().unwrap_or_default();
        assert!(out[0] < 1e-6);
        assert!((out[1] - 2.0f32.ln()).abs() < 1e-5);
        assert!((out[2] - (1.0 + 2.0f32.exp()).ln()).abs() < 1e-5);
    }

    #[test]
    fn upsample_repeats_pixels() {
        let device = Default::default();
        let x = Tensor::<B, 4>::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 1, 2, 2]), &device);
        let up = upsample_nearest2x(x);
        assert_eq!(up.dims(), [1, 1, 4, 4]);
        assert_eq!(
            values(up),
            vec![
                1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 3.0, 3.0, 4.0, 4.0
            ]
        );
    }
}
