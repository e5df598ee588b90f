//! Loss helpers shared by the update steps.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use models::ops::instance_norm;
use models::FeatureExtractor;

/// Per-channel means subtracted after the RGB-to-BGR swap, in 0..255 units.
const BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.680];

/// Mean absolute difference.
pub fn recon_criterion<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (input - target).abs().mean()
}

/// Map tanh-range images to the input convention of the feature network: RGB is
/// reordered to BGR, rescaled to 0..255 and mean-centred. Non-RGB inputs are only
/// rescaled.
pub fn feature_preprocess<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, c, _, _] = x.dims();
    let scaled = x.add_scalar(1.0).mul_scalar(127.5);
    if c != 3 {
        return scaled;
    }
    let device = scaled.device();
    let bgr = Tensor::cat(
        vec![
            scaled.clone().narrow(1, 2, 1),
            scaled.clone().narrow(1, 1, 1),
            scaled.narrow(1, 0, 1),
        ],
        1,
    );
    let mean = Tensor::<B, 4>::from_data(TensorData::new(BGR_MEAN.to_vec(), [1, 3, 1, 1]), &device);
    bgr - mean
}

/// Mean squared distance between instance-normalized features of `img` and `target`.
pub fn perceptual_loss<B: Backend, F: FeatureExtractor<B> + ?Sized>(
    extractor: &F,
    img: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let img_fea = extractor.extract(feature_preprocess(img));
    let target_fea = extractor.extract(feature_preprocess(target));
    (instance_norm(img_fea) - instance_norm(target_fea))
        .powf_scalar(2.0)
        .mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use models::ops::scalar;
    use models::ConvFeatures;

    type B = NdArray<f32>;

    #[test]
    fn recon_is_mean_abs() {
        let device = Default::default();
        let a = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, -1.0, 0.0, 2.0], [2, 2]), &device);
        let b = Tensor::<B, 2>::zeros([2, 2], &device);
        assert!((scalar(recon_criterion(a, b)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn preprocess_swaps_channels_and_centres() {
        let device = Default::default();
        let x = Tensor::<B, 4>::from_data(
            TensorData::new(vec![-1.0f32, 0.0, 1.0], [1, 3, 1, 1]),
            &device,
        );
        let out = feature_preprocess(x)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default();
        assert!((out[0] - (255.0 - 103.939)).abs() < 1e-3);
        assert!((out[1] - (127.5 - 116.779)).abs() < 1e-3);
        assert!((out[2] - (0.0 - 123.680)).abs() < 1e-3);
    }

    #[test]
    fn perceptual_is_zero_for_identical_inputs() {
        let device = Default::default();
        let features = ConvFeatures::<B>::new(3, 4, &device);
        let data: Vec<f32> = (0..3 * 8 * 8).map(|v| ((v % 11) as f32 - 5.0) / 5.0).collect();
        let x = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 3, 8, 8]), &device);
        let loss = scalar(perceptual_loss(&features, x.clone(), x));
        assert!(loss.abs() < 1e-6, "{loss}");
    }
}
