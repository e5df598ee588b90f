#![allow(dead_code)]

use burn::backend::Autodiff;
use burn::tensor::{Int, Tensor, TensorData};
use burn_ndarray::NdArray;
use domain_dataset::{DomainBatch, LabeledImage};
use training::TrainerConfig;

pub type B = Autodiff<NdArray<f32>>;

pub const SIDE: usize = 8;

/// 3-channel, 2-class, 4-dim style config sized for 8x8 inputs.
pub const TINY: &str = r#"
    input_dim_a = 3
    input_dim_b = 3
    class_num_a = 2
    class_num_b = 2
    display_size = 2
    init = "kaiming"
    lr_d = 0.0001
    lr_g = 0.0001
    beta1 = 0.5
    beta2 = 0.999
    weight_decay = 0.0001
    lr_policy = "step"
    step_size = 100
    gamma = 0.5
    gan_w = 1
    recon_x_w = 10
    recon_s_w = 1
    recon_c_w = 1
    recon_x_cyc_w = 1
    cls_w = 1
    vgg_w = 1

    [gen]
    dim = 4
    style_dim = 4
    mlp_dim = 8
    n_downsample = 2
    n_res = 1

    [dis]
    dim = 4
    n_layer = 2
    num_scales = 2
    gan_type = "lsgan"

    [cls]
    lr = 0.0002
    lr_policy = "constant"
    step_size = 1
    gamma = 1.0
    dim = 4
    n_layer = 2
    dropout = 0.5
"#;

pub fn config() -> TrainerConfig {
    TrainerConfig::from_toml_str(TINY).expect("tiny config")
}

/// Config with individual `key = value` lines replaced.
pub fn config_with(overrides: &[(&str, &str)]) -> TrainerConfig {
    let mut text = TINY.to_string();
    for (from, to) in overrides {
        assert!(text.contains(from), "{from} not in config");
        text = text.replacen(from, to, 1);
    }
    TrainerConfig::from_toml_str(&text).expect("config")
}

/// Deterministic image in [-1, 1]; `phase` shifts the pattern.
pub fn pattern(phase: usize) -> Vec<f32> {
    (0..3 * SIDE * SIDE)
        .map(|i| (((i * 7 + phase * 13) % 17) as f32 / 8.0) - 1.0)
        .collect()
}

pub fn batch(phases: &[usize], labels: &[i64]) -> DomainBatch<B> {
    let device = Default::default();
    let n = phases.len();
    let data: Vec<f32> = phases.iter().flat_map(|p| pattern(*p)).collect();
    DomainBatch {
        images: Tensor::<B, 4>::from_data(TensorData::new(data, [n, 3, SIDE, SIDE]), &device),
        labels: Tensor::<B, 1, Int>::from_data(TensorData::new(labels.to_vec(), [n]), &device),
    }
}

pub fn labeled(phase: usize, label: usize) -> LabeledImage {
    LabeledImage {
        chw: pattern(phase),
        channels: 3,
        width: SIDE as u32,
        height: SIDE as u32,
        label,
    }
}
