//! Trainer hyperparameters loaded from TOML.
//!
//! Every key the trainer reads is required; a missing or mistyped key fails at load
//! time instead of surfacing mid-run. Only the `[train]` driver section is optional.

use std::fs;
use std::path::{Path, PathBuf};

use models::{
    AdaInGeneratorConfig, DomainClassifierConfig, InitPolicy, MultiScaleDiscriminatorConfig,
};
use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrPolicy {
    Constant,
    #[default]
    Step,
}

/// Step decay: `lr = base * gamma ^ floor(iteration / step_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub lr_policy: LrPolicy,
    pub step_size: u64,
    pub gamma: f64,
}

/// Coefficients of the weighted loss sums. A zero cycle or perceptual weight skips
/// computing that term altogether.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub gan_w: f64,
    pub recon_x_w: f64,
    pub recon_s_w: f64,
    pub recon_c_w: f64,
    pub recon_x_cyc_w: f64,
    pub cls_w: f64,
    pub vgg_w: f64,
}

impl LossWeights {
    pub fn cycle_enabled(&self) -> bool {
        self.recon_x_cyc_w > 0.0
    }

    pub fn perceptual_enabled(&self) -> bool {
        self.vgg_w > 0.0
    }
}

/// `[cls]`: classifier topology plus its own optimizer schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSection {
    pub lr: f64,
    pub lr_policy: LrPolicy,
    pub step_size: u64,
    pub gamma: f64,
    pub dim: usize,
    pub n_layer: usize,
    pub dropout: f64,
}

impl ClassifierSection {
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            lr_policy: self.lr_policy,
            step_size: self.step_size,
            gamma: self.gamma,
        }
    }

    pub fn network(&self) -> DomainClassifierConfig {
        DomainClassifierConfig {
            dim: self.dim,
            n_layer: self.n_layer,
            dropout: self.dropout,
        }
    }
}

/// `[train]`: driver cadence and data layout for the `train` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSection {
    pub max_iter: u64,
    pub batch_size: usize,
    pub log_iter: u64,
    pub image_save_iter: u64,
    pub snapshot_save_iter: u64,
    /// Run a classifier update every `cls_iter` iterations.
    pub cls_iter: u64,
    pub seed: u64,
    /// Resize target (square) before cropping.
    pub new_size: u32,
    pub crop_image_width: u32,
    pub crop_image_height: u32,
    /// Holds `trainA`, `trainB`, `testA` and `testB` image folders.
    pub data_root: Option<PathBuf>,
}

impl Default for TrainSection {
    fn default() -> Self {
        Self {
            max_iter: 1_000_000,
            batch_size: 1,
            log_iter: 10,
            image_save_iter: 10_000,
            snapshot_save_iter: 10_000,
            cls_iter: 1,
            seed: 1,
            new_size: 256,
            crop_image_width: 256,
            crop_image_height: 256,
            data_root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub input_dim_a: usize,
    pub input_dim_b: usize,
    pub class_num_a: usize,
    pub class_num_b: usize,
    pub display_size: usize,
    pub init: InitPolicy,

    pub lr_d: f64,
    pub lr_g: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub weight_decay: f64,
    pub lr_policy: LrPolicy,
    pub step_size: u64,
    pub gamma: f64,

    pub gan_w: f64,
    pub recon_x_w: f64,
    pub recon_s_w: f64,
    pub recon_c_w: f64,
    pub recon_x_cyc_w: f64,
    pub cls_w: f64,
    pub vgg_w: f64,

    pub gen: AdaInGeneratorConfig,
    pub dis: MultiScaleDiscriminatorConfig,
    pub cls: ClassifierSection,
    #[serde(default)]
    pub train: TrainSection,
}

impl TrainerConfig {
    pub fn load(path: impl AsRef<Path>) -> TrainResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = toml::from_str(&text).map_err(|source| TrainError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> TrainResult<Self> {
        let cfg: Self = toml::from_str(text).map_err(|source| TrainError::ConfigParse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn weights(&self) -> LossWeights {
        LossWeights {
            gan_w: self.gan_w,
            recon_x_w: self.recon_x_w,
            recon_s_w: self.recon_s_w,
            recon_c_w: self.recon_c_w,
            recon_x_cyc_w: self.recon_x_cyc_w,
            cls_w: self.cls_w,
            vgg_w: self.vgg_w,
        }
    }

    /// Shared by the generator and discriminator optimizers.
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            lr_policy: self.lr_policy,
            step_size: self.step_size,
            gamma: self.gamma,
        }
    }

    pub fn style_dim(&self) -> usize {
        self.gen.style_dim
    }

    pub fn validate(&self) -> TrainResult<()> {
        let invalid = |msg: String| Err(TrainError::Config(msg));
        for (name, value) in [
            ("input_dim_a", self.input_dim_a),
            ("input_dim_b", self.input_dim_b),
            ("class_num_a", self.class_num_a),
            ("class_num_b", self.class_num_b),
            ("display_size", self.display_size),
            ("gen.dim", self.gen.dim),
            ("gen.style_dim", self.gen.style_dim),
            ("gen.mlp_dim", self.gen.mlp_dim),
            ("dis.dim", self.dis.dim),
            ("dis.n_layer", self.dis.n_layer),
            ("dis.num_scales", self.dis.num_scales),
            ("cls.dim", self.cls.dim),
            ("cls.n_layer", self.cls.n_layer),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }
        // Translations are scored with the labels of the image they were translated
        // from, so both classifiers must share one label space.
        if self.class_num_a != self.class_num_b {
            return invalid(format!(
                "class_num_a ({}) and class_num_b ({}) must match",
                self.class_num_a, self.class_num_b
            ));
        }
        let weights = self.weights();
        for (name, value) in [
            ("gan_w", weights.gan_w),
            ("recon_x_w", weights.recon_x_w),
            ("recon_s_w", weights.recon_s_w),
            ("recon_c_w", weights.recon_c_w),
            ("recon_x_cyc_w", weights.recon_x_cyc_w),
            ("cls_w", weights.cls_w),
            ("vgg_w", weights.vgg_w),
            ("weight_decay", self.weight_decay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be finite and non-negative, got {value}"));
            }
        }
        for (name, value) in [
            ("lr_d", self.lr_d),
            ("lr_g", self.lr_g),
            ("cls.lr", self.cls.lr),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        for (name, value) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&value) {
                return invalid(format!("{name} must lie in [0, 1), got {value}"));
            }
        }
        for (name, schedule) in [("", self.schedule()), ("cls.", self.cls.schedule())] {
            if schedule.lr_policy == LrPolicy::Step {
                if schedule.step_size == 0 {
                    return invalid(format!("{name}step_size must be positive"));
                }
                if !schedule.gamma.is_finite() || schedule.gamma <= 0.0 {
                    return invalid(format!("{name}gamma must be positive"));
                }
            }
        }
        if !(0.0..1.0).contains(&self.cls.dropout) {
            return invalid(format!("cls.dropout must lie in [0, 1), got {}", self.cls.dropout));
        }
        if weights.perceptual_enabled() && self.input_dim_a != self.input_dim_b {
            return invalid(
                "vgg_w > 0 compares translations with the other domain's images; \
                 input_dim_a and input_dim_b must match"
                    .to_string(),
            );
        }
        let train = &self.train;
        for (name, value) in [
            ("train.batch_size", train.batch_size as u64),
            ("train.log_iter", train.log_iter),
            ("train.image_save_iter", train.image_save_iter),
            ("train.snapshot_save_iter", train.snapshot_save_iter),
            ("train.cls_iter", train.cls_iter),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }
        if train.crop_image_width > train.new_size || train.crop_image_height > train.new_size {
            return invalid(format!(
                "crop {}x{} exceeds train.new_size {}",
                train.crop_image_width, train.crop_image_height, train.new_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 2 classes, 3 channels, 4-dim style codes, sized for 8x8 inputs.
    pub(crate) const TINY: &str = r#"
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

    #[test]
    fn parses_required_sections() {
        let cfg = TrainerConfig::from_toml_str(TINY).expect("config");
        assert_eq!(cfg.style_dim(), 4);
        assert_eq!(cfg.init, InitPolicy::Kaiming);
        assert_eq!(cfg.weights().recon_x_w, 10.0);
        assert_eq!(cfg.cls.schedule().lr_policy, LrPolicy::Constant);
        assert_eq!(cfg.train, TrainSection::default());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let text = TINY.replace("lr_g = 0.0001\n", "");
        match TrainerConfig::from_toml_str(&text) {
            Err(TrainError::ConfigParse { source, .. }) => {
                assert!(source.to_string().contains("lr_g"), "{source}")
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_init_policy_is_rejected() {
        let text = TINY.replace("init = \"kaiming\"", "init = \"orthogonal\"");
        assert!(matches!(
            TrainerConfig::from_toml_str(&text),
            Err(TrainError::ConfigParse { .. })
        ));
    }

    #[test]
    fn validation_catches_bad_values() {
        for (from, to) in [
            ("display_size = 2", "display_size = 0"),
            ("cls_w = 1", "cls_w = -1"),
            ("class_num_b = 2", "class_num_b = 3"),
            ("step_size = 100", "step_size = 0"),
            ("beta2 = 0.999", "beta2 = 1.0"),
        ] {
            let text = TINY.replace(from, to);
            assert!(
                matches!(TrainerConfig::from_toml_str(&text), Err(TrainError::Config(_))),
                "{to} should be rejected"
            );
        }
    }

    #[test]
    fn perceptual_needs_matching_channels() {
        let text = TINY.replace("input_dim_b = 3", "input_dim_b = 1");
        assert!(matches!(
            TrainerConfig::from_toml_str(&text),
            Err(TrainError::Config(_))
        ));
        let text = text.replace("vgg_w = 1", "vgg_w = 0");
        assert!(TrainerConfig::from_toml_str(&text).is_ok());
    }

    #[test]
    fn train_section_overrides_defaults() {
        let text = format!(
            "{TINY}\n[train]\nmax_iter = 20\nbatch_size = 2\nnew_size = 10\ncrop_image_width = 8\ncrop_image_height = 8\n"
        );
        let cfg = TrainerConfig::from_toml_str(&text).expect("config");
        assert_eq!(cfg.train.max_iter, 20);
        assert_eq!(cfg.train.batch_size, 2);
        assert_eq!(cfg.train.log_iter, TrainSection::default().log_iter);
    }
}
