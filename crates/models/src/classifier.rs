//! Per-domain label classifier with running accuracy counters.

use burn::module::{Ignored, Module};
use burn::nn::conv::Conv2d;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Dropout, DropoutConfig, Linear};
use burn::tensor::activation::leaky_relu;
use burn::tensor::{backend::Backend, Int, Tensor};
use serde::{Deserialize, Serialize};

use crate::contracts::{AccuracyTally, ClsMode, LabelClassifier};
use crate::init::InitPolicy;
use crate::mode::{Mode, ModeSwitch};
use crate::ops::{conv2d, global_avg_pool, linear, scalar};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainClassifierConfig {
    pub dim: usize,
    pub n_layer: usize,
    /// Dropout before the linear head; only active in [`Mode::Train`].
    pub dropout: f64,
}

impl Default for DomainClassifierConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            n_layer: 4,
            dropout: 0.5,
        }
    }
}

#[derive(Module, Debug)]
pub struct DomainClassifier<B: Backend> {
    convs: Vec<Conv2d<B>>,
    dropout: Dropout,
    head: Linear<B>,
    mode: Ignored<Mode>,
    tally: Ignored<AccuracyTally>,
}

impl<B: Backend> DomainClassifier<B> {
    pub fn new(
        input_dim: usize,
        class_num: usize,
        cfg: &DomainClassifierConfig,
        init: InitPolicy,
        device: &B::Device,
    ) -> Self {
        let init = init.initializer();
        let mut convs = vec![conv2d([input_dim, cfg.dim], 4, 2, 1, &init, device)];
        let mut dim = cfg.dim;
        for _ in 1..cfg.n_layer {
            convs.push(conv2d([dim, dim * 2], 4, 2, 1, &init, device));
            dim *= 2;
        }
        Self {
            convs,
            dropout: DropoutConfig::new(cfg.dropout).init(),
            head: linear(dim, class_num, &init, device),
            mode: Ignored(Mode::Train),
            tally: Ignored(AccuracyTally::default()),
        }
    }

    /// Class logits `[N, class_num]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for conv in &self.convs {
            x = leaky_relu(conv.forward(x), 0.2);
        }
        let pooled = global_avg_pool(x);
        let pooled = match self.mode.0 {
            Mode::Train => self.dropout.forward(pooled),
            Mode::Eval => pooled,
        };
        self.head.forward(pooled)
    }
}

impl<B: Backend> LabelClassifier<B> for DomainClassifier<B> {
    fn calc_cls_loss(
        &mut self,
        images: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
        mode: ClsMode,
    ) -> Tensor<B, 1> {
        let logits = self.forward(images);
        let [n, _] = logits.dims();
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), labels.clone());
        let predicted = logits.detach().argmax(1).reshape([n]);
        let correct = scalar(predicted.equal(labels).float().sum());
        self.tally.0.record(mode, correct.round() as u64, n as u64);
        loss
    }

    fn tally(&self) -> &AccuracyTally {
        &self.tally.0
    }
}

impl<B: Backend> ModeSwitch for DomainClassifier<B> {
    fn mode(&self) -> Mode {
        self.mode.0
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = Ignored(mode);
    }
}

#[derive(Module, Debug)]
pub struct ClassifierPair<B: Backend> {
    pub a: DomainClassifier<B>,
    pub b: DomainClassifier<B>,
}

impl<B: Backend> ClassifierPair<B> {
    pub fn new(
        input_dims: [usize; 2],
        class_nums: [usize; 2],
        cfg: &DomainClassifierConfig,
        init: InitPolicy,
        device: &B::Device,
    ) -> Self {
        Self {
            a: DomainClassifier::new(input_dims[0], class_nums[0], cfg, init, device),
            b: DomainClassifier::new(input_dims[1], class_nums[1], cfg, init, device),
        }
    }
}

impl<B: Backend> ModeSwitch for ClassifierPair<B> {
    fn mode(&self) -> Mode {
        self.a.mode()
    }

    fn set_mode(&mut self, mode: Mode) {
        self.a.set_mode(mode);
        self.b.set_mode(mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeGuard;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn classifier(device: &<B as Backend>::Device) -> DomainClassifier<B> {
        let cfg = DomainClassifierConfig {
            dim: 4,
            n_layer: 2,
            dropout: 0.5,
        };
        DomainClassifier::new(3, 2, &cfg, InitPolicy::Kaiming, device)
    }

    #[test]
    fn cls_loss_updates_only_its_mode() {
        let device = Default::default();
        let mut cls = classifier(&device);
        let images = Tensor::<B, 4>::zeros([3, 3, 8, 8], &device);
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 1], [3]), &device);
        let loss = scalar(cls.calc_cls_loss(images, labels, ClsMode::Cls));
        assert!(loss.is_finite() && loss >= 0.0);
        assert_eq!(cls.tally().cls_total, 3);
        assert_eq!(cls.tally().gen_total, 0);
        assert!(cls.tally().accuracy(ClsMode::Gen).is_err());
        assert!(cls.tally().cls_count <= 3);
    }

    #[test]
    fn eval_mode_is_deterministic() {
        let device = Default::default();
        let mut cls = classifier(&device);
        let data: Vec<f32> = (0..2 * 3 * 8 * 8).map(|v| ((v % 7) as f32 - 3.0) / 3.0).collect();
        let images = Tensor::<B, 4>::from_data(TensorData::new(data, [2, 3, 8, 8]), &device);
        let guard = ModeGuard::eval(&mut cls);
        let first = guard.forward(images.clone()).into_data();
        let second = guard.forward(images).into_data();
        assert_eq!(first, second);
        drop(guard);
        assert_eq!(cls.mode(), Mode::Train);
    }

    #[test]
    fn pair_switches_both_members() {
        let device = Default::default();
        let cfg = DomainClassifierConfig::default();
        let mut pair = ClassifierPair::<B>::new([3, 1], [2, 2], &cfg, InitPolicy::Default, &device);
        pair.set_mode(Mode::Eval);
        assert_eq!(pair.a.mode(), Mode::Eval);
        assert_eq!(pair.b.mode(), Mode::Eval);
    }
}
