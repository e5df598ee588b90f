//! Two-domain translation trainer.
//!
//! Owns both generators, both discriminators, both classifiers and one Adam
//! optimizer per pair. Every update is a standalone forward/backward/step cycle
//! that returns its loss values; nothing is carried between calls except the
//! model weights, optimizer state, schedules and classifier accuracy tallies.

use burn::module::{AutodiffModule, Module};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use domain_dataset::DomainBatch;
use models::ops::scalar;
use models::{
    ClassifierPair, ClsMode, ConvFeatures, DiscriminatorPair, FeatureExtractor, GeneratorPair,
    InitPolicy, LabelClassifier, Mode, ModeGuard, ModeSwitch, RealismCritic, StyleAutoencoder,
};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use sha2::{Digest, Sha256};

use crate::config::TrainerConfig;
use crate::error::{TrainError, TrainResult};
use crate::losses::{perceptual_loss, recon_criterion};
use crate::schedule::Schedule;

pub(crate) type GenOptim<B> = OptimizerAdaptor<Adam, GeneratorPair<B>, B>;
pub(crate) type DisOptim<B> = OptimizerAdaptor<Adam, DiscriminatorPair<B>, B>;
pub(crate) type ClsOptim<B> = OptimizerAdaptor<Adam, ClassifierPair<B>, B>;

/// Optimizer state record; identical for all three optimizers.
pub type OptimRecord<B> = <GenOptim<B> as Optimizer<GeneratorPair<B>, B>>::Record;

/// Width of the default perceptual feature network's first stage.
const FEATURE_WIDTH: usize = 16;

/// Losses of one [`Trainer::generator_step`]. Disabled terms read 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeneratorLosses {
    pub recon_x_a: f32,
    pub recon_x_b: f32,
    pub recon_s_a: f32,
    pub recon_s_b: f32,
    pub recon_c_a: f32,
    pub recon_c_b: f32,
    pub cycrecon_x_a: f32,
    pub cycrecon_x_b: f32,
    pub adv_a: f32,
    pub adv_b: f32,
    pub cls_a: f32,
    pub cls_b: f32,
    pub vgg_a: f32,
    pub vgg_b: f32,
    pub total: f32,
}

impl GeneratorLosses {
    /// The fourteen terms by name, in weighting order.
    pub fn terms(&self) -> [(&'static str, f32); 14] {
        [
            ("recon_x_a", self.recon_x_a),
            ("recon_x_b", self.recon_x_b),
            ("recon_s_a", self.recon_s_a),
            ("recon_s_b", self.recon_s_b),
            ("recon_c_a", self.recon_c_a),
            ("recon_c_b", self.recon_c_b),
            ("cycrecon_x_a", self.cycrecon_x_a),
            ("cycrecon_x_b", self.cycrecon_x_b),
            ("adv_a", self.adv_a),
            ("adv_b", self.adv_b),
            ("cls_a", self.cls_a),
            ("cls_b", self.cls_b),
            ("vgg_a", self.vgg_a),
            ("vgg_b", self.vgg_b),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiscriminatorLosses {
    pub dis_a: f32,
    pub dis_b: f32,
    pub total: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassifierLosses {
    pub cls_a: f32,
    pub cls_b: f32,
    pub total: f32,
}

/// Visualization batch from [`Trainer::sample`], one row per example.
#[derive(Debug, Clone)]
pub struct SampleOutputs<B: Backend> {
    pub x_a: Tensor<B, 4>,
    pub x_a_recon: Tensor<B, 4>,
    /// A content with the fixed display style of B.
    pub x_ab1: Tensor<B, 4>,
    /// A content with a freshly drawn style of B.
    pub x_ab2: Tensor<B, 4>,
    pub x_b: Tensor<B, 4>,
    pub x_b_recon: Tensor<B, 4>,
    pub x_ba1: Tensor<B, 4>,
    pub x_ba2: Tensor<B, 4>,
}

impl<B: Backend> SampleOutputs<B> {
    /// `(a -> b rows, b -> a rows)` for grid rendering.
    pub fn into_grids(self) -> (Vec<Tensor<B, 4>>, Vec<Tensor<B, 4>>) {
        (
            vec![self.x_a, self.x_a_recon, self.x_ab1, self.x_ab2],
            vec![self.x_b, self.x_b_recon, self.x_ba1, self.x_ba2],
        )
    }
}

/// SHA-256 of each pair's serialized parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDigests {
    pub generators: String,
    pub discriminators: String,
    pub classifiers: String,
}

/// Draw `[n, style_dim, 1, 1]` standard-normal style codes from `rng`.
pub fn sample_style<B: Backend, R: Rng + ?Sized>(
    n: usize,
    style_dim: usize,
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, 4> {
    let values: Vec<f32> = (0..n * style_dim)
        .map(|_| StandardNormal.sample(rng))
        .collect();
    Tensor::from_data(TensorData::new(values, [n, style_dim, 1, 1]), device)
}

fn adam(cfg: &TrainerConfig) -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(cfg.beta1 as f32)
        .with_beta_2(cfg.beta2 as f32)
        .with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay as f32)))
}

fn weighted_sum<B: Backend>(terms: Vec<(f64, Tensor<B, 1>)>, device: &B::Device) -> Tensor<B, 1> {
    terms
        .into_iter()
        .map(|(w, t)| t.mul_scalar(w))
        .reduce(|acc, t| acc + t)
        .unwrap_or_else(|| Tensor::zeros([1], device))
}

fn digest<B: Backend, M: Module<B>>(module: &M) -> TrainResult<String> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let bytes = Recorder::<B>::record(&recorder, module.clone().into_record(), ())
        .map_err(TrainError::recorder("<parameters>"))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

pub struct Trainer<B: AutodiffBackend> {
    pub(crate) config: TrainerConfig,
    pub(crate) device: B::Device,
    pub(crate) generators: GeneratorPair<B>,
    pub(crate) discriminators: DiscriminatorPair<B>,
    pub(crate) classifiers: ClassifierPair<B>,
    features: Box<dyn FeatureExtractor<B>>,
    pub(crate) gen_opt: GenOptim<B>,
    pub(crate) dis_opt: DisOptim<B>,
    pub(crate) cls_opt: ClsOptim<B>,
    pub(crate) gen_schedule: Schedule,
    pub(crate) dis_schedule: Schedule,
    pub(crate) cls_schedule: Schedule,
    display_style_a: Tensor<B, 4>,
    display_style_b: Tensor<B, 4>,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Build all six networks, three optimizers and three schedules.
    ///
    /// Generators and classifiers use the configured init policy; discriminators
    /// always use the gaussian policy. The two display style batches are drawn
    /// from `rng` here and never resampled.
    pub fn new<R: Rng + ?Sized>(
        config: TrainerConfig,
        device: &B::Device,
        rng: &mut R,
    ) -> TrainResult<Self> {
        config.validate()?;
        let dims = [config.input_dim_a, config.input_dim_b];
        let generators = GeneratorPair::new(dims, &config.gen, config.init, device);
        let discriminators = DiscriminatorPair::new(dims, &config.dis, InitPolicy::Gaussian, device);
        let classifiers = ClassifierPair::new(
            dims,
            [config.class_num_a, config.class_num_b],
            &config.cls.network(),
            config.init,
            device,
        );
        let features: Box<dyn FeatureExtractor<B>> =
            Box::new(ConvFeatures::new(config.input_dim_a, FEATURE_WIDTH, device));

        let adam = adam(&config);
        let schedule = config.schedule();
        let style_dim = config.style_dim();
        let display_style_a = sample_style(config.display_size, style_dim, rng, device);
        let display_style_b = sample_style(config.display_size, style_dim, rng, device);

        tracing::info!(
            init = config.init.as_str(),
            style_dim,
            display_size = config.display_size,
            "trainer initialised"
        );
        Ok(Self {
            gen_opt: adam.init(),
            dis_opt: adam.init(),
            cls_opt: adam.init(),
            gen_schedule: Schedule::new(config.lr_g, schedule)?,
            dis_schedule: Schedule::new(config.lr_d, schedule)?,
            cls_schedule: Schedule::new(config.cls.lr, config.cls.schedule())?,
            device: device.clone(),
            generators,
            discriminators,
            classifiers,
            features,
            display_style_a,
            display_style_b,
            config,
        })
    }

    /// Swap the perceptual feature network, e.g. for a pretrained one.
    pub fn with_feature_extractor(mut self, extractor: Box<dyn FeatureExtractor<B>>) -> Self {
        self.features = extractor;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn generators(&self) -> &GeneratorPair<B> {
        &self.generators
    }

    pub fn discriminators(&self) -> &DiscriminatorPair<B> {
        &self.discriminators
    }

    pub fn classifiers(&self) -> &ClassifierPair<B> {
        &self.classifiers
    }

    pub fn style_dim(&self) -> usize {
        self.config.style_dim()
    }

    /// Current `(gen, dis, cls)` learning rates.
    pub fn learning_rates(&self) -> (f64, f64, f64) {
        (
            self.gen_schedule.lr(),
            self.dis_schedule.lr(),
            self.cls_schedule.lr(),
        )
    }

    /// Advance the discriminator and generator schedules by one iteration.
    /// The classifier rate stays at its configured base.
    pub fn update_learning_rate(&mut self) {
        self.dis_schedule.step();
        self.gen_schedule.step();
    }

    /// One generator update on paired batches. Only generator weights move;
    /// classifier accuracy counters for translated images advance as a side effect.
    pub fn generator_step<R: Rng + ?Sized>(
        &mut self,
        batch_a: &DomainBatch<B>,
        batch_b: &DomainBatch<B>,
        rng: &mut R,
    ) -> TrainResult<GeneratorLosses> {
        let weights = self.config.weights();
        let style_dim = self.style_dim();
        let (x_a, y_a) = (batch_a.images.clone(), batch_a.labels.clone());
        let (x_b, y_b) = (batch_b.images.clone(), batch_b.labels.clone());
        let s_a = sample_style::<B, R>(x_a.dims()[0], style_dim, rng, &self.device);
        let s_b = sample_style::<B, R>(x_b.dims()[0], style_dim, rng, &self.device);

        let gens = &self.generators;
        let (c_a, s_a_prime) = gens.a.encode(x_a.clone());
        let (c_b, s_b_prime) = gens.b.encode(x_b.clone());
        let x_a_recon = gens.a.decode(c_a.clone(), s_a_prime.clone())?;
        let x_b_recon = gens.b.decode(c_b.clone(), s_b_prime.clone())?;
        let x_ba = gens.a.decode(c_b.clone(), s_a.clone())?;
        let x_ab = gens.b.decode(c_a.clone(), s_b.clone())?;
        let (c_b_recon, s_a_recon) = gens.a.encode(x_ba.clone());
        let (c_a_recon, s_b_recon) = gens.b.encode(x_ab.clone());
        let cycle = if weights.cycle_enabled() {
            let x_aba = gens.a.decode(c_a_recon.clone(), s_a_prime)?;
            let x_bab = gens.b.decode(c_b_recon.clone(), s_b_prime)?;
            Some((
                recon_criterion(x_aba, x_a.clone()),
                recon_criterion(x_bab, x_b.clone()),
            ))
        } else {
            None
        };

        let recon_x_a = recon_criterion(x_a_recon, x_a.clone());
        let recon_x_b = recon_criterion(x_b_recon, x_b.clone());
        let recon_s_a = recon_criterion(s_a_recon, s_a);
        let recon_s_b = recon_criterion(s_b_recon, s_b);
        let recon_c_a = recon_criterion(c_a_recon, c_a);
        let recon_c_b = recon_criterion(c_b_recon, c_b);

        let adv_a = self.discriminators.a.calc_gen_loss(x_ba.clone());
        let adv_b = self.discriminators.b.calc_gen_loss(x_ab.clone());

        // Translations keep the label of the image they came from.
        let (cls_a, cls_b) = {
            let mut classifiers = ModeGuard::eval(&mut self.classifiers);
            let cls_a = classifiers
                .a
                .calc_cls_loss(x_ba.clone(), y_b, ClsMode::Gen);
            let cls_b = classifiers
                .b
                .calc_cls_loss(x_ab.clone(), y_a, ClsMode::Gen);
            (cls_a, cls_b)
        };

        let perceptual = if weights.perceptual_enabled() {
            let extractor = self.features.as_ref();
            Some((
                perceptual_loss(extractor, x_ba, x_b),
                perceptual_loss(extractor, x_ab, x_a),
            ))
        } else {
            None
        };

        let mut losses = GeneratorLosses {
            recon_x_a: scalar(recon_x_a.clone()),
            recon_x_b: scalar(recon_x_b.clone()),
            recon_s_a: scalar(recon_s_a.clone()),
            recon_s_b: scalar(recon_s_b.clone()),
            recon_c_a: scalar(recon_c_a.clone()),
            recon_c_b: scalar(recon_c_b.clone()),
            adv_a: scalar(adv_a.clone()),
            adv_b: scalar(adv_b.clone()),
            cls_a: scalar(cls_a.clone()),
            cls_b: scalar(cls_b.clone()),
            ..GeneratorLosses::default()
        };

        let mut terms = vec![
            (weights.gan_w, adv_a),
            (weights.gan_w, adv_b),
            (weights.recon_x_w, recon_x_a),
            (weights.recon_s_w, recon_s_a),
            (weights.recon_c_w, recon_c_a),
            (weights.recon_x_w, recon_x_b),
            (weights.recon_s_w, recon_s_b),
            (weights.recon_c_w, recon_c_b),
        ];
        if let Some((cyc_a, cyc_b)) = cycle {
            losses.cycrecon_x_a = scalar(cyc_a.clone());
            losses.cycrecon_x_b = scalar(cyc_b.clone());
            terms.push((weights.recon_x_cyc_w, cyc_a));
            terms.push((weights.recon_x_cyc_w, cyc_b));
        }
        terms.push((weights.cls_w, cls_a));
        terms.push((weights.cls_w, cls_b));
        if let Some((vgg_a, vgg_b)) = perceptual {
            losses.vgg_a = scalar(vgg_a.clone());
            losses.vgg_b = scalar(vgg_b.clone());
            terms.push((weights.vgg_w, vgg_a));
            terms.push((weights.vgg_w, vgg_b));
        }

        let total = weighted_sum(terms, &self.device);
        losses.total = scalar(total.clone());
        let grads = GradientsParams::from_grads(total.backward(), &self.generators);
        self.generators = self
            .gen_opt
            .step(self.gen_schedule.lr(), self.generators.clone(), grads);
        tracing::debug!(?losses, "generator step");
        Ok(losses)
    }

    /// One discriminator update. Translations are detached before scoring, so no
    /// gradient reaches the generators.
    pub fn discriminator_step<R: Rng + ?Sized>(
        &mut self,
        batch_a: &DomainBatch<B>,
        batch_b: &DomainBatch<B>,
        rng: &mut R,
    ) -> TrainResult<DiscriminatorLosses> {
        let weights = self.config.weights();
        let style_dim = self.style_dim();
        let x_a = batch_a.images.clone();
        let x_b = batch_b.images.clone();
        let s_a = sample_style::<B, R>(x_a.dims()[0], style_dim, rng, &self.device);
        let s_b = sample_style::<B, R>(x_b.dims()[0], style_dim, rng, &self.device);

        let (c_a, _) = self.generators.a.encode(x_a.clone());
        let (c_b, _) = self.generators.b.encode(x_b.clone());
        let x_ba = self.generators.a.decode(c_b, s_a)?.detach();
        let x_ab = self.generators.b.decode(c_a, s_b)?.detach();

        let dis_a = self.discriminators.a.calc_dis_loss(x_ba, x_a);
        let dis_b = self.discriminators.b.calc_dis_loss(x_ab, x_b);
        let losses_a = scalar(dis_a.clone());
        let losses_b = scalar(dis_b.clone());
        let total = weighted_sum(
            vec![(weights.gan_w, dis_a), (weights.gan_w, dis_b)],
            &self.device,
        );
        let losses = DiscriminatorLosses {
            dis_a: losses_a,
            dis_b: losses_b,
            total: scalar(total.clone()),
        };
        let grads = GradientsParams::from_grads(total.backward(), &self.discriminators);
        self.discriminators =
            self.dis_opt
                .step(self.dis_schedule.lr(), self.discriminators.clone(), grads);
        tracing::debug!(?losses, "discriminator step");
        Ok(losses)
    }

    /// One supervised classifier update on real images.
    pub fn classifier_step(
        &mut self,
        batch_a: &DomainBatch<B>,
        batch_b: &DomainBatch<B>,
    ) -> TrainResult<ClassifierLosses> {
        let weights = self.config.weights();
        let cls_a = self.classifiers.a.calc_cls_loss(
            batch_a.images.clone(),
            batch_a.labels.clone(),
            ClsMode::Cls,
        );
        let cls_b = self.classifiers.b.calc_cls_loss(
            batch_b.images.clone(),
            batch_b.labels.clone(),
            ClsMode::Cls,
        );
        let (value_a, value_b) = (scalar(cls_a.clone()), scalar(cls_b.clone()));
        let total = weighted_sum(
            vec![(weights.cls_w, cls_a), (weights.cls_w, cls_b)],
            &self.device,
        );
        let losses = ClassifierLosses {
            cls_a: value_a,
            cls_b: value_b,
            total: scalar(total.clone()),
        };
        let grads = GradientsParams::from_grads(total.backward(), &self.classifiers);
        self.classifiers = self
            .cls_opt
            .step(self.cls_schedule.lr(), self.classifiers.clone(), grads);
        tracing::debug!(?losses, "classifier step");
        Ok(losses)
    }

    fn display_styles(&self, n: usize) -> TrainResult<(Tensor<B, 4>, Tensor<B, 4>)> {
        if n > self.config.display_size {
            return Err(TrainError::DisplayBatch {
                requested: n,
                display_size: self.config.display_size,
            });
        }
        Ok((
            self.display_style_a.clone().narrow(0, 0, n),
            self.display_style_b.clone().narrow(0, 0, n),
        ))
    }

    /// Translate with the fixed display styles, returning `(x_ab, x_ba)`.
    ///
    /// Runs on the inner backend in eval mode; no graph is recorded and no weights
    /// change.
    pub fn forward(
        &mut self,
        x_a: Tensor<B, 4>,
        x_b: Tensor<B, 4>,
    ) -> TrainResult<(Tensor<B::InnerBackend, 4>, Tensor<B::InnerBackend, 4>)> {
        let (display_a, _) = self.display_styles(x_b.dims()[0])?;
        let (_, display_b) = self.display_styles(x_a.dims()[0])?;
        let this = ModeGuard::eval(self);
        let gens = this.generators.valid();
        let (c_a, _) = gens.a.encode(x_a.inner());
        let (c_b, _) = gens.b.encode(x_b.inner());
        let x_ba = gens.a.decode(c_b, display_a.inner())?;
        let x_ab = gens.b.decode(c_a, display_b.inner())?;
        Ok((x_ab, x_ba))
    }

    /// Per-example reconstructions plus cross translations under the display style
    /// and under a style freshly drawn from `rng`.
    pub fn sample<R: Rng + ?Sized>(
        &mut self,
        x_a: Tensor<B, 4>,
        x_b: Tensor<B, 4>,
        rng: &mut R,
    ) -> TrainResult<SampleOutputs<B::InnerBackend>> {
        let n = x_a.dims()[0];
        let n_b = x_b.dims()[0];
        if n_b != n {
            return Err(models::ModelError::BatchMismatch {
                content: n,
                style: n_b,
            }
            .into());
        }
        let (s_a1, s_b1) = self.display_styles(n)?;
        let style_dim = self.style_dim();
        let s_a2 = sample_style::<B::InnerBackend, R>(n, style_dim, rng, &self.device);
        let s_b2 = sample_style::<B::InnerBackend, R>(n, style_dim, rng, &self.device);
        let (s_a1, s_b1) = (s_a1.inner(), s_b1.inner());
        let (x_a, x_b) = (x_a.inner(), x_b.inner());

        let this = ModeGuard::eval(self);
        let gens = this.generators.valid();
        let mut rows: [Vec<Tensor<B::InnerBackend, 4>>; 6] = Default::default();
        for i in 0..n {
            let (c_a, s_a_fake) = gens.a.encode(x_a.clone().narrow(0, i, 1));
            let (c_b, s_b_fake) = gens.b.encode(x_b.clone().narrow(0, i, 1));
            rows[0].push(gens.a.decode(c_a.clone(), s_a_fake)?);
            rows[1].push(gens.b.decode(c_b.clone(), s_b_fake)?);
            rows[2].push(gens.a.decode(c_b.clone(), s_a1.clone().narrow(0, i, 1))?);
            rows[3].push(gens.a.decode(c_b, s_a2.clone().narrow(0, i, 1))?);
            rows[4].push(gens.b.decode(c_a.clone(), s_b1.clone().narrow(0, i, 1))?);
            rows[5].push(gens.b.decode(c_a, s_b2.clone().narrow(0, i, 1))?);
        }
        let [x_a_recon, x_b_recon, x_ba1, x_ba2, x_ab1, x_ab2] = rows.map(|r| Tensor::cat(r, 0));
        Ok(SampleOutputs {
            x_a,
            x_a_recon,
            x_ab1,
            x_ab2,
            x_b,
            x_b_recon,
            x_ba1,
            x_ba2,
        })
    }

    fn tally_accuracy(
        classifier: &impl LabelClassifier<B>,
        mode: ClsMode,
    ) -> TrainResult<f64> {
        Ok(classifier.tally().accuracy(mode)?)
    }

    /// Share of translations into A classified with their source label.
    pub fn gen_a_acc(&self) -> TrainResult<f64> {
        Self::tally_accuracy(&self.classifiers.a, ClsMode::Gen)
    }

    pub fn gen_b_acc(&self) -> TrainResult<f64> {
        Self::tally_accuracy(&self.classifiers.b, ClsMode::Gen)
    }

    /// Share of real A images classified correctly.
    pub fn cls_a_acc(&self) -> TrainResult<f64> {
        Self::tally_accuracy(&self.classifiers.a, ClsMode::Cls)
    }

    pub fn cls_b_acc(&self) -> TrainResult<f64> {
        Self::tally_accuracy(&self.classifiers.b, ClsMode::Cls)
    }

    pub fn parameter_digests(&self) -> TrainResult<ParameterDigests> {
        Ok(ParameterDigests {
            generators: digest::<B, _>(&self.generators)?,
            discriminators: digest::<B, _>(&self.discriminators)?,
            classifiers: digest::<B, _>(&self.classifiers)?,
        })
    }
}

/// Phase of the mode-dependent sub-networks (classifier dropout).
impl<B: AutodiffBackend> ModeSwitch for Trainer<B> {
    fn mode(&self) -> Mode {
        self.classifiers.mode()
    }

    fn set_mode(&mut self, mode: Mode) {
        self.classifiers.set_mode(mode);
    }
}
