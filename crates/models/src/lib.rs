//! Burn networks for two-domain style translation.
//!
//! This crate defines the collaborators the trainer drives:
//! - `AdaInGenerator`: content/style autoencoder with AdaIN decoding.
//! - `MultiScaleDiscriminator`: patch critic evaluated at several resolutions.
//! - `DomainClassifier`: label classifier that tallies its own accuracy.
//! - `ConvFeatures`: frozen feature network for the perceptual loss.
//!
//! The trainer only talks to them through the traits in [`contracts`], so any of
//! them can be swapped for a different topology. Each domain pair is bundled in a
//! `*Pair` module whose record is keyed by the domain tags `a` and `b`.

pub mod classifier;
pub mod contracts;
pub mod discriminator;
pub mod error;
pub mod features;
pub mod generator;
pub mod init;
pub mod mode;
pub mod ops;

pub use classifier::{ClassifierPair, DomainClassifier, DomainClassifierConfig};
pub use contracts::{
    AccuracyTally, ClsMode, FeatureExtractor, LabelClassifier, RealismCritic, StyleAutoencoder,
};
pub use discriminator::{
    DiscriminatorPair, GanType, MultiScaleDiscriminator, MultiScaleDiscriminatorConfig,
};
pub use error::{ModelError, ModelResult};
pub use features::ConvFeatures;
pub use generator::{AdaInGenerator, AdaInGeneratorConfig, GeneratorPair};
pub use init::InitPolicy;
pub use mode::{Mode, ModeGuard, ModeSwitch};

pub mod prelude {
    pub use super::{
        ClsMode, FeatureExtractor, LabelClassifier, Mode, ModeGuard, ModeSwitch, RealismCritic,
        StyleAutoencoder,
    };
}
