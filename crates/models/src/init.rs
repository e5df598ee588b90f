//! Weight initialization policies selectable from the trainer config.

use burn::nn::Initializer;
use serde::{Deserialize, Serialize};

/// Distribution family applied to every conv and linear layer at construction.
///
/// Burn initializes parameters when a layer config is turned into a module, so the
/// policy is threaded into each builder instead of being applied afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitPolicy {
    /// N(0, 0.02).
    Gaussian,
    /// Xavier normal with gain sqrt(2).
    Xavier,
    /// Kaiming normal, fan-in.
    #[default]
    Kaiming,
    /// Burn's layer default (Kaiming uniform, gain 1/sqrt(3)).
    Default,
}

impl InitPolicy {
    pub fn initializer(self) -> Initializer {
        match self {
            InitPolicy::Gaussian => Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            },
            InitPolicy::Xavier => Initializer::XavierNormal {
                gain: std::f64::consts::SQRT_2,
            },
            InitPolicy::Kaiming => Initializer::KaimingNormal {
                gain: std::f64::consts::SQRT_2,
                fan_out_only: false,
            },
            InitPolicy::Default => Initializer::KaimingUniform {
                gain: 1.0 / 3.0f64.sqrt(),
                fan_out_only: false,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InitPolicy::Gaussian => "gaussian",
            InitPolicy::Xavier => "xavier",
            InitPolicy::Kaiming => "kaiming",
            InitPolicy::Default => "default",
        }
    }
}
