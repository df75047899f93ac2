pub use adam::{Adam, AdamBuilder};
pub mod adam;

pub use gradient_descent::{GradDescBuilder, GradientDescent};
pub mod gradient_descent;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

/// Learning rate used when nothing else is configured.
pub const DEFAULT_L_RATE: f32 = 0.01;

/// This trait provides interface which must be implemented by optimization
/// algorithms so that layers can step their parameters with them.
#[enum_dispatch]
pub trait OptimizerAlg {
    /// Modifies the weights based on the gradients such that a minimum can be reached.
    fn update_weights(&mut self, weights: &mut [f32], gradients: &[f32]);

    fn l_rate(&self) -> f32;

    fn set_l_rate(&mut self, l_rate: f32);

    /// Forgets any accumulated state and prepares for `len` parameters.
    fn reset(&mut self, len: usize);
}

/// Structs implementing this trait can be constructed into an optimizer
/// by being provided the length of the data they work on.
pub trait AlgBuilder {
    /// Receives data length and constructs the optimizer
    fn build(&self, len: usize) -> Optimizer;
}

/// The optimizer owned by every trainable layer.
#[enum_dispatch(OptimizerAlg)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Optimizer {
    GradientDescent(GradientDescent),
    Adam(Adam),
}

impl Default for Optimizer {
    fn default() -> Self {
        GradientDescent::new(DEFAULT_L_RATE).into()
    }
}

/// Serializable description of an optimizer, as found in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent {
        l_rate: f32,
    },
    Adam {
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        l_rate: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        GradDescBuilder::new().build()
    }
}

impl OptimizerConfig {
    /// Same configuration with a different learning rate.
    pub fn with_l_rate(mut self, rate: f32) -> Self {
        match &mut self {
            OptimizerConfig::GradientDescent { l_rate } => *l_rate = rate,
            OptimizerConfig::Adam { l_rate, .. } => *l_rate = rate,
        }
        self
    }
}

impl AlgBuilder for OptimizerConfig {
    fn build(&self, len: usize) -> Optimizer {
        match *self {
            OptimizerConfig::GradientDescent { l_rate } => GradientDescent::new(l_rate).into(),
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
                l_rate,
            } => Adam::new(beta1, beta2, epsilon, l_rate, len).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = AdamBuilder::new().l_rate(0.2).build();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"adam\""), "{}", json);
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn l_rate_is_shared_by_all_algorithms() {
        for config in &[
            GradDescBuilder::new().build(),
            AdamBuilder::new().build(),
        ] {
            let mut opt = config.clone().with_l_rate(0.3).build(4);
            assert_eq!(opt.l_rate(), 0.3);
            opt.set_l_rate(0.05);
            assert_eq!(opt.l_rate(), 0.05);
        }
    }
}
