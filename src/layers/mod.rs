pub mod dense_layer;

pub use dense_layer::{DenseBuilder, DenseLayer};

use crate::a_funcs::{Identity, Sigmoid, SoftSign, TanH};
use crate::error::Error;
use crate::initializer::Initializer;
use crate::optimizer::OptimizerConfig;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// A computational layer mapping a fixed-size input vector to a fixed-size output vector.
///
/// The layer owns its weights, its accumulated gradients and the buffers needed for evaluation.
/// Inputs and errors are always handed in by the owner, nothing is referenced between calls.
#[enum_dispatch]
pub trait Layer {
    /// Reallocate memory needed for evaluation.
    /// Used after deserialization as this memory doesnt need to be serialized.
    fn rebuild(&mut self);

    /// Evaluate the layer's output.
    fn eval(&mut self, input: &[f32]) -> &[f32];

    /// Get layer's output
    fn output(&self) -> &[f32];

    /// Get layer's input size
    fn in_size(&self) -> usize;

    /// Get layer's output size
    fn out_size(&self) -> usize;

    /// Accumulates the gradients for the sample last passed to `eval`. `error` is
    /// `output - expected` for every output and the error with respect to the input is
    /// added into `prev_error` when provided. Returns the mean absolute error.
    fn calc_gradients(&mut self, input: &[f32], error: &[f32], prev_error: Option<&mut [f32]>) -> f32;

    /// Apply one optimizer step with the accumulated gradients and reset them.
    fn learn(&mut self);

    /// Reset gradients to zero
    fn reset_gradients(&mut self);

    /// Row major `out_size x in_size` weight matrix.
    fn weights(&self) -> &[f32];

    fn biases(&self) -> &[f32];

    /// Overwrites weights and biases, used by closed-form initializers.
    fn set_params(&mut self, weights: &[f32], biases: &[f32]);

    fn l_rate(&self) -> f32;

    fn set_l_rate(&mut self, l_rate: f32);

    /// Whether the activation is the identity.
    fn is_linear(&self) -> bool;

    /// Value before activation which would produce `y`.
    fn inverse_activation(&self, y: f32) -> f32;
}

/// Trait all layer builders must implement in order to be used by units.
pub trait LayerBuilder {
    type Output: Layer;
    /// Connect a layer to an input of `in_size` values.
    fn connect(self, in_size: usize, init: &mut dyn Initializer) -> Self::Output;
}

/// This enum describes the architecture and activation function of a layer
/// so it can be easily serialized and deserialized.
#[enum_dispatch(Layer)]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum BasicLayer {
    Linear(DenseLayer<Identity>),
    Neural(DenseLayer<SoftSign>),
    Sigmoid(DenseLayer<Sigmoid>),
    TanH(DenseLayer<TanH>),
}

macro_rules! map_arch {
    ($self:expr, $layer:ident => $body:expr) => {
        match $self {
            BasicLayer::Linear($layer) => BasicLayer::Linear($body),
            BasicLayer::Neural($layer) => BasicLayer::Neural($body),
            BasicLayer::Sigmoid($layer) => BasicLayer::Sigmoid($body),
            BasicLayer::TanH($layer) => BasicLayer::TanH($body),
        }
    };
}

impl BasicLayer {
    /// Builds a layer of the given kind with default optimizer settings.
    pub fn new(kind: LayerKind, in_size: usize, size: usize, init: &mut dyn Initializer) -> Self {
        Self::with_optimizer(kind, in_size, size, init, &OptimizerConfig::default())
    }

    pub fn with_optimizer(
        kind: LayerKind,
        in_size: usize,
        size: usize,
        init: &mut dyn Initializer,
        optimizer: &OptimizerConfig,
    ) -> Self {
        match kind {
            LayerKind::Linear => DenseBuilder::new(Identity, size)
                .optimizer(optimizer.clone())
                .connect(in_size, init)
                .into(),
            LayerKind::Neural => DenseBuilder::new(SoftSign, size)
                .optimizer(optimizer.clone())
                .connect(in_size, init)
                .into(),
            LayerKind::Sigmoid => DenseBuilder::new(Sigmoid, size)
                .optimizer(optimizer.clone())
                .connect(in_size, init)
                .into(),
            LayerKind::TanH => DenseBuilder::new(TanH, size)
                .optimizer(optimizer.clone())
                .connect(in_size, init)
                .into(),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            BasicLayer::Linear(_) => LayerKind::Linear,
            BasicLayer::Neural(_) => LayerKind::Neural,
            BasicLayer::Sigmoid(_) => LayerKind::Sigmoid,
            BasicLayer::TanH(_) => LayerKind::TanH,
        }
    }

    /// Consumes the layer and returns it without the given outputs.
    pub fn without_outputs(self, indices: &[usize]) -> Self {
        map_arch!(self, l => l.without_outputs(indices))
    }

    /// Consumes the layer and returns it without the given inputs.
    pub fn without_inputs(self, indices: &[usize]) -> Self {
        map_arch!(self, l => l.without_inputs(indices))
    }
}

impl Default for BasicLayer {
    /// Empty linear layer, a placeholder while a layer is being rebuilt.
    fn default() -> Self {
        BasicLayer::Linear(DenseLayer::empty(Identity))
    }
}

impl fmt::Display for BasicLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.kind(), self.in_size(), self.out_size())
    }
}

/// Names of the available layer kinds, used to select them in descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Identity activation.
    Linear,
    /// Soft sign activation.
    Neural,
    Sigmoid,
    #[serde(rename = "tanh")]
    TanH,
}

impl Default for LayerKind {
    fn default() -> Self {
        LayerKind::Neural
    }
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Linear => "linear",
            LayerKind::Neural => "neural",
            LayerKind::Sigmoid => "sigmoid",
            LayerKind::TanH => "tanh",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LayerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(LayerKind::Linear),
            "neural" => Ok(LayerKind::Neural),
            "sigmoid" => Ok(LayerKind::Sigmoid),
            "tanh" => Ok(LayerKind::TanH),
            _ => Err(Error::UnknownKind {
                family: "layer",
                tag: s.to_owned(),
            }),
        }
    }
}

/// Mean of the absolute values, the error measure reported by every training step.
pub fn mean_abs(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.
    } else {
        values.iter().map(|v| v.abs()).sum::<f32>() / values.len() as f32
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::initializer::Xavier;

    /// Compares two arrays with the given error tolerance. Returns None if either of the arrays contains NaN.
    pub(crate) fn is_equal_ish(left: &[f32], right: &[f32], tolerance: f32) -> Option<bool> {
        assert_eq!(left.len(), right.len());
        let err = left
            .iter()
            .zip(right)
            .map(|(l, r)| f32::abs(l - r))
            .try_fold(0., |a, b| {
                if let Some(ord) = a.partial_cmp(&b) {
                    Some(match ord {
                        std::cmp::Ordering::Less => b,
                        std::cmp::Ordering::Equal => a,
                        std::cmp::Ordering::Greater => a,
                    })
                } else {
                    None
                }
            });
        err.map(|e| e < tolerance)
    }

    pub(crate) fn check(expected: &[f32], output: &[f32], tolerance: f32, id: &str) {
        let diag = || format!("expected: {:?}\nreceived: {:?}", expected, output);

        if let Some(eq) = is_equal_ish(expected, output, tolerance) {
            if eq {
                return;
            } else {
                panic!("Evaluation produced incorrect {}.\n{}", id, diag())
            }
        } else {
            panic!("Evaluation produced a NaN\n{}", diag())
        }
    }

    #[test]
    fn kinds_resolve_from_tags() {
        for kind in &[LayerKind::Linear, LayerKind::Neural, LayerKind::Sigmoid, LayerKind::TanH] {
            assert_eq!(kind.name().parse::<LayerKind>().unwrap(), *kind);
        }
        assert!(matches!(
            "relu".parse::<LayerKind>(),
            Err(Error::UnknownKind { family: "layer", .. })
        ));
    }

    #[test]
    fn basic_layer_keeps_its_kind() {
        let layer = BasicLayer::new(LayerKind::Linear, 4, 2, &mut Xavier::new());
        assert!(layer.is_linear());
        assert_eq!(layer.kind(), LayerKind::Linear);
        assert_eq!(layer.to_string(), "linear 4 -> 2");

        let layer = layer.without_outputs(&[0]);
        assert_eq!(layer.kind(), LayerKind::Linear);
        assert_eq!(layer.out_size(), 1);
    }

    #[test]
    fn serialized_kind_tags() {
        assert_eq!(serde_json::to_string(&LayerKind::TanH).unwrap(), "\"tanh\"");
        assert_eq!(
            serde_json::from_str::<LayerKind>("\"neural\"").unwrap(),
            LayerKind::Neural
        );
    }
}
