//! Auto-encoder units, the training atoms replicated by convolution layers.
//!
//! A unit never keeps a reference to the buffers it reads from or writes to.
//! Every operation which needs a patch receives the source block and the
//! patch corner, so a single unit can be moved across a whole grid.

pub mod codec;
pub mod dct;
pub mod frequency;
pub mod lda;
pub mod pca;
pub mod pooling;
pub mod solvers;
pub mod standard;
pub mod stochastic;

pub use codec::Codec;
pub use dct::Dct;
pub use frequency::FrequencyUnit;
pub use lda::LdaUnit;
pub use pca::PcaUnit;
pub use pooling::{PoolSelector, PoolingUnit};
pub use standard::StandardUnit;
pub use stochastic::{StochasticMode, StochasticUnit};

use crate::{
    data::{DataBlock, Shape},
    error::{Error, Result},
    initializer::Initializer,
    layers::LayerKind,
    optimizer::OptimizerConfig,
};

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

#[enum_dispatch]
pub trait Unit {
    /// Extent of the patch the unit reads.
    fn input_shape(&self) -> Shape;

    /// Number of encoded values.
    fn output_depth(&self) -> usize;

    /// Reallocates scratch buffers, used after deserialization.
    fn rebuild(&mut self);

    /// Encodes the patch of `input` whose corner is `(x, y)`.
    fn encode(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<&[f32]>;

    /// Values produced by the last `encode`.
    fn encoded(&self) -> &[f32];

    /// Reconstructs the last encoded patch.
    fn decode(&mut self) -> Result<&[f32]>;

    /// Values produced by the last `decode`, in patch order.
    fn decoded(&self) -> &[f32];

    /// Adds the reconstruction gradients of the patch at `(x, y)` without applying them.
    /// Returns the mean absolute reconstruction error.
    fn accumulate(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32>;

    /// Same as [accumulate](Unit::accumulate) for units which need the class of the patch.
    fn accumulate_labelled(&mut self, input: &DataBlock, x: usize, y: usize, _label: usize) -> Result<f32> {
        self.accumulate(input, x, y)
    }

    /// Applies everything gathered by `accumulate` since the last call in a single step.
    fn learn_reconstruction(&mut self) -> Result<()>;

    /// One reconstruction training step on the patch at `(x, y)`.
    /// Returns the mean absolute reconstruction error.
    fn train(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32> {
        let error = self.accumulate(input, x, y)?;
        self.learn_reconstruction()?;
        Ok(error)
    }

    /// Training step for units which need to know the class of the patch.
    fn train_labelled(&mut self, input: &DataBlock, x: usize, y: usize, label: usize) -> Result<f32> {
        let error = self.accumulate_labelled(input, x, y, label)?;
        self.learn_reconstruction()?;
        Ok(error)
    }

    /// Ends a pre-training phase.
    fn training_done(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_training(&mut self) {}

    fn stop_training(&mut self) {}

    /// Re-encodes the patch at `(x, y)`, accumulates gradients for `error` on the encoded
    /// values and weighted-pastes the input error into `upstream` at the same corner.
    /// Returns the mean absolute value of `error`.
    fn back_propagate(
        &mut self,
        input: &DataBlock,
        x: usize,
        y: usize,
        error: &[f32],
        upstream: Option<&mut DataBlock>,
    ) -> Result<f32>;

    /// Applies the accumulated gradients.
    fn learn(&mut self) -> Result<()>;

    fn clear_gradients(&mut self);

    /// `None` for units without weights.
    fn learning_rate(&self) -> Option<f32>;

    fn set_learning_rate(&mut self, rate: f32);

    /// Removes encoded features, shifting the following ones down.
    fn delete_features(&mut self, indices: &[usize]) -> Result<()>;

    /// Removes channels of the input patch. Returns the encoded features which
    /// disappear as a consequence.
    fn delete_input_channels(&mut self, channels: &[usize]) -> Result<Vec<usize>>;

    fn is_trainable(&self) -> bool {
        true
    }

    fn supports_feature_deletion(&self) -> bool {
        true
    }

    fn kind(&self) -> UnitKind;
}

/// Every kind of unit a convolution layer can replicate.
///
/// Scratch buffers are not serialized, a deserialized unit is rebuilt before being handed out.
#[enum_dispatch(Unit)]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "UnitSnapshot", from = "UnitSnapshot")]
pub enum AutoEncoder {
    StandardUnit(StandardUnit),
    PcaUnit(PcaUnit),
    LdaUnit(LdaUnit),
    PoolingUnit(PoolingUnit),
    StochasticUnit(StochasticUnit),
    FrequencyUnit(FrequencyUnit),
}

/// Serialized form of an [AutoEncoder], with the same tags.
#[derive(Serialize, Deserialize)]
enum UnitSnapshot {
    StandardUnit(StandardUnit),
    PcaUnit(PcaUnit),
    LdaUnit(LdaUnit),
    PoolingUnit(PoolingUnit),
    StochasticUnit(StochasticUnit),
    FrequencyUnit(FrequencyUnit),
}

impl From<UnitSnapshot> for AutoEncoder {
    fn from(snapshot: UnitSnapshot) -> Self {
        let mut unit: AutoEncoder = match snapshot {
            UnitSnapshot::StandardUnit(u) => u.into(),
            UnitSnapshot::PcaUnit(u) => u.into(),
            UnitSnapshot::LdaUnit(u) => u.into(),
            UnitSnapshot::PoolingUnit(u) => u.into(),
            UnitSnapshot::StochasticUnit(u) => u.into(),
            UnitSnapshot::FrequencyUnit(u) => u.into(),
        };
        unit.rebuild();
        unit
    }
}

impl From<AutoEncoder> for UnitSnapshot {
    fn from(unit: AutoEncoder) -> Self {
        match unit {
            AutoEncoder::StandardUnit(u) => UnitSnapshot::StandardUnit(u),
            AutoEncoder::PcaUnit(u) => UnitSnapshot::PcaUnit(u),
            AutoEncoder::LdaUnit(u) => UnitSnapshot::LdaUnit(u),
            AutoEncoder::PoolingUnit(u) => UnitSnapshot::PoolingUnit(u),
            AutoEncoder::StochasticUnit(u) => UnitSnapshot::StochasticUnit(u),
            AutoEncoder::FrequencyUnit(u) => UnitSnapshot::FrequencyUnit(u),
        }
    }
}

impl fmt::Display for AutoEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.kind(),
            self.input_shape(),
            self.output_depth()
        )
    }
}

/// Tags naming the unit kinds in descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Standard,
    Pca,
    Lda,
    MaxPooling,
    Pooling,
    Binary,
    Real,
    Frequency,
}

impl UnitKind {
    pub fn name(&self) -> &'static str {
        match self {
            UnitKind::Standard => "standard",
            UnitKind::Pca => "pca",
            UnitKind::Lda => "lda",
            UnitKind::MaxPooling => "max_pooling",
            UnitKind::Pooling => "pooling",
            UnitKind::Binary => "binary",
            UnitKind::Real => "real",
            UnitKind::Frequency => "frequency",
        }
    }

    pub fn is_pooling(&self) -> bool {
        matches!(self, UnitKind::MaxPooling | UnitKind::Pooling)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UnitKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "standard" => UnitKind::Standard,
            "pca" => UnitKind::Pca,
            "lda" => UnitKind::Lda,
            "max_pooling" => UnitKind::MaxPooling,
            "pooling" => UnitKind::Pooling,
            "binary" => UnitKind::Binary,
            "real" => UnitKind::Real,
            "frequency" => UnitKind::Frequency,
            _ => {
                return Err(Error::UnknownKind {
                    family: "unit",
                    tag: s.to_owned(),
                })
            }
        })
    }
}

/// Builds any kind of unit from its dimensions.
#[derive(Clone, Debug)]
pub struct UnitBuilder {
    kind: UnitKind,
    shape: Shape,
    output_depth: usize,
    encoder: LayerKind,
    decoder: LayerKind,
    optimizer: OptimizerConfig,
    selector: PoolSelector,
    seed: u64,
}

impl UnitBuilder {
    pub fn new(kind: UnitKind, width: usize, height: usize, depth: usize, output_depth: usize) -> Self {
        Self {
            kind,
            shape: Shape::new(width, height, depth),
            output_depth,
            encoder: LayerKind::Neural,
            decoder: LayerKind::Neural,
            optimizer: OptimizerConfig::default(),
            selector: PoolSelector::Max,
            seed: 0,
        }
    }

    pub fn encoder(mut self, kind: LayerKind) -> Self {
        self.encoder = kind;
        self
    }

    pub fn decoder(mut self, kind: LayerKind) -> Self {
        self.decoder = kind;
        self
    }

    /// Same activation for both layers.
    pub fn layers(self, kind: LayerKind) -> Self {
        self.encoder(kind).decoder(kind)
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Selection strategy of generic pooling units.
    pub fn selector(mut self, selector: PoolSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Seed of the sampling of stochastic units.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self, init: &mut dyn Initializer) -> Result<AutoEncoder> {
        if self.shape.is_empty() {
            return Err(Error::config(format!("unit input {} is empty", self.shape)));
        }
        let codec = |init: &mut dyn Initializer, encoder, decoder| {
            Codec::new(self.shape, self.output_depth, encoder, decoder, init, &self.optimizer)
        };

        let unit: AutoEncoder = match self.kind {
            UnitKind::Standard => StandardUnit::new(codec(init, self.encoder, self.decoder)?).into(),
            UnitKind::Pca => PcaUnit::new(codec(init, self.encoder, self.decoder)?)?.into(),
            UnitKind::Lda => LdaUnit::new(codec(init, self.encoder, self.decoder)?)?.into(),
            UnitKind::MaxPooling => self.pooling(PoolSelector::Max)?.into(),
            UnitKind::Pooling => self.pooling(self.selector)?.into(),
            UnitKind::Binary => StochasticUnit::new(
                codec(init, LayerKind::Sigmoid, LayerKind::Sigmoid)?,
                StochasticMode::Binary,
                self.seed,
            )
            .into(),
            UnitKind::Real => StochasticUnit::new(
                codec(init, LayerKind::Sigmoid, LayerKind::Linear)?,
                StochasticMode::Real,
                self.seed,
            )
            .into(),
            UnitKind::Frequency => FrequencyUnit::new(codec(init, self.encoder, self.decoder)?).into(),
        };
        tracing::debug!(unit = %unit, "built unit");
        Ok(unit)
    }

    fn pooling(&self, selector: PoolSelector) -> Result<PoolingUnit> {
        if self.output_depth != self.shape.depth {
            return Err(Error::config(format!(
                "pooling keeps the {} input channels, {} outputs were requested",
                self.shape.depth, self.output_depth
            )));
        }
        Ok(PoolingUnit::new(self.shape, selector))
    }
}
