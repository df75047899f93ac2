//! Typed descriptors of networks and training runs, loaded from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    initializer::{InitKind, Initializer},
    layers::LayerKind,
    network::{Ffcnn, Network, Scae},
    optimizer::OptimizerConfig,
    unit::{AutoEncoder, PoolSelector, UnitBuilder, UnitKind},
};

fn one() -> usize {
    1
}

/// One layer of a [ScaeConfig].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub kind: UnitKind,
    pub width: usize,
    pub height: usize,
    /// Taken from the output of the layer below when missing.
    #[serde(default)]
    pub depth: Option<usize>,
    pub output_depth: usize,
    #[serde(default = "one")]
    pub offset_x: usize,
    #[serde(default = "one")]
    pub offset_y: usize,
    #[serde(default)]
    pub encoder: LayerKind,
    #[serde(default)]
    pub decoder: LayerKind,
    #[serde(default)]
    pub selector: PoolSelector,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl UnitConfig {
    pub fn new(kind: UnitKind, width: usize, height: usize, output_depth: usize) -> Self {
        Self {
            kind,
            width,
            height,
            depth: None,
            output_depth,
            offset_x: 1,
            offset_y: 1,
            encoder: LayerKind::default(),
            decoder: LayerKind::default(),
            selector: PoolSelector::default(),
            optimizer: OptimizerConfig::default(),
        }
    }

    /// Builds the unit, `depth` being the depth of its input if not configured.
    pub fn build(&self, depth: usize, seed: u64, init: &mut dyn Initializer) -> Result<AutoEncoder> {
        let depth = self.depth.unwrap_or(depth);
        UnitBuilder::new(self.kind, self.width, self.height, depth, self.output_depth)
            .encoder(self.encoder)
            .decoder(self.decoder)
            .optimizer(self.optimizer.clone())
            .selector(self.selector)
            .seed(seed)
            .build(init)
    }
}

/// Descriptor of a whole stacked auto-encoder, bottom layer first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaeConfig {
    #[serde(default)]
    pub seed: u64,
    /// Depth of the input images.
    #[serde(default = "one")]
    pub input_depth: usize,
    #[serde(default)]
    pub initializer: InitKind,
    pub layers: Vec<UnitConfig>,
}

impl ScaeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let s = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn build(&self) -> Result<Scae> {
        let (first, rest) = self.layers.split_first().ok_or(Error::Empty("scae layers"))?;
        let mut init = self.initializer.seeded(self.seed);

        let unit = first.build(self.input_depth, self.seed, init.as_mut())?;
        let mut scae = Scae::new(unit, first.offset_x, first.offset_y)?;
        for (i, layer) in rest.iter().enumerate() {
            let depth = scae.stack().output_shape().depth;
            let unit = layer.build(depth, self.seed + i as u64 + 1, init.as_mut())?;
            scae.add_layer(unit, layer.offset_x, layer.offset_y)?;
        }
        Ok(scae)
    }
}

/// One fully connected classification layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub neurons: usize,
    #[serde(default)]
    pub encoder: LayerKind,
    #[serde(default)]
    pub decoder: LayerKind,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FfcnnConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub initializer: InitKind,
    pub classifiers: Vec<ClassifierConfig>,
}

impl FfcnnConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let s = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn build(&self, scae: &Scae) -> Result<Ffcnn> {
        Ffcnn::from_scae(scae, &self.classifiers, self.initializer.seeded(self.seed).as_mut())
    }
}

/// Parameters of a training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: u32,
    pub samples_per_epoch: usize,
    /// Overrides the learning rate of every layer when set.
    #[serde(default)]
    pub learning_rate: Option<f32>,
    #[serde(default)]
    pub seed: u64,
    /// Number of top layers updated during supervised training.
    #[serde(default = "one")]
    pub nb_layers: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            samples_per_epoch: 1000,
            learning_rate: None,
            seed: 0,
            nb_layers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Shape;

    const SCAE: &str = r#"{
        "seed": 7,
        "layers": [
            { "kind": "standard", "width": 3, "height": 3, "output_depth": 4, "encoder": "tanh" },
            { "kind": "max_pooling", "width": 2, "height": 2, "output_depth": 4, "offset_x": 2, "offset_y": 2 },
            { "kind": "pca", "width": 1, "height": 1, "output_depth": 2, "decoder": "linear" }
        ]
    }"#;

    #[test]
    fn builds_a_stack_from_json() {
        let config: ScaeConfig = serde_json::from_str(SCAE).unwrap();
        assert_eq!(config.layers[1].offset_x, 2);
        assert_eq!(config.layers[0].decoder, LayerKind::Neural);

        let scae = config.build().unwrap();
        assert_eq!(scae.stack().len(), 3);
        assert_eq!(scae.input_shape(), Shape::new(4, 4, 1));
        assert_eq!(scae.stack().output_shape(), Shape::new(1, 1, 2));
    }

    #[test]
    fn unknown_unit_kinds_fail_to_load() {
        let json = r#"{ "layers": [ { "kind": "dropout", "width": 1, "height": 1, "output_depth": 1 } ] }"#;
        assert!(serde_json::from_str::<ScaeConfig>(json).is_err());
    }

    #[test]
    fn empty_stacks_are_refused() {
        let config = ScaeConfig {
            seed: 0,
            input_depth: 1,
            initializer: InitKind::Kaiming,
            layers: Vec::new(),
        };
        assert!(matches!(config.build(), Err(Error::Empty(_))));
    }

    #[test]
    fn classifiers_are_appended() {
        let scae = serde_json::from_str::<ScaeConfig>(SCAE).unwrap().build().unwrap();
        let config: FfcnnConfig =
            serde_json::from_str(r#"{ "classifiers": [ { "neurons": 3, "encoder": "sigmoid" } ] }"#).unwrap();
        let ffcnn = config.build(&scae).unwrap();
        assert_eq!(ffcnn.stack().output_shape(), Shape::new(1, 1, 3));
    }
}
