use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Network, Scae, Stack};
use crate::{
    config::ClassifierConfig,
    convolution::ConvolutionLayer,
    data::DataBlock,
    error::Result,
    initializer::Initializer,
};

/// Feed-forward classifier made of the layers of a trained [Scae] topped by fully
/// connected classification layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ffcnn {
    stack: Stack,
}

impl Ffcnn {
    /// Copies the layers of `scae` and appends one classification layer per entry of
    /// `classifiers`, each reading the whole output volume of the layer below.
    pub fn from_scae(scae: &Scae, classifiers: &[ClassifierConfig], init: &mut dyn Initializer) -> Result<Self> {
        let mut layers = scae.stack().layers().to_vec();
        for classifier in classifiers {
            let below = layers[layers.len() - 1].output_shape();
            layers.push(ConvolutionLayer::classification(
                below,
                classifier.neurons,
                classifier.encoder,
                classifier.decoder,
                &classifier.optimizer,
                init,
            )?);
        }
        let stack = Stack::new(layers)?;
        debug!(layers = stack.len(), "built ffcnn");
        Ok(Self { stack })
    }

    pub fn from_stack(stack: Stack) -> Self {
        Self { stack }
    }

    /// One supervised step on the `nb_layers` top layers: forward pass, targets on the
    /// top output, back propagation and learning. Returns the error of the top layer.
    pub fn train(&mut self, input: &DataBlock, expected: &[f32], nb_layers: usize) -> Result<f32> {
        self.stack.compute(input)?;
        self.stack.set_expected(expected);
        let error = self.stack.back_propagate(input, nb_layers)?;
        self.stack.learn(nb_layers)?;
        Ok(error)
    }

    /// Accumulates the gradients of one sample without applying them.
    pub fn back_propagate(&mut self, input: &DataBlock, expected: &[f32], nb_layers: usize) -> Result<f32> {
        self.stack.compute(input)?;
        self.stack.set_expected(expected);
        self.stack.back_propagate(input, nb_layers)
    }

    pub fn learn(&mut self, nb_layers: usize) -> Result<()> {
        self.stack.learn(nb_layers)
    }

    /// Unties the weights of `layer`, see [ConvolutionLayer::deconvolve].
    pub fn deconvolve(&mut self, layer: usize) -> Result<()> {
        self.stack.layer_mut(layer)?.deconvolve()
    }

    pub fn delete_features(&mut self, layer: usize, indices: &[usize]) -> Result<()> {
        self.stack.delete_features(layer, indices)
    }
}

impl Network for Ffcnn {
    fn stack(&self) -> &Stack {
        &self.stack
    }

    fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }
}

impl fmt::Display for Ffcnn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ffcnn {}", self.stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Shape,
        initializer::Xavier,
        layers::LayerKind,
        optimizer::OptimizerConfig,
        unit::{UnitBuilder, UnitKind},
    };

    fn scae() -> Scae {
        let unit = UnitBuilder::new(UnitKind::Standard, 2, 2, 1, 3)
            .build(&mut Xavier::with_seed(5))
            .unwrap();
        let mut scae = Scae::new(unit, 1, 1).unwrap();
        let pool = UnitBuilder::new(UnitKind::MaxPooling, 2, 2, 3, 3)
            .build(&mut Xavier::new())
            .unwrap();
        scae.add_layer(pool, 1, 1).unwrap();
        scae
    }

    fn classifier(neurons: usize) -> ClassifierConfig {
        ClassifierConfig {
            neurons,
            encoder: LayerKind::Sigmoid,
            decoder: LayerKind::Sigmoid,
            optimizer: OptimizerConfig::default().with_l_rate(0.5),
        }
    }

    #[test]
    fn classification_layers_read_the_whole_volume() {
        let ffcnn = Ffcnn::from_scae(&scae(), &[classifier(4), classifier(2)], &mut Xavier::with_seed(1)).unwrap();
        assert_eq!(ffcnn.stack().len(), 4);
        assert_eq!(ffcnn.stack().layer(2).unwrap().input_shape(), Shape::new(1, 1, 3));
        assert_eq!(ffcnn.stack().output_shape(), Shape::new(1, 1, 2));
    }

    #[test]
    fn supervised_training_reaches_the_target() {
        let mut ffcnn = Ffcnn::from_scae(&scae(), &[classifier(2)], &mut Xavier::with_seed(1)).unwrap();
        let input = DataBlock::from_values(
            Shape::new(3, 3, 1),
            vec![0.2, 0.8, 0.2, 0.8, 0.2, 0.8, 0.2, 0.8, 0.2],
        );
        for _ in 0..500 {
            ffcnn.train(&input, &[1., 0.], 1).unwrap();
        }
        ffcnn.compute(&input).unwrap();
        assert_eq!(ffcnn.output_class(), 0);
        assert_eq!(ffcnn.output_classes(), 0b01);
    }

    #[test]
    fn deconvolving_keeps_the_output() {
        let mut ffcnn = Ffcnn::from_scae(&scae(), &[classifier(2)], &mut Xavier::with_seed(1)).unwrap();
        let input = DataBlock::filled(Shape::new(3, 3, 1), 0.4);
        ffcnn.compute(&input).unwrap();
        let before = ffcnn.output().clone();

        ffcnn.deconvolve(0).unwrap();
        ffcnn.compute(&input).unwrap();
        assert_eq!(ffcnn.output(), &before);
        assert!(!ffcnn.stack().layer(0).unwrap().is_shared());
    }

    #[test]
    fn missing_layers_are_config_errors() {
        let mut ffcnn = Ffcnn::from_scae(&scae(), &[classifier(2)], &mut Xavier::with_seed(1)).unwrap();
        assert!(matches!(ffcnn.deconvolve(3), Err(crate::Error::Config(_))));
        assert!(matches!(ffcnn.stack().layer(7), Err(crate::Error::Config(_))));
        assert!(ffcnn.set_layer_learning_rate(3, 0.1).is_err());
        assert!(ffcnn.layer_learning_rate(3).is_err());

        ffcnn.set_layer_learning_rate(2, 0.25).unwrap();
        assert_eq!(ffcnn.layer_learning_rate(2).unwrap(), Some(0.25));
        assert_eq!(ffcnn.layer_learning_rate(1).unwrap(), None);
    }
}
