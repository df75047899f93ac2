use super::{
    pca::{check_projection, drop_sample_channels, seed_codec, Reverse},
    solvers,
    standard::paste_input_error,
    Codec, Unit, UnitKind,
};
use crate::{
    data::{DataBlock, Shape},
    error::{Error, Result},
};
use serde::{Deserialize, Serialize};

/// Unit seeded with the linear discriminant directions of labelled patches.
///
/// Pre-training needs a label for every patch, see [train_labelled](Unit::train_labelled).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LdaUnit {
    codec: Codec,
    fitted: bool,
    #[serde(skip)]
    samples: Vec<f32>,
    #[serde(skip)]
    labels: Vec<usize>,
}

impl LdaUnit {
    pub fn new(codec: Codec) -> Result<Self> {
        check_projection(&codec)?;
        Ok(Self {
            codec,
            fitted: false,
            samples: Vec::new(),
            labels: Vec::new(),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    fn ensure_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(Error::NotTrained { unit: "lda" })
        }
    }
}

impl Unit for LdaUnit {
    fn input_shape(&self) -> Shape {
        self.codec.shape()
    }

    fn output_depth(&self) -> usize {
        self.codec.output_depth()
    }

    fn rebuild(&mut self) {
        self.codec.rebuild();
    }

    fn encode(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<&[f32]> {
        self.ensure_fitted()?;
        self.codec.load_patch(input, x, y);
        Ok(self.codec.encode())
    }

    fn encoded(&self) -> &[f32] {
        self.codec.encoded()
    }

    fn decode(&mut self) -> Result<&[f32]> {
        self.ensure_fitted()?;
        Ok(self.codec.decode())
    }

    fn decoded(&self) -> &[f32] {
        self.codec.decoded()
    }

    fn accumulate(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32> {
        if !self.fitted {
            return Err(Error::unsupported("unlabelled pre-training", "lda"));
        }
        self.codec.load_patch(input, x, y);
        Ok(self.codec.accumulate_reconstruction())
    }

    fn accumulate_labelled(&mut self, input: &DataBlock, x: usize, y: usize, label: usize) -> Result<f32> {
        if self.fitted {
            return self.accumulate(input, x, y);
        }
        self.codec.load_patch(input, x, y);
        self.samples.extend_from_slice(self.codec.input());
        self.labels.push(label);
        Ok(0.)
    }

    /// Samples gathered before the fit are not gradients, nothing is applied.
    fn learn_reconstruction(&mut self) -> Result<()> {
        if self.fitted {
            self.codec.learn_reconstruction();
        }
        Ok(())
    }

    fn training_done(&mut self) -> Result<()> {
        if self.fitted && self.labels.is_empty() {
            return Ok(());
        }
        let dim = self.codec.shape().len();
        let samples = solvers::samples_matrix(&self.samples, dim);
        let projection = solvers::lda(&samples, &self.labels, self.codec.output_depth())?;
        seed_codec(&mut self.codec, &projection, &self.samples, Reverse::PseudoInverse)?;

        self.fitted = true;
        self.samples = Vec::new();
        self.labels = Vec::new();
        Ok(())
    }

    fn back_propagate(
        &mut self,
        input: &DataBlock,
        x: usize,
        y: usize,
        error: &[f32],
        upstream: Option<&mut DataBlock>,
    ) -> Result<f32> {
        self.encode(input, x, y)?;
        let error = self.codec.backward(error);
        paste_input_error(&self.codec, x, y, upstream);
        Ok(error)
    }

    fn learn(&mut self) -> Result<()> {
        self.ensure_fitted()?;
        self.codec.learn();
        Ok(())
    }

    fn clear_gradients(&mut self) {
        self.codec.clear_gradients();
    }

    fn learning_rate(&self) -> Option<f32> {
        Some(self.codec.l_rate())
    }

    fn set_learning_rate(&mut self, rate: f32) {
        self.codec.set_l_rate(rate);
    }

    fn delete_features(&mut self, indices: &[usize]) -> Result<()> {
        self.codec.delete_features(indices)
    }

    fn delete_input_channels(&mut self, channels: &[usize]) -> Result<Vec<usize>> {
        let shape = self.codec.shape();
        self.codec.delete_input_channels(channels)?;
        drop_sample_channels(&mut self.samples, shape, channels);
        check_projection(&self.codec)?;
        Ok(Vec::new())
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Lda
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{initializer::Xavier, layers::LayerKind, unit::UnitBuilder};

    #[test]
    fn unlabelled_pre_training_is_refused() {
        let mut unit = UnitBuilder::new(UnitKind::Lda, 1, 2, 1, 1)
            .build(&mut Xavier::new())
            .unwrap();
        let input = DataBlock::new(1, 2, 1);
        assert!(matches!(
            unit.train(&input, 0, 0),
            Err(Error::Unsupported { unit: "lda", .. })
        ));
    }

    #[test]
    fn discriminant_encoding_separates_the_classes() {
        let mut unit = UnitBuilder::new(UnitKind::Lda, 1, 2, 1, 1)
            .layers(LayerKind::Linear)
            .build(&mut Xavier::new())
            .unwrap();
        let shape = Shape::new(1, 2, 1);
        let samples = [
            ([0.1, -0.5], 0),
            ([0., 0.5], 0),
            ([-0.1, 0.], 0),
            ([0.9, -0.5], 1),
            ([1., 0.5], 1),
            ([1.1, 0.], 1),
        ];
        for (values, label) in samples.iter() {
            let block = DataBlock::from_values(shape, values.to_vec());
            assert_eq!(unit.train_labelled(&block, 0, 0, *label).unwrap(), 0.);
        }
        unit.training_done().unwrap();

        let mut encode = |values: [f32; 2]| {
            let block = DataBlock::from_values(shape, values.to_vec());
            unit.encode(&block, 0, 0).unwrap()[0]
        };
        let first = encode([0., 0.]);
        let second = encode([1., 0.]);
        let across = encode([0., 0.5]);
        // moving across classes changes the encoding far more than moving within one
        assert!((first - second).abs() > 5. * (first - across).abs());
    }
}
