use super::{Codec, Dct, Unit, UnitKind};
use crate::{
    data::{DataBlock, Shape},
    error::Result,
    layers::mean_abs,
};
use serde::{Deserialize, Serialize};

/// Auto-encoder working on the DCT coefficients of its patch.
///
/// Encoding and training happen entirely in the transformed space. Decoded patches
/// and the error pasted upstream are transformed back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrequencyUnit {
    codec: Codec,
    #[serde(skip)]
    dct: Dct,
    #[serde(skip)]
    patch: Vec<f32>,
    #[serde(skip)]
    decoded: Vec<f32>,
    #[serde(skip)]
    spatial_error: Vec<f32>,
}

impl FrequencyUnit {
    pub fn new(codec: Codec) -> Self {
        let mut unit = Self {
            codec,
            dct: Dct::default(),
            patch: Vec::new(),
            decoded: Vec::new(),
            spatial_error: Vec::new(),
        };
        unit.rebuild();
        unit
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Loads the patch at `(x, y)` and replaces the encoder input with its coefficients.
    fn load(&mut self, input: &DataBlock, x: usize, y: usize) {
        let shape = self.codec.shape();
        input.patch_to_array(x, y, shape.width, shape.height, &mut self.patch);
        self.dct.forward(&self.patch, self.codec.input_mut());
    }
}

impl Unit for FrequencyUnit {
    fn input_shape(&self) -> Shape {
        self.codec.shape()
    }

    fn output_depth(&self) -> usize {
        self.codec.output_depth()
    }

    fn rebuild(&mut self) {
        self.codec.rebuild();
        let shape = self.codec.shape();
        self.dct = Dct::new(shape);
        self.patch = vec![0.; shape.len()];
        self.decoded = vec![0.; shape.len()];
        self.spatial_error = vec![0.; shape.len()];
    }

    fn encode(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<&[f32]> {
        self.load(input, x, y);
        Ok(self.codec.encode())
    }

    fn encoded(&self) -> &[f32] {
        self.codec.encoded()
    }

    fn decode(&mut self) -> Result<&[f32]> {
        let coefficients = self.codec.decode();
        self.dct.inverse(coefficients, &mut self.decoded);
        Ok(&self.decoded)
    }

    fn decoded(&self) -> &[f32] {
        &self.decoded
    }

    fn accumulate(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32> {
        self.load(input, x, y);
        Ok(self.codec.accumulate_reconstruction())
    }

    fn learn_reconstruction(&mut self) -> Result<()> {
        self.codec.learn_reconstruction();
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
        self.codec.backward(error);
        if let Some(upstream) = upstream {
            self.dct.inverse(self.codec.input_error(), &mut self.spatial_error);
            let shape = self.codec.shape();
            upstream.weighted_paste_patch(&self.spatial_error, x, y, shape.width, shape.height);
        }
        Ok(mean_abs(error))
    }

    fn learn(&mut self) -> Result<()> {
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
        self.codec.delete_input_channels(channels)?;
        self.rebuild();
        Ok(Vec::new())
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        initializer::WeightInit,
        layers::{tests::check, LayerKind},
        optimizer::OptimizerConfig,
    };

    /// Identity encoder and decoder over a 2x2 patch.
    fn identity_unit() -> FrequencyUnit {
        let mut weights = Vec::new();
        for _ in 0..2 {
            for r in 0..4 {
                weights.extend((0..4).map(|c| if r == c { 1. } else { 0. }));
            }
        }
        let codec = Codec::new(
            Shape::new(2, 2, 1),
            4,
            LayerKind::Linear,
            LayerKind::Linear,
            &mut WeightInit::new(weights),
            &OptimizerConfig::default(),
        )
        .unwrap();
        FrequencyUnit::new(codec)
    }

    #[test]
    fn encodes_coefficients_and_decodes_values() {
        let mut unit = identity_unit();
        let input = DataBlock::filled(Shape::new(2, 2, 1), 0.5);
        check(&[1., 0., 0., 0.], unit.encode(&input, 0, 0).unwrap(), 1e-5, "coefficients");
        check(&[0.5; 4], unit.decode().unwrap(), 1e-5, "decoded values");
    }

    #[test]
    fn upstream_error_is_transformed_back() {
        let mut unit = identity_unit();
        let input = DataBlock::filled(Shape::new(2, 2, 1), 0.5);
        let mut upstream = DataBlock::new(2, 2, 1);
        unit.back_propagate(&input, 0, 0, &[2., 0., 0., 0.], Some(&mut upstream))
            .unwrap();
        check(&[1.; 4], upstream.as_slice(), 1e-5, "spatial error");
    }

    #[test]
    fn identity_reconstruction_has_no_error() {
        let mut unit = identity_unit();
        let input = DataBlock::from_values(Shape::new(2, 2, 1), vec![0.1, 0.4, -0.3, 0.2]);
        assert!(unit.train(&input, 0, 0).unwrap() < 1e-5);
    }
}
