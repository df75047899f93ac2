use crate::{
    data::{DataBlock, Shape},
    error::{Error, Result},
    initializer::Initializer,
    layers::{BasicLayer, Layer, LayerKind},
    optimizer::OptimizerConfig,
};
use serde::{Deserialize, Serialize};

use std::mem;

/// An encoder and a decoder layer around one flattened input patch.
///
/// Every unit with trainable weights is built on top of it. The codec never
/// references a tensor buffer, patches are copied in by [load_patch](Codec::load_patch)
/// before every operation that needs them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Codec {
    shape: Shape,
    encoder: BasicLayer,
    decoder: BasicLayer,

    #[serde(skip)]
    input: Vec<f32>,
    #[serde(skip)]
    hidden_error: Vec<f32>,
    #[serde(skip)]
    decoded_error: Vec<f32>,
    #[serde(skip)]
    input_error: Vec<f32>,
}

impl Codec {
    pub fn new(
        shape: Shape,
        output_depth: usize,
        encoder: LayerKind,
        decoder: LayerKind,
        init: &mut dyn Initializer,
        optimizer: &OptimizerConfig,
    ) -> Result<Self> {
        if shape.is_empty() || output_depth == 0 {
            return Err(Error::config(format!(
                "a unit needs a non empty input and output, got {} -> {}",
                shape, output_depth
            )));
        }
        let len = shape.len();
        let encoder = BasicLayer::with_optimizer(encoder, len, output_depth, init, optimizer);
        let decoder = BasicLayer::with_optimizer(decoder, output_depth, len, init, optimizer);
        Self::from_layers(shape, encoder, decoder)
    }

    /// Pairs already built layers, checking that they fit the patch shape and each other.
    pub fn from_layers(shape: Shape, encoder: BasicLayer, decoder: BasicLayer) -> Result<Self> {
        let mut codec = Self {
            shape,
            encoder,
            decoder,
            input: Vec::new(),
            hidden_error: Vec::new(),
            decoded_error: Vec::new(),
            input_error: Vec::new(),
        };
        codec.check_shapes()?;
        codec.rebuild();
        Ok(codec)
    }

    pub fn rebuild(&mut self) {
        self.encoder.rebuild();
        self.decoder.rebuild();
        self.input = vec![0.; self.shape.len()];
        self.hidden_error = vec![0.; self.output_depth()];
        self.decoded_error = vec![0.; self.shape.len()];
        self.input_error = vec![0.; self.shape.len()];
    }

    /// Patch length must match the encoder input and the decoder output,
    /// the encoder output must match the decoder input.
    pub fn check_shapes(&self) -> Result<()> {
        let len = self.shape.len();
        if self.encoder.in_size() != len
            || self.decoder.out_size() != len
            || self.encoder.out_size() != self.decoder.in_size()
        {
            return Err(Error::config(format!(
                "encoder {} and decoder {} don't fit a {} patch",
                self.encoder, self.decoder, self.shape
            )));
        }
        Ok(())
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn output_depth(&self) -> usize {
        self.encoder.out_size()
    }

    pub fn encoder(&self) -> &BasicLayer {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut BasicLayer {
        &mut self.encoder
    }

    pub fn decoder(&self) -> &BasicLayer {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut BasicLayer {
        &mut self.decoder
    }

    /// Copies the patch at `(x, y)` into the encoder input.
    pub fn load_patch(&mut self, block: &DataBlock, x: usize, y: usize) {
        block.patch_to_array(x, y, self.shape.width, self.shape.height, &mut self.input);
    }

    /// Current encoder input, either a raw patch or whatever a unit made of it.
    pub fn input(&self) -> &[f32] {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    pub fn encode(&mut self) -> &[f32] {
        self.encoder.eval(&self.input)
    }

    pub fn encoded(&self) -> &[f32] {
        self.encoder.output()
    }

    pub fn decode(&mut self) -> &[f32] {
        self.decoder.eval(self.encoder.output())
    }

    pub fn decoded(&self) -> &[f32] {
        self.decoder.output()
    }

    /// One reconstruction step towards the current input: encode, decode, back propagate
    /// the reconstruction error through both layers and learn.
    /// Returns the decoder's mean absolute error.
    pub fn reconstruct(&mut self) -> f32 {
        let error = self.accumulate_reconstruction();
        self.learn_reconstruction();
        error
    }

    /// Encodes and decodes the current input and adds the gradients of the reconstruction
    /// error to both layers without applying them.
    /// Returns the decoder's mean absolute error.
    pub fn accumulate_reconstruction(&mut self) -> f32 {
        self.encode();
        self.decode();

        for ((e, out), inp) in self
            .decoded_error
            .iter_mut()
            .zip(self.decoder.output())
            .zip(&self.input)
        {
            *e = *out - *inp;
        }
        self.hidden_error.iter_mut().for_each(|e| *e = 0.);

        let error = self.decoder.calc_gradients(
            self.encoder.output(),
            &self.decoded_error,
            Some(&mut self.hidden_error),
        );
        self.encoder
            .calc_gradients(&self.input, &self.hidden_error, None);

        self.decoded_error.iter_mut().for_each(|e| *e = 0.);
        self.hidden_error.iter_mut().for_each(|e| *e = 0.);
        error
    }

    /// Applies the gradients of both layers in one step.
    pub fn learn_reconstruction(&mut self) {
        self.decoder.learn();
        self.encoder.learn();
    }

    /// Accumulates the encoder gradients for `error` on the encoded values and leaves the
    /// error with respect to the input in [input_error](Codec::input_error).
    /// The encoder must have been evaluated on the current input.
    pub fn backward(&mut self, error: &[f32]) -> f32 {
        self.input_error.iter_mut().for_each(|e| *e = 0.);
        self.encoder
            .calc_gradients(&self.input, error, Some(&mut self.input_error))
    }

    pub fn input_error(&self) -> &[f32] {
        &self.input_error
    }

    pub fn input_error_mut(&mut self) -> &mut [f32] {
        &mut self.input_error
    }

    /// Applies the encoder gradients accumulated by [backward](Codec::backward).
    pub fn learn(&mut self) {
        self.encoder.learn();
    }

    pub fn clear_gradients(&mut self) {
        self.encoder.reset_gradients();
        self.decoder.reset_gradients();
    }

    pub fn l_rate(&self) -> f32 {
        self.encoder.l_rate()
    }

    pub fn set_l_rate(&mut self, l_rate: f32) {
        self.encoder.set_l_rate(l_rate);
        self.decoder.set_l_rate(l_rate);
    }

    /// Removes encoded features: rows of the encoder and columns of the decoder.
    pub fn delete_features(&mut self, indices: &[usize]) -> Result<()> {
        check_indices(indices, self.output_depth(), "feature")?;
        self.encoder = mem::take(&mut self.encoder).without_outputs(indices);
        self.decoder = mem::take(&mut self.decoder).without_inputs(indices);
        self.check_shapes()?;
        self.rebuild();
        Ok(())
    }

    /// Removes input channels: the matching encoder columns and decoder rows of every cell.
    pub fn delete_input_channels(&mut self, channels: &[usize]) -> Result<()> {
        let depth = self.shape.depth;
        check_indices(channels, depth, "input channel")?;
        let positions = channel_positions(self.shape, channels);

        self.encoder = mem::take(&mut self.encoder).without_inputs(&positions);
        self.decoder = mem::take(&mut self.decoder).without_outputs(&positions);
        self.shape = self.shape.with_depth(depth - distinct(channels));
        self.check_shapes()?;
        self.rebuild();
        Ok(())
    }
}

/// Positions of `channels` in every cell of a flattened patch.
pub(crate) fn channel_positions(shape: Shape, channels: &[usize]) -> Vec<usize> {
    let depth = shape.depth;
    (0..shape.area())
        .flat_map(|cell| channels.iter().map(move |z| cell * depth + *z))
        .collect()
}

/// Number of distinct values in `indices`.
pub(crate) fn distinct(indices: &[usize]) -> usize {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len()
}

/// Rejects empty deletions, out of range indices and deletions removing everything.
pub(crate) fn check_indices(indices: &[usize], len: usize, what: &str) -> Result<()> {
    if indices.is_empty() {
        return Err(Error::config(format!("no {} index given for deletion", what)));
    }
    if let Some(i) = indices.iter().find(|i| **i >= len) {
        return Err(Error::config(format!(
            "{} index {} is out of range, there are only {}",
            what, i, len
        )));
    }
    if distinct(indices) >= len {
        return Err(Error::config(format!("cannot delete every {}", what)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::{WeightInit, Xavier};
    use crate::layers::tests::check;

    fn codec(shape: Shape, depth: usize) -> Codec {
        Codec::new(
            shape,
            depth,
            LayerKind::Neural,
            LayerKind::Neural,
            &mut Xavier::with_seed(3),
            &OptimizerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let shape = Shape::new(2, 2, 1);
        let mut init = Xavier::new();
        let encoder = BasicLayer::new(LayerKind::Linear, 4, 3, &mut init);
        let decoder = BasicLayer::new(LayerKind::Linear, 2, 4, &mut init);
        assert!(matches!(
            Codec::from_layers(shape, encoder, decoder),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn backward_leaves_input_error() {
        let shape = Shape::new(1, 2, 1);
        let mut init = WeightInit::new(vec![1., 2., 0., 0., 0., 0.]);
        let mut codec = Codec::new(
            shape,
            1,
            LayerKind::Linear,
            LayerKind::Linear,
            &mut init,
            &OptimizerConfig::default(),
        )
        .unwrap();
        let block = DataBlock::from_values(shape, vec![1., 1.]);
        codec.load_patch(&block, 0, 0);
        check(&[3.], codec.encode(), 1e-6, "encoding");

        codec.backward(&[0.5]);
        check(&[0.5, 1.], codec.input_error(), 1e-6, "input error");
    }

    #[test]
    fn deleting_input_channels_drops_every_cell() {
        let mut codec = codec(Shape::new(2, 1, 3), 2);
        codec.delete_input_channels(&[0, 2]).unwrap();
        assert_eq!(codec.shape(), Shape::new(2, 1, 1));
        assert_eq!(codec.encoder().in_size(), 2);
        assert_eq!(codec.decoder().out_size(), 2);
    }

    #[test]
    fn invalid_deletions_are_rejected() {
        let mut codec = codec(Shape::new(1, 1, 2), 3);
        assert!(codec.delete_features(&[3]).is_err());
        assert!(codec.delete_features(&[0, 1, 2]).is_err());
        assert!(codec.delete_features(&[]).is_err());
        assert_eq!(codec.output_depth(), 3);
    }
}
