use super::{Codec, Unit, UnitKind};
use crate::{
    data::{DataBlock, Shape},
    error::Result,
};
use serde::{Deserialize, Serialize};

/// Plain auto-encoder trained on its reconstruction error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardUnit {
    codec: Codec,
}

impl StandardUnit {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut Codec {
        &mut self.codec
    }
}

/// Pastes the input error left by the codec into `upstream`.
pub(crate) fn paste_input_error(codec: &Codec, x: usize, y: usize, upstream: Option<&mut DataBlock>) {
    if let Some(upstream) = upstream {
        let shape = codec.shape();
        upstream.weighted_paste_patch(codec.input_error(), x, y, shape.width, shape.height);
    }
}

impl Unit for StandardUnit {
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
        self.codec.load_patch(input, x, y);
        Ok(self.codec.encode())
    }

    fn encoded(&self) -> &[f32] {
        self.codec.encoded()
    }

    fn decode(&mut self) -> Result<&[f32]> {
        Ok(self.codec.decode())
    }

    fn decoded(&self) -> &[f32] {
        self.codec.decoded()
    }

    fn accumulate(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32> {
        self.codec.load_patch(input, x, y);
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
        let error = self.codec.backward(error);
        paste_input_error(&self.codec, x, y, upstream);
        Ok(error)
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
        Ok(Vec::new())
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Standard
    }
}
