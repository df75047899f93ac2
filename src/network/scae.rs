use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Network, Stack};
use crate::{
    convolution::ConvolutionLayer,
    data::{DataBlock, Shape},
    error::{Error, Result},
    unit::{AutoEncoder, Unit},
};

/// Stacked convolutional auto-encoder, grown one layer at a time.
///
/// The top layer is always a single unit; every layer below is regridded so it
/// produces exactly the extent read by the layer above. Training only ever
/// touches the top unit, the lower layers are frozen feature extractors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scae {
    stack: Stack,
}

impl Scae {
    pub fn new(unit: AutoEncoder, offset_x: usize, offset_y: usize) -> Result<Self> {
        let layer = ConvolutionLayer::with_grid(unit, 1, 1, offset_x, offset_y)?;
        Ok(Self {
            stack: Stack::new(vec![layer])?,
        })
    }

    /// Extent of the input patch read by the whole stack.
    pub fn input_shape(&self) -> Shape {
        self.stack.input_shape()
    }

    /// Puts `unit` on top of the stack. The unit reads a patch of the current top
    /// output, so its depth must match the top output depth.
    pub fn add_layer(&mut self, unit: AutoEncoder, offset_x: usize, offset_y: usize) -> Result<()> {
        let below = self.stack.output_shape();
        let expected = unit.input_shape();
        if expected.depth != below.depth {
            return Err(Error::Incompatible {
                index: self.stack.len(),
                expected,
                received: below,
            });
        }
        if self.stack.layers().iter().any(|l| !l.is_shared()) {
            return Err(Error::config("cannot grow a stack containing deconvolved layers"));
        }
        let layer = ConvolutionLayer::with_grid(unit, 1, 1, offset_x, offset_y)?;
        self.stack.push_unchecked(layer);

        let layers = self.stack.layers_mut();
        for i in (0..layers.len() - 1).rev() {
            let needed = layers[i + 1].input_shape();
            layers[i].regrid(needed.width, needed.height)?;
        }
        debug!(layers = self.stack.len(), input = %self.input_shape(), "grew scae");
        self.stack.check()
    }

    /// One training step of the top unit on the region at the current input corner.
    pub fn train(&mut self, input: &DataBlock) -> Result<f32> {
        self.stack.train_top(input, None)
    }

    /// Training step for units which need the class of the sample.
    pub fn train_labelled(&mut self, input: &DataBlock, label: usize) -> Result<f32> {
        self.stack.train_top(input, Some(label))
    }

    /// Ends the pre-training phase of the top unit.
    pub fn training_done(&mut self) -> Result<()> {
        self.stack.training_done()
    }

    /// Reconstruction of the last input seen by the top unit.
    pub fn decode(&mut self) -> Result<&[f32]> {
        let last = self.stack.len() - 1;
        self.stack.layer_mut(last)?.unit_mut(0, 0).decode()
    }

    pub fn delete_features(&mut self, layer: usize, indices: &[usize]) -> Result<()> {
        self.stack.delete_features(layer, indices)
    }
}

impl Network for Scae {
    fn stack(&self) -> &Stack {
        &self.stack
    }

    fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }
}

impl fmt::Display for Scae {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scae {}", self.stack)
    }
}
