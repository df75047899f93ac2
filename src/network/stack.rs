use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    convolution::ConvolutionLayer,
    data::{DataBlock, Shape},
    error::{Error, Result},
};

fn missing_layer(index: usize, len: usize) -> Error {
    Error::config(format!(
        "layer {} doesn't exist, the stack has {} layers",
        index, len
    ))
}

/// Ordered sequence of convolution layers, each one reading the output block of the
/// layer below. Only the bottom layer reads a caller supplied block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "StackUnvalidated", try_from = "StackUnvalidated")]
pub struct Stack {
    layers: Vec<ConvolutionLayer>,
}

impl Stack {
    /// Fails if `layers` is empty or if a layer doesn't fit the output of the one below.
    pub fn new(layers: Vec<ConvolutionLayer>) -> Result<Self> {
        check_layers(&layers)?;
        Ok(Self { layers })
    }

    /// Appends a layer without checking it, the caller is expected to regrid and [check](Self::check).
    pub(crate) fn push_unchecked(&mut self, layer: ConvolutionLayer) {
        self.layers.push(layer);
    }

    pub fn check(&self) -> Result<()> {
        check_layers(&self.layers)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[ConvolutionLayer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Result<&ConvolutionLayer> {
        let len = self.layers.len();
        self.layers.get(index).ok_or_else(|| missing_layer(index, len))
    }

    pub fn layer_mut(&mut self, index: usize) -> Result<&mut ConvolutionLayer> {
        let len = self.layers.len();
        self.layers.get_mut(index).ok_or_else(|| missing_layer(index, len))
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [ConvolutionLayer] {
        &mut self.layers
    }

    pub fn top(&self) -> &ConvolutionLayer {
        &self.layers[self.layers.len() - 1]
    }

    pub fn input_shape(&self) -> Shape {
        self.layers[0].input_shape()
    }

    pub fn output_shape(&self) -> Shape {
        self.top().output_shape()
    }

    /// Output block of the top layer.
    pub fn output(&self) -> &DataBlock {
        self.top().output()
    }

    /// Corner of the region of the input block read by the bottom layer.
    pub fn set_input(&mut self, x: usize, y: usize) {
        self.layers[0].set_input(x, y);
    }

    /// Runs every layer in order.
    pub fn compute(&mut self, input: &DataBlock) -> Result<()> {
        self.compute_below(input, self.layers.len())
    }

    /// Runs the `count` bottom layers.
    pub fn compute_below(&mut self, input: &DataBlock, count: usize) -> Result<()> {
        if let Some((first, rest)) = self.layers[..count].split_first_mut() {
            first.compute(input)?;
            let mut below = first;
            for layer in rest {
                layer.compute(below.output())?;
                below = layer;
            }
        }
        Ok(())
    }

    /// One training step of the top layer's units on the output of the layers below.
    pub fn train_top(&mut self, input: &DataBlock, label: Option<usize>) -> Result<f32> {
        let len = self.layers.len();
        self.compute_below(input, len - 1)?;
        let (top, below) = self.layers.split_last_mut().ok_or(Error::Empty("stack"))?;
        let source = below.last().map_or(input, |l| l.output());
        top.train(source, label)
    }

    /// Ends the pre-training phase of the top layer.
    pub fn training_done(&mut self) -> Result<()> {
        let last = self.layers.len() - 1;
        self.layers[last].training_done()
    }

    /// Injects `expected` as the target of the whole top output, in storage order.
    pub fn set_expected(&mut self, expected: &[f32]) {
        let shape = self.output_shape();
        assert_eq!(
            expected.len(),
            shape.len(),
            "Expected {} target values, received {}",
            shape.len(),
            expected.len()
        );
        let last = self.layers.len() - 1;
        let top = &mut self.layers[last];
        for x in 0..shape.width {
            for y in 0..shape.height {
                for z in 0..shape.depth {
                    top.set_expected(x, y, z, expected[shape.index(x, y, z)]);
                }
            }
        }
    }

    /// Back propagates the error of the top layer through the `nb_layers` top layers.
    /// The error of every layer is cleared afterwards. Returns the error of the top layer.
    ///
    /// The forward pass must have been computed on the same `input`.
    pub fn back_propagate(&mut self, input: &DataBlock, nb_layers: usize) -> Result<f32> {
        let len = self.layers.len();
        let first = len - nb_layers.min(len);
        let mut top_error = 0.;

        for i in (first..len).rev() {
            let (below, above) = self.layers.split_at_mut(i);
            let layer = &mut above[0];
            let error = match below.last_mut() {
                None => layer.back_propagate(input, None)?,
                Some(prev) => {
                    let (source, prev_error) = prev.output_and_error_mut();
                    let upstream = if i > first { Some(prev_error) } else { None };
                    layer.back_propagate(source, upstream)?
                }
            };
            if i == len - 1 {
                top_error = error;
            }
        }

        for layer in &mut self.layers {
            layer.clear_error();
        }
        Ok(top_error)
    }

    /// Applies the gradients of the `nb_layers` top layers.
    pub fn learn(&mut self, nb_layers: usize) -> Result<()> {
        let len = self.layers.len();
        for layer in &mut self.layers[len - nb_layers.min(len)..] {
            layer.learn()?;
        }
        Ok(())
    }

    pub fn clear_gradients(&mut self) {
        for layer in &mut self.layers {
            layer.clear_gradients();
        }
    }

    /// Removes output features of `layer`, then the matching input channels of the
    /// layers above for as long as the deletion keeps cascading.
    pub fn delete_features(&mut self, layer: usize, indices: &[usize]) -> Result<()> {
        self.layer_mut(layer)?.delete_features(indices)?;

        let mut removed = indices.to_vec();
        removed.sort_unstable();
        removed.dedup();
        for above in &mut self.layers[layer + 1..] {
            removed = above.delete_input_channels(&removed)?;
            if removed.is_empty() {
                break;
            }
        }
        debug!(layer, features = ?indices, "deleted features");
        self.check()
    }

    pub fn start_training(&mut self) {
        self.layers.iter_mut().for_each(|l| l.start_training());
    }

    pub fn stop_training(&mut self) {
        self.layers.iter_mut().for_each(|l| l.stop_training());
    }

    pub fn rebuild(&mut self) {
        for layer in &mut self.layers {
            layer.rebuild();
        }
    }
}

fn check_layers(layers: &[ConvolutionLayer]) -> Result<()> {
    if layers.is_empty() {
        return Err(Error::Empty("stack"));
    }
    for (index, pair) in layers.windows(2).enumerate() {
        let received = pair[0].output_shape();
        let expected = pair[1].input_shape();
        if expected.depth != received.depth
            || expected.width > received.width
            || expected.height > received.height
        {
            return Err(Error::Incompatible {
                index: index + 1,
                expected,
                received,
            });
        }
    }
    Ok(())
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} -> {}", self.input_shape(), self.output_shape())?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(f, "  layer {}: {}", i, layer)?;
        }
        Ok(())
    }
}

/// When deserializing, we first construct this object, validate it and then rebuild the buffers.
#[derive(Serialize, Deserialize)]
struct StackUnvalidated {
    layers: Vec<ConvolutionLayer>,
}

impl From<Stack> for StackUnvalidated {
    fn from(stack: Stack) -> Self {
        Self {
            layers: stack.layers,
        }
    }
}

impl TryFrom<StackUnvalidated> for Stack {
    type Error = Error;

    fn try_from(value: StackUnvalidated) -> Result<Self> {
        let mut stack = Stack::new(value.layers)?;
        stack.rebuild();
        Ok(stack)
    }
}
