pub mod ffcnn;
pub mod scae;
pub mod stack;

pub use self::ffcnn::Ffcnn;
pub use self::scae::Scae;
pub use self::stack::Stack;

use crate::data::DataBlock;
use crate::error::Result;

/// Activation above which an output counts as a member of the class.
pub const CLASS_CUTOFF: f32 = 0.5;

/// Operations shared by every network built from a [Stack].
pub trait Network {
    fn stack(&self) -> &Stack;

    fn stack_mut(&mut self) -> &mut Stack;

    /// Corner of the region read in the input block.
    fn set_input(&mut self, x: usize, y: usize) {
        self.stack_mut().set_input(x, y);
    }

    /// Propagates the input through every layer.
    fn compute(&mut self, input: &DataBlock) -> Result<()> {
        self.stack_mut().compute(input)
    }

    fn output(&self) -> &DataBlock {
        self.stack().output()
    }

    /// Index of the largest output, the first one on ties.
    fn output_class(&self) -> usize {
        let mut best = 0;
        for (i, v) in self.output().as_slice().iter().enumerate() {
            if *v > self.output().as_slice()[best] {
                best = i;
            }
        }
        best
    }

    /// Bit `i` is set when output `i` is above [CLASS_CUTOFF]. Only the first 64
    /// outputs are considered.
    fn output_classes(&self) -> u64 {
        self.output()
            .as_slice()
            .iter()
            .take(64)
            .enumerate()
            .filter(|(_, v)| **v > CLASS_CUTOFF)
            .fold(0, |mask, (i, _)| mask | 1 << i)
    }

    /// Learning rate of the first layer which has weights.
    fn learning_rate(&self) -> Option<f32> {
        self.stack().layers().iter().find_map(|l| l.learning_rate())
    }

    fn set_learning_rate(&mut self, rate: f32) {
        for layer in self.stack_mut().layers_mut() {
            layer.set_learning_rate(rate);
        }
    }

    fn layer_learning_rate(&self, layer: usize) -> Result<Option<f32>> {
        Ok(self.stack().layer(layer)?.learning_rate())
    }

    fn set_layer_learning_rate(&mut self, layer: usize, rate: f32) -> Result<()> {
        self.stack_mut().layer_mut(layer)?.set_learning_rate(rate);
        Ok(())
    }

    /// Brackets a training phase, stochastic units sample while it lasts.
    fn start_training(&mut self) {
        self.stack_mut().start_training();
    }

    fn stop_training(&mut self) {
        self.stack_mut().stop_training();
    }

    fn clear_gradients(&mut self) {
        self.stack_mut().clear_gradients();
    }

    /// Human readable description of the layers.
    fn describe(&self) -> String {
        self.stack().to_string()
    }
}
