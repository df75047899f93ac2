use super::{codec::check_indices, Unit, UnitKind};
use crate::{
    data::{DataBlock, Shape},
    error::{Error, Result},
    layers::mean_abs,
};
use serde::{Deserialize, Serialize};

use std::fmt;

/// Strategy choosing which value of a channel a pooling unit keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSelector {
    Max,
    Min,
    /// Largest magnitude, sign preserved.
    AbsMax,
}

impl Default for PoolSelector {
    fn default() -> Self {
        PoolSelector::Max
    }
}

impl PoolSelector {
    /// Whether `candidate` replaces `best`. Ties keep the earlier value.
    fn beats(self, candidate: f32, best: f32) -> bool {
        match self {
            PoolSelector::Max => candidate > best,
            PoolSelector::Min => candidate < best,
            PoolSelector::AbsMax => candidate.abs() > best.abs(),
        }
    }
}

impl fmt::Display for PoolSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PoolSelector::Max => "max",
            PoolSelector::Min => "min",
            PoolSelector::AbsMax => "abs_max",
        })
    }
}

/// Parameterless unit keeping one value of every channel over its patch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolingUnit {
    shape: Shape,
    selector: PoolSelector,

    #[serde(skip)]
    patch: Vec<f32>,
    #[serde(skip)]
    encoded: Vec<f32>,
    #[serde(skip)]
    decoded: Vec<f32>,
    /// Patch position of the value kept for every channel.
    #[serde(skip)]
    winners: Vec<usize>,
    #[serde(skip)]
    input_error: Vec<f32>,
}

impl PoolingUnit {
    pub fn new(shape: Shape, selector: PoolSelector) -> Self {
        let mut unit = Self {
            shape,
            selector,
            patch: Vec::new(),
            encoded: Vec::new(),
            decoded: Vec::new(),
            winners: Vec::new(),
            input_error: Vec::new(),
        };
        unit.rebuild();
        unit
    }

    pub fn selector(&self) -> PoolSelector {
        self.selector
    }

    /// Patch positions chosen by the last encoding, one per channel.
    pub fn winners(&self) -> &[usize] {
        &self.winners
    }

    /// Error left on the patch by the last back propagation.
    pub fn input_error(&self) -> &[f32] {
        &self.input_error
    }
}

impl Unit for PoolingUnit {
    fn input_shape(&self) -> Shape {
        self.shape
    }

    fn output_depth(&self) -> usize {
        self.shape.depth
    }

    fn rebuild(&mut self) {
        self.patch = vec![0.; self.shape.len()];
        self.encoded = vec![0.; self.shape.depth];
        self.decoded = vec![0.; self.shape.len()];
        self.winners = (0..self.shape.depth).collect();
        self.input_error = vec![0.; self.shape.len()];
    }

    fn encode(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<&[f32]> {
        input.patch_to_array(x, y, self.shape.width, self.shape.height, &mut self.patch);
        let depth = self.shape.depth;
        for z in 0..depth {
            let mut winner = z;
            for i in (z..self.patch.len()).step_by(depth) {
                if self.selector.beats(self.patch[i], self.patch[winner]) {
                    winner = i;
                }
            }
            self.winners[z] = winner;
            self.encoded[z] = self.patch[winner];
        }
        Ok(&self.encoded)
    }

    fn encoded(&self) -> &[f32] {
        &self.encoded
    }

    fn decode(&mut self) -> Result<&[f32]> {
        let depth = self.shape.depth;
        for cell in self.decoded.chunks_exact_mut(depth) {
            cell.copy_from_slice(&self.encoded);
        }
        Ok(&self.decoded)
    }

    fn decoded(&self) -> &[f32] {
        &self.decoded
    }

    fn accumulate(&mut self, _input: &DataBlock, _x: usize, _y: usize) -> Result<f32> {
        Err(Error::unsupported("training", "pooling"))
    }

    fn learn_reconstruction(&mut self) -> Result<()> {
        Err(Error::unsupported("training", "pooling"))
    }

    fn back_propagate(
        &mut self,
        input: &DataBlock,
        x: usize,
        y: usize,
        error: &[f32],
        upstream: Option<&mut DataBlock>,
    ) -> Result<f32> {
        assert_eq!(error.len(), self.shape.depth);
        self.encode(input, x, y)?;

        self.input_error.iter_mut().for_each(|e| *e = 0.);
        for (winner, e) in self.winners.iter().zip(error) {
            self.input_error[*winner] = *e;
        }
        // no accumulation weight, overlapping windows add up
        if let Some(upstream) = upstream {
            let (depth, height) = (self.shape.depth, self.shape.height);
            for (winner, e) in self.winners.iter().zip(error) {
                let cell = winner / depth;
                upstream.add_value(winner % depth, x + cell / height, y + cell % height, *e);
            }
        }
        Ok(mean_abs(error))
    }

    fn learn(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_gradients(&mut self) {}

    fn learning_rate(&self) -> Option<f32> {
        None
    }

    fn set_learning_rate(&mut self, _rate: f32) {}

    fn delete_features(&mut self, _indices: &[usize]) -> Result<()> {
        Err(Error::unsupported("feature deletion", "pooling"))
    }

    /// Pooled channels follow the input, so deleting one deletes the output of the same index.
    fn delete_input_channels(&mut self, channels: &[usize]) -> Result<Vec<usize>> {
        check_indices(channels, self.shape.depth, "input channel")?;
        let mut removed = channels.to_vec();
        removed.sort_unstable();
        removed.dedup();
        self.shape = self.shape.with_depth(self.shape.depth - removed.len());
        self.rebuild();
        Ok(removed)
    }

    fn is_trainable(&self) -> bool {
        false
    }

    fn supports_feature_deletion(&self) -> bool {
        false
    }

    fn kind(&self) -> UnitKind {
        match self.selector {
            PoolSelector::Max => UnitKind::MaxPooling,
            _ => UnitKind::Pooling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_goes_to_the_maximum_only() {
        let shape = Shape::new(1, 3, 1);
        let mut unit = PoolingUnit::new(shape, PoolSelector::Max);
        let input = DataBlock::from_values(shape, vec![0.1, 0.9, 0.2]);
        let mut upstream = DataBlock::with_shape(shape);

        assert_eq!(unit.encode(&input, 0, 0).unwrap(), &[0.9]);
        unit.back_propagate(&input, 0, 0, &[1.], Some(&mut upstream))
            .unwrap();
        upstream.normalize_weights();
        assert_eq!(upstream.as_slice(), &[0., 1., 0.]);
    }

    #[test]
    fn winners_of_a_wide_patch_land_on_their_cell() {
        let shape = Shape::new(2, 2, 2);
        let mut unit = PoolingUnit::new(shape, PoolSelector::Max);
        // channel 0 peaks at (1, 0), channel 1 at (0, 1)
        let input = DataBlock::from_values(shape, vec![0., 0., 0., 5., 4., 0., 0., 0.]);
        let mut upstream = DataBlock::new(3, 3, 2);

        unit.back_propagate(&input, 0, 0, &[1., 2.], Some(&mut upstream))
            .unwrap();
        // shifted by the patch corner
        let mut shifted = DataBlock::new(3, 3, 2);
        let mut big_input = DataBlock::new(3, 3, 2);
        for x in 0..2 {
            for y in 0..2 {
                big_input.values_mut(x + 1, y + 1).copy_from_slice(input.values(x, y));
            }
        }
        unit.back_propagate(&big_input, 1, 1, &[1., 2.], Some(&mut shifted))
            .unwrap();

        assert_eq!(upstream.value(0, 1, 0), 1.);
        assert_eq!(upstream.value(1, 0, 1), 2.);
        assert_eq!(upstream.as_slice().iter().sum::<f32>(), 3.);
        assert_eq!(shifted.value(0, 2, 1), 1.);
        assert_eq!(shifted.value(1, 1, 2), 2.);
        assert_eq!(upstream.weight(1, 0), 0.);
    }

    #[test]
    fn ties_keep_the_first_candidate() {
        let shape = Shape::new(2, 2, 2);
        let mut unit = PoolingUnit::new(shape, PoolSelector::Max);
        let input = DataBlock::from_values(shape, vec![0.5, 0., 0.5, 3., 0.2, 3., 0.5, 1.]);
        assert_eq!(unit.encode(&input, 0, 0).unwrap(), &[0.5, 3.]);
        assert_eq!(unit.winners(), &[0, 3]);
    }

    #[test]
    fn selectors_pick_their_extreme() {
        let shape = Shape::new(1, 3, 1);
        let input = DataBlock::from_values(shape, vec![0.3, -0.8, 0.5]);
        let mut min = PoolingUnit::new(shape, PoolSelector::Min);
        let mut abs = PoolingUnit::new(shape, PoolSelector::AbsMax);
        assert_eq!(min.encode(&input, 0, 0).unwrap(), &[-0.8]);
        assert_eq!(abs.encode(&input, 0, 0).unwrap(), &[-0.8]);
        assert_eq!(min.kind(), UnitKind::Pooling);
    }

    #[test]
    fn decode_broadcasts_the_pooled_values() {
        let shape = Shape::new(2, 1, 2);
        let mut unit = PoolingUnit::new(shape, PoolSelector::Max);
        let input = DataBlock::from_values(shape, vec![1., 4., 2., 3.]);
        unit.encode(&input, 0, 0).unwrap();
        assert_eq!(unit.decode().unwrap(), &[2., 4., 2., 4.]);
    }

    #[test]
    fn pooling_cannot_be_trained() {
        let shape = Shape::new(2, 2, 1);
        let mut unit = PoolingUnit::new(shape, PoolSelector::Max);
        let input = DataBlock::with_shape(shape);
        assert!(matches!(
            unit.train(&input, 0, 0),
            Err(Error::Unsupported { unit: "pooling", .. })
        ));
        assert!(unit.delete_features(&[0]).is_err());
    }

    #[test]
    fn deleting_input_channels_deletes_the_same_outputs() {
        let mut unit = PoolingUnit::new(Shape::new(2, 2, 3), PoolSelector::Max);
        assert_eq!(unit.delete_input_channels(&[1]).unwrap(), vec![1]);
        assert_eq!(unit.output_depth(), 2);
        assert_eq!(unit.encoded().len(), 2);
    }
}
