//! Replication of one auto-encoder unit over a grid of input patches.

use crate::{
    data::{DataBlock, Shape},
    error::{Error, Result},
    initializer::Initializer,
    layers::LayerKind,
    optimizer::OptimizerConfig,
    unit::{AutoEncoder, Unit, UnitBuilder, UnitKind},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use std::fmt;

/// Weights of a convolution layer: one unit moved over every grid position, or one
/// independent unit per position.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    Shared(AutoEncoder),
    Untied(Vec<AutoEncoder>),
}

impl Units {
    /// Clones the shared unit into `cells` independent ones.
    pub fn untie(self, cells: usize) -> Result<Self> {
        match self {
            Units::Shared(unit) => Ok(Units::Untied(vec![unit; cells])),
            Units::Untied(_) => Err(Error::config("the layer is already deconvolved")),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Units::Shared(_))
    }

    /// Any unit, all of them have the same shapes.
    pub fn template(&self) -> &AutoEncoder {
        match self {
            Units::Shared(unit) => unit,
            Units::Untied(units) => &units[0],
        }
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, AutoEncoder> {
        match self {
            Units::Shared(unit) => std::slice::from_mut(unit).iter_mut(),
            Units::Untied(units) => units.iter_mut(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AutoEncoder> {
        match self {
            Units::Shared(unit) => std::slice::from_ref(unit).iter(),
            Units::Untied(units) => units.iter(),
        }
    }
}

/// The unit responsible for the grid cell `(gx, gy)`.
fn cell_unit(units: &mut Units, rows: usize, gx: usize, gy: usize) -> &mut AutoEncoder {
    match units {
        Units::Shared(unit) => unit,
        Units::Untied(units) => &mut units[gx * rows + gy],
    }
}

/// A grid of `cols x rows` units, the unit of cell `(gx, gy)` reading the patch at
/// `(input_x + gx * offset_x, input_y + gy * offset_y)` and writing the channels of
/// output cell `(gx, gy)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConvolutionLayer {
    units: Units,
    cols: usize,
    rows: usize,
    offset_x: usize,
    offset_y: usize,
    input_x: usize,
    input_y: usize,

    #[serde(skip)]
    output: DataBlock,
    #[serde(skip)]
    error: DataBlock,
}

impl ConvolutionLayer {
    /// Tiles `unit` over an input of `input_width x input_height`, as many times as fits.
    pub fn new(
        unit: AutoEncoder,
        input_width: usize,
        input_height: usize,
        offset_x: usize,
        offset_y: usize,
    ) -> Result<Self> {
        let shape = unit.input_shape();
        if offset_x == 0 || offset_y == 0 {
            return Err(Error::config("convolution offsets must be positive"));
        }
        if shape.width > input_width || shape.height > input_height {
            return Err(Error::config(format!(
                "a {} unit doesn't fit in a {}x{} input",
                shape, input_width, input_height
            )));
        }
        let cols = (input_width - shape.width) / offset_x + 1;
        let rows = (input_height - shape.height) / offset_y + 1;
        if (input_width - shape.width) % offset_x != 0 || (input_height - shape.height) % offset_y != 0 {
            warn!(
                input_width,
                input_height,
                cols,
                rows,
                "the grid doesn't cover the whole input"
            );
        }
        Self::with_grid(unit, cols, rows, offset_x, offset_y)
    }

    /// Shares `unit` over an explicit grid.
    pub fn with_grid(
        unit: AutoEncoder,
        cols: usize,
        rows: usize,
        offset_x: usize,
        offset_y: usize,
    ) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(Error::config("a convolution grid needs at least one cell"));
        }
        if offset_x == 0 || offset_y == 0 {
            return Err(Error::config("convolution offsets must be positive"));
        }
        let mut layer = Self {
            units: Units::Shared(unit),
            cols,
            rows,
            offset_x,
            offset_y,
            input_x: 0,
            input_y: 0,
            output: DataBlock::default(),
            error: DataBlock::default(),
        };
        layer.rebuild_blocks();
        debug!(layer = %layer, "built convolution layer");
        Ok(layer)
    }

    /// Single standard unit reading the whole output volume of the layer below.
    pub fn classification(
        below: Shape,
        neurons: usize,
        encoder: LayerKind,
        decoder: LayerKind,
        optimizer: &OptimizerConfig,
        init: &mut dyn Initializer,
    ) -> Result<Self> {
        let unit = UnitBuilder::new(UnitKind::Standard, below.width, below.height, below.depth, neurons)
            .encoder(encoder)
            .decoder(decoder)
            .optimizer(optimizer.clone())
            .build(init)?;
        Self::with_grid(unit, 1, 1, 1, 1)
    }

    /// Reallocates buffers of every unit and the output and error blocks.
    pub fn rebuild(&mut self) {
        for unit in self.units.iter_mut() {
            unit.rebuild();
        }
        self.rebuild_blocks();
    }

    fn rebuild_blocks(&mut self) {
        let shape = self.output_shape();
        self.output = DataBlock::with_shape(shape);
        self.error = DataBlock::with_shape(shape);
    }

    pub fn units(&self) -> &Units {
        &self.units
    }

    pub fn is_shared(&self) -> bool {
        self.units.is_shared()
    }

    /// Unit computing the grid cell `(gx, gy)`.
    pub fn unit_mut(&mut self, gx: usize, gy: usize) -> &mut AutoEncoder {
        assert!(gx < self.cols && gy < self.rows, "Cell ({}, {}) is out of the grid", gx, gy);
        cell_unit(&mut self.units, self.rows, gx, gy)
    }

    pub fn grid(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn offsets(&self) -> (usize, usize) {
        (self.offset_x, self.offset_y)
    }

    pub fn unit_kind(&self) -> UnitKind {
        self.units.template().kind()
    }

    /// Extent of the input region read by the grid.
    pub fn input_shape(&self) -> Shape {
        let unit = self.units.template().input_shape();
        Shape::new(
            (self.cols - 1) * self.offset_x + unit.width,
            (self.rows - 1) * self.offset_y + unit.height,
            unit.depth,
        )
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(self.cols, self.rows, self.units.template().output_depth())
    }

    /// Changes the size of the grid of a shared layer.
    pub fn regrid(&mut self, cols: usize, rows: usize) -> Result<()> {
        if !self.is_shared() {
            return Err(Error::config("a deconvolved layer cannot change its grid"));
        }
        if cols == 0 || rows == 0 {
            return Err(Error::config("a convolution grid needs at least one cell"));
        }
        debug!(from_cols = self.cols, from_rows = self.rows, cols, rows, "regridding layer");
        self.cols = cols;
        self.rows = rows;
        self.rebuild_blocks();
        Ok(())
    }

    /// Corner of the region read in the input block.
    pub fn set_input(&mut self, x: usize, y: usize) {
        self.input_x = x;
        self.input_y = y;
    }

    pub fn input_origin(&self) -> (usize, usize) {
        (self.input_x, self.input_y)
    }

    fn patch_corner(&self, gx: usize, gy: usize) -> (usize, usize) {
        (
            self.input_x + gx * self.offset_x,
            self.input_y + gy * self.offset_y,
        )
    }

    /// Encodes every grid cell into the output block.
    pub fn compute(&mut self, input: &DataBlock) -> Result<()> {
        for gx in 0..self.cols {
            for gy in 0..self.rows {
                let (x, y) = self.patch_corner(gx, gy);
                let unit = cell_unit(&mut self.units, self.rows, gx, gy);
                let encoded = unit.encode(input, x, y)?;
                self.output.values_mut(gx, gy).copy_from_slice(encoded);
            }
        }
        Ok(())
    }

    pub fn output(&self) -> &DataBlock {
        &self.output
    }

    pub fn error(&self) -> &DataBlock {
        &self.error
    }

    /// Output of this layer together with its error block, the input and the
    /// back propagation target of the layer above.
    pub fn output_and_error_mut(&mut self) -> (&DataBlock, &mut DataBlock) {
        (&self.output, &mut self.error)
    }

    /// Injects an error on output `(x, y, z)`. Shared weights see it once per cell,
    /// so it is divided by the size of the grid.
    pub fn add_error(&mut self, x: usize, y: usize, z: usize, error: f32) {
        let error = if self.is_shared() {
            error / (self.cols * self.rows) as f32
        } else {
            error
        };
        self.error.add_value(z, x, y, error);
    }

    /// Sets the target of output `(x, y, z)`.
    pub fn set_expected(&mut self, x: usize, y: usize, z: usize, expected: f32) {
        let error = self.output.value(z, x, y) - expected;
        self.add_error(x, y, z, error);
    }

    /// Back propagates the error block through every cell, re-encoding each patch first.
    /// Input errors are weighted-pasted into `upstream`, which is normalized afterwards.
    /// Returns the mean of the cell errors.
    pub fn back_propagate(&mut self, input: &DataBlock, mut upstream: Option<&mut DataBlock>) -> Result<f32> {
        let mut total = 0.;
        for gx in 0..self.cols {
            for gy in 0..self.rows {
                let (x, y) = self.patch_corner(gx, gy);
                let unit = cell_unit(&mut self.units, self.rows, gx, gy);
                total += unit.back_propagate(
                    input,
                    x,
                    y,
                    self.error.values(gx, gy),
                    upstream.as_deref_mut(),
                )?;
            }
        }
        if let Some(upstream) = upstream {
            upstream.normalize_weights();
        }
        Ok(total / (self.cols * self.rows) as f32)
    }

    /// Applies accumulated gradients, once for a shared unit.
    pub fn learn(&mut self) -> Result<()> {
        for unit in self.units.iter_mut() {
            unit.learn()?;
        }
        Ok(())
    }

    pub fn clear_error(&mut self) {
        self.error.clear();
    }

    pub fn clear_gradients(&mut self) {
        for unit in self.units.iter_mut() {
            unit.clear_gradients();
        }
    }

    /// Trains every cell on its own patch. A shared unit sums the contributions of
    /// the whole grid and learns once. Returns the mean error.
    pub fn train(&mut self, input: &DataBlock, label: Option<usize>) -> Result<f32> {
        let mut total = 0.;
        for gx in 0..self.cols {
            for gy in 0..self.rows {
                let (x, y) = self.patch_corner(gx, gy);
                let unit = cell_unit(&mut self.units, self.rows, gx, gy);
                total += match label {
                    Some(label) => unit.accumulate_labelled(input, x, y, label)?,
                    None => unit.accumulate(input, x, y)?,
                };
            }
        }
        for unit in self.units.iter_mut() {
            unit.learn_reconstruction()?;
        }
        Ok(total / (self.cols * self.rows) as f32)
    }

    pub fn training_done(&mut self) -> Result<()> {
        for unit in self.units.iter_mut() {
            unit.training_done()?;
        }
        Ok(())
    }

    pub fn start_training(&mut self) {
        self.units.iter_mut().for_each(|u| u.start_training());
    }

    pub fn stop_training(&mut self) {
        self.units.iter_mut().for_each(|u| u.stop_training());
    }

    /// Gives every grid cell its own copy of the shared unit. Outputs are unchanged
    /// until the copies are trained.
    pub fn deconvolve(&mut self) -> Result<()> {
        if !self.is_shared() {
            return Err(Error::config("the layer is already deconvolved"));
        }
        let cells = self.cols * self.rows;
        let units = std::mem::replace(&mut self.units, Units::Untied(Vec::new()));
        self.units = units.untie(cells)?;
        debug!(cells, "deconvolved layer");
        Ok(())
    }

    /// Removes output features from every unit.
    pub fn delete_features(&mut self, indices: &[usize]) -> Result<()> {
        let template = self.units.template();
        if !template.supports_feature_deletion() {
            return Err(Error::unsupported("feature deletion", template.kind().name()));
        }
        for unit in self.units.iter_mut() {
            unit.delete_features(indices)?;
        }
        self.rebuild_blocks();
        Ok(())
    }

    /// Removes channels of the input. Returns the output features removed as a consequence.
    pub fn delete_input_channels(&mut self, channels: &[usize]) -> Result<Vec<usize>> {
        let mut removed = Vec::new();
        for unit in self.units.iter_mut() {
            removed = unit.delete_input_channels(channels)?;
        }
        self.rebuild_blocks();
        Ok(removed)
    }

    /// Learning rate of the first unit, `None` if it has no weights.
    pub fn learning_rate(&self) -> Option<f32> {
        self.units.template().learning_rate()
    }

    pub fn set_learning_rate(&mut self, rate: f32) {
        self.units.iter_mut().for_each(|u| u.set_learning_rate(rate));
    }
}

impl fmt::Display for ConvolutionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} grid of {} (offset {}x{})",
            if self.is_shared() { "shared" } else { "untied" },
            self.cols,
            self.rows,
            self.units.template(),
            self.offset_x,
            self.offset_y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        initializer::Xavier,
        layers::{tests::check, Layer},
    };

    fn standard(width: usize, height: usize, depth: usize, output: usize) -> AutoEncoder {
        UnitBuilder::new(UnitKind::Standard, width, height, depth, output)
            .build(&mut Xavier::with_seed(9))
            .unwrap()
    }

    #[test]
    fn grid_covers_the_input() {
        let layer = ConvolutionLayer::new(standard(2, 2, 1, 3), 5, 4, 1, 2).unwrap();
        assert_eq!(layer.grid(), (4, 2));
        assert_eq!(layer.input_shape(), Shape::new(5, 4, 1));
        assert_eq!(layer.output_shape(), Shape::new(4, 2, 3));
        assert_eq!(layer.output().shape(), Shape::new(4, 2, 3));
    }

    #[test]
    fn oversized_units_are_rejected() {
        assert!(ConvolutionLayer::new(standard(3, 3, 1, 1), 2, 5, 1, 1).is_err());
        assert!(ConvolutionLayer::new(standard(1, 1, 1, 1), 2, 2, 0, 1).is_err());
    }

    #[test]
    fn shared_error_is_split_over_the_grid() {
        let mut layer = ConvolutionLayer::with_grid(standard(1, 1, 1, 1), 2, 2, 1, 1).unwrap();
        layer.add_error(1, 1, 0, 1.);
        assert_eq!(layer.error().value(0, 1, 1), 0.25);

        layer.deconvolve().unwrap();
        layer.add_error(0, 0, 0, 1.);
        assert_eq!(layer.error().value(0, 0, 0), 1.);
    }

    #[test]
    fn deconvolving_twice_fails() {
        let mut layer = ConvolutionLayer::with_grid(standard(1, 1, 1, 1), 2, 1, 1, 1).unwrap();
        layer.deconvolve().unwrap();
        assert!(matches!(layer.deconvolve(), Err(Error::Config(_))));
        assert!(!layer.is_shared());
        match layer.units() {
            Units::Untied(units) => assert_eq!(units.len(), 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn untied_cells_learn_independently() {
        let mut layer = ConvolutionLayer::with_grid(standard(1, 1, 1, 1), 2, 1, 1, 1).unwrap();
        layer.set_learning_rate(0.5);
        layer.deconvolve().unwrap();
        let input = DataBlock::from_values(Shape::new(2, 1, 1), vec![1., 1.]);

        layer.compute(&input).unwrap();
        layer.set_expected(0, 0, 0, 0.9);
        layer.back_propagate(&input, None).unwrap();
        layer.learn().unwrap();
        layer.clear_error();

        layer.compute(&input).unwrap();
        assert_ne!(layer.output().value(0, 0, 0), layer.output().value(0, 1, 0));
    }

    fn encoder_weights(unit: &AutoEncoder) -> Vec<f32> {
        match unit {
            AutoEncoder::StandardUnit(u) => u.codec().encoder().weights().to_vec(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn shared_training_learns_once_per_grid() {
        let mut layer = ConvolutionLayer::with_grid(standard(1, 1, 1, 2), 4, 1, 1, 1).unwrap();
        layer.set_learning_rate(0.1);
        let input = DataBlock::from_values(Shape::new(4, 1, 1), vec![0.8, -0.4, 0.3, 0.6]);
        let mut summed = layer.units().template().clone();
        let mut stepped = layer.units().template().clone();

        layer.train(&input, None).unwrap();

        for x in 0..4 {
            summed.accumulate(&input, x, 0).unwrap();
            stepped.train(&input, x, 0).unwrap();
        }
        summed.learn_reconstruction().unwrap();

        let trained = encoder_weights(layer.units().template());
        check(&encoder_weights(&summed), &trained, 1e-6, "shared encoder");
        assert_ne!(trained, encoder_weights(&stepped));
    }

    #[test]
    fn untied_cells_train_on_their_own_patch() {
        let mut layer = ConvolutionLayer::with_grid(standard(1, 1, 1, 2), 2, 1, 1, 1).unwrap();
        layer.deconvolve().unwrap();
        let input = DataBlock::from_values(Shape::new(2, 1, 1), vec![0.8, -0.4]);
        let mut first = layer.units().template().clone();

        layer.train(&input, None).unwrap();
        first.train(&input, 0, 0).unwrap();

        match layer.units() {
            Units::Untied(units) => {
                check(&encoder_weights(&first), &encoder_weights(&units[0]), 1e-6, "first cell");
                assert_ne!(encoder_weights(&units[0]), encoder_weights(&units[1]));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn display_describes_the_grid() {
        let layer = ConvolutionLayer::with_grid(standard(2, 2, 1, 3), 3, 2, 1, 1).unwrap();
        assert_eq!(
            layer.to_string(),
            "shared 3x2 grid of standard 2x2x1 -> 3 (offset 1x1)"
        );
    }
}
