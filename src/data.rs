//! Three dimensional float buffers shared between convolution layers.
//!
//! Values are laid out cell by cell: all channels of `(x, y)` are stored
//! contiguously and cells are ordered with `x` outermost. Patches are flattened
//! in exactly the same order, `index = (x * height + y) * depth + z`, and the
//! weight matrices of every unit are indexed assuming it.

use serde::{Deserialize, Serialize};

use std::fmt;

/// Extent of a block or patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Shape {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Number of floats contained in a block of this shape.
    pub fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `(x, y)` cells.
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Position of `(x, y, z)` in a flattened patch of this shape.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.height + y) * self.depth + z
    }

    /// Same extent with a different depth.
    pub fn with_depth(&self, depth: usize) -> Self {
        Self { depth, ..*self }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Tensor buffer holding `width * height * depth` values and one accumulation
/// weight per cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    shape: Shape,
    values: Vec<f32>,
    weights: Vec<f32>,
}

impl DataBlock {
    /// Creates a zeroed block.
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self::with_shape(Shape::new(width, height, depth))
    }

    pub fn with_shape(shape: Shape) -> Self {
        Self {
            shape,
            values: vec![0.; shape.len()],
            weights: vec![0.; shape.area()],
        }
    }

    /// Wraps already flattened values. Panics if their number doesn't match the shape.
    pub fn from_values(shape: Shape, values: Vec<f32>) -> Self {
        assert_eq!(
            values.len(),
            shape.len(),
            "A block of shape {} needs {} values, received {}",
            shape,
            shape.len(),
            values.len()
        );
        Self {
            shape,
            values,
            weights: vec![0.; shape.area()],
        }
    }

    /// Creates a block whose every channel of every cell holds `value`.
    pub fn filled(shape: Shape, value: f32) -> Self {
        Self::from_values(shape, vec![value; shape.len()])
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> usize {
        self.shape.width
    }

    pub fn height(&self) -> usize {
        self.shape.height
    }

    pub fn depth(&self) -> usize {
        self.shape.depth
    }

    #[inline]
    fn cell(&self, x: usize, y: usize) -> usize {
        assert!(
            x < self.shape.width && y < self.shape.height,
            "Coordinates ({}, {}) are out of the {} block",
            x,
            y,
            self.shape
        );
        x * self.shape.height + y
    }

    #[inline]
    fn offset(&self, z: usize, x: usize, y: usize) -> usize {
        assert!(
            z < self.shape.depth,
            "Channel {} is out of the {} block",
            z,
            self.shape
        );
        self.cell(x, y) * self.shape.depth + z
    }

    pub fn value(&self, z: usize, x: usize, y: usize) -> f32 {
        self.values[self.offset(z, x, y)]
    }

    pub fn set_value(&mut self, z: usize, x: usize, y: usize, value: f32) {
        let i = self.offset(z, x, y);
        self.values[i] = value;
    }

    pub fn add_value(&mut self, z: usize, x: usize, y: usize, value: f32) {
        let i = self.offset(z, x, y);
        self.values[i] += value;
    }

    /// Channel vector of the cell `(x, y)`.
    pub fn values(&self, x: usize, y: usize) -> &[f32] {
        let start = self.cell(x, y) * self.shape.depth;
        &self.values[start..start + self.shape.depth]
    }

    /// Mutable channel vector of the cell `(x, y)`; writes go straight into the block.
    pub fn values_mut(&mut self, x: usize, y: usize) -> &mut [f32] {
        let start = self.cell(x, y) * self.shape.depth;
        &mut self.values[start..start + self.shape.depth]
    }

    /// Every value of the block in storage order.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Accumulation weight of the cell `(x, y)`.
    pub fn weight(&self, x: usize, y: usize) -> f32 {
        self.weights[self.cell(x, y)]
    }

    fn check_patch(&self, x: usize, y: usize, width: usize, height: usize) {
        assert!(
            x + width <= self.shape.width && y + height <= self.shape.height,
            "Patch {}x{} at ({}, {}) doesn't fit in the {} block",
            width,
            height,
            x,
            y,
            self.shape
        );
    }

    /// Flattens the `width * height` patch whose corner is `(x, y)` into `out`.
    pub fn patch_to_array(&self, x: usize, y: usize, width: usize, height: usize, out: &mut [f32]) {
        self.check_patch(x, y, width, height);
        let depth = self.shape.depth;
        assert_eq!(out.len(), width * height * depth, "Patch buffer has the wrong length");

        let rows = out.chunks_exact_mut(height * depth);
        for (px, row) in rows.enumerate() {
            let start = self.cell(x + px, y) * depth;
            row.copy_from_slice(&self.values[start..start + height * depth]);
        }
    }

    /// Inverse of [patch_to_array](Self::patch_to_array), overwrites the patch.
    pub fn array_to_patch(&mut self, array: &[f32], x: usize, y: usize, width: usize, height: usize) {
        self.check_patch(x, y, width, height);
        let depth = self.shape.depth;
        assert_eq!(array.len(), width * height * depth, "Patch buffer has the wrong length");

        for (px, row) in array.chunks_exact(height * depth).enumerate() {
            let start = self.cell(x + px, y) * depth;
            self.values[start..start + height * depth].copy_from_slice(row);
        }
    }

    /// Adds `values` to the cell `(x, y)` and increments its weight.
    pub fn weighted_paste(&mut self, values: &[f32], x: usize, y: usize) {
        assert_eq!(values.len(), self.shape.depth, "Cell vector has the wrong length");
        let cell = self.cell(x, y);
        for (v, add) in self.values_mut(x, y).iter_mut().zip(values) {
            *v += *add;
        }
        self.weights[cell] += 1.;
    }

    /// Weighted paste of a whole flattened patch, one weight increment per covered cell.
    pub fn weighted_paste_patch(
        &mut self,
        array: &[f32],
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) {
        self.check_patch(x, y, width, height);
        let depth = self.shape.depth;
        assert_eq!(array.len(), width * height * depth, "Patch buffer has the wrong length");

        for (i, cell) in array.chunks_exact(depth).enumerate() {
            self.weighted_paste(cell, x + i / height, y + i % height);
        }
    }

    /// Divides every cell by its accumulation weight. Untouched (0) and already
    /// normalized (1) cells are left alone.
    pub fn normalize_weights(&mut self) {
        let depth = self.shape.depth;
        for (cell, weight) in self.weights.iter_mut().enumerate() {
            if *weight != 0. && *weight != 1. {
                let recip = 1. / *weight;
                for v in &mut self.values[cell * depth..(cell + 1) * depth] {
                    *v *= recip;
                }
                *weight = 1.;
            }
        }
    }

    /// Zeroes values and weights.
    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.);
        self.clear_weights();
    }

    pub fn clear_weights(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.);
    }

    /// Removes the given channels from every cell, shrinking the depth.
    pub fn delete_channels(&mut self, channels: &[usize]) {
        let depth = self.shape.depth;
        let keep: Vec<usize> = (0..depth).filter(|z| !channels.contains(z)).collect();
        let mut values = Vec::with_capacity(keep.len() * self.shape.area());
        for cell in self.values.chunks_exact(depth) {
            values.extend(keep.iter().map(|z| cell[*z]));
        }
        self.shape.depth = keep.len();
        self.values = values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_block(shape: Shape) -> DataBlock {
        DataBlock::from_values(shape, (0..shape.len()).map(|i| i as f32).collect())
    }

    #[test]
    fn values_are_cell_major() {
        let block = counting_block(Shape::new(3, 2, 2));
        // cell (1, 1) is the 4th cell: x * height + y = 3
        assert_eq!(block.values(1, 1), &[6., 7.]);
        assert_eq!(block.value(1, 2, 0), 9.);
    }

    #[test]
    fn values_mut_writes_through() {
        let mut block = DataBlock::new(2, 2, 3);
        block.values_mut(1, 0)[2] = 5.;
        assert_eq!(block.value(2, 1, 0), 5.);
    }

    #[test]
    fn patch_order_is_x_then_y_then_channel() {
        let block = counting_block(Shape::new(4, 4, 2));
        let mut patch = vec![0.; 2 * 2 * 2];
        block.patch_to_array(1, 2, 2, 2, &mut patch);

        let mut expected = Vec::new();
        for x in 1..3 {
            for y in 2..4 {
                for z in 0..2 {
                    expected.push(block.value(z, x, y));
                }
            }
        }
        assert_eq!(patch, expected);
    }

    #[test]
    fn array_to_patch_inverts_patch_to_array() {
        let source = counting_block(Shape::new(4, 3, 2));
        let mut patch = vec![0.; 2 * 3 * 2];
        source.patch_to_array(2, 0, 2, 3, &mut patch);

        let mut target = DataBlock::new(4, 3, 2);
        target.array_to_patch(&patch, 2, 0, 2, 3);
        for x in 2..4 {
            for y in 0..3 {
                assert_eq!(target.values(x, y), source.values(x, y));
            }
        }
        assert_eq!(target.values(0, 0), &[0., 0.]);
    }

    #[test]
    fn disjoint_pastes_are_kept_exactly() {
        let shape = Shape::new(4, 2, 1);
        let patches = [([1.5, -2.], 0), ([0.25, 7.], 1), ([3., 4.], 2), ([-1., 0.5], 3)];

        for order in &[[0, 1, 2, 3], [3, 1, 0, 2]] {
            let mut block = DataBlock::with_shape(shape);
            for i in order.iter() {
                let (values, x) = patches[*i];
                block.weighted_paste_patch(&values, x, 0, 1, 2);
            }
            block.normalize_weights();
            for (values, x) in patches.iter() {
                assert_eq!(block.value(0, *x, 0), values[0]);
                assert_eq!(block.value(0, *x, 1), values[1]);
                assert_eq!(block.weight(*x, 0), 1.);
                assert_eq!(block.weight(*x, 1), 1.);
            }
        }
    }

    #[test]
    fn overlapping_pastes_are_averaged() {
        let mut block = DataBlock::new(3, 1, 1);
        block.weighted_paste_patch(&[0.7, 0.7], 0, 0, 2, 1);
        block.weighted_paste_patch(&[0.7, 0.7], 1, 0, 2, 1);
        assert_eq!(block.weight(1, 0), 2.);

        block.normalize_weights();
        assert!((block.value(0, 1, 0) - 0.7).abs() < 1e-7);
        assert_eq!(block.weight(1, 0), 1.);
        assert_eq!(block.value(0, 0, 0), 0.7);
    }

    #[test]
    fn untouched_cells_keep_zero_weight() {
        let mut block = DataBlock::new(2, 2, 1);
        block.weighted_paste(&[2.], 0, 0);
        block.weighted_paste(&[4.], 0, 0);
        block.normalize_weights();
        assert_eq!(block.value(0, 0, 0), 3.);
        assert_eq!(block.weight(1, 1), 0.);
    }

    #[test]
    fn clear_resets_values_and_weights() {
        let mut block = counting_block(Shape::new(2, 2, 1));
        block.weighted_paste(&[1.], 1, 1);
        block.clear();
        assert!(block.as_slice().iter().all(|v| *v == 0.));
        assert_eq!(block.weight(1, 1), 0.);
    }

    #[test]
    fn delete_channels_shrinks_depth() {
        let mut block = counting_block(Shape::new(1, 2, 3));
        block.delete_channels(&[1]);
        assert_eq!(block.shape(), Shape::new(1, 2, 2));
        assert_eq!(block.values(0, 0), &[0., 2.]);
        assert_eq!(block.values(0, 1), &[3., 5.]);
    }

    #[test]
    #[should_panic]
    fn out_of_range_read_panics() {
        let block = DataBlock::new(2, 2, 1);
        block.value(0, 2, 0);
    }
}
