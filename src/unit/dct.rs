use crate::data::Shape;

use nalgebra::DMatrix;

use std::f32::consts::PI;

/// Orthonormal two dimensional DCT-II applied to every channel of a flattened patch.
///
/// The inverse is the transpose, so errors in the transformed space map back with
/// [inverse](Dct::inverse) as well.
#[derive(Debug, Clone)]
pub struct Dct {
    shape: Shape,
    across: DMatrix<f32>,
    down: DMatrix<f32>,
}

impl Default for Dct {
    fn default() -> Self {
        Self::new(Shape::default())
    }
}

fn basis(n: usize) -> DMatrix<f32> {
    DMatrix::from_fn(n, n, |k, i| {
        let scale = if k == 0 { (1. / n as f32).sqrt() } else { (2. / n as f32).sqrt() };
        scale * (PI * (2 * i + 1) as f32 * k as f32 / (2 * n) as f32).cos()
    })
}

impl Dct {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            across: basis(shape.width),
            down: basis(shape.height),
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    fn channel(&self, values: &[f32], z: usize) -> DMatrix<f32> {
        let s = self.shape;
        DMatrix::from_fn(s.width, s.height, |x, y| values[s.index(x, y, z)])
    }

    fn store(&self, matrix: &DMatrix<f32>, z: usize, out: &mut [f32]) {
        let s = self.shape;
        for x in 0..s.width {
            for y in 0..s.height {
                out[s.index(x, y, z)] = matrix[(x, y)];
            }
        }
    }

    /// Transforms `values` into `out`.
    pub fn forward(&self, values: &[f32], out: &mut [f32]) {
        assert_eq!(values.len(), self.shape.len());
        assert_eq!(out.len(), self.shape.len());
        for z in 0..self.shape.depth {
            let coefficients = &self.across * self.channel(values, z) * self.down.transpose();
            self.store(&coefficients, z, out);
        }
    }

    /// Transforms coefficients back into patch values.
    pub fn inverse(&self, coefficients: &[f32], out: &mut [f32]) {
        assert_eq!(coefficients.len(), self.shape.len());
        assert_eq!(out.len(), self.shape.len());
        for z in 0..self.shape.depth {
            let values = self.across.transpose() * self.channel(coefficients, z) * &self.down;
            self.store(&values, z, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::check;

    #[test]
    fn uniform_patch_has_only_a_dc_term() {
        let dct = Dct::new(Shape::new(2, 2, 1));
        let mut out = vec![0.; 4];
        dct.forward(&[1., 1., 1., 1.], &mut out);
        check(&[2., 0., 0., 0.], &out, 1e-5, "coefficients");
    }

    #[test]
    fn inverse_restores_every_channel() {
        let shape = Shape::new(3, 2, 2);
        let dct = Dct::new(shape);
        let values: Vec<f32> = (0..shape.len()).map(|i| (i as f32 * 0.7).sin()).collect();
        let mut coefficients = vec![0.; shape.len()];
        let mut restored = vec![0.; shape.len()];
        dct.forward(&values, &mut coefficients);
        dct.inverse(&coefficients, &mut restored);
        check(&values, &restored, 1e-5, "restored values");
    }
}
