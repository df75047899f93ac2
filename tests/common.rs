#![allow(dead_code)]

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use scae::{
    data::{DataBlock, Shape},
    initializer::Xavier,
    layers::LayerKind,
    optimizer::OptimizerConfig,
    unit::{AutoEncoder, UnitBuilder, UnitKind},
};

/// 2x2 single channel checkerboard.
pub fn checkerboard() -> DataBlock {
    DataBlock::from_values(Shape::new(2, 2, 1), vec![1., 0., 0., 1.])
}

/// Block of uniformly distributed values in `[-0.5, 0.5)`.
pub fn noise(shape: Shape, seed: u64) -> DataBlock {
    let mut rng = SmallRng::seed_from_u64(seed);
    let values = (0..shape.len()).map(|_| rng.gen::<f32>() - 0.5).collect();
    DataBlock::from_values(shape, values)
}

pub fn standard(width: usize, height: usize, depth: usize, output: usize, seed: u64) -> AutoEncoder {
    UnitBuilder::new(UnitKind::Standard, width, height, depth, output)
        .optimizer(OptimizerConfig::default().with_l_rate(0.1))
        .build(&mut Xavier::with_seed(seed))
        .unwrap()
}

pub fn linear_pca(width: usize, height: usize, depth: usize, output: usize) -> AutoEncoder {
    UnitBuilder::new(UnitKind::Pca, width, height, depth, output)
        .layers(LayerKind::Linear)
        .build(&mut Xavier::new())
        .unwrap()
}

pub fn assert_close(expected: &[f32], received: &[f32], tolerance: f32) {
    assert_eq!(expected.len(), received.len());
    for (i, (e, r)) in expected.iter().zip(received).enumerate() {
        assert!(
            (e - r).abs() <= tolerance,
            "value {} differs: expected {}, received {}",
            i,
            e,
            r
        );
    }
}
