use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Implement Initializer for the struct reference as well
macro_rules! impl_ref {
    ($struct:ty) => {
        impl Initializer for &mut $struct {
            fn get(&mut self, in_size: usize, size: usize) -> f32 {
                <$struct as Initializer>::get(self, in_size, size)
            }
        }
    };
}

pub trait Initializer {
    /// Value of the next weight of a layer with `in_size` inputs and `size` outputs.
    fn get(&mut self, in_size: usize, size: usize) -> f32;
}

///Xavier initialization should be used for layers with symetric activation functions such as sigmoid or tanH
#[derive(Debug, Clone)]
pub struct Xavier {
    rng: SmallRng,
}
impl Xavier {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for Xavier {
    fn default() -> Self {
        Self::new()
    }
}

impl Initializer for Xavier {
    fn get(&mut self, in_size: usize, _size: usize) -> f32 {
        self.rng.sample::<f32, StandardNormal>(StandardNormal) / (in_size as f32).sqrt()
    }
}
impl_ref!(Xavier);

///Kaiming initialization should be used for layers with asymetric activation functions such as RELU
#[derive(Debug, Clone)]
pub struct Kaiming {
    rng: SmallRng,
}
impl Kaiming {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for Kaiming {
    fn default() -> Self {
        Self::new()
    }
}

impl Initializer for Kaiming {
    fn get(&mut self, in_size: usize, _: usize) -> f32 {
        self.rng.sample::<f32, StandardNormal>(StandardNormal) * (2f32 / (in_size as f32)).sqrt()
    }
}
impl_ref!(Kaiming);

/// Random initializers selectable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitKind {
    Xavier,
    Kaiming,
}

impl Default for InitKind {
    fn default() -> Self {
        InitKind::Xavier
    }
}

impl InitKind {
    pub fn seeded(self, seed: u64) -> Box<dyn Initializer> {
        match self {
            InitKind::Xavier => Box::new(Xavier::with_seed(seed)),
            InitKind::Kaiming => Box::new(Kaiming::with_seed(seed)),
        }
    }
}

/// This initializer accepts an iterator over f32 values and uses them to initialize the weights.
/// Panics if a weights is requested but the iterator returns None.
pub struct WeightInit<T: Iterator<Item = f32>> {
    iter: T,
}
impl<I: Iterator<Item = f32>> WeightInit<I> {
    pub fn new<T: IntoIterator<Item = f32, IntoIter = I>>(weights: T) -> Self {
        Self {
            iter: weights.into_iter(),
        }
    }
}

impl<I: Iterator<Item = f32>> Initializer for WeightInit<I> {
    fn get(&mut self, _in_size: usize, _size: usize) -> f32 {
        self.iter.next().expect("Ran out of weights")
    }
}

impl<I: Iterator<Item = f32>> Initializer for &mut WeightInit<I> {
    fn get(&mut self, in_size: usize, size: usize) -> f32 {
        (*self).get(in_size, size)
    }
}
