use serde::{Deserialize, Serialize};

use std::fmt::Debug;

/// Margin kept away from the asymptotes of bounded functions when inverting them.
const INVERSE_MARGIN: f32 = 1e-3;

pub trait ActivFunc: Debug {
    fn evaluate(&self, x: f32) -> f32;
    /// Derivative at `inp`, `out` being `evaluate(inp)`.
    fn derivative(&self, inp: f32, out: f32) -> f32;
    /// Input producing `y`. Values outside of the range are clamped first.
    fn inverse(&self, y: f32) -> f32;
    /// Whether this is the identity, in which case layers using it are purely linear.
    fn is_linear(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default)]
pub struct Identity;
impl ActivFunc for Identity {
    fn evaluate(&self, x: f32) -> f32 {
        x
    }
    fn derivative(&self, _: f32, _: f32) -> f32 {
        1.
    }
    fn inverse(&self, y: f32) -> f32 {
        y
    }
    fn is_linear(&self) -> bool {
        true
    }
}

/// Soft sign squashing, `x / (1 + |x|)`, bounded to (-1, 1).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default)]
pub struct SoftSign;
impl ActivFunc for SoftSign {
    fn evaluate(&self, x: f32) -> f32 {
        x / (1. + x.abs())
    }
    fn derivative(&self, inp: f32, _out: f32) -> f32 {
        let d = 1. + inp.abs();
        1. / (d * d)
    }
    fn inverse(&self, y: f32) -> f32 {
        let y = y.max(-1. + INVERSE_MARGIN).min(1. - INVERSE_MARGIN);
        y / (1. - y.abs())
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default)]
pub struct Sigmoid;
impl ActivFunc for Sigmoid {
    fn evaluate(&self, x: f32) -> f32 {
        1. / (1. + (-x).exp())
    }
    fn derivative(&self, _: f32, out: f32) -> f32 {
        out * (1. - out)
    }
    fn inverse(&self, y: f32) -> f32 {
        let y = y.max(INVERSE_MARGIN).min(1. - INVERSE_MARGIN);
        (y / (1. - y)).ln()
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default)]
pub struct TanH;
impl ActivFunc for TanH {
    fn evaluate(&self, x: f32) -> f32 {
        x.tanh()
    }
    fn derivative(&self, _inp: f32, out: f32) -> f32 {
        1. - out * out
    }
    fn inverse(&self, y: f32) -> f32 {
        let y = y.max(-1. + INVERSE_MARGIN).min(1. - INVERSE_MARGIN);
        y.atanh()
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default)]
/// This activation function is used for testing as it transforms its output in a straightforward way
/// which makes it easy to check the validity of the outputs
pub struct Test;
impl ActivFunc for Test {
    fn evaluate(&self, x: f32) -> f32 {
        2. * x
    }
    fn derivative(&self, _inp: f32, _out: f32) -> f32 {
        2.
    }
    fn inverse(&self, y: f32) -> f32 {
        y / 2.
    }
}
