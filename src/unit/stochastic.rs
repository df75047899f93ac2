use super::{standard::paste_input_error, Codec, Unit, UnitKind};
use crate::{
    data::{DataBlock, Shape},
    error::Result,
    layers::{mean_abs, Layer},
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Cutoff turning probabilities into binary states.
const THRESHOLD: f32 = 0.5;

fn binarize(v: f32) -> f32 {
    if v >= THRESHOLD {
        1.
    } else {
        0.
    }
}

fn unseeded() -> SmallRng {
    SmallRng::seed_from_u64(0)
}

/// Kind of visible values of a stochastic unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StochasticMode {
    /// Inputs and reconstructions are thresholded to 0 or 1.
    Binary,
    /// Real valued visible units with a linear reconstruction.
    Real,
}

/// Restricted Boltzmann style unit with binary hidden states.
///
/// The decoder shares the encoder weights (transposed) and both are trained with
/// one step of contrastive divergence. Hidden states are thresholded at 0.5, or
/// sampled while a training phase is running.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StochasticUnit {
    codec: Codec,
    mode: StochasticMode,
    seed: u64,

    #[serde(skip)]
    sampling: bool,
    #[serde(skip, default = "unseeded")]
    rng: SmallRng,
    #[serde(skip)]
    hidden: Vec<f32>,
    #[serde(skip)]
    positive: Vec<f32>,
    #[serde(skip)]
    visible: Vec<f32>,
    #[serde(skip)]
    decoded: Vec<f32>,
    #[serde(skip)]
    weight_delta: Vec<f32>,
    #[serde(skip)]
    hidden_delta: Vec<f32>,
    #[serde(skip)]
    visible_delta: Vec<f32>,
    #[serde(skip)]
    pending: usize,
}

impl StochasticUnit {
    /// The codec's decoder weights are replaced by the transposed encoder weights.
    pub fn new(codec: Codec, mode: StochasticMode, seed: u64) -> Self {
        let mut unit = Self {
            codec,
            mode,
            seed,
            sampling: false,
            rng: SmallRng::seed_from_u64(seed),
            hidden: Vec::new(),
            positive: Vec::new(),
            visible: Vec::new(),
            decoded: Vec::new(),
            weight_delta: Vec::new(),
            hidden_delta: Vec::new(),
            visible_delta: Vec::new(),
            pending: 0,
        };
        unit.rebuild();
        unit.tie();
        unit
    }

    pub fn mode(&self) -> StochasticMode {
        self.mode
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Copies the transposed encoder weights into the decoder, keeping the decoder biases.
    fn tie(&mut self) {
        let depth = self.codec.output_depth();
        let len = self.codec.shape().len();
        let encoder = self.codec.encoder().weights();
        let mut transposed = vec![0.; encoder.len()];
        for (j, row) in encoder.chunks_exact(len).enumerate() {
            for (i, w) in row.iter().enumerate() {
                transposed[i * depth + j] = *w;
            }
        }
        let biases = self.codec.decoder().biases().to_vec();
        self.codec.decoder_mut().set_params(&transposed, &biases);
    }

    /// Resizes the scratch buffers to the codec, dropping pending updates.
    /// The sampling sequence carries on.
    fn allocate(&mut self) {
        let depth = self.codec.output_depth();
        let len = self.codec.shape().len();
        self.hidden = vec![0.; depth];
        self.positive = vec![0.; depth];
        self.visible = vec![0.; len];
        self.decoded = vec![0.; len];
        self.weight_delta = vec![0.; depth * len];
        self.hidden_delta = vec![0.; depth];
        self.visible_delta = vec![0.; len];
        self.pending = 0;
    }

    fn reset_deltas(&mut self) {
        self.weight_delta.iter_mut().for_each(|d| *d = 0.);
        self.hidden_delta.iter_mut().for_each(|d| *d = 0.);
        self.visible_delta.iter_mut().for_each(|d| *d = 0.);
        self.pending = 0;
    }

    /// Hidden states from the probabilities left in the encoder.
    fn sample_hidden(&mut self) {
        let sampling = self.sampling;
        for (h, p) in self.hidden.iter_mut().zip(self.codec.encoded()) {
            *h = if sampling {
                if self.rng.gen::<f32>() < *p {
                    1.
                } else {
                    0.
                }
            } else {
                binarize(*p)
            };
        }
    }
}

impl Unit for StochasticUnit {
    fn input_shape(&self) -> Shape {
        self.codec.shape()
    }

    fn output_depth(&self) -> usize {
        self.codec.output_depth()
    }

    fn rebuild(&mut self) {
        self.codec.rebuild();
        self.rng = SmallRng::seed_from_u64(self.seed);
        self.allocate();
    }

    fn encode(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<&[f32]> {
        self.codec.load_patch(input, x, y);
        if self.mode == StochasticMode::Binary {
            self.codec.input_mut().iter_mut().for_each(|v| *v = binarize(*v));
        }
        self.codec.encode();
        self.sample_hidden();
        Ok(&self.hidden)
    }

    fn encoded(&self) -> &[f32] {
        &self.hidden
    }

    fn decode(&mut self) -> Result<&[f32]> {
        let mode = self.mode;
        let out = self.codec.decoder_mut().eval(&self.hidden);
        for (d, o) in self.decoded.iter_mut().zip(out) {
            *d = match mode {
                StochasticMode::Binary => binarize(*o),
                StochasticMode::Real => *o,
            };
        }
        Ok(&self.decoded)
    }

    fn decoded(&self) -> &[f32] {
        &self.decoded
    }

    /// Gathers one step of contrastive divergence. Returns the mean absolute difference
    /// between the input and its reconstruction.
    fn accumulate(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32> {
        self.encode(input, x, y)?;
        self.positive.copy_from_slice(self.codec.encoded());

        let reconstruction = self.codec.decoder_mut().eval(&self.hidden);
        self.visible.copy_from_slice(reconstruction);
        self.codec.encoder_mut().eval(&self.visible);

        let len = self.codec.shape().len();
        let visible_before = self.codec.input();
        let negative = self.codec.encoded();

        for (j, row) in self.weight_delta.chunks_exact_mut(len).enumerate() {
            for (i, d) in row.iter_mut().enumerate() {
                *d += self.positive[j] * visible_before[i] - negative[j] * self.visible[i];
            }
            self.hidden_delta[j] += self.positive[j] - negative[j];
        }
        let mut error = 0.;
        for ((d, v0), v1) in self
            .visible_delta
            .iter_mut()
            .zip(visible_before)
            .zip(&self.visible)
        {
            *d += v0 - v1;
            error += (v1 - v0).abs();
        }
        self.pending += 1;
        Ok(error / len as f32)
    }

    fn learn_reconstruction(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let l_rate = self.codec.l_rate();
        let step = |params: &[f32], delta: &[f32]| -> Vec<f32> {
            params.iter().zip(delta).map(|(p, d)| p + l_rate * d).collect()
        };
        let weights = step(self.codec.encoder().weights(), &self.weight_delta);
        let hidden_biases = step(self.codec.encoder().biases(), &self.hidden_delta);
        let visible_biases = step(self.codec.decoder().biases(), &self.visible_delta);

        self.codec.encoder_mut().set_params(&weights, &hidden_biases);
        let decoder_weights = self.codec.decoder().weights().to_vec();
        self.codec
            .decoder_mut()
            .set_params(&decoder_weights, &visible_biases);
        self.tie();
        self.reset_deltas();
        Ok(())
    }

    fn start_training(&mut self) {
        self.sampling = true;
    }

    fn stop_training(&mut self) {
        self.sampling = false;
    }

    fn back_propagate(
        &mut self,
        input: &DataBlock,
        x: usize,
        y: usize,
        error: &[f32],
        upstream: Option<&mut DataBlock>,
    ) -> Result<f32> {
        self.encode(input, x, y)?;
        self.codec.backward(error);
        paste_input_error(&self.codec, x, y, upstream);
        Ok(mean_abs(error))
    }

    fn learn(&mut self) -> Result<()> {
        self.codec.learn();
        self.tie();
        Ok(())
    }

    fn clear_gradients(&mut self) {
        self.codec.clear_gradients();
        self.reset_deltas();
    }

    fn learning_rate(&self) -> Option<f32> {
        Some(self.codec.l_rate())
    }

    fn set_learning_rate(&mut self, rate: f32) {
        self.codec.set_l_rate(rate);
    }

    fn delete_features(&mut self, indices: &[usize]) -> Result<()> {
        self.codec.delete_features(indices)?;
        self.allocate();
        Ok(())
    }

    fn delete_input_channels(&mut self, channels: &[usize]) -> Result<Vec<usize>> {
        self.codec.delete_input_channels(channels)?;
        self.allocate();
        Ok(Vec::new())
    }

    fn kind(&self) -> UnitKind {
        match self.mode {
            StochasticMode::Binary => UnitKind::Binary,
            StochasticMode::Real => UnitKind::Real,
        }
    }
}
