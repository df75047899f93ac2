use super::{
    codec::channel_positions,
    solvers::{self, Projection},
    standard::paste_input_error,
    Codec, Unit, UnitKind,
};
use crate::{
    data::{DataBlock, Shape},
    error::{Error, Result},
    layers::Layer,
};
use serde::{Deserialize, Serialize};

/// How a linear decoder undoes a projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reverse {
    Transpose,
    PseudoInverse,
}

/// Sets the encoder to `projection` and fits the decoder to undo it on `samples`.
///
/// Linear decoders reverse the projection directly. Bounded decoders can't reach
/// every value a reversed projection produces, so they are fitted by least squares
/// onto the activation inverse of the samples instead.
pub(crate) fn seed_codec(
    codec: &mut Codec,
    projection: &Projection,
    samples: &[f32],
    reverse: Reverse,
) -> Result<()> {
    let (weights, biases) = projection.encoder_params();
    codec.encoder_mut().set_params(&weights, &biases);

    let (weights, biases) = if codec.decoder().is_linear() {
        match reverse {
            Reverse::Transpose => projection.transposed_params(),
            Reverse::PseudoInverse => projection.pseudo_inverse_params()?,
        }
    } else {
        let dim = codec.shape().len();
        let depth = codec.output_depth();
        let mut hidden = Vec::with_capacity(samples.len() / dim * depth);
        let mut targets = Vec::with_capacity(samples.len());
        for sample in samples.chunks_exact(dim) {
            hidden.extend_from_slice(codec.encoder_mut().eval(sample));
            let decoder = codec.decoder();
            targets.extend(sample.iter().map(|v| decoder.inverse_activation(*v)));
        }
        solvers::fit_decoder(
            &solvers::samples_matrix(&hidden, depth),
            &solvers::samples_matrix(&targets, dim),
        )?
    };
    codec.decoder_mut().set_params(&weights, &biases);
    Ok(())
}

/// Removes `channels` from every sample collected for a patch of `shape`.
pub(crate) fn drop_sample_channels(samples: &mut Vec<f32>, shape: Shape, channels: &[usize]) {
    if samples.is_empty() {
        return;
    }
    let positions = channel_positions(shape, channels);
    let dim = shape.len();
    let kept: Vec<f32> = samples
        .chunks_exact(dim)
        .flat_map(|s| {
            s.iter()
                .enumerate()
                .filter(|(i, _)| !positions.contains(i))
                .map(|(_, v)| *v)
        })
        .collect();
    *samples = kept;
}

pub(crate) fn check_projection(codec: &Codec) -> Result<()> {
    let len = codec.shape().len();
    if codec.output_depth() > len {
        return Err(Error::config(format!(
            "a projection of a {} patch cannot have {} outputs",
            codec.shape(),
            codec.output_depth()
        )));
    }
    Ok(())
}

/// Unit seeded with the principal components of the patches it sees during pre-training.
///
/// Until [training_done](Unit::training_done) is called, training only collects samples.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaUnit {
    codec: Codec,
    fitted: bool,
    #[serde(skip)]
    samples: Vec<f32>,
}

impl PcaUnit {
    pub fn new(codec: Codec) -> Result<Self> {
        check_projection(&codec)?;
        Ok(Self {
            codec,
            fitted: false,
            samples: Vec::new(),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Number of samples collected so far.
    pub fn sample_count(&self) -> usize {
        self.samples.len() / self.codec.shape().len()
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    fn ensure_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(Error::NotTrained { unit: "pca" })
        }
    }
}

impl Unit for PcaUnit {
    fn input_shape(&self) -> Shape {
        self.codec.shape()
    }

    fn output_depth(&self) -> usize {
        self.codec.output_depth()
    }

    fn rebuild(&mut self) {
        self.codec.rebuild();
    }

    fn encode(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<&[f32]> {
        self.ensure_fitted()?;
        self.codec.load_patch(input, x, y);
        Ok(self.codec.encode())
    }

    fn encoded(&self) -> &[f32] {
        self.codec.encoded()
    }

    fn decode(&mut self) -> Result<&[f32]> {
        self.ensure_fitted()?;
        Ok(self.codec.decode())
    }

    fn decoded(&self) -> &[f32] {
        self.codec.decoded()
    }

    fn accumulate(&mut self, input: &DataBlock, x: usize, y: usize) -> Result<f32> {
        self.codec.load_patch(input, x, y);
        if self.fitted {
            Ok(self.codec.accumulate_reconstruction())
        } else {
            self.samples.extend_from_slice(self.codec.input());
            Ok(0.)
        }
    }

    fn learn_reconstruction(&mut self) -> Result<()> {
        if self.fitted {
            self.codec.learn_reconstruction();
        }
        Ok(())
    }

    fn training_done(&mut self) -> Result<()> {
        if self.fitted && self.samples.is_empty() {
            return Ok(());
        }
        let dim = self.codec.shape().len();
        let samples = solvers::samples_matrix(&self.samples, dim);
        let projection = solvers::pca(&samples, self.codec.output_depth())?;
        seed_codec(&mut self.codec, &projection, &self.samples, Reverse::Transpose)?;

        self.fitted = true;
        self.samples = Vec::new();
        Ok(())
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
        let error = self.codec.backward(error);
        paste_input_error(&self.codec, x, y, upstream);
        Ok(error)
    }

    fn learn(&mut self) -> Result<()> {
        self.ensure_fitted()?;
        self.codec.learn();
        Ok(())
    }

    fn clear_gradients(&mut self) {
        self.codec.clear_gradients();
    }

    fn learning_rate(&self) -> Option<f32> {
        Some(self.codec.l_rate())
    }

    fn set_learning_rate(&mut self, rate: f32) {
        self.codec.set_l_rate(rate);
    }

    fn delete_features(&mut self, indices: &[usize]) -> Result<()> {
        self.codec.delete_features(indices)
    }

    fn delete_input_channels(&mut self, channels: &[usize]) -> Result<Vec<usize>> {
        let shape = self.codec.shape();
        self.codec.delete_input_channels(channels)?;
        drop_sample_channels(&mut self.samples, shape, channels);
        check_projection(&self.codec)?;
        Ok(Vec::new())
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Pca
    }
}
