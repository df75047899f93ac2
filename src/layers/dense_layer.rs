use crate::{
    a_funcs::ActivFunc,
    initializer::Initializer,
    layers::{mean_abs, Layer, LayerBuilder},
    optimizer::{AlgBuilder, Optimizer, OptimizerAlg, OptimizerConfig},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Your run of the mill fully connected (dense) layer
///
/// Weights and biases live in a single parameter vector, the row major
/// `size x in_size` weight matrix followed by the biases, so that the
/// optimizer can step all of them at once.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DenseLayer<F> {
    in_size: usize,
    size: usize,

    params: Vec<f32>,
    #[serde(skip)]
    grads: Vec<f32>,
    #[serde(skip)]
    pending: usize,
    optimizer: Optimizer,

    update_weights: bool,
    update_biases: bool,

    activation: F,

    #[serde(skip)]
    weighted_inputs: Vec<f32>,
    #[serde(skip)]
    activations: Vec<f32>,
    #[serde(skip)]
    temp: Vec<f32>,
}

impl<F> Layer for DenseLayer<F>
where
    F: ActivFunc,
{
    fn rebuild(&mut self) {
        self.grads = vec![0.; self.params.len()];
        self.pending = 0;
        self.weighted_inputs = vec![0.; self.size];
        self.activations = vec![0.; self.size];
        self.temp = vec![0.; self.size];
    }

    fn eval(&mut self, input: &[f32]) -> &[f32] {
        assert_eq!(
            input.len(),
            self.in_size,
            "Layer expects {} inputs, received {}",
            self.in_size,
            input.len()
        );
        let (weights, biases) = self.params.split_at(self.in_size * self.size);

        for ((row, b), wi) in weights
            .chunks_exact(self.in_size)
            .zip(biases)
            .zip(&mut self.weighted_inputs)
        {
            *wi = row.iter().zip(input).map(|(w, i)| *w * *i).sum::<f32>() + *b;
        }

        for (wi, o) in self.weighted_inputs.iter().zip(&mut self.activations) {
            *o = self.activation.evaluate(*wi);
        }

        &self.activations
    }

    fn output(&self) -> &[f32] {
        &self.activations
    }

    fn in_size(&self) -> usize {
        self.in_size
    }

    fn out_size(&self) -> usize {
        self.size
    }

    fn calc_gradients(&mut self, input: &[f32], error: &[f32], prev_error: Option<&mut [f32]>) -> f32 {
        assert_eq!(input.len(), self.in_size);
        assert_eq!(error.len(), self.size);

        // error scaled by the activation function derivatives
        for (((temp, e), inp), out) in self
            .temp
            .iter_mut()
            .zip(error)
            .zip(&self.weighted_inputs)
            .zip(&self.activations)
        {
            *temp = *e * self.activation.derivative(*inp, *out);
        }

        let weight_count = self.in_size * self.size;
        let (w_grads, b_grads) = self.grads.split_at_mut(weight_count);

        if self.update_biases {
            for (bd, temp) in b_grads.iter_mut().zip(&self.temp) {
                *bd += *temp;
            }
        }

        if self.update_weights {
            for (wds, temp) in w_grads.chunks_exact_mut(self.in_size).zip(&self.temp) {
                for (wd, inp) in wds.iter_mut().zip(input) {
                    *wd += *inp * *temp;
                }
            }
        }

        if let Some(prev_error) = prev_error {
            assert_eq!(prev_error.len(), self.in_size);
            for (row, temp) in self.params[..weight_count]
                .chunks_exact(self.in_size)
                .zip(&self.temp)
            {
                for (pe, w) in prev_error.iter_mut().zip(row) {
                    *pe += *w * *temp;
                }
            }
        }

        self.pending += 1;
        mean_abs(error)
    }

    fn learn(&mut self) {
        if self.pending == 0 {
            warn!(in_size = self.in_size, size = self.size, "learn called without accumulated gradients");
            return;
        }
        self.optimizer.update_weights(&mut self.params, &self.grads);
        self.reset_gradients();
    }

    fn reset_gradients(&mut self) {
        self.grads.iter_mut().for_each(|g| *g = 0.);
        self.pending = 0;
    }

    fn weights(&self) -> &[f32] {
        &self.params[..self.in_size * self.size]
    }

    fn biases(&self) -> &[f32] {
        &self.params[self.in_size * self.size..]
    }

    fn set_params(&mut self, weights: &[f32], biases: &[f32]) {
        let weight_count = self.in_size * self.size;
        assert_eq!(weights.len(), weight_count, "Wrong number of weights");
        assert_eq!(biases.len(), self.size, "Wrong number of biases");
        self.params[..weight_count].copy_from_slice(weights);
        self.params[weight_count..].copy_from_slice(biases);
        self.optimizer.reset(self.params.len());
    }

    fn l_rate(&self) -> f32 {
        self.optimizer.l_rate()
    }

    fn set_l_rate(&mut self, l_rate: f32) {
        self.optimizer.set_l_rate(l_rate)
    }

    fn is_linear(&self) -> bool {
        self.activation.is_linear()
    }

    fn inverse_activation(&self, y: f32) -> f32 {
        self.activation.inverse(y)
    }
}

impl<F> DenseLayer<F>
where
    F: ActivFunc,
{
    pub fn new(
        activation: F,
        init: &mut dyn Initializer,
        optimizer: &OptimizerConfig,
        in_size: usize,
        size: usize,
        update_w: bool,
        update_b: bool,
    ) -> Self {
        let weight_count = in_size * size;
        let mut params = Vec::with_capacity(weight_count + size);
        params.extend((0..weight_count).map(|_| init.get(in_size, size)));
        params.extend(std::iter::repeat(0.).take(size));
        Self::from_params(activation, optimizer.build(params.len()), params, in_size, size, update_w, update_b)
    }

    /// Layer without inputs or outputs.
    pub fn empty(activation: F) -> Self {
        Self::from_params(activation, Optimizer::default(), Vec::new(), 0, 0, true, true)
    }

    fn from_params(
        activation: F,
        optimizer: Optimizer,
        params: Vec<f32>,
        in_size: usize,
        size: usize,
        update_weights: bool,
        update_biases: bool,
    ) -> Self {
        assert_eq!(params.len(), in_size * size + size);
        let mut layer = Self {
            in_size,
            size,
            params,
            grads: Vec::new(),
            pending: 0,
            optimizer,
            update_weights,
            update_biases,
            activation,
            weighted_inputs: Vec::new(),
            activations: Vec::new(),
            temp: Vec::new(),
        };
        layer.rebuild();
        layer
    }

    /// Consumes the layer and builds a smaller one without the given output rows.
    /// The remaining rows keep their order, the optimizer state starts over.
    pub fn without_outputs(self, indices: &[usize]) -> Self {
        let keep: Vec<usize> = (0..self.size).filter(|i| !indices.contains(i)).collect();
        let in_size = self.in_size;
        let weight_count = in_size * self.size;

        let mut params = Vec::with_capacity(keep.len() * (in_size + 1));
        for &row in &keep {
            params.extend_from_slice(&self.params[row * in_size..(row + 1) * in_size]);
        }
        params.extend(keep.iter().map(|row| self.params[weight_count + row]));

        self.resized(params, in_size, keep.len())
    }

    /// Consumes the layer and builds a smaller one without the given input columns.
    pub fn without_inputs(self, indices: &[usize]) -> Self {
        let keep: Vec<usize> = (0..self.in_size).filter(|i| !indices.contains(i)).collect();
        let weight_count = self.in_size * self.size;

        let mut params = Vec::with_capacity(self.size * (keep.len() + 1));
        for row in self.params[..weight_count].chunks_exact(self.in_size) {
            params.extend(keep.iter().map(|col| row[*col]));
        }
        params.extend_from_slice(&self.params[weight_count..]);

        let size = self.size;
        self.resized(params, keep.len(), size)
    }

    fn resized(self, params: Vec<f32>, in_size: usize, size: usize) -> Self {
        let mut optimizer = self.optimizer;
        optimizer.reset(params.len());
        Self::from_params(
            self.activation,
            optimizer,
            params,
            in_size,
            size,
            self.update_weights,
            self.update_biases,
        )
    }
}

pub struct DenseBuilder<F> {
    activation: F,
    size: usize,
    optimizer: OptimizerConfig,
    update_w: bool,
    update_b: bool,
}

impl<F> DenseBuilder<F> {
    pub fn new(activation: F, size: usize) -> Self {
        DenseBuilder {
            activation,
            size,
            optimizer: OptimizerConfig::default(),
            update_w: true,
            update_b: true,
        }
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Freezes or unfreezes weights and biases.
    pub fn trainable(mut self, update_w: bool, update_b: bool) -> Self {
        self.update_w = update_w;
        self.update_b = update_b;
        self
    }
}

impl<F> LayerBuilder for DenseBuilder<F>
where
    F: ActivFunc,
{
    type Output = DenseLayer<F>;

    fn connect(self, in_size: usize, init: &mut dyn Initializer) -> Self::Output {
        DenseLayer::new(
            self.activation,
            init,
            &self.optimizer,
            in_size,
            self.size,
            self.update_w,
            self.update_b,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        a_funcs::{Identity, Test},
        initializer::WeightInit,
        layers::tests::check,
        optimizer::GradDescBuilder,
    };

    fn create_layer() -> DenseLayer<Test> {
        let mut init = WeightInit::new((1..=12).map(|x| x as f32));
        DenseBuilder::new(Test, 3)
            .optimizer(GradDescBuilder::new().l_rate(0.1).build())
            .connect(4, &mut init)
    }

    const INPUTS: [f32; 4] = [1., 2., 3., 4.];
    const TOLERANCE: f32 = 0.0001;

    #[test]
    fn dense_eval() {
        let mut layer = create_layer();

        let output = layer.eval(&INPUTS);
        let expected = &[60., 140., 220.];

        check(expected, output, TOLERANCE, "output");
    }

    /// Computes the various derivatives to be tested.
    /// The derivatives are returned in this order [weight_deriv, bias_deriv, out_deriv]
    fn derivs() -> [Vec<f32>; 3] {
        let mut layer = create_layer();

        let error = [0.1, 0.2, 0.3];
        let mut prev_error = vec![0.; 4];

        layer.eval(&INPUTS);
        layer.calc_gradients(&INPUTS, &error, Some(&mut prev_error));

        [
            layer.grads[..12].to_owned(),
            layer.grads[12..].to_owned(),
            prev_error,
        ]
    }

    #[test]
    fn dense_backprop_weights() {
        let output = &derivs()[0];
        let expected = [0.2, 0.4, 0.6, 0.8, 0.4, 0.8, 1.2, 1.6, 0.6, 1.2, 1.8, 2.4];
        check(&expected, output, TOLERANCE, "weight derivatives");
    }

    #[test]
    fn dense_backprop_bias() {
        let output = &derivs()[1];
        let expected = [0.2, 0.4, 0.6];
        check(&expected, output, TOLERANCE, "bias derivatives");
    }

    #[test]
    fn dense_backprop_output() {
        let output = &derivs()[2];
        let expected = [7.6, 8.8, 10., 11.2];
        check(&expected, output, TOLERANCE, "output derivatives");
    }

    #[test]
    fn gradients_accumulate_until_learn() {
        let mut layer = create_layer();
        let error = [0.1, 0.2, 0.3];
        for _ in 0..2 {
            layer.eval(&INPUTS);
            layer.calc_gradients(&INPUTS, &error, None);
        }
        check(&[0.4, 0.8, 1.2], &layer.grads[12..], TOLERANCE, "summed bias derivatives");

        let before = layer.biases().to_owned();
        layer.learn();
        let stepped: Vec<f32> = before.iter().map(|b| b - 0.1 * 0.4).collect();
        check(&stepped[..1], &layer.biases()[..1], TOLERANCE, "biases after learning");
        assert!(layer.grads.iter().all(|g| *g == 0.));
    }

    #[test]
    fn deleting_an_output_shifts_rows() {
        let mut init = WeightInit::new((0..15).map(|x| x as f32));
        let layer = DenseBuilder::new(Identity, 5).connect(3, &mut init);
        let before = layer.weights().to_owned();

        let layer = layer.without_outputs(&[2]);
        assert_eq!(layer.out_size(), 4);
        assert_eq!(layer.in_size(), 3);
        assert_eq!(&layer.weights()[..6], &before[..6]);
        // row 3 became row 2, row 4 became row 3
        assert_eq!(&layer.weights()[6..], &before[9..]);
        assert_eq!(layer.output().len(), 4);
    }

    #[test]
    fn deleting_an_input_shifts_columns() {
        let mut init = WeightInit::new((0..15).map(|x| x as f32));
        let layer = DenseBuilder::new(Identity, 3).connect(5, &mut init);
        let layer = layer.without_inputs(&[2]);
        assert_eq!(layer.in_size(), 4);
        assert_eq!(layer.weights(), &[0., 1., 3., 4., 5., 6., 8., 9., 10., 11., 13., 14.]);
    }
}
