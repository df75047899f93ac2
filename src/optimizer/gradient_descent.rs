use super::*;

/// Gradient descent simply steps the weights based on their derivatives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientDescent {
    l_rate: f32,
}

impl OptimizerAlg for GradientDescent {
    fn update_weights(&mut self, weights: &mut [f32], gradients: &[f32]) {
        assert_eq!(weights.len(), gradients.len());
        let k = -self.l_rate;
        for (w, d) in weights.iter_mut().zip(gradients) {
            *w += k * *d;
        }
    }

    fn l_rate(&self) -> f32 {
        self.l_rate
    }

    fn set_l_rate(&mut self, l_rate: f32) {
        self.l_rate = l_rate;
    }

    fn reset(&mut self, _len: usize) {}
}

impl GradientDescent {
    pub fn builder() -> GradDescBuilder {
        Default::default()
    }

    pub fn new(l_rate: f32) -> Self {
        Self { l_rate }
    }
}

/// Constructor for [GradientDescent](self::GradientDescent)
#[derive(Clone, Debug)]
pub struct GradDescBuilder {
    l_rate: f32,
}

impl Default for GradDescBuilder {
    fn default() -> Self {
        Self {
            l_rate: DEFAULT_L_RATE,
        }
    }
}

impl GradDescBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn l_rate(mut self, l_rate: f32) -> Self {
        self.l_rate = l_rate;
        self
    }

    pub fn build(self) -> OptimizerConfig {
        OptimizerConfig::GradientDescent {
            l_rate: self.l_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut gd = GradientDescent::new(0.5);
        let mut weights = [1., -1., 0.];
        gd.update_weights(&mut weights, &[2., -2., 0.]);
        assert_eq!(weights, [0., 0., 0.]);
    }
}
