use super::*;

/// The adam optimizer algorithm as shown in the research paper <https://arxiv.org/abs/1412.6980>
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Adam {
    momentum: Vec<f32>,
    velocity: Vec<f32>,

    beta1: f32,
    beta2: f32,
    epsilon: f32,

    beta1_pow: f32,
    beta2_pow: f32,

    l_rate: f32,
}

impl OptimizerAlg for Adam {
    fn update_weights(&mut self, weights: &mut [f32], gradients: &[f32]) {
        assert_eq!(gradients.len(), weights.len());
        if self.momentum.len() != gradients.len() {
            self.reset(gradients.len());
        }

        for (m, g) in self.momentum.iter_mut().zip(gradients.iter()) {
            *m = self.beta1 * *m + (1. - self.beta1) * *g;
        }

        for (v, g) in self.velocity.iter_mut().zip(gradients.iter()) {
            *v = self.beta2 * *v + (1. - self.beta2) * *g * *g;
        }

        let alpha = -self.l_rate * f32::sqrt(1. - self.beta2_pow) / (1. - self.beta1_pow);

        for ((w, m), v) in weights.iter_mut().zip(&self.momentum).zip(&self.velocity) {
            *w += alpha * *m / (v.sqrt() + self.epsilon);
        }

        self.beta1_pow *= self.beta1;
        self.beta2_pow *= self.beta2;
    }

    fn l_rate(&self) -> f32 {
        self.l_rate
    }

    fn set_l_rate(&mut self, l_rate: f32) {
        self.l_rate = l_rate;
    }

    fn reset(&mut self, len: usize) {
        self.momentum = vec![0.; len];
        self.velocity = vec![0.; len];
        self.beta1_pow = self.beta1;
        self.beta2_pow = self.beta2;
    }
}

impl Adam {
    pub fn builder() -> AdamBuilder {
        Default::default()
    }

    pub fn new(beta1: f32, beta2: f32, epsilon: f32, l_rate: f32, len: usize) -> Self {
        Self {
            momentum: vec![0.; len],
            velocity: vec![0.; len],
            beta1,
            beta2,
            epsilon,
            beta1_pow: beta1,
            beta2_pow: beta2,
            l_rate,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdamBuilder {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    l_rate: f32,
}

impl Default for AdamBuilder {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 0.001,
            l_rate: DEFAULT_L_RATE,
        }
    }
}

impl AdamBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn beta1(mut self, beta1: f32) -> Self {
        self.beta1 = beta1;
        self
    }

    pub fn beta2(mut self, beta2: f32) -> Self {
        self.beta2 = beta2;
        self
    }

    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn l_rate(mut self, l_rate: f32) -> Self {
        self.l_rate = l_rate;
        self
    }

    pub fn build(self) -> OptimizerConfig {
        OptimizerConfig::Adam {
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            l_rate: self.l_rate,
        }
    }
}
