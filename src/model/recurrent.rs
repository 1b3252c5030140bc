//! Recurrent policy/value network built on a GRU cell.
//!
//! The trainer steps stateful models through time one step at a time, so
//! the cell exposes a single-step API rather than a sequence forward.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::{Hidden, ModelOutput, ModelSpec, PolicyValueModel};

#[derive(Debug, Clone)]
pub struct GruCellConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    pub bias: bool,
}

impl GruCellConfig {
    pub fn new(d_input: usize, d_hidden: usize) -> Self {
        Self {
            d_input,
            d_hidden,
            bias: true,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GruCell<B> {
        let input = |bias: bool| {
            LinearConfig::new(self.d_input, self.d_hidden)
                .with_bias(bias)
                .init(device)
        };
        let hidden = || {
            LinearConfig::new(self.d_hidden, self.d_hidden)
                .with_bias(false)
                .init(device)
        };
        GruCell {
            reset_input: input(self.bias),
            reset_hidden: hidden(),
            update_input: input(self.bias),
            update_hidden: hidden(),
            candidate_input: input(self.bias),
            candidate_hidden: hidden(),
            d_hidden: self.d_hidden,
        }
    }
}

/// GRU cell.
///
/// - r = σ(W_ir x + W_hr h)
/// - z = σ(W_iz x + W_hz h)
/// - n = tanh(W_in x + r ⊙ (W_hn h))
/// - h' = (1 − z) ⊙ n + z ⊙ h
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    reset_input: Linear<B>,
    reset_hidden: Linear<B>,
    update_input: Linear<B>,
    update_hidden: Linear<B>,
    candidate_input: Linear<B>,
    candidate_hidden: Linear<B>,
    #[module(skip)]
    d_hidden: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn step(&self, input: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let r = sigmoid(self.reset_input.forward(input.clone()) + self.reset_hidden.forward(h.clone()));
        let z = sigmoid(
            self.update_input.forward(input.clone()) + self.update_hidden.forward(h.clone()),
        );
        let n = (self.candidate_input.forward(input) + r * self.candidate_hidden.forward(h.clone()))
            .tanh();
        let ones = Tensor::ones_like(&z);
        (ones - z.clone()) * n + z * h
    }

    pub fn initial_state(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.d_hidden], device)
    }

    pub fn hidden_size(&self) -> usize {
        self.d_hidden
    }
}

#[derive(Module, Debug)]
pub struct GruNet<B: Backend> {
    encoder: Linear<B>,
    cell: GruCell<B>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
}

impl<B: Backend> PolicyValueModel<B> for GruNet<B> {
    fn init(spec: &ModelSpec, device: &B::Device) -> Self {
        let h = spec.hidden_size;
        Self {
            encoder: LinearConfig::new(spec.observation_size, h).init(device),
            cell: GruCellConfig::new(h, h).init(device),
            policy_head: LinearConfig::new(h, spec.num_actions).init(device),
            value_head: LinearConfig::new(h, 1).init(device),
        }
    }

    fn forward(&self, obs: Tensor<B, 2>, hidden: Option<Hidden<B>>) -> ModelOutput<B> {
        let [n, _] = obs.dims();
        let device = obs.device();
        let h = hidden
            .and_then(|mut h| h.pop())
            .unwrap_or_else(|| self.cell.initial_state(n, &device));

        let x = relu(self.encoder.forward(obs));
        let h = self.cell.step(x, h);
        ModelOutput {
            policy: self.policy_head.forward(h.clone()),
            value: self.value_head.forward(h.clone()).tanh(),
            hidden: Some(vec![h]),
        }
    }

    fn init_hidden(&self, batch: usize, device: &B::Device) -> Option<Hidden<B>> {
        Some(vec![self.cell.initial_state(batch, device)])
    }

    fn is_recurrent(&self) -> bool {
        true
    }
}
