//! Stateless two-layer policy/value network.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::{Hidden, ModelOutput, ModelSpec, PolicyValueModel};

#[derive(Module, Debug)]
pub struct MlpNet<B: Backend> {
    body_in: Linear<B>,
    body_out: Linear<B>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
}

impl<B: Backend> PolicyValueModel<B> for MlpNet<B> {
    fn init(spec: &ModelSpec, device: &B::Device) -> Self {
        let h = spec.hidden_size;
        Self {
            body_in: LinearConfig::new(spec.observation_size, h).init(device),
            body_out: LinearConfig::new(h, h).init(device),
            policy_head: LinearConfig::new(h, spec.num_actions).init(device),
            value_head: LinearConfig::new(h, 1).init(device),
        }
    }

    fn forward(&self, obs: Tensor<B, 2>, _hidden: Option<Hidden<B>>) -> ModelOutput<B> {
        let x = relu(self.body_in.forward(obs));
        let x = relu(self.body_out.forward(x));
        ModelOutput {
            policy: self.policy_head.forward(x.clone()),
            // Outcomes live in [-1, 1].
            value: self.value_head.forward(x).tanh(),
            hidden: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_mlp_shapes() {
        let device = Default::default();
        let model = MlpNet::<B>::init(&ModelSpec::new(6, 4, 16), &device);
        let out = model.forward(Tensor::zeros([5, 6], &device), None);
        assert_eq!(out.policy.dims(), [5, 4]);
        assert_eq!(out.value.dims(), [5, 1]);
        assert!(!model.is_recurrent());
        assert!(model.init_hidden(5, &device).is_none());
        assert!(model.num_params() > 0);
    }

    #[test]
    fn test_mlp_value_is_bounded() {
        let device = Default::default();
        let model = MlpNet::<B>::init(&ModelSpec::new(3, 2, 8), &device);
        let obs = Tensor::<B, 2>::ones([4, 3], &device).mul_scalar(100.0);
        let values = super::super::to_host(model.forward(obs, None).value);
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
