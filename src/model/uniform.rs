//! Parameter-free uniform policy.

use burn::module::Module;
use burn::nn::Linear;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::{Hidden, ModelOutput, ModelSpec, PolicyValueModel};

/// Uniform policy with a zero value estimate.
///
/// Holds no parameters; training it is a no-op.
#[derive(Module, Debug)]
pub struct UniformModel<B: Backend> {
    head: Option<Linear<B>>,
    #[module(skip)]
    num_actions: usize,
}

impl<B: Backend> UniformModel<B> {
    pub fn new(num_actions: usize) -> Self {
        Self {
            head: None,
            num_actions,
        }
    }
}

impl<B: Backend> PolicyValueModel<B> for UniformModel<B> {
    fn init(spec: &ModelSpec, _device: &B::Device) -> Self {
        Self::new(spec.num_actions)
    }

    fn forward(&self, obs: Tensor<B, 2>, _hidden: Option<Hidden<B>>) -> ModelOutput<B> {
        let [n, _] = obs.dims();
        let device = obs.device();
        ModelOutput {
            policy: Tensor::zeros([n, self.num_actions], &device),
            value: Tensor::zeros([n, 1], &device),
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
    fn test_uniform_has_no_parameters() {
        let model = UniformModel::<B>::new(9);
        assert_eq!(model.num_params(), 0);
    }

    #[test]
    fn test_uniform_output_shapes() {
        let device = Default::default();
        let model = UniformModel::<B>::init(&ModelSpec::new(4, 9, 16), &device);
        let out = model.forward(Tensor::ones([3, 4], &device), None);
        assert_eq!(out.policy.dims(), [3, 9]);
        assert_eq!(out.value.dims(), [3, 1]);
        assert!(out.hidden.is_none());
    }
}
