//! Policy/value models.
//!
//! The trainer and the workers only see [`PolicyValueModel`]: observations
//! in, policy logits, a value estimate and optional recurrent state out.
//! Concrete architectures are chosen once at startup through [`ModelKind`].
//!
//! | kind | type | state |
//! |---|---|---|
//! | `uniform` | [`UniformModel`] | none, zero parameters |
//! | `mlp` | [`MlpNet`] | none |
//! | `gru` | [`GruNet`] | one hidden tensor |

pub mod mlp;
pub mod policy;
pub mod recurrent;
pub mod uniform;

use std::str::FromStr;

use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mlp::MlpNet;
pub use policy::{Inference, InferencePolicy, PolicyState};
pub use recurrent::{GruCell, GruCellConfig, GruNet};
pub use uniform::UniformModel;

/// Recurrent state: one `[batch, hidden]` tensor per state component.
pub type Hidden<B> = Vec<Tensor<B, 2>>;

/// Shapes a model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub observation_size: usize,
    pub num_actions: usize,
    pub hidden_size: usize,
}

impl ModelSpec {
    pub fn new(observation_size: usize, num_actions: usize, hidden_size: usize) -> Self {
        Self {
            observation_size,
            num_actions,
            hidden_size,
        }
    }
}

/// Output of one forward call over `N` observations.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// `[N, A]` unnormalized logits.
    pub policy: Tensor<B, 2>,
    /// `[N, 1]`
    pub value: Tensor<B, 2>,
    /// Next recurrent state, `None` for stateless models.
    pub hidden: Option<Hidden<B>>,
}

pub trait PolicyValueModel<B: Backend>: Module<B> + Clone + Send + 'static {
    fn init(spec: &ModelSpec, device: &B::Device) -> Self
    where
        Self: Sized;

    /// Forward `[N, S]` observations with optional `[N, H]` state.
    fn forward(&self, obs: Tensor<B, 2>, hidden: Option<Hidden<B>>) -> ModelOutput<B>;

    /// Zero state for `batch` rows, `None` for stateless models.
    fn init_hidden(&self, _batch: usize, _device: &B::Device) -> Option<Hidden<B>> {
        None
    }

    fn is_recurrent(&self) -> bool {
        false
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown model kind: {0}")]
    UnknownKind(String),
}

/// Registry of model architectures, keyed by the config string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Uniform,
    Mlp,
    Gru,
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" | "random" => Ok(ModelKind::Uniform),
            "mlp" => Ok(ModelKind::Mlp),
            "gru" => Ok(ModelKind::Gru),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// Record model parameters into bytes.
pub fn encode_params<B: Backend, M: Module<B>>(model: &M) -> Result<Vec<u8>, RecorderError> {
    BinBytesRecorder::<FullPrecisionSettings>::default().record(model.clone().into_record(), ())
}

/// Load recorded bytes into a freshly built model.
pub fn decode_params<B: Backend, M: PolicyValueModel<B>>(
    bytes: &[u8],
    spec: &ModelSpec,
    device: &B::Device,
) -> Result<M, RecorderError> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder.load(bytes.to_vec(), device)?;
    Ok(M::init(spec, device).load_record(record))
}

/// Flatten a tensor into host memory.
pub(crate) fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_model_kind_registry() {
        assert_eq!("mlp".parse::<ModelKind>(), Ok(ModelKind::Mlp));
        assert_eq!("GRU".parse::<ModelKind>(), Ok(ModelKind::Gru));
        assert_eq!("random".parse::<ModelKind>(), Ok(ModelKind::Uniform));
        assert!(matches!(
            "transformer".parse::<ModelKind>(),
            Err(ModelError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_params_survive_encoding() {
        let device = Default::default();
        let spec = ModelSpec::new(5, 3, 8);
        let model = MlpNet::<B>::init(&spec, &device);
        let bytes = encode_params::<B, _>(&model).unwrap();
        let restored: MlpNet<B> = decode_params(&bytes, &spec, &device).unwrap();

        let obs = Tensor::<B, 2>::ones([2, 5], &device);
        let a = to_host(model.forward(obs.clone(), None).policy);
        let b = to_host(restored.forward(obs, None).policy);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let device = Default::default();
        let spec = ModelSpec::new(5, 3, 8);
        assert!(decode_params::<B, MlpNet<B>>(&[1, 2, 3], &spec, &device).is_err());
    }
}
