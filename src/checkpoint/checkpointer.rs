//! Per-era model persistence.
//!
//! Every published era is written to `<model_dir>/<era>.bin`. The file holds
//! only the parameter record produced by `BinBytesRecorder`, so it can be
//! served to workers byte-for-byte or decoded into a model template.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use burn::record::RecorderError;
use burn::tensor::backend::Backend;
use thiserror::Error;

use crate::core::model_version::ModelSnapshot;
use crate::model::{decode_params, ModelSpec, PolicyValueModel};

#[derive(Debug, Clone)]
pub struct CheckpointerConfig {
    /// Directory holding `<era>.bin` files.
    pub model_dir: PathBuf,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
        }
    }
}

impl CheckpointerConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),
    /// The snapshot has no parameters to persist or no file exists.
    #[error("no checkpoint for era {0}")]
    NoCheckpoints(u64),
}

/// Writes and reads snapshot files.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    config: CheckpointerConfig,
}

impl Checkpointer {
    /// Creates the model directory if it doesn't exist.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.model_dir)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    pub fn path_for(&self, era: u64) -> PathBuf {
        self.config.model_dir.join(format!("{}.bin", era))
    }

    /// Persist a snapshot under its era. Baseline snapshots have nothing to
    /// write.
    pub fn save_era(&self, snapshot: &ModelSnapshot) -> Result<PathBuf, CheckpointError> {
        let params = snapshot
            .params
            .as_ref()
            .ok_or(CheckpointError::NoCheckpoints(snapshot.era))?;
        let path = self.path_for(snapshot.era);
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, params.as_slice())?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Read the raw record of an era.
    pub fn load_era(&self, era: u64) -> Result<ModelSnapshot, CheckpointError> {
        let path = self.path_for(era);
        match fs::read(&path) {
            Ok(bytes) => Ok(ModelSnapshot::new(era, bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CheckpointError::NoCheckpoints(era)),
            Err(e) => Err(e.into()),
        }
    }

    /// Read an era and check that it decodes into model type `M`.
    pub fn load_validated<B, M>(
        &self,
        era: u64,
        spec: &ModelSpec,
        device: &B::Device,
    ) -> Result<ModelSnapshot, CheckpointError>
    where
        B: Backend,
        M: PolicyValueModel<B>,
    {
        let snapshot = self.load_era(era)?;
        if let Some(bytes) = &snapshot.params {
            decode_params::<B, M>(bytes, spec, device)?;
        }
        Ok(snapshot)
    }

    /// Eras with a file in the model directory, ascending.
    pub fn list_eras(&self) -> Result<Vec<u64>, CheckpointError> {
        let mut eras: Vec<u64> = fs::read_dir(&self.config.model_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| era_of(&e.path()))
            .collect();
        eras.sort_unstable();
        Ok(eras)
    }

    pub fn latest_era(&self) -> Result<u64, CheckpointError> {
        self.list_eras()?
            .last()
            .copied()
            .ok_or(CheckpointError::NoCheckpoints(0))
    }
}

fn era_of(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != "bin" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{encode_params, MlpNet};
    use burn::backend::NdArray;
    use tempfile::tempdir;

    type B = NdArray<f32>;

    fn spec() -> ModelSpec {
        ModelSpec::new(3, 4, 8)
    }

    fn snapshot(era: u64) -> ModelSnapshot {
        let model = MlpNet::<B>::init(&spec(), &Default::default());
        ModelSnapshot::new(era, encode_params::<B, _>(&model).unwrap())
    }

    #[test]
    fn test_model_dir_creation() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested/models");
        let _ = Checkpointer::new(CheckpointerConfig::new(&nested)).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_save_and_load_era() {
        let dir = tempdir().unwrap();
        let ckpt = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        let saved = snapshot(3);
        let path = ckpt.save_era(&saved).unwrap();
        assert_eq!(path, dir.path().join("3.bin"));

        let loaded = ckpt.load_era(3).unwrap();
        assert_eq!(loaded, saved);
        let validated = ckpt
            .load_validated::<B, MlpNet<B>>(3, &spec(), &Default::default())
            .unwrap();
        assert_eq!(validated.era, 3);
    }

    #[test]
    fn test_missing_and_corrupt_eras() {
        let dir = tempdir().unwrap();
        let ckpt = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert!(matches!(ckpt.load_era(7), Err(CheckpointError::NoCheckpoints(7))));

        fs::write(ckpt.path_for(2), b"not a record").unwrap();
        assert!(ckpt.load_era(2).is_ok());
        assert!(ckpt
            .load_validated::<B, MlpNet<B>>(2, &spec(), &Default::default())
            .is_err());
    }

    #[test]
    fn test_baseline_is_not_persisted() {
        let dir = tempdir().unwrap();
        let ckpt = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert!(ckpt.save_era(&ModelSnapshot::baseline(0)).is_err());
        assert!(ckpt.list_eras().unwrap().is_empty());
    }

    #[test]
    fn test_list_and_latest() {
        let dir = tempdir().unwrap();
        let ckpt = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert!(ckpt.latest_era().is_err());
        for era in [1, 10, 2] {
            ckpt.save_era(&snapshot(era)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(ckpt.list_eras().unwrap(), vec![1, 2, 10]);
        assert_eq!(ckpt.latest_era().unwrap(), 10);
    }
}
