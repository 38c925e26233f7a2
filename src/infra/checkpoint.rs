// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores training checkpoints.
//
// A checkpoint directory holds:
//   model.mpk           model weights (Burn CompactRecorder)
//   optimizer.mpk       optimizer moments / velocities
//   status.json         LoopStatus: counters + extension state
//
// The run directory additionally holds train_config.json so a
// checkpoint can be reopened without the original CLI flags:
//
//   <save_path>/
//     train_config.json
//     metrics.csv
//     best/   ← written by early stopping
//     last/   ← written after every epoch

use anyhow::{ensure, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, FileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::main_loop::LoopStatus;
use crate::ml::model::SignalRnn;
use crate::ml::step_rule::CompositeRule;

const MODEL_FILE:     &str = "model";
const OPTIMIZER_FILE: &str = "optimizer";
const STATUS_FILE:    &str = "status.json";
const CONFIG_FILE:    &str = "train_config.json";

/// Reads and writes one checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Manager for `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Manager for an existing checkpoint directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        ensure!(dir.is_dir(), "Checkpoint directory '{}' does not exist", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save model, optimizer state and loop status together.
    pub fn save_checkpoint<B: AutodiffBackend>(
        &self,
        model:     &SignalRnn<B>,
        algorithm: &CompositeRule<B, SignalRnn<B>>,
        status:    &LoopStatus,
    ) -> Result<()> {
        self.save_model(model)?;
        algorithm.save_state(&self.dir.join(OPTIMIZER_FILE))?;
        self.save_status(status)?;
        tracing::debug!(
            "Saved checkpoint at iteration {} to '{}'",
            status.iterations_done,
            self.dir.display()
        );
        Ok(())
    }

    pub fn save_model<B: Backend>(&self, model: &SignalRnn<B>) -> Result<()> {
        let path = self.dir.join(MODEL_FILE);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save model to '{}'", path.display()))
    }

    /// Restore weights into `model`, which must have the saved architecture.
    pub fn load_model<B: Backend>(
        &self,
        model:  SignalRnn<B>,
        device: &B::Device,
    ) -> Result<SignalRnn<B>> {
        let path = self.dir.join(MODEL_FILE);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load model '{}'. Has this run been trained?", path.display())
            })?;
        Ok(model.load_record(record))
    }

    /// The recorder appends its own extension to the stem it is given.
    pub fn has_optimizer_state<B: Backend>(&self) -> bool {
        let ext = <CompactRecorder as FileRecorder<B>>::file_extension();
        self.dir
            .join(OPTIMIZER_FILE)
            .with_extension(ext)
            .exists()
    }

    pub fn load_optimizer<B: AutodiffBackend>(
        &self,
        algorithm: &mut CompositeRule<B, SignalRnn<B>>,
        device:    &B::Device,
    ) -> Result<()> {
        algorithm.load_state(&self.dir.join(OPTIMIZER_FILE), device)
    }

    pub fn save_status(&self, status: &LoopStatus) -> Result<()> {
        let path = self.dir.join(STATUS_FILE);
        let json = serde_json::to_string_pretty(status)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write loop status to '{}'", path.display()))
    }

    /// The saved loop status, or None for a weights-only checkpoint.
    pub fn load_status(&self) -> Result<Option<LoopStatus>> {
        let path = self.dir.join(STATUS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read loop status '{}'", path.display()))?;
        let status = serde_json::from_str(&json)
            .with_context(|| format!("Malformed loop status '{}'", path.display()))?;
        Ok(Some(status))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load train_config.json from this directory, or from its parent
    /// when this is a best/ or last/ checkpoint inside a run directory.
    pub fn load_config(&self) -> Result<TrainConfig> {
        let candidates = std::iter::once(self.dir.as_path())
            .chain(self.dir.parent())
            .map(|d| d.join(CONFIG_FILE));

        for path in candidates {
            if path.exists() {
                return read_config(&path);
            }
        }
        anyhow::bail!(
            "No {} found in '{}' or its parent. Make sure you have run 'train'.",
            CONFIG_FILE,
            self.dir.display()
        )
    }
}

/// Read a TrainConfig from a JSON file.
pub fn read_config(path: &Path) -> Result<TrainConfig> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Malformed config '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::algorithm::StepRuleConfig;
    use crate::ml::model::SignalRnnConfig;
    use crate::ml::step_rule::learning_algorithm;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_config_round_trip_via_parent() {
        let dir = tempfile::tempdir().unwrap();
        let run = CheckpointManager::new(dir.path()).unwrap();
        let mut cfg = TrainConfig::default();
        cfg.lag = 7;
        run.save_config(&cfg).unwrap();

        let best = CheckpointManager::new(dir.path().join("best")).unwrap();
        assert_eq!(best.load_config().unwrap().lag, 7);
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let nested = CheckpointManager::new(dir.path().join("a")).unwrap();
        assert!(nested.load_config().is_err());
    }

    #[test]
    fn test_open_requires_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CheckpointManager::open(dir.path().join("nope")).is_err());
        assert!(CheckpointManager::open(dir.path()).is_ok());
    }

    #[test]
    fn test_status_absent_then_present() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        assert!(ckpt.load_status().unwrap().is_none());

        let status = LoopStatus { iterations_done: 42, epochs_done: 3, ..Default::default() };
        ckpt.save_status(&status).unwrap();
        assert_eq!(ckpt.load_status().unwrap(), Some(status));
    }

    #[test]
    fn test_full_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();

        let model: SignalRnn<TestBackend> = SignalRnnConfig::new(1, 4).init(&device);
        let rule = learning_algorithm::<TestBackend, SignalRnn<TestBackend>>(
            &StepRuleConfig::default(),
        )
        .unwrap();
        let status = LoopStatus { iterations_done: 9, ..Default::default() };

        let empty = CheckpointManager::new(dir.path().join("empty")).unwrap();
        assert!(!empty.has_optimizer_state::<TestBackend>());

        ckpt.save_checkpoint(&model, &rule, &status).unwrap();
        assert!(ckpt.has_optimizer_state::<TestBackend>());

        let fresh: SignalRnn<TestBackend> = SignalRnnConfig::new(1, 4).init(&device);
        let restored = ckpt.load_model(fresh, &device).unwrap();

        let input = Tensor::<TestBackend, 3>::ones([1, 3, 1], &device);
        let (a, _) = model.forward(input.clone(), None);
        let (b, _) = restored.forward(input, None);
        let diff: f32 = (a - b).abs().max().into_scalar().elem();
        // CompactRecorder stores half precision
        assert!(diff < 1e-2);

        let mut rule2 = learning_algorithm::<TestBackend, SignalRnn<TestBackend>>(
            &StepRuleConfig::default(),
        )
        .unwrap();
        ckpt.load_optimizer(&mut rule2, &device).unwrap();
    }
}
