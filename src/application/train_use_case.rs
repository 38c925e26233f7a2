// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the configuration
//   Step 2: Generate lagged training signals   (Layer 4 - data)
//   Step 3: Generate lagged validation signals (Layer 4 - data)
//   Step 4: Cut both into window-major streams (Layer 4 - data)
//   Step 5: Save config for later runs         (Layer 6 - infra)
//   Step 6: Run the main loop                  (Layer 5 - ml)

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::SignalDataset,
    generator::{into_windows, LagSignalGenerator, SignalLagConfig},
};
use crate::domain::{
    algorithm::{Algorithm, StepRuleConfig},
    traits::SignalSource,
};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::SignalRnnConfig;
use crate::ml::trainer::{train_model, TrainingSummary};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Serialisable so it can be saved next to the checkpoints and
// reloaded with `train --config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    // ── Paths ──
    pub save_path: String,
    pub load_path: Option<String>,

    // ── Step rule ──
    /// "adam", "rms_prop"; anything else selects momentum
    pub algorithm:     String,
    pub learning_rate: f64,
    pub momentum:      f64,
    pub clipping:      f64,

    // ── Loop ──
    pub patience:        usize,
    /// Smallest drop in the monitored value that counts as improvement
    pub min_delta:       f64,
    pub monitoring_freq: usize,
    pub reset_every:     usize,
    pub max_epochs:      Option<usize>,
    pub max_batches:     Option<usize>,
    pub progress:        bool,

    // ── Data ──
    pub batch_size:    usize,
    pub seq_len:       usize,
    pub train_windows: usize,
    pub valid_windows: usize,
    pub lag:           usize,
    pub features:      usize,
    pub smoothing:     f32,
    pub seed:          u64,

    // ── Model ──
    pub hidden_size:  usize,
    pub num_layers:   usize,
    pub dropout:      f64,
    pub weight_decay: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            save_path:       "runs/signal_lag".to_string(),
            load_path:       None,
            algorithm:       "adam".to_string(),
            learning_rate:   2e-3,
            momentum:        0.9,
            clipping:        1.0,
            patience:        5,
            min_delta:       0.0,
            monitoring_freq: 50,
            reset_every:     100,
            max_epochs:      Some(50),
            max_batches:     None,
            progress:        true,
            batch_size:      10,
            seq_len:         25,
            train_windows:   40,
            valid_windows:   10,
            lag:             1,
            features:        1,
            smoothing:       0.5,
            seed:            42,
            hidden_size:     32,
            num_layers:      1,
            dropout:         0.0,
            weight_decay:    0.0,
        }
    }
}

impl TrainConfig {
    pub fn step_rule(&self) -> StepRuleConfig {
        StepRuleConfig {
            algorithm:     Algorithm::from_name(&self.algorithm),
            learning_rate: self.learning_rate,
            momentum:      self.momentum,
            clipping:      self.clipping,
        }
    }

    pub fn model_config(&self) -> SignalRnnConfig {
        SignalRnnConfig::new(self.features, self.hidden_size)
            .with_num_layers(self.num_layers)
            .with_dropout(self.dropout)
    }

    /// Generator settings for one stream of `windows` windows per row.
    pub fn signal_config(&self, windows: usize) -> SignalLagConfig {
        SignalLagConfig {
            num_signals: self.batch_size,
            signal_len:  self.seq_len * windows,
            features:    self.features,
            lag:         self.lag,
            smoothing:   self.smoothing,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.seq_len > 0, "seq_len must be positive");
        ensure!(self.train_windows > 0, "train_windows must be positive");
        ensure!(self.valid_windows > 0, "valid_windows must be positive");
        ensure!(self.monitoring_freq > 0, "monitoring_freq must be positive");
        ensure!(self.patience > 0, "patience must be positive");
        ensure!(self.min_delta >= 0.0, "min_delta must not be negative");
        ensure!(self.hidden_size > 0, "hidden_size must be positive");
        ensure!(self.learning_rate >= 0.0, "learning_rate must not be negative");
        ensure!(self.clipping > 0.0, "clipping threshold must be positive");
        ensure!(
            (0.0..1.0).contains(&self.dropout),
            "dropout must be in [0, 1), got {}",
            self.dropout
        );
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingSummary> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Steps 2-4: Generate both streams ──────────────────────────────────
        // The validation stream uses the next seed so it never repeats
        // the training signals.
        let train_dataset = Self::stream(cfg, cfg.train_windows, cfg.seed)?;
        let valid_dataset = Self::stream(cfg, cfg.valid_windows, cfg.seed.wrapping_add(1))?;
        tracing::info!(
            "Generated {} train and {} valid windows of {} steps (lag {})",
            train_dataset.sample_count(),
            valid_dataset.sample_count(),
            cfg.seq_len,
            cfg.lag
        );

        // ── Step 5: Save config ───────────────────────────────────────────────
        CheckpointManager::new(&cfg.save_path)?.save_config(cfg)?;

        // ── Step 6: Train ─────────────────────────────────────────────────────
        train_model(cfg, train_dataset, valid_dataset)
    }

    fn stream(cfg: &TrainConfig, windows: usize, seed: u64) -> Result<SignalDataset> {
        let signals = LagSignalGenerator::new(cfg.signal_config(windows), seed).sequences()?;
        Ok(SignalDataset::new(into_windows(&signals, cfg.seq_len)))
    }
}
