// ============================================================
// Layer 2 — Plot Use Case
// ============================================================
// Generates one lagged sequence and exports input, target and
// output side by side. Without a checkpoint the output is the
// target itself, which shows what a perfect model would produce.
// With a checkpoint, lag, features and smoothing default to the
// values the run was trained with.

use std::path::PathBuf;

use anyhow::Result;

use crate::application::train_use_case::TrainConfig;
use crate::data::generator::{LagSignalGenerator, SignalLagConfig};
use crate::domain::traits::SignalSource;
use crate::infra::{checkpoint::CheckpointManager, signal_export::plot_signals};
use crate::ml::inferencer::SignalPredictor;

#[derive(Debug, Clone)]
pub struct PlotConfig {
    pub output:     PathBuf,
    pub checkpoint: Option<PathBuf>,
    pub signal_len: usize,
    /// Unset: the checkpoint's training lag, or 1
    pub lag:        Option<usize>,
    /// Unset: the checkpoint's feature count, or 1
    pub features:   Option<usize>,
    pub seed:       u64,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            output:     PathBuf::from("signals.csv"),
            checkpoint: None,
            signal_len: 25,
            lag:        None,
            features:   None,
            seed:       0,
        }
    }
}

pub struct PlotUseCase {
    config: PlotConfig,
}

impl PlotUseCase {
    pub fn new(config: PlotConfig) -> Self {
        Self { config }
    }

    /// Generator settings; explicit values win over the trained run's.
    fn signal_config(&self, trained: Option<&TrainConfig>) -> SignalLagConfig {
        let cfg = &self.config;
        let defaults = SignalLagConfig::default();
        SignalLagConfig {
            num_signals: 1,
            signal_len:  cfg.signal_len,
            features:    cfg.features.or(trained.map(|t| t.features)).unwrap_or(1),
            lag:         cfg.lag.or(trained.map(|t| t.lag)).unwrap_or(1),
            smoothing:   trained.map_or(defaults.smoothing, |t| t.smoothing),
        }
    }

    pub fn execute(&self) -> Result<PathBuf> {
        let cfg = &self.config;
        let ckpt = cfg.checkpoint.as_ref().map(CheckpointManager::open).transpose()?;
        let trained = ckpt.as_ref().map(|c| c.load_config()).transpose()?;

        let gen_cfg = self.signal_config(trained.as_ref());
        tracing::info!(
            "Plotting {} steps, lag {}, {} feature(s)",
            gen_cfg.signal_len,
            gen_cfg.lag,
            gen_cfg.features
        );
        let sequences = LagSignalGenerator::new(gen_cfg, cfg.seed).sequences()?;
        let sequence = sequences
            .first()
            .ok_or_else(|| anyhow::anyhow!("generator produced no sequence"))?;

        let output = match &ckpt {
            Some(ckpt) => SignalPredictor::from_checkpoint(ckpt)?.predict(sequence)?,
            None => sequence.target.clone(),
        };

        plot_signals(sequence, &output, &cfg.output)?;
        tracing::info!("Wrote {} steps to '{}'", sequence.seq_len, cfg.output.display());
        Ok(cfg.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PlotConfig { output: dir.path().join("plot.csv"), ..Default::default() };

        let path = PlotUseCase::new(cfg).execute().unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 26);

        // Without a model the output column repeats the target column
        for line in &lines[1..] {
            let cols: Vec<&str> = line.split(',').collect();
            assert_eq!(cols[3], cols[4]);
        }
    }

    #[test]
    fn test_lag_too_long() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PlotConfig {
            output: dir.path().join("plot.csv"),
            lag: Some(25),
            ..Default::default()
        };
        assert!(PlotUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn test_settings_follow_trained_run() {
        let trained = TrainConfig { lag: 4, features: 3, smoothing: 0.8, ..Default::default() };

        let plot = PlotUseCase::new(PlotConfig::default());
        let gen_cfg = plot.signal_config(Some(&trained));
        assert_eq!(gen_cfg.lag, 4);
        assert_eq!(gen_cfg.features, 3);
        assert_eq!(gen_cfg.smoothing, 0.8);

        let untrained = plot.signal_config(None);
        assert_eq!((untrained.lag, untrained.features), (1, 1));
    }

    #[test]
    fn test_explicit_lag_overrides_trained_run() {
        let trained = TrainConfig { lag: 4, features: 3, ..Default::default() };
        let plot = PlotUseCase::new(PlotConfig { lag: Some(2), ..Default::default() });
        let gen_cfg = plot.signal_config(Some(&trained));
        assert_eq!(gen_cfg.lag, 2);
        assert_eq!(gen_cfg.features, 3);
    }

    #[test]
    fn test_checkpoint_without_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PlotConfig {
            output: dir.path().join("plot.csv"),
            checkpoint: Some(dir.path().join("best")),
            ..Default::default()
        };
        std::fs::create_dir(dir.path().join("best")).unwrap();
        assert!(PlotUseCase::new(cfg).execute().is_err());
    }
}
