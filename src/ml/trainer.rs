// ============================================================
// Layer 5 — Training Orchestrator
// ============================================================
// Wires the model, the composite step rule, the two data
// streams and the extensions into a MainLoop and runs it.
//
// Key Burn 0.20 insight:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on MyInnerBackend (Wgpu)
//   - The validation loader must therefore use MyInnerBackend
//
// Neither loader shuffles: both streams are window-major, so
// row r of batch k+1 continues row r of batch k and the
// recurrent state carried between batches stays meaningful.

use std::path::Path;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::SignalBatcher, dataset::SignalDataset};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::extensions::{
    DataStreamMonitoring, EarlyStopping, Load, MetricsCsv, Printing, ProgressBar, ResetStates,
    SaveCheckpoint, TrainingDataMonitoring,
};
use crate::ml::main_loop::{Extension, LoopContext, LoopStatus, MainLoop, TrainingLog};
use crate::ml::model::SignalRnn;
use crate::ml::step_rule::learning_algorithm;

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Channel early stopping watches; lower is better
pub const MONITORED_CHANNEL: &str = "valid_mse";

/// What a finished run reports back to the caller.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub status:          LoopStatus,
    pub final_valid_mse: Option<f64>,
    pub best_valid_mse:  Option<f64>,
}

pub fn train_model(
    cfg:           &TrainConfig,
    train_dataset: SignalDataset,
    valid_dataset: SignalDataset,
) -> Result<TrainingSummary> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    run_main_loop::<MyBackend>(cfg, train_dataset, valid_dataset, device)
}

/// Backend-generic body of `train_model`, so tests can run it on NdArray.
pub fn run_main_loop<B: AutodiffBackend>(
    cfg:           &TrainConfig,
    train_dataset: SignalDataset,
    valid_dataset: SignalDataset,
    device:        B::Device,
) -> Result<TrainingSummary> {
    // ── Model ─────────────────────────────────────────────────────────────────
    let model: SignalRnn<B> = cfg.model_config().init(&device);
    let (tensors, scalars) = model.parameter_summary();
    tracing::info!(
        "Model ready: {} LSTM layer(s), hidden_size={}, {} parameter tensors, {} scalars",
        cfg.num_layers,
        cfg.hidden_size,
        tensors,
        scalars
    );

    // ── Step rule ─────────────────────────────────────────────────────────────
    let algorithm = learning_algorithm::<B, SignalRnn<B>>(&cfg.step_rule())?;

    // ── Streams ───────────────────────────────────────────────────────────────
    let batches_per_epoch = train_dataset.full_batches(cfg.batch_size);
    let train_loader = DataLoaderBuilder::new(SignalBatcher::new())
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .set_device(device.clone())
        .build(train_dataset);
    let valid_loader = DataLoaderBuilder::new(SignalBatcher::new())
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .set_device(device.clone())
        .build(valid_dataset);

    // ── Checkpoint locations ──────────────────────────────────────────────────
    let save_path = Path::new(&cfg.save_path);
    let best = CheckpointManager::new(save_path.join("best"))?;
    let last = CheckpointManager::new(save_path.join("last"))?;
    let metrics = MetricsLogger::new(save_path)?;
    tracing::info!("Writing window metrics to '{}'", metrics.csv_path().display());

    // ── Extensions, in dispatch order ─────────────────────────────────────────
    let mut extensions: Vec<Box<dyn Extension<B>>> = Vec::new();
    if let Some(load_path) = &cfg.load_path {
        extensions.push(Box::new(Load::new(load_path, true)));
    }
    extensions.push(Box::new(TrainingDataMonitoring::new("train", cfg.monitoring_freq)));
    extensions.push(Box::new(DataStreamMonitoring::<B>::new(
        valid_loader,
        "valid",
        cfg.monitoring_freq,
    )));
    extensions.push(Box::new(
        EarlyStopping::new(MONITORED_CHANNEL, cfg.patience, best, cfg.monitoring_freq)
            .with_min_delta(cfg.min_delta),
    ));
    extensions.push(Box::new(ResetStates::new(cfg.reset_every)));
    extensions.push(Box::new(MetricsCsv::new(metrics, cfg.monitoring_freq)));
    extensions.push(Box::new(SaveCheckpoint::new(last)));
    extensions.push(Box::new(Printing::new(cfg.monitoring_freq)));
    if cfg.progress {
        extensions.push(Box::new(ProgressBar::new()));
    }

    let ctx = LoopContext {
        model,
        algorithm,
        state: None,
        status: LoopStatus::default(),
        log: TrainingLog::default(),
        device,
        batches_per_epoch: Some(batches_per_epoch),
        weight_decay: cfg.weight_decay,
    };

    let ctx = MainLoop::new(ctx, train_loader, extensions)
        .with_max_epochs(cfg.max_epochs)
        .with_max_batches(cfg.max_batches)
        .run()
        .context("Training failed")?;

    let best_valid_mse = CheckpointManager::open(save_path.join("best"))?
        .load_status()?
        .and_then(|s| s.extension_state.get("early_stopping").cloned())
        .and_then(|v| v.get("best_value").and_then(|b| b.as_f64()));

    Ok(TrainingSummary {
        final_valid_mse: ctx.log.last_value(MONITORED_CHANNEL),
        best_valid_mse,
        status: ctx.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::generator::{into_windows, random_signal_lag, SignalLagConfig};
    use burn::backend::{Autodiff, NdArray};
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = Autodiff<NdArray>;

    fn dataset(cfg: &TrainConfig, windows: usize, seed: u64) -> SignalDataset {
        let gen_cfg = SignalLagConfig {
            num_signals: cfg.batch_size,
            signal_len:  cfg.seq_len * windows,
            features:    cfg.features,
            lag:         cfg.lag,
            smoothing:   cfg.smoothing,
        };
        let signals = random_signal_lag(&gen_cfg, &mut StdRng::seed_from_u64(seed));
        SignalDataset::new(into_windows(&signals, cfg.seq_len))
    }

    fn tiny_config(save_path: &Path) -> TrainConfig {
        TrainConfig {
            save_path: save_path.to_string_lossy().into_owned(),
            batch_size: 2,
            seq_len: 5,
            hidden_size: 4,
            monitoring_freq: 2,
            reset_every: 4,
            max_batches: Some(6),
            progress: false,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_runs_until_max_batches() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_config(dir.path());

        let summary = run_main_loop::<TestBackend>(
            &cfg,
            dataset(&cfg, 4, 1),
            dataset(&cfg, 2, 2),
            Default::default(),
        )
        .unwrap();

        assert_eq!(summary.status.iterations_done, 6);
        assert_eq!(summary.status.epochs_done, 1);
        assert!(summary.final_valid_mse.is_some());
        assert!(summary.best_valid_mse.is_some());
        assert!(dir.path().join("last").join("status.json").exists());
        assert!(dir.path().join("metrics.csv").exists());
    }

    #[test]
    fn test_resume_from_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let first = tiny_config(&dir.path().join("first"));
        run_main_loop::<TestBackend>(
            &first,
            dataset(&first, 4, 1),
            dataset(&first, 2, 2),
            Default::default(),
        )
        .unwrap();
        let saved = CheckpointManager::open(dir.path().join("first").join("last")).unwrap();
        assert!(saved.has_optimizer_state::<TestBackend>());

        let second = TrainConfig {
            load_path: Some(dir.path().join("first").join("last").to_string_lossy().into_owned()),
            max_batches: Some(8),
            ..tiny_config(&dir.path().join("second"))
        };
        let summary = run_main_loop::<TestBackend>(
            &second,
            dataset(&second, 4, 1),
            dataset(&second, 2, 2),
            Default::default(),
        )
        .unwrap();

        // Counters continue from the loaded status
        assert_eq!(summary.status.iterations_done, 8);
    }

    #[test]
    fn test_patience_stops_training() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            learning_rate: 0.0,
            patience: 1,
            max_batches: Some(100),
            ..tiny_config(dir.path())
        };

        let summary = run_main_loop::<TestBackend>(
            &cfg,
            dataset(&cfg, 4, 1),
            dataset(&cfg, 2, 2),
            Default::default(),
        )
        .unwrap();

        // lr = 0 never improves, so the second window stops the run
        assert!(summary.status.training_finish_requested);
        assert_eq!(summary.status.iterations_done, 4);
    }

    #[test]
    fn test_min_delta_demands_larger_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            min_delta: 1e3,
            patience: 1,
            max_batches: Some(100),
            ..tiny_config(dir.path())
        };

        let summary = run_main_loop::<TestBackend>(
            &cfg,
            dataset(&cfg, 4, 1),
            dataset(&cfg, 2, 2),
            Default::default(),
        )
        .unwrap();

        // No window can beat the first by 1e3, even while learning
        assert!(summary.status.training_finish_requested);
        assert_eq!(summary.status.iterations_done, 4);
    }
}
