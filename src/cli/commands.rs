// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `plot`
// and all their configurable flags.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::{plot_use_case::PlotConfig, train_use_case::TrainConfig};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the RNN to reproduce a lagged copy of its input
    Train(TrainArgs),

    /// Export an input / target / output signal triple as CSV
    Plot(PlotArgs),
}

/// All arguments for the `train` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Load every setting from a saved train_config.json instead of the flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for checkpoints, metrics and the saved config
    #[arg(long, default_value = "runs/signal_lag")]
    pub save_path: String,

    /// Checkpoint directory to resume from (weights, optimizer and counters)
    #[arg(long)]
    pub load_path: Option<String>,

    /// Step rule: adam, rms_prop, or anything else for momentum SGD
    #[arg(long, default_value = "adam")]
    pub algorithm: String,

    #[arg(long, default_value_t = 2e-3)]
    pub learning_rate: f64,

    /// Momentum coefficient, only used by momentum SGD
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// Maximum global L2 norm of the gradients or steps
    #[arg(long, default_value_t = 1.0)]
    pub clipping: f64,

    /// Monitoring windows without improvement before stopping
    #[arg(long, default_value_t = 5)]
    pub patience: usize,

    /// Smallest drop in valid_mse that resets the patience counter
    #[arg(long, default_value_t = 0.0)]
    pub min_delta: f64,

    /// Batches between validation runs, reports and early-stopping checks
    #[arg(long, default_value_t = 50)]
    pub monitoring_freq: usize,

    /// Batches between hidden-state resets (0 disables)
    #[arg(long, default_value_t = 100)]
    pub reset_every: usize,

    #[arg(long, default_value_t = 50)]
    pub max_epochs: usize,

    #[arg(long)]
    pub max_batches: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Parallel signals, one row of every batch
    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,

    /// Time steps per training window
    #[arg(long, default_value_t = 25)]
    pub seq_len: usize,

    /// Windows per training signal
    #[arg(long, default_value_t = 40)]
    pub train_windows: usize,

    /// Windows per validation signal
    #[arg(long, default_value_t = 10)]
    pub valid_windows: usize,

    /// Delay between input and target, in time steps
    #[arg(long, default_value_t = 1)]
    pub lag: usize,

    #[arg(long, default_value_t = 1)]
    pub features: usize,

    /// Low-pass coefficient of the generated noise
    #[arg(long, default_value_t = 0.5)]
    pub smoothing: f32,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 32)]
    pub hidden_size: usize,

    #[arg(long, default_value_t = 1)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    /// L2 penalty added to the training cost
    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            save_path:       a.save_path,
            load_path:       a.load_path,
            algorithm:       a.algorithm,
            learning_rate:   a.learning_rate,
            momentum:        a.momentum,
            clipping:        a.clipping,
            patience:        a.patience,
            min_delta:       a.min_delta,
            monitoring_freq: a.monitoring_freq,
            reset_every:     a.reset_every,
            max_epochs:      Some(a.max_epochs),
            max_batches:     a.max_batches,
            progress:        !a.no_progress,
            batch_size:      a.batch_size,
            seq_len:         a.seq_len,
            train_windows:   a.train_windows,
            valid_windows:   a.valid_windows,
            lag:             a.lag,
            features:        a.features,
            smoothing:       a.smoothing,
            seed:            a.seed,
            hidden_size:     a.hidden_size,
            num_layers:      a.num_layers,
            dropout:         a.dropout,
            weight_decay:    a.weight_decay,
        }
    }
}

/// All arguments for the `plot` command
#[derive(Args, Debug)]
pub struct PlotArgs {
    /// CSV file to write
    #[arg(long, default_value = "signals.csv")]
    pub output: PathBuf,

    /// Checkpoint directory (e.g. runs/signal_lag/best) whose model fills the output column
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    #[arg(long, default_value_t = 25)]
    pub signal_len: usize,

    /// Defaults to the checkpoint's training lag, or 1
    #[arg(long)]
    pub lag: Option<usize>,

    /// Defaults to the checkpoint's feature count, or 1
    #[arg(long)]
    pub features: Option<usize>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl From<PlotArgs> for PlotConfig {
    fn from(a: PlotArgs) -> Self {
        PlotConfig {
            output:     a.output,
            checkpoint: a.checkpoint,
            signal_len: a.signal_len,
            lag:        a.lag,
            features:   a.features,
            seed:       a.seed,
        }
    }
}
