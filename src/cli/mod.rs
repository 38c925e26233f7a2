// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates everything else to Layer 2.
//
// Two commands are supported:
//   1. `train` — trains the RNN on generated lagged signals
//   2. `plot`  — exports a signal triple, optionally predicted
//                by a trained checkpoint

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PlotArgs, TrainArgs};

use crate::application::train_use_case::TrainConfig;
use crate::infra::checkpoint::read_config;

#[derive(Parser, Debug)]
#[command(
    name = "signal-lag-rnn",
    version = "0.1.0",
    about = "Train an RNN to reproduce a lagged copy of a random signal."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => Self::run_train(args),
            Commands::Plot(args) => Self::run_plot(args),
        }
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        use crate::application::train_use_case::TrainUseCase;

        let cfg: TrainConfig = match &args.config {
            Some(path) => {
                tracing::info!("Reading training config from '{}'", path.display());
                read_config(path)?
            }
            None => args.into(),
        };
        tracing::info!(
            "Starting training: algorithm={}, lag={}, save_path='{}'",
            cfg.algorithm,
            cfg.lag,
            cfg.save_path
        );

        let summary = TrainUseCase::new(cfg.clone()).execute()?;

        println!(
            "Training stopped after {} batches ({} epochs).",
            summary.status.iterations_done, summary.status.epochs_done
        );
        if let Some(mse) = summary.final_valid_mse {
            println!("Final valid_mse: {mse:.6}");
        }
        if let Some(mse) = summary.best_valid_mse {
            println!("Best valid_mse:  {mse:.6} (saved to {}/best)", cfg.save_path);
        }
        Ok(())
    }

    fn run_plot(args: PlotArgs) -> Result<()> {
        use crate::application::plot_use_case::PlotUseCase;

        let path = PlotUseCase::new(args.into()).execute()?;
        println!("Signals written to {}", path.display());
        Ok(())
    }
}
