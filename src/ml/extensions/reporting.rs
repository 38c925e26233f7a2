//! Human-facing reports: log lines, a progress bar, and the metrics CSV.

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar as Bar, ProgressStyle};

use crate::infra::metrics::{MetricsLogger, WindowMetrics};
use crate::ml::main_loop::{Event, Extension, LoopContext, Schedule};

// ─── Printing ─────────────────────────────────────────────────────────────────

/// Logs every channel of the current row: once before training, every
/// monitoring window, at each epoch end and after training.
pub struct Printing {
    schedule: Schedule,
}

impl Printing {
    pub fn new(every_n_batches: usize) -> Self {
        Self {
            schedule: Schedule::new()
                .before_training()
                .every_n_batches(every_n_batches)
                .after_epoch()
                .after_training(),
        }
    }
}

/// "name=value" pairs of a log row, in channel order
fn format_row<'a>(row: impl IntoIterator<Item = (&'a String, &'a f64)>) -> String {
    row.into_iter()
        .map(|(k, v)| format!("{k}={v:.6}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl<B: AutodiffBackend> Extension<B> for Printing {
    fn name(&self) -> &str {
        "printing"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        let row = ctx.log.current_row().map(|row| format_row(row)).unwrap_or_default();
        let prefix = match event {
            Event::BeforeTraining => "Initial",
            Event::AfterEpoch => "Epoch end",
            Event::AfterTraining => "Final",
            _ => "Iteration",
        };
        tracing::info!(
            "{} {} (epoch {}): {}",
            prefix,
            ctx.log.iteration(),
            ctx.status.epochs_done,
            row
        );
        Ok(())
    }
}

// ─── ProgressBar ──────────────────────────────────────────────────────────────

/// Per-epoch progress bar. Falls back to a spinner when the number of
/// batches per epoch is unknown.
pub struct ProgressBar {
    bar:      Option<Bar>,
    schedule: Schedule,
}

impl ProgressBar {
    pub fn new() -> Self {
        Self {
            bar: None,
            schedule: Schedule::new()
                .before_epoch()
                .every_n_batches(1)
                .after_epoch()
                .after_training(),
        }
    }
}

impl Default for ProgressBar {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> Extension<B> for ProgressBar {
    fn name(&self) -> &str {
        "progress_bar"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        match event {
            Event::BeforeEpoch => {
                let bar = match ctx.batches_per_epoch {
                    Some(n) => {
                        let bar = Bar::new(n as u64);
                        bar.set_style(
                            ProgressStyle::with_template(
                                "{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                            )?
                            .progress_chars("=>-"),
                        );
                        bar
                    }
                    None => Bar::new_spinner(),
                };
                bar.set_message(format!("epoch {}", ctx.status.epochs_done + 1));
                self.bar = Some(bar);
            }
            Event::AfterBatch => {
                if let Some(bar) = &self.bar {
                    bar.inc(1);
                    if let Some(cost) = ctx.log.current_value("batch_cost") {
                        bar.set_message(format!(
                            "epoch {} cost={:.4}",
                            ctx.status.epochs_done + 1,
                            cost
                        ));
                    }
                }
            }
            Event::AfterEpoch | Event::AfterTraining => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
            }
            Event::BeforeTraining => {}
        }
        Ok(())
    }
}

// ─── MetricsCsv ───────────────────────────────────────────────────────────────

/// Appends one CSV row per monitoring window.
pub struct MetricsCsv {
    logger:   MetricsLogger,
    schedule: Schedule,
}

impl MetricsCsv {
    pub fn new(logger: MetricsLogger, every_n_batches: usize) -> Self {
        Self {
            logger,
            schedule: Schedule::new().every_n_batches(every_n_batches),
        }
    }
}

impl<B: AutodiffBackend> Extension<B> for MetricsCsv {
    fn name(&self) -> &str {
        "metrics_csv"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, _event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        self.logger.log(&WindowMetrics {
            iteration:  ctx.status.iterations_done,
            epoch:      ctx.status.epochs_done,
            train_cost: ctx.log.current_value("train_cost"),
            valid_cost: ctx.log.current_value("valid_cost"),
            valid_mse:  ctx.log.current_value("valid_mse"),
        })
    }
}
