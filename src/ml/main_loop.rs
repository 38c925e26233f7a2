// ============================================================
// Layer 5 — Main Loop
// ============================================================
// Drives training batch by batch and hands control to a list
// of extensions at fixed points:
//
//   BeforeTraining
//   ┌ BeforeEpoch
//   │   ┌ forward → cost → backward → composite step
//   │   └ AfterBatch            (once per batch)
//   └ AfterEpoch               (only when the epoch completed)
//   AfterTraining              (also after an early stop)
//
// Extensions decide when they run through a Schedule and talk
// to each other only through the LoopContext: the log of
// recorded channels and the serialisable LoopStatus.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Context, Result};
use burn::{
    data::dataloader::DataLoader,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::SignalBatch;
use crate::ml::model::{RecurrentState, SignalRnn};
use crate::ml::step_rule::CompositeRule;

// ─── LoopStatus ───────────────────────────────────────────────────────────────
/// Iteration state of a run. Saved with every checkpoint so a
/// loaded run resumes its counters and extension bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub iterations_done: usize,
    pub epochs_done:     usize,
    pub epoch_started:   bool,

    /// Set by an extension to end training after the current batch
    pub training_finish_requested: bool,

    /// Per-extension state, keyed by extension name
    #[serde(default)]
    pub extension_state: BTreeMap<String, serde_json::Value>,
}

// ─── TrainingLog ──────────────────────────────────────────────────────────────
/// Channel values recorded per iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingLog {
    rows:    BTreeMap<usize, BTreeMap<String, f64>>,
    current: usize,
}

impl TrainingLog {
    /// Point the log at a new iteration; later records land in its row.
    pub fn set_iteration(&mut self, iteration: usize) {
        self.current = iteration;
    }

    pub fn iteration(&self) -> usize {
        self.current
    }

    pub fn record(&mut self, channel: impl Into<String>, value: f64) {
        self.rows
            .entry(self.current)
            .or_default()
            .insert(channel.into(), value);
    }

    /// Row of the current iteration
    pub fn current_row(&self) -> Option<&BTreeMap<String, f64>> {
        self.rows.get(&self.current)
    }

    /// Value of `channel` recorded at the current iteration
    pub fn current_value(&self, channel: &str) -> Option<f64> {
        self.current_row().and_then(|row| row.get(channel)).copied()
    }

    /// Most recent value of `channel`, at any iteration
    pub fn last_value(&self, channel: &str) -> Option<f64> {
        self.rows
            .values()
            .rev()
            .find_map(|row| row.get(channel))
            .copied()
    }
}

// ─── Scheduling ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    BeforeTraining,
    BeforeEpoch,
    AfterBatch,
    AfterEpoch,
    AfterTraining,
}

/// When an extension wants to be called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub before_training: bool,
    pub before_epoch:    bool,
    pub after_epoch:     bool,
    pub after_training:  bool,
    pub every_n_batches: Option<usize>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_training(mut self) -> Self {
        self.before_training = true;
        self
    }

    pub fn before_epoch(mut self) -> Self {
        self.before_epoch = true;
        self
    }

    pub fn after_epoch(mut self) -> Self {
        self.after_epoch = true;
        self
    }

    pub fn after_training(mut self) -> Self {
        self.after_training = true;
        self
    }

    pub fn every_n_batches(mut self, n: usize) -> Self {
        self.every_n_batches = Some(n);
        self
    }

    pub fn fires(&self, event: Event, status: &LoopStatus) -> bool {
        let every = |n: Option<usize>, count: usize| matches!(n, Some(n) if n > 0 && count % n == 0);
        match event {
            Event::BeforeTraining => self.before_training,
            Event::BeforeEpoch => self.before_epoch,
            Event::AfterBatch => every(self.every_n_batches, status.iterations_done),
            Event::AfterEpoch => self.after_epoch,
            Event::AfterTraining => self.after_training,
        }
    }
}

// ─── Extension ────────────────────────────────────────────────────────────────

/// Everything an extension may read or change.
pub struct LoopContext<B: AutodiffBackend> {
    pub model:     SignalRnn<B>,
    pub algorithm: CompositeRule<B, SignalRnn<B>>,

    /// Recurrent state carried into the next batch
    pub state: Option<RecurrentState<B>>,

    pub status: LoopStatus,
    pub log:    TrainingLog,
    pub device: B::Device,

    /// Full batches in one pass over the training stream, when known
    pub batches_per_epoch: Option<usize>,

    /// L2 coefficient of the training cost
    pub weight_decay: f64,
}

pub trait Extension<B: AutodiffBackend> {
    fn name(&self) -> &str;

    fn schedule(&self) -> &Schedule;

    fn run(&mut self, event: Event, ctx: &mut LoopContext<B>) -> Result<()>;
}

// ─── MainLoop ─────────────────────────────────────────────────────────────────

pub struct MainLoop<B: AutodiffBackend> {
    ctx:          LoopContext<B>,
    train_loader: Arc<dyn DataLoader<B, SignalBatch<B>>>,
    extensions:   Vec<Box<dyn Extension<B>>>,
    max_epochs:   Option<usize>,
    max_batches:  Option<usize>,
}

impl<B: AutodiffBackend> MainLoop<B> {
    pub fn new(
        ctx:          LoopContext<B>,
        train_loader: Arc<dyn DataLoader<B, SignalBatch<B>>>,
        extensions:   Vec<Box<dyn Extension<B>>>,
    ) -> Self {
        Self { ctx, train_loader, extensions, max_epochs: None, max_batches: None }
    }

    pub fn with_max_epochs(mut self, max_epochs: Option<usize>) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_max_batches(mut self, max_batches: Option<usize>) -> Self {
        self.max_batches = max_batches;
        self
    }

    /// Train until an extension requests a stop or a limit is hit.
    /// Returns the final context (model, status, log).
    pub fn run(mut self) -> Result<LoopContext<B>> {
        self.fire(Event::BeforeTraining)?;

        while !self.should_stop() {
            self.ctx.status.epoch_started = true;
            self.fire(Event::BeforeEpoch)?;

            let loader = Arc::clone(&self.train_loader);
            let mut batches = 0usize;
            let mut completed = true;
            for batch in loader.iter() {
                self.process_batch(batch)?;
                batches += 1;
                self.fire(Event::AfterBatch)?;

                if self.should_stop_batches() {
                    completed = false;
                    break;
                }
            }

            if batches == 0 {
                bail!("the training stream yielded no batches");
            }

            self.ctx.status.epoch_started = false;
            if completed {
                self.ctx.status.epochs_done += 1;
                tracing::debug!("Epoch {} done ({} batches)", self.ctx.status.epochs_done, batches);
                self.fire(Event::AfterEpoch)?;
            }
        }

        tracing::info!(
            "Training stopped after {} batches ({} epochs)",
            self.ctx.status.iterations_done,
            self.ctx.status.epochs_done
        );
        self.fire(Event::AfterTraining)?;
        Ok(self.ctx)
    }

    fn process_batch(&mut self, batch: SignalBatch<B>) -> Result<()> {
        let ctx = &mut self.ctx;

        // State from a batch of a different size cannot be carried over
        let state = ctx
            .state
            .take()
            .filter(|s| s.batch_size() == batch.batch_size());

        let out = ctx
            .model
            .forward_cost(batch.inputs, batch.targets, state, ctx.weight_decay);
        let cost = out.cost_value();
        let mse: f64 = out.mse.clone().into_scalar().elem();
        if !cost.is_finite() {
            tracing::warn!("Non-finite cost at iteration {}", ctx.status.iterations_done + 1);
        }

        let grads = GradientsParams::from_grads(out.cost.backward(), &ctx.model);
        let (model, report) = ctx.algorithm.step(ctx.model.clone(), grads)?;
        ctx.model = model;
        ctx.state = Some(out.state.detach());

        ctx.status.iterations_done += 1;
        ctx.log.set_iteration(ctx.status.iterations_done);
        ctx.log.record("batch_cost", cost);
        ctx.log.record("batch_mse", mse);
        if let Some(norm) = report.gradient_norm {
            ctx.log.record("total_gradient_norm", norm);
        }
        if let Some(norm) = report.step_norm {
            ctx.log.record("total_step_norm", norm);
        }
        if report.non_finite > 0 {
            ctx.log.record("non_finite_params", report.non_finite as f64);
        }
        Ok(())
    }

    fn fire(&mut self, event: Event) -> Result<()> {
        for ext in self.extensions.iter_mut() {
            if ext.schedule().fires(event, &self.ctx.status) {
                ext.run(event, &mut self.ctx)
                    .with_context(|| format!("extension '{}' failed on {:?}", ext.name(), event))?;
            }
        }
        Ok(())
    }

    fn should_stop_batches(&self) -> bool {
        self.ctx.status.training_finish_requested
            || matches!(self.max_batches, Some(max) if self.ctx.status.iterations_done >= max)
    }

    fn should_stop(&self) -> bool {
        self.should_stop_batches()
            || matches!(self.max_epochs, Some(max) if self.ctx.status.epochs_done >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(iterations: usize, epochs: usize) -> LoopStatus {
        LoopStatus { iterations_done: iterations, epochs_done: epochs, ..Default::default() }
    }

    #[test]
    fn test_every_n_batches() {
        let s = Schedule::new().every_n_batches(100);
        assert!(s.fires(Event::AfterBatch, &status(100, 0)));
        assert!(s.fires(Event::AfterBatch, &status(300, 0)));
        assert!(!s.fires(Event::AfterBatch, &status(150, 0)));
        assert!(!s.fires(Event::AfterEpoch, &status(100, 1)));
    }

    #[test]
    fn test_zero_period_never_fires() {
        let s = Schedule::new().every_n_batches(0);
        assert!(!s.fires(Event::AfterBatch, &status(10, 0)));
    }

    #[test]
    fn test_epoch_and_training_flags() {
        let s = Schedule::new().before_training().after_epoch().after_training();
        assert!(s.fires(Event::BeforeTraining, &status(0, 0)));
        assert!(s.fires(Event::AfterEpoch, &status(5, 1)));
        assert!(s.fires(Event::AfterEpoch, &status(10, 2)));
        assert!(s.fires(Event::AfterTraining, &status(10, 2)));
        assert!(!s.fires(Event::BeforeEpoch, &status(0, 0)));
    }

    #[test]
    fn test_log_rows_per_iteration() {
        let mut log = TrainingLog::default();
        log.set_iteration(1);
        log.record("batch_cost", 2.0);
        log.set_iteration(2);
        log.record("batch_cost", 1.5);
        log.record("valid_mse", 0.7);

        assert_eq!(log.current_value("batch_cost"), Some(1.5));
        assert_eq!(log.current_value("valid_mse"), Some(0.7));

        log.set_iteration(3);
        log.record("batch_cost", 1.0);
        assert_eq!(log.current_value("valid_mse"), None);
        assert_eq!(log.last_value("valid_mse"), Some(0.7));
    }

    #[test]
    fn test_status_serde_defaults_extension_state() {
        let json = r#"{"iterations_done":5,"epochs_done":1,"epoch_started":false,"training_finish_requested":false}"#;
        let status: LoopStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.iterations_done, 5);
        assert!(status.extension_state.is_empty());
    }
}
