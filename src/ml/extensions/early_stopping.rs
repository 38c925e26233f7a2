//! Early stopping on a monitored log channel.
//!
//! Every monitoring window the extension reads one channel
//! (`valid_mse` by default), where lower is better. A new best
//! value is persisted as a full checkpoint; after `patience`
//! windows in a row without improvement the loop is asked to
//! finish.

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::main_loop::{Event, Extension, LoopContext, Schedule};

/// Outcome of checking one monitored value.
#[derive(Debug, Clone, PartialEq)]
pub enum StoppingDecision {
    /// New best value; the caller should save a checkpoint.
    NewBest,
    /// No improvement, but patience is not exhausted.
    NoImprovement {
        /// Windows without improvement so far
        count: usize,
        /// Windows left before stopping
        remaining: usize,
    },
    /// Patience exhausted.
    Stop,
}

/// Best-value bookkeeping, serialisable so a loaded run resumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTracker {
    patience:  usize,
    min_delta: f64,
    best_value:     Option<f64>,
    best_iteration: usize,
    /// Consecutive windows with no improvement
    counter: usize,
}

impl BestTracker {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best_value: None,
            best_iteration: 0,
            counter: 0,
        }
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    /// Take over the progress of `saved` but keep this tracker's patience and delta.
    pub fn resume(&mut self, saved: BestTracker) {
        self.best_value = saved.best_value;
        self.best_iteration = saved.best_iteration;
        self.counter = saved.counter;
    }

    /// Non-finite values never count as an improvement.
    pub fn check(&mut self, value: f64, iteration: usize) -> StoppingDecision {
        let improved = value.is_finite()
            && self
                .best_value
                .map_or(true, |best| value < best - self.min_delta);

        if improved {
            self.best_value = Some(value);
            self.best_iteration = iteration;
            self.counter = 0;
            return StoppingDecision::NewBest;
        }

        self.counter += 1;
        if self.counter >= self.patience {
            StoppingDecision::Stop
        } else {
            StoppingDecision::NoImprovement {
                count: self.counter,
                remaining: self.patience - self.counter,
            }
        }
    }
}

const NAME: &str = "early_stopping";

pub struct EarlyStopping {
    channel:    String,
    tracker:    BestTracker,
    checkpoint: CheckpointManager,
    schedule:   Schedule,
}

impl EarlyStopping {
    pub fn new(
        channel:         impl Into<String>,
        patience:        usize,
        checkpoint:      CheckpointManager,
        every_n_batches: usize,
    ) -> Self {
        Self {
            channel: channel.into(),
            tracker: BestTracker::new(patience, 0.0),
            checkpoint,
            schedule: Schedule::new().before_training().every_n_batches(every_n_batches),
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.tracker.min_delta = min_delta;
        self
    }
}

impl<B: AutodiffBackend> Extension<B> for EarlyStopping {
    fn name(&self) -> &str {
        NAME
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        if event == Event::BeforeTraining {
            if let Some(saved) = ctx.status.extension_state.get(NAME) {
                let saved: BestTracker = serde_json::from_value(saved.clone())?;
                self.tracker.resume(saved);
                tracing::info!(
                    "Resumed early stopping: best {} = {:?} at iteration {}",
                    self.channel,
                    self.tracker.best_value(),
                    self.tracker.best_iteration()
                );
            }
            return Ok(());
        }

        let Some(value) = ctx.log.current_value(&self.channel) else {
            tracing::debug!("'{}' not recorded this window, skipping", self.channel);
            return Ok(());
        };

        let iteration = ctx.status.iterations_done;
        let decision = self.tracker.check(value, iteration);
        ctx.status.extension_state.insert(
            NAME.to_string(),
            serde_json::to_value(&self.tracker)?,
        );

        match decision {
            StoppingDecision::NewBest => {
                ctx.log.record(format!("{}_best_so_far", self.channel), 1.0);
                self.checkpoint
                    .save_checkpoint(&ctx.model, &ctx.algorithm, &ctx.status)?;
                tracing::info!(
                    "New best {} = {:.6} at iteration {}, saved to '{}'",
                    self.channel,
                    value,
                    iteration,
                    self.checkpoint.dir().display()
                );
            }
            StoppingDecision::NoImprovement { count, remaining } => {
                tracing::debug!(
                    "No improvement in {} for {} windows ({} left)",
                    self.channel,
                    count,
                    remaining
                );
            }
            StoppingDecision::Stop => {
                tracing::info!(
                    "Early stopping at iteration {}: best {} = {:?} at iteration {}",
                    iteration,
                    self.channel,
                    self.tracker.best_value(),
                    self.tracker.best_iteration()
                );
                ctx.status.training_finish_requested = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::extensions::test_context;

    #[test]
    fn test_tracker_patience() {
        let mut t = BestTracker::new(2, 0.0);
        assert_eq!(t.check(1.0, 10), StoppingDecision::NewBest);
        assert_eq!(t.check(0.5, 20), StoppingDecision::NewBest);
        assert_eq!(
            t.check(0.7, 30),
            StoppingDecision::NoImprovement { count: 1, remaining: 1 }
        );
        assert_eq!(t.check(0.6, 40), StoppingDecision::Stop);
        assert_eq!(t.best_value(), Some(0.5));
        assert_eq!(t.best_iteration(), 20);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut t = BestTracker::new(2, 0.0);
        t.check(1.0, 1);
        t.check(2.0, 2);
        assert_eq!(t.check(0.9, 3), StoppingDecision::NewBest);
        assert_eq!(
            t.check(1.0, 4),
            StoppingDecision::NoImprovement { count: 1, remaining: 1 }
        );
    }

    #[test]
    fn test_min_delta() {
        let mut t = BestTracker::new(5, 0.1);
        t.check(1.0, 1);
        assert!(matches!(t.check(0.95, 2), StoppingDecision::NoImprovement { .. }));
        assert_eq!(t.check(0.85, 3), StoppingDecision::NewBest);
    }

    #[test]
    fn test_nan_is_never_best() {
        let mut t = BestTracker::new(3, 0.0);
        assert!(matches!(t.check(f64::NAN, 1), StoppingDecision::NoImprovement { .. }));
        assert_eq!(t.best_value(), None);
    }

    #[test]
    fn test_resume_keeps_configured_patience() {
        let mut saved = BestTracker::new(1, 0.0);
        saved.check(0.3, 50);
        saved.check(0.4, 60);

        let mut t = BestTracker::new(10, 0.0);
        t.resume(saved);
        assert_eq!(t.best_value(), Some(0.3));
        assert_eq!(
            t.check(0.5, 70),
            StoppingDecision::NoImprovement { count: 2, remaining: 8 }
        );
    }

    #[test]
    fn test_extension_saves_best_and_requests_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context();
        let mut ext = EarlyStopping::new(
            "valid_mse",
            1,
            CheckpointManager::new(dir.path().join("best")).unwrap(),
            10,
        );

        ctx.status.iterations_done = 10;
        ctx.log.set_iteration(10);
        ctx.log.record("valid_mse", 0.5);
        ext.run(Event::AfterBatch, &mut ctx).unwrap();
        assert_eq!(ctx.log.current_value("valid_mse_best_so_far"), Some(1.0));
        assert!(dir.path().join("best").join("status.json").exists());
        assert!(!ctx.status.training_finish_requested);

        ctx.status.iterations_done = 20;
        ctx.log.set_iteration(20);
        ctx.log.record("valid_mse", 0.6);
        ext.run(Event::AfterBatch, &mut ctx).unwrap();
        assert!(ctx.status.training_finish_requested);
        assert!(ctx.status.extension_state.contains_key("early_stopping"));
    }

    #[test]
    fn test_extension_resumes_from_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context();

        let mut saved = BestTracker::new(3, 0.0);
        saved.check(0.2, 100);
        ctx.status
            .extension_state
            .insert("early_stopping".into(), serde_json::to_value(&saved).unwrap());

        let mut ext = EarlyStopping::new(
            "valid_mse",
            3,
            CheckpointManager::new(dir.path()).unwrap(),
            10,
        );
        ext.run(Event::BeforeTraining, &mut ctx).unwrap();
        assert_eq!(ext.tracker.best_value(), Some(0.2));
    }

    #[test]
    fn test_missing_channel_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context();
        let mut ext = EarlyStopping::new(
            "valid_mse",
            1,
            CheckpointManager::new(dir.path()).unwrap(),
            10,
        );
        ctx.log.set_iteration(10);
        ext.run(Event::AfterBatch, &mut ctx).unwrap();
        assert!(!ctx.status.training_finish_requested);
        assert!(ctx.status.extension_state.is_empty());
    }
}
