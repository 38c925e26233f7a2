//! Restores a run from a checkpoint directory before training starts.

use std::path::PathBuf;

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::main_loop::{Event, Extension, LoopContext, Schedule};

pub struct Load {
    path: PathBuf,
    /// Also restore iteration counters and extension state
    load_iteration_states: bool,
    schedule: Schedule,
}

impl Load {
    pub fn new(path: impl Into<PathBuf>, load_iteration_states: bool) -> Self {
        Self {
            path: path.into(),
            load_iteration_states,
            schedule: Schedule::new().before_training(),
        }
    }
}

impl<B: AutodiffBackend> Extension<B> for Load {
    fn name(&self) -> &str {
        "load"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, _event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        let ckpt = CheckpointManager::open(&self.path)?;
        ctx.model = ckpt.load_model(ctx.model.clone(), &ctx.device)?;

        if ckpt.has_optimizer_state::<B>() {
            ckpt.load_optimizer(&mut ctx.algorithm, &ctx.device)?;
        } else {
            tracing::warn!(
                "No optimizer state in '{}', starting with fresh moments",
                self.path.display()
            );
        }

        if self.load_iteration_states {
            if let Some(mut status) = ckpt.load_status()? {
                // A checkpoint written at early stopping would end the run at once
                status.training_finish_requested = false;
                status.epoch_started = false;
                ctx.status = status;
                ctx.log.set_iteration(ctx.status.iterations_done);
            }
        }

        tracing::info!(
            "Loaded checkpoint '{}' (iteration {}, epoch {})",
            self.path.display(),
            ctx.status.iterations_done,
            ctx.status.epochs_done
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::algorithm::{Algorithm, StepRuleConfig};
    use crate::ml::extensions::{test_context, test_context_with, TestBackend};
    use crate::ml::main_loop::{LoopContext, LoopStatus};
    use burn::optim::GradientsParams;
    use burn::prelude::*;

    fn momentum_rule() -> StepRuleConfig {
        StepRuleConfig {
            algorithm: Algorithm::Momentum,
            clipping: 1e6,
            ..Default::default()
        }
    }

    /// One step on a fixed batch; returns the squared change of the readout weights.
    fn train_step(ctx: &mut LoopContext<TestBackend>) -> f64 {
        let inputs = Tensor::<TestBackend, 3>::ones([2, 3, 1], &ctx.device);
        let targets = Tensor::<TestBackend, 3>::zeros([2, 3, 1], &ctx.device);
        let before = ctx.model.readout.weight.val().inner();

        let out = ctx.model.forward_cost(inputs, targets, None, 0.0);
        let grads = GradientsParams::from_grads(out.cost.backward(), &ctx.model);
        let (model, _) = ctx.algorithm.step(ctx.model.clone(), grads).unwrap();
        ctx.model = model;

        let delta = ctx.model.readout.weight.val().inner() - before;
        (delta.clone() * delta).sum().into_scalar().elem::<f64>()
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context();
        let mut ext = Load::new(dir.path().join("missing"), true);
        assert!(ext.run(Event::BeforeTraining, &mut ctx).is_err());
    }

    #[test]
    fn test_restores_status() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let saved = LoopStatus {
            iterations_done: 300,
            epochs_done: 3,
            training_finish_requested: true,
            ..Default::default()
        };
        ckpt.save_checkpoint(&ctx.model, &ctx.algorithm, &saved).unwrap();

        let mut ctx = test_context();
        Load::new(dir.path(), true)
            .run(Event::BeforeTraining, &mut ctx)
            .unwrap();
        assert_eq!(ctx.status.iterations_done, 300);
        assert_eq!(ctx.status.epochs_done, 3);
        assert!(!ctx.status.training_finish_requested);
        assert_eq!(ctx.log.iteration(), 300);
    }

    #[test]
    fn test_resumed_momentum_keeps_velocity() {
        let dir = tempfile::tempdir().unwrap();
        let mut trained = test_context_with(&momentum_rule());
        train_step(&mut trained);
        CheckpointManager::new(dir.path())
            .unwrap()
            .save_checkpoint(&trained.model, &trained.algorithm, &trained.status)
            .unwrap();

        let mut resumed = test_context_with(&momentum_rule());
        Load::new(dir.path(), true)
            .run(Event::BeforeTraining, &mut resumed)
            .unwrap();

        // Same weights, fresh optimizer
        let mut restarted = test_context_with(&momentum_rule());
        restarted.model = CheckpointManager::open(dir.path())
            .unwrap()
            .load_model(restarted.model.clone(), &restarted.device)
            .unwrap();

        let with_velocity = train_step(&mut resumed);
        let without_velocity = train_step(&mut restarted);
        // With momentum 0.9 the carried velocity nearly doubles the step
        assert!(
            with_velocity > 2.0 * without_velocity,
            "resumed step {with_velocity} vs fresh step {without_velocity}"
        );
    }

    #[test]
    fn test_weights_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        ckpt.save_model(&ctx.model).unwrap();

        let mut ctx = test_context();
        Load::new(dir.path(), true)
            .run(Event::BeforeTraining, &mut ctx)
            .unwrap();
        assert_eq!(ctx.status, LoopStatus::default());
    }
}
