//! Saves the latest training state at epoch boundaries and at the end.

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::main_loop::{Event, Extension, LoopContext, Schedule};

pub struct SaveCheckpoint {
    checkpoint: CheckpointManager,
    schedule:   Schedule,
}

impl SaveCheckpoint {
    pub fn new(checkpoint: CheckpointManager) -> Self {
        Self {
            checkpoint,
            schedule: Schedule::new().after_epoch().after_training(),
        }
    }
}

impl<B: AutodiffBackend> Extension<B> for SaveCheckpoint {
    fn name(&self) -> &str {
        "save_checkpoint"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        self.checkpoint
            .save_checkpoint(&ctx.model, &ctx.algorithm, &ctx.status)?;
        if event == Event::AfterTraining {
            tracing::info!("Saved final state to '{}'", self.checkpoint.dir().display());
        }
        Ok(())
    }
}
