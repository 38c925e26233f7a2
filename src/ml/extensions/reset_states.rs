//! Periodic reset of the carried recurrent state.

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;

use crate::ml::main_loop::{Event, Extension, LoopContext, Schedule};

/// Drops the hidden state carried between batches every `n` batches
/// and at every epoch boundary, where the training stream restarts.
pub struct ResetStates {
    schedule: Schedule,
}

impl ResetStates {
    pub fn new(every_n_batches: usize) -> Self {
        Self {
            schedule: Schedule::new().every_n_batches(every_n_batches).after_epoch(),
        }
    }
}

impl<B: AutodiffBackend> Extension<B> for ResetStates {
    fn name(&self) -> &str {
        "reset_states"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        if ctx.state.take().is_some() {
            if event == Event::AfterBatch {
                ctx.log.record("states_reset", 1.0);
            }
            tracing::debug!("Reset recurrent state at iteration {}", ctx.status.iterations_done);
        }
        Ok(())
    }
}
