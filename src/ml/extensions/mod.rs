// ============================================================
// Layer 5 — Training Extensions
// ============================================================
// Everything the main loop does besides forward/backward/step:
//
//   Load                    restore a checkpoint before training
//   TrainingDataMonitoring  window means of the batch channels
//   DataStreamMonitoring    validation cost and MSE
//   EarlyStopping           best checkpoint + patience
//   ResetStates             drop the carried hidden state
//   SaveCheckpoint          latest state per epoch
//   Printing / ProgressBar / MetricsCsv

pub mod checkpointing;
pub mod early_stopping;
pub mod load;
pub mod monitoring;
pub mod reporting;
pub mod reset_states;

pub use checkpointing::SaveCheckpoint;
pub use early_stopping::EarlyStopping;
pub use load::Load;
pub use monitoring::{DataStreamMonitoring, TrainingDataMonitoring};
pub use reporting::{MetricsCsv, Printing, ProgressBar};
pub use reset_states::ResetStates;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// Small untrained context shared by the extension tests
#[cfg(test)]
pub(crate) fn test_context() -> crate::ml::main_loop::LoopContext<TestBackend> {
    test_context_with(&crate::domain::algorithm::StepRuleConfig::default())
}

#[cfg(test)]
pub(crate) fn test_context_with(
    step_rule: &crate::domain::algorithm::StepRuleConfig,
) -> crate::ml::main_loop::LoopContext<TestBackend> {
    use crate::ml::main_loop::{LoopContext, LoopStatus, TrainingLog};
    use crate::ml::model::SignalRnnConfig;
    use crate::ml::step_rule::learning_algorithm;

    let device = Default::default();
    LoopContext {
        model: SignalRnnConfig::new(1, 4).init(&device),
        algorithm: learning_algorithm(step_rule).unwrap(),
        state: None,
        status: LoopStatus::default(),
        log: TrainingLog::default(),
        device,
        batches_per_epoch: None,
        weight_decay: 0.0,
    }
}
