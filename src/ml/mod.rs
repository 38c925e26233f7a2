// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn training code lives here:
//
//   model.rs       — stacked LSTM + linear readout, MSE cost
//   step_rule.rs   — composite step rules around burn::optim
//   main_loop.rs   — batch/epoch driver with extension events
//   extensions/    — monitoring, early stopping, state reset, ...
//   trainer.rs     — wires everything into one training run
//   inferencer.rs  — loads a checkpoint and predicts a sequence

pub mod model;

pub mod step_rule;

pub mod main_loop;

pub mod extensions;

pub mod trainer;

pub mod inferencer;
