// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from random numbers to tensor batches:
//
//   random_signal_lag  → long lagged signals, one per batch row
//       │
//       ▼
//   into_windows       → cut into seq_len windows, window-major
//       │
//       ▼
//   SignalDataset      → implements Burn's Dataset trait
//       │
//       ▼
//   SignalBatcher      → stacks windows into [batch, seq_len, features]
//       │
//       ▼
//   DataLoader         → feeds batches to the main loop in order
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Synthetic lagged-signal generator
pub mod generator;

/// Implements Burn's Dataset trait for signal windows
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
