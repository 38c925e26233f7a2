// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-system concerns shared by the other layers:
//
//   checkpoint.rs    — model / optimizer / loop status records
//                      plus train_config.json
//
//   metrics.rs       — one CSV row per monitoring window
//
//   signal_export.rs — input/target/output triples as CSV
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Signal triple export for plotting
pub mod signal_export;
