// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer asks for sequences through a trait so
// the synthetic generator can be swapped for recorded signals
// without touching the training workflow.

use anyhow::Result;
use crate::domain::signal::SignalSequence;

// ─── SignalSource ─────────────────────────────────────────────────────────────
/// Any component that can produce signal sequences.
///
/// Implementations:
///   - LagSignalGenerator → synthetic lagged noise
pub trait SignalSource {
    /// Produce all sequences of this source.
    fn sequences(&self) -> Result<Vec<SignalSequence>>;
}
