// ============================================================
// Layer 4 — Signal Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<SignalSequence>
// into [batch, seq_len, features] tensors.
//
// Each SignalSequence is already stored time-major, so the
// flattened buffers of N samples concatenate straight into the
// memory layout of the 3-D tensor:
//   [s1_t1_f1, s1_t1_f2, ..., s1_tT_fF, s2_t1_f1, ...] → [N, T, F]

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::signal::SignalSequence;

// ─── SignalBatch ──────────────────────────────────────────────────────────────
/// A batch of signal windows ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct SignalBatch<B: Backend> {
    /// Input signals — shape: [batch_size, seq_len, features]
    pub inputs: Tensor<B, 3>,

    /// Lagged targets — shape: [batch_size, seq_len, features]
    pub targets: Tensor<B, 3>,
}

impl<B: Backend> SignalBatch<B> {
    /// Number of rows in this batch
    pub fn batch_size(&self) -> usize {
        self.inputs.dims()[0]
    }
}

// ─── SignalBatcher ────────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct SignalBatcher;

impl SignalBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, SignalSequence, SignalBatch<B>> for SignalBatcher {
    fn batch(&self, items: Vec<SignalSequence>, device: &B::Device) -> SignalBatch<B> {
        let batch_size = items.len();
        let (seq_len, features) = items
            .first()
            .map(|s| (s.seq_len, s.features))
            .unwrap_or((0, 0));

        let input_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.input.iter().copied())
            .collect();

        let target_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.target.iter().copied())
            .collect();

        let shape = [batch_size, seq_len, features];
        let inputs  = Tensor::<B, 3>::from_data(TensorData::new(input_flat, shape), device);
        let targets = Tensor::<B, 3>::from_data(TensorData::new(target_flat, shape), device);

        SignalBatch { inputs, targets }
    }
}
