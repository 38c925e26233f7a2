// ============================================================
// Layer 4 — Signal Dataset
// ============================================================
// Wraps a Vec<SignalSequence> in Burn's Dataset trait so the
// DataLoader can call .get(index) and .len() on it.
//
// Sample order matters here: the training stream is built
// window-major (see generator::into_windows) and must be read
// sequentially for recurrent state carry to make sense.

use burn::data::dataset::Dataset;

use crate::domain::signal::SignalSequence;

/// A Burn-compatible dataset of signal windows.
pub struct SignalDataset {
    samples: Vec<SignalSequence>,
}

impl SignalDataset {
    pub fn new(samples: Vec<SignalSequence>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Number of full batches a sequential loader yields
    pub fn full_batches(&self, batch_size: usize) -> usize {
        if batch_size == 0 { 0 } else { self.samples.len() / batch_size }
    }
}

impl Dataset<SignalSequence> for SignalDataset {
    fn get(&self, index: usize) -> Option<SignalSequence> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f32) -> SignalSequence {
        SignalSequence::new(1, 1, vec![v], vec![v])
    }

    #[test]
    fn test_get_and_len() {
        let ds = SignalDataset::new(vec![sample(1.0), sample(2.0)]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).map(|s| s.input[0]), Some(2.0));
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_full_batches() {
        let ds = SignalDataset::new((0..10).map(|i| sample(i as f32)).collect());
        assert_eq!(ds.full_batches(4), 2);
        assert_eq!(ds.full_batches(0), 0);
    }
}
