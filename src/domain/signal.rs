// ============================================================
// Layer 3 — SignalSequence Domain Type
// ============================================================
// One sequence of the lagged-signal task:
//   - `input`  is a multi-channel signal x[t][f]
//   - `target` is the same signal delayed by `lag` steps
//
// Both buffers are stored row-major, time first:
//   [x(0,0), x(0,1), ..., x(0,F-1), x(1,0), ...]
// which is exactly the memory layout of a [seq_len, features]
// tensor, so the batcher can copy it without reordering.

use serde::{Deserialize, Serialize};

/// An input signal and the target the network must reproduce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSequence {
    /// Number of time steps
    pub seq_len: usize,

    /// Number of channels per time step
    pub features: usize,

    /// Input values, row-major [seq_len, features]
    pub input: Vec<f32>,

    /// Target values, row-major [seq_len, features]
    pub target: Vec<f32>,
}

impl SignalSequence {
    /// Create a new sequence.
    ///
    /// Both buffers must hold exactly `seq_len * features` values.
    pub fn new(seq_len: usize, features: usize, input: Vec<f32>, target: Vec<f32>) -> Self {
        debug_assert_eq!(input.len(), seq_len * features);
        debug_assert_eq!(target.len(), seq_len * features);
        Self { seq_len, features, input, target }
    }

    /// Input value at time `t`, channel `f`
    pub fn input_at(&self, t: usize, f: usize) -> f32 {
        self.input[t * self.features + f]
    }

    /// Target value at time `t`, channel `f`
    pub fn target_at(&self, t: usize, f: usize) -> f32 {
        self.target[t * self.features + f]
    }

    /// Cut out the time window `[start, start + len)` as a new sequence.
    pub fn window(&self, start: usize, len: usize) -> Self {
        let lo = start * self.features;
        let hi = (start + len) * self.features;
        Self::new(
            len,
            self.features,
            self.input[lo..hi].to_vec(),
            self.target[lo..hi].to_vec(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channel() -> SignalSequence {
        // t=0: (1, 10)  t=1: (2, 20)  t=2: (3, 30)
        SignalSequence::new(
            3,
            2,
            vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0],
            vec![0.0, 0.0, 1.0, 10.0, 2.0, 20.0],
        )
    }

    #[test]
    fn test_indexing() {
        let s = two_channel();
        assert_eq!(s.input_at(2, 1), 30.0);
        assert_eq!(s.target_at(1, 0), 1.0);
    }

    #[test]
    fn test_window() {
        let w = two_channel().window(1, 2);
        assert_eq!(w.seq_len, 2);
        assert_eq!(w.input, vec![2.0, 20.0, 3.0, 30.0]);
        assert_eq!(w.target, vec![1.0, 10.0, 2.0, 20.0]);
    }
}
