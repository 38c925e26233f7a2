// ============================================================
// Layer 4 — Lagged Signal Generator
// ============================================================
// Produces the synthetic task the network is trained on:
//
//   input[t]  = low-pass filtered uniform noise
//   target[t] = input[t - lag]     (0 for t < lag)
//
// The network can only solve this by remembering the last
// `lag` inputs, which makes it a clean memory benchmark for
// recurrent models.
//
// Streams of windows
// ──────────────────
// A recurrent model trained with carried state expects row r
// of batch k+1 to continue row r of batch k. `into_windows`
// cuts `batch_size` long signals into windows and orders them
// window-major:
//
//   [sig0.win0, sig1.win0, ..., sigB.win0, sig0.win1, ...]
//
// so a sequential loader with batch size B yields exactly
// that layout.

use anyhow::{ensure, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::{signal::SignalSequence, traits::SignalSource};

/// Shape and dynamics of the generated signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLagConfig {
    /// Number of independent signals
    pub num_signals: usize,

    /// Time steps per signal
    pub signal_len: usize,

    /// Channels per time step
    pub features: usize,

    /// Delay between input and target, in time steps
    pub lag: usize,

    /// Low-pass coefficient in [0, 1). 0 gives white noise.
    pub smoothing: f32,
}

impl Default for SignalLagConfig {
    fn default() -> Self {
        Self {
            num_signals: 1,
            signal_len:  25,
            features:    1,
            lag:         1,
            smoothing:   0.5,
        }
    }
}

/// Generate `num_signals` lagged signal pairs.
pub fn random_signal_lag<R: Rng>(cfg: &SignalLagConfig, rng: &mut R) -> Vec<SignalSequence> {
    (0..cfg.num_signals)
        .map(|_| one_signal(cfg, rng))
        .collect()
}

fn one_signal<R: Rng>(cfg: &SignalLagConfig, rng: &mut R) -> SignalSequence {
    let f = cfg.features;
    let mut input = vec![0.0f32; cfg.signal_len * f];
    let mut prev  = vec![0.0f32; f];

    for t in 0..cfg.signal_len {
        for c in 0..f {
            let noise: f32 = rng.gen_range(-1.0..1.0);
            let x = cfg.smoothing * prev[c] + (1.0 - cfg.smoothing) * noise;
            input[t * f + c] = x;
            prev[c] = x;
        }
    }

    let mut target = vec![0.0f32; cfg.signal_len * f];
    for t in cfg.lag..cfg.signal_len {
        let src = (t - cfg.lag) * f;
        target[t * f..(t + 1) * f].copy_from_slice(&input[src..src + f]);
    }

    SignalSequence::new(cfg.signal_len, f, input, target)
}

/// Cut long signals into consecutive windows of `seq_len`, window-major.
/// A trailing remainder shorter than `seq_len` is dropped.
pub fn into_windows(signals: &[SignalSequence], seq_len: usize) -> Vec<SignalSequence> {
    let Some(shortest) = signals.iter().map(|s| s.seq_len).min() else {
        return Vec::new();
    };
    if seq_len == 0 {
        return Vec::new();
    }
    let num_windows = shortest / seq_len;

    (0..num_windows)
        .flat_map(|w| signals.iter().map(move |s| s.window(w * seq_len, seq_len)))
        .collect()
}

// ─── LagSignalGenerator ───────────────────────────────────────────────────────
/// Seeded `SignalSource` over `random_signal_lag`.
pub struct LagSignalGenerator {
    config: SignalLagConfig,
    seed:   u64,
}

impl LagSignalGenerator {
    pub fn new(config: SignalLagConfig, seed: u64) -> Self {
        Self { config, seed }
    }
}

impl SignalSource for LagSignalGenerator {
    fn sequences(&self) -> Result<Vec<SignalSequence>> {
        let cfg = &self.config;
        ensure!(cfg.features > 0, "signals need at least one feature");
        ensure!(
            cfg.lag < cfg.signal_len,
            "lag ({}) must be shorter than the signal ({} steps)",
            cfg.lag,
            cfg.signal_len
        );
        ensure!(
            (0.0..1.0).contains(&cfg.smoothing),
            "smoothing must be in [0, 1), got {}",
            cfg.smoothing
        );

        let mut rng = StdRng::seed_from_u64(self.seed);
        let signals = random_signal_lag(cfg, &mut rng);
        tracing::debug!(
            "Generated {} signals of {} steps (lag {})",
            signals.len(),
            cfg.signal_len,
            cfg.lag
        );
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(lag: usize) -> SignalLagConfig {
        SignalLagConfig {
            num_signals: 3,
            signal_len:  40,
            features:    2,
            lag,
            smoothing:   0.3,
        }
    }

    #[test]
    fn test_target_is_lagged_input() {
        let mut rng = StdRng::seed_from_u64(7);
        for s in random_signal_lag(&cfg(4), &mut rng) {
            for t in 0..s.seq_len {
                for f in 0..s.features {
                    let expected = if t < 4 { 0.0 } else { s.input_at(t - 4, f) };
                    assert_eq!(s.target_at(t, f), expected);
                }
            }
        }
    }

    #[test]
    fn test_zero_lag_copies_input() {
        let mut rng = StdRng::seed_from_u64(1);
        let s = &random_signal_lag(&cfg(0), &mut rng)[0];
        assert_eq!(s.input, s.target);
    }

    #[test]
    fn test_values_stay_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for s in random_signal_lag(&cfg(2), &mut rng) {
            assert!(s.input.iter().all(|x| (-1.0..=1.0).contains(x)));
        }
    }

    #[test]
    fn test_generator_is_deterministic_per_seed() {
        let a = LagSignalGenerator::new(cfg(2), 42).sequences().unwrap();
        let b = LagSignalGenerator::new(cfg(2), 42).sequences().unwrap();
        let c = LagSignalGenerator::new(cfg(2), 43).sequences().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generator_rejects_lag_longer_than_signal() {
        assert!(LagSignalGenerator::new(cfg(40), 0).sequences().is_err());
    }

    #[test]
    fn test_windows_are_window_major_and_contiguous() {
        let mut rng = StdRng::seed_from_u64(5);
        let signals = random_signal_lag(&cfg(1), &mut rng);
        let windows = into_windows(&signals, 15);

        // 40 / 15 = 2 full windows per signal, remainder dropped
        assert_eq!(windows.len(), 2 * signals.len());

        // Second batch, row 1 continues first batch, row 1
        let first  = &windows[1];
        let second = &windows[signals.len() + 1];
        assert_eq!(first.input_at(0, 0), signals[1].input_at(0, 0));
        assert_eq!(second.input_at(0, 0), signals[1].input_at(15, 0));
    }

    #[test]
    fn test_windows_of_empty_set() {
        assert!(into_windows(&[], 10).is_empty());
    }
}
