// ============================================================
// Layer 3 — Step-Rule Configuration
// ============================================================
// Names the optimisation algorithm and carries the
// hyperparameters the step-rule selector needs.
//
// Name mapping:
//   "adam"     → Adam
//   "rms_prop" → RMSProp
//   anything else → SGD with momentum

use serde::{Deserialize, Serialize};
use std::fmt;

/// The optimiser at the centre of a composite step rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Adam,
    RmsProp,
    Momentum,
}

impl Algorithm {
    /// Resolve an algorithm from its configuration name.
    /// Unknown names fall back to momentum SGD.
    pub fn from_name(name: &str) -> Self {
        match name {
            "adam" => Self::Adam,
            "rms_prop" => Self::RmsProp,
            "momentum" => Self::Momentum,
            other => {
                tracing::warn!("Unknown algorithm '{}', using momentum SGD", other);
                Self::Momentum
            }
        }
    }

    /// The configuration name of this algorithm
    pub fn name(&self) -> &'static str {
        match self {
            Self::Adam => "adam",
            Self::RmsProp => "rms_prop",
            Self::Momentum => "momentum",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hyperparameters of the composite step rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRuleConfig {
    pub algorithm: Algorithm,

    /// Learning rate handed to the optimiser
    pub learning_rate: f64,

    /// Momentum coefficient, only read by momentum SGD
    pub momentum: f64,

    /// L2 norm threshold of the step clipping stage
    pub clipping: f64,
}

impl Default for StepRuleConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Adam,
            learning_rate: 2e-3,
            momentum: 0.9,
            clipping: 1.0,
        }
    }
}
