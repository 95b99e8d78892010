//! The five fixed workflow stages and their progress bands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One phase of the merge workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// Inputs exist, are readable and parse as PDF.
    Validation,
    /// Output directory is writable; input sizes are summed.
    Preparation,
    /// Encrypted inputs are unlocked with known passwords.
    Decryption,
    /// The selected strategy produces the output.
    Merging,
    /// The output is validated and scratch files are swept.
    Finalization,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Validation,
        Stage::Preparation,
        Stage::Decryption,
        Stage::Merging,
        Stage::Finalization,
    ];

    /// Stage name as shown in progress lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::Preparation => "Preparation",
            Self::Decryption => "Decryption",
            Self::Merging => "Merging",
            Self::Finalization => "Finalization",
        }
    }

    /// 1-based position in the pipeline.
    pub fn step(&self) -> usize {
        match self {
            Self::Validation => 1,
            Self::Preparation => 2,
            Self::Decryption => 3,
            Self::Merging => 4,
            Self::Finalization => 5,
        }
    }

    /// Fraction range of overall progress owned by this stage.
    pub fn band(&self) -> (f64, f64) {
        match self {
            Self::Validation => (0.0, 0.2),
            Self::Preparation => (0.2, 0.3),
            Self::Decryption => (0.3, 0.4),
            Self::Merging => (0.4, 0.9),
            Self::Finalization => (0.9, 1.0),
        }
    }

    /// Map a within-stage fraction onto overall progress.
    ///
    /// `within` is clamped to `[0, 1]`.
    pub fn fraction(&self, within: f64) -> f64 {
        let within = if within.is_nan() { 0.0 } else { within.clamp(0.0, 1.0) };
        let (start, end) = self.band();
        start + (end - start) * within
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
