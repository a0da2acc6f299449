//! Perturbation size metrics.

use serde::{Deserialize, Serialize};

/// How far a candidate is from the original input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Mean of squared differences
    #[default]
    MeanSquaredError,
    /// Mean of absolute differences
    MeanAbsoluteError,
    /// Largest absolute difference
    Linf,
    /// Fraction of elements that differ
    L0,
}

impl Distance {
    pub fn name(self) -> &'static str {
        match self {
            Distance::MeanSquaredError => "mean_squared_error",
            Distance::MeanAbsoluteError => "mean_absolute_error",
            Distance::Linf => "linf",
            Distance::L0 => "l0",
        }
    }

    /// Distance between two equally long buffers. Empty buffers are at distance 0.
    ///
    /// Computed in `f64` so that small perturbations of `f32` inputs do not
    /// round away.
    pub fn measure(self, original: &[f32], candidate: &[f32]) -> f64 {
        debug_assert_eq!(original.len(), candidate.len());
        if original.is_empty() {
            return 0.0;
        }
        let n = original.len() as f64;
        let diffs = original
            .iter()
            .zip(candidate)
            .map(|(&a, &b)| f64::from(b) - f64::from(a));

        match self {
            Distance::MeanSquaredError => diffs.map(|d| d * d).sum::<f64>() / n,
            Distance::MeanAbsoluteError => diffs.map(f64::abs).sum::<f64>() / n,
            Distance::Linf => diffs.map(f64::abs).fold(0.0, f64::max),
            Distance::L0 => diffs.filter(|d| *d != 0.0).count() as f64 / n,
        }
    }
}
