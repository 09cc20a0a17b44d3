use std::f64::consts::{FRAC_PI_4, PI, TAU};

use serde::{Deserialize, Serialize};

/// Strategy for removing 2π jumps from a measured phase before fitting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseUnwrap {
    /// Leave the wrapped phase alone.
    None,
    /// Subtract 2π from every sample above π/4.
    Threshold,
    /// Classic sequential unwrap, correcting jumps of at least `discont`.
    Standard { discont: f64 },
}

impl Default for PhaseUnwrap {
    fn default() -> Self {
        PhaseUnwrap::Threshold
    }
}

impl PhaseUnwrap {
    pub fn standard() -> Self {
        PhaseUnwrap::Standard { discont: 1.4 * PI }
    }

    pub fn apply(self, phase: &[f64]) -> Vec<f64> {
        match self {
            PhaseUnwrap::None => phase.to_vec(),
            PhaseUnwrap::Threshold => phase
                .iter()
                .map(|&p| if p > FRAC_PI_4 { p - TAU } else { p })
                .collect(),
            PhaseUnwrap::Standard { discont } => unwrap(phase, discont),
        }
    }
}

/// Sequential unwrap: steps whose magnitude reaches `discont` are folded
/// back into [-π, π) and the correction carried forward.
pub fn unwrap(phase: &[f64], discont: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut correction = 0.0;
    for (i, &p) in phase.iter().enumerate() {
        if i > 0 {
            let step = p - phase[i - 1];
            let mut folded = (step + PI).rem_euclid(TAU) - PI;
            if folded == -PI && step > 0.0 {
                folded = PI;
            }
            if step.abs() >= discont {
                correction += folded - step;
            }
        }
        out.push(p + correction);
    }
    out
}

/// Replaces NaN/inf samples with the previous finite value (or the first
/// finite one for a leading run).
pub fn fill_non_finite(values: &[f64]) -> Vec<f64> {
    let first = values.iter().copied().find(|v| v.is_finite()).unwrap_or(0.0);
    let mut last = first;
    values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                last = v;
            }
            last
        })
        .collect()
}
