use std::f64::consts::{PI, TAU};

use log::debug;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::FitConfig;
use crate::fit::least_squares::levenberg_marquardt;
use crate::fit::FitError;
use crate::transfer::freq_map::nearest_index;
use crate::types::Axis;

/// Below this the measured magnitude peak is not trusted as a resonance.
const MIN_PLAUSIBLE_PEAK_HZ: f64 = 100.0;
const PEAK_WEIGHT_VARIANCE_HZ2: f64 = 50.0;
const PEAK_WEIGHT_FAC: f64 = -0.7;
const PEAK_DEWEIGHT_FAC: f64 = 1.0;

/// Magnitude of a driven damped harmonic oscillator. All three frequencies
/// are in Hz; the damping enters as γ = 2π·g.
pub fn damped_osc_amp(freq_hz: f64, amplitude: f64, resonance_hz: f64, damping_hz: f64) -> f64 {
    let w = TAU * freq_hz;
    let w0 = TAU * resonance_hz;
    let gamma = TAU * damping_hz;
    amplitude / ((w0 * w0 - w * w).powi(2) + (w * gamma).powi(2)).sqrt()
}

pub fn damped_osc_phase(
    freq_hz: f64,
    resonance_hz: f64,
    damping_hz: f64,
    phase_offset: f64,
) -> f64 {
    let w = TAU * freq_hz;
    let w0 = TAU * resonance_hz;
    let gamma = TAU * damping_hz;
    (-w * gamma).atan2(w0 * w0 - w * w) + phase_offset
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DampedOscillator {
    pub amplitude: f64,
    pub resonance_hz: f64,
    pub damping_hz: f64,
    /// Multiple of π matched to the low-frequency phase.
    pub phase_offset: f64,
}

impl DampedOscillator {
    pub fn magnitude(&self, freq_hz: f64) -> f64 {
        damped_osc_amp(freq_hz, self.amplitude, self.resonance_hz, self.damping_hz)
    }

    pub fn phase(&self, freq_hz: f64) -> f64 {
        damped_osc_phase(freq_hz, self.resonance_hz, self.damping_hz, self.phase_offset)
    }

    pub fn response(&self, freq_hz: f64) -> Complex64 {
        Complex64::from_polar(self.magnitude(freq_hz), self.phase(freq_hz))
    }

    /// Fits the magnitude of one matrix element.
    ///
    /// `freqs`, `magnitude` and `phase` cover every key; the fit itself only
    /// sees samples inside the configured band. `phase` should already be
    /// unwrapped the way the caller wants the offset matched.
    pub fn fit(
        freqs: &[f64],
        magnitude: &[f64],
        phase: &[f64],
        response: usize,
        drive: usize,
        config: &FitConfig,
    ) -> Result<Self, FitError> {
        let [lo, hi] = config.band_hz;
        let band: Vec<usize> = (0..freqs.len())
            .filter(|&i| freqs[i] >= lo && freqs[i] <= hi)
            .collect();
        if band.len() < 3 {
            return Err(FitError::InsufficientData {
                needed: 3,
                got: band.len(),
            });
        }
        let keys: Vec<f64> = band.iter().map(|&i| freqs[i]).collect();
        let mag: Vec<f64> = band.iter().map(|&i| magnitude[i]).collect();
        let unphase: Vec<f64> = band.iter().map(|&i| phase[i]).collect();

        let peak_index = magnitude
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let mut fpeak = freqs[peak_index];
        if fpeak < MIN_PLAUSIBLE_PEAK_HZ {
            fpeak = config.default_peaks_hz[response.min(config.default_peaks_hz.len() - 1)];
        }
        let z = Axis::Z.index();
        let damping0 = if response == z || drive == z {
            2.0 * fpeak
        } else {
            0.15 * fpeak
        };
        let w_peak2 = (TAU * fpeak).powi(2);
        let low_end = nearest_index(&keys, MIN_PLAUSIBLE_PEAK_HZ).unwrap_or(0).max(1);
        let amp0 = mag[..low_end].iter().sum::<f64>() / low_end as f64 * w_peak2;

        let sigma = weights(&keys, fpeak, amp0 / w_peak2, config);
        let phase_offset = phase_offset(&keys, &unphase);
        debug!(
            "fitting ({response}, {drive}) from A = {amp0:.3e}, f0 = {fpeak:.1} Hz, \
             g = {damping0:.1} Hz"
        );

        let solution = levenberg_marquardt(
            |f, p: &[f64; 3]| damped_osc_amp(f, p[0], p[1], p[2]),
            &keys,
            &mag,
            &sigma,
            [amp0, fpeak, damping0],
            &config.solver,
        )?;
        let [amplitude, resonance_hz, damping_hz] = solution.params;
        if !solution.params.iter().all(|p| p.is_finite()) {
            return Err(FitError::NonFinite);
        }
        if resonance_hz <= 0.0 || damping_hz < 0.0 || amplitude < 0.0 {
            return Err(FitError::ImplausibleParameters {
                resonance_hz,
                damping_hz,
            });
        }
        Ok(Self {
            amplitude,
            resonance_hz,
            damping_hz,
            phase_offset,
        })
    }
}

/// Residual scale per band sample.
fn weights(keys: &[f64], fpeak: f64, scale: f64, config: &FitConfig) -> Vec<f64> {
    let opts = &config.weighting;
    let mut w = vec![1.0; keys.len()];
    let peak_fac = if opts.weight_peak {
        Some(PEAK_WEIGHT_FAC)
    } else if opts.deweight_peak {
        Some(PEAK_DEWEIGHT_FAC)
    } else {
        None
    };
    if let Some(fac) = peak_fac {
        for (wi, &k) in w.iter_mut().zip(keys) {
            *wi += fac * (-(k - fpeak).powi(2) / (2.0 * PEAK_WEIGHT_VARIANCE_HZ2)).exp();
        }
    }
    if opts.weight_lowf {
        let cut = nearest_index(keys, opts.lowf_thresh_hz).unwrap_or(0);
        for wi in &mut w[..cut] {
            *wi *= opts.lowf_weight_fac;
        }
    }
    let scale = if scale.is_finite() && scale != 0.0 {
        scale.abs()
    } else {
        1.0
    };
    w.iter_mut().for_each(|wi| *wi *= scale);
    w
}

/// Multiple of π (0, +π or −π) closest to the mean phase between 10 and 100 Hz.
fn phase_offset(keys: &[f64], unphase: &[f64]) -> f64 {
    let start = nearest_index(keys, 10.0).unwrap_or(0);
    let end = nearest_index(keys, MIN_PLAUSIBLE_PEAK_HZ)
        .unwrap_or(0)
        .max(start + 1)
        .min(unphase.len());
    let window = &unphase[start.min(end)..end];
    if window.is_empty() {
        return 0.0;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    [0.0, 1.0, -1.0]
        .into_iter()
        .min_by(|a, b| (mean - PI * a).abs().total_cmp(&(mean - PI * b).abs()))
        .map_or(0.0, |m| PI * m)
}
