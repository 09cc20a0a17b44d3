use log::info;
use rustfft::num_complex::Complex64;

use crate::config::CalibrationConfig;
use crate::transfer::freq_map::{FrequencyMap, KEY_RESOLUTION_HZ};
use crate::transfer::matrix::ComplexMatrix;
use crate::transfer::TransferError;
use crate::types::{ELEMENTARY_CHARGE, NUM_AXES};

/// A transfer function rescaled to volts per newton.
#[derive(Clone, Debug)]
pub struct ChargeCalibration {
    pub matrices: FrequencyMap<ComplexMatrix>,
    /// Key used in place of the step frequency.
    pub reference_freq_hz: f64,
    pub reference_magnitude: f64,
    /// Mean reference magnitude over the keys below the step frequency.
    pub mean_low_freq_response: Option<f64>,
    pub implied_charge_coulombs: f64,
    pub implied_charge_e: f64,
}

/// Converts volts/volts transfer matrices to volts/newton using a
/// single-charge step measurement on one channel.
#[derive(Clone, Debug)]
pub struct ChargeStepCalibrator {
    reference_channel: usize,
    step_freq_hz: f64,
    negative_charge: bool,
}

impl ChargeStepCalibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            reference_channel: config.reference_channel,
            step_freq_hz: config.step_freq_hz,
            negative_charge: config.negative_charge,
        }
    }

    pub fn calibrate(
        &self,
        h: &FrequencyMap<ComplexMatrix>,
        volts_per_newton: f64,
    ) -> Result<ChargeCalibration, TransferError> {
        if !volts_per_newton.is_finite() || volts_per_newton == 0.0 {
            return Err(TransferError::InvalidVoltsPerNewton(volts_per_newton));
        }
        let j = self.reference_channel;
        if j >= NUM_AXES {
            return Err(TransferError::InvalidChannel(j));
        }
        let (reference_freq_hz, reference) = self.reference_entry(h)?;
        let reference_magnitude = reference[[j, j]].norm();

        let below: Vec<f64> = h
            .iter()
            .take_while(|(f, _)| *f < reference_freq_hz)
            .map(|(_, m)| m[[j, j]].norm())
            .collect();
        let mean_low_freq_response =
            (!below.is_empty()).then(|| below.iter().sum::<f64>() / below.len() as f64);

        let mut charge = reference_magnitude / volts_per_newton;
        if self.negative_charge {
            charge = -charge;
        }
        if charge == 0.0 || !charge.is_finite() {
            return Err(TransferError::InvalidVoltsPerNewton(volts_per_newton));
        }
        let implied_charge_e = charge / ELEMENTARY_CHARGE;
        info!(
            "charge-step calibration implies {implied_charge_e:.2} e \
             during the transfer function measurement"
        );

        let scale = Complex64::new(1.0 / charge, 0.0);
        let matrices = h.map_values(|_, m| m.mapv(|z| z * scale));
        Ok(ChargeCalibration {
            matrices,
            reference_freq_hz,
            reference_magnitude,
            mean_low_freq_response,
            implied_charge_coulombs: charge,
            implied_charge_e,
        })
    }

    /// Nearest key to the step frequency, refusing keys that do not cover it.
    fn reference_entry<'a>(
        &self,
        h: &'a FrequencyMap<ComplexMatrix>,
    ) -> Result<(f64, &'a ComplexMatrix), TransferError> {
        let (nearest, matrix) = h
            .nearest(self.step_freq_hz)
            .ok_or(TransferError::EmptyTransferMatrix)?;
        let freqs = h.frequencies();
        let (first, last) = (freqs[0], freqs[freqs.len() - 1]);
        let tolerance = if freqs.len() > 1 {
            0.5 * (last - first) / (freqs.len() - 1) as f64
        } else {
            KEY_RESOLUTION_HZ
        };
        let bracketed = first <= self.step_freq_hz && self.step_freq_hz <= last;
        if !bracketed && (nearest - self.step_freq_hz).abs() > tolerance {
            return Err(TransferError::StepFrequencyOutOfRange {
                requested: self.step_freq_hz,
                nearest,
            });
        }
        Ok((nearest, matrix))
    }
}
