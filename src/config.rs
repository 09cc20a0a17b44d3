// src/config.rs
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fit::{FitMode, PhaseUnwrap};
use crate::transfer::{ElectrodeMap, NoiseShift, TransferError};
use crate::types::NUM_AXES;

/// Everything the transfer-function build reads from its environment.
///
/// Constructed once (usually from a JSON file) and passed by reference to
/// each stage. Missing sections and fields take the defaults below.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detection: DetectionConfig,
    pub matrix: MatrixConfig,
    pub calibration: CalibrationConfig,
    pub fit: FitConfig,
    pub electrodes: ElectrodeMap,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Fraction of the peak drive power a bin must exceed.
    pub relative_threshold: f64,
    /// Bins at or below this frequency are ignored (DC and drift).
    pub min_freq_hz: f64,
    /// Interference lines whose bins are never used.
    pub line_freqs_hz: Vec<f64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            relative_threshold: 0.1,
            min_freq_hz: 1.0,
            line_freqs_hz: vec![60.0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Drop detected bins that break the drive comb spacing.
    pub drop_bad_bins: bool,
    pub noise_shift: NoiseShift,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            drop_bad_bins: true,
            noise_shift: NoiseShift::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Response/drive channel the step calibration was measured on.
    pub reference_channel: usize,
    pub step_freq_hz: f64,
    pub negative_charge: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reference_channel: 0,
            step_freq_hz: 41.0,
            negative_charge: true,
        }
    }
}

/// Optional reshaping of the magnitude residual weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitWeighting {
    pub weight_peak: bool,
    pub deweight_peak: bool,
    pub weight_lowf: bool,
    pub lowf_weight_fac: f64,
    pub lowf_thresh_hz: f64,
}

impl Default for FitWeighting {
    fn default() -> Self {
        Self {
            weight_peak: false,
            deweight_peak: false,
            weight_lowf: false,
            lowf_weight_fac: 0.1,
            lowf_thresh_hz: 120.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Relative change in cost below which the fit is converged.
    pub tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            tolerance: 1e-12,
        }
    }
}

/// Samples used to fit the extrapolation beyond each end of the fit band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrapolationPoints {
    pub lower: usize,
    /// Lower-side count for the z-z element, whose low end is sparse.
    pub lower_z_drive: usize,
    pub upper_magnitude: usize,
    pub upper_phase: usize,
}

impl Default for ExtrapolationPoints {
    fn default() -> Self {
        Self {
            lower: 10,
            lower_z_drive: 4,
            upper_magnitude: 30,
            upper_phase: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub band_hz: [f64; 2],
    /// Resonance guesses per response axis when the measured peak is implausible.
    pub default_peaks_hz: [f64; NUM_AXES],
    pub modes: [[FitMode; NUM_AXES]; NUM_AXES], // response x drive
    pub phase_unwrap: PhaseUnwrap,
    pub weighting: FitWeighting,
    pub solver: SolverOptions,
    pub extrapolation: ExtrapolationPoints,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            band_hz: [10.0, 600.0],
            default_peaks_hz: [400.0, 400.0, 200.0],
            modes: FitMode::default_layout(),
            phase_unwrap: PhaseUnwrap::default(),
            weighting: FitWeighting::default(),
            solver: SolverOptions::default(),
            extrapolation: ExtrapolationPoints::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TransferError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, TransferError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        let invalid = |msg: String| Err(TransferError::InvalidConfig(msg));
        let det = &self.detection;
        if !(det.relative_threshold > 0.0 && det.relative_threshold <= 1.0) {
            return invalid(format!(
                "relative_threshold must be in (0, 1], got {}",
                det.relative_threshold
            ));
        }
        if !(det.min_freq_hz >= 0.0) {
            return invalid(format!("min_freq_hz must be >= 0, got {}", det.min_freq_hz));
        }
        let cal = &self.calibration;
        if cal.reference_channel >= NUM_AXES {
            return invalid(format!(
                "reference_channel must be below {NUM_AXES}, got {}",
                cal.reference_channel
            ));
        }
        if !(cal.step_freq_hz > 0.0) {
            return invalid(format!("step_freq_hz must be positive, got {}", cal.step_freq_hz));
        }
        let fit = &self.fit;
        let [lo, hi] = fit.band_hz;
        if !(lo >= 0.0 && hi > lo) {
            return invalid(format!("fit band [{lo}, {hi}] is empty"));
        }
        if fit.default_peaks_hz.iter().any(|f| !(*f > 0.0)) {
            return invalid("default_peaks_hz must all be positive".into());
        }
        if !(fit.weighting.lowf_weight_fac > 0.0) {
            return invalid("lowf_weight_fac must be positive".into());
        }
        if fit.solver.max_iterations == 0 {
            return invalid("solver.max_iterations must be at least 1".into());
        }
        let ext = &fit.extrapolation;
        if [ext.lower, ext.lower_z_drive, ext.upper_magnitude, ext.upper_phase].contains(&0) {
            return invalid("extrapolation point counts must be at least 1".into());
        }
        if let PhaseUnwrap::Standard { discont } = fit.phase_unwrap {
            if !(discont > 0.0) {
                return invalid(format!("unwrap discontinuity must be positive, got {discont}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = AnalysisConfig::from_json("{}").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.detection.line_freqs_hz, vec![60.0]);
        assert!(config.matrix.drop_bad_bins);
        assert_eq!(config.fit.modes[0][0], FitMode::Parametric);
        assert_eq!(config.fit.modes[2][2], FitMode::Interpolated);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let text = r#"{
            "detection": { "line_freqs_hz": [60.0, 120.0] },
            "calibration": { "negative_charge": false },
            "matrix": { "noise_shift": { "kind": "fixed", "bins": 3 } }
        }"#;
        let config = AnalysisConfig::from_json(text).unwrap();
        assert_eq!(config.detection.line_freqs_hz, vec![60.0, 120.0]);
        assert_eq!(config.detection.min_freq_hz, 1.0);
        assert!(!config.calibration.negative_charge);
        assert_eq!(config.calibration.step_freq_hz, 41.0);
        assert_eq!(config.matrix.noise_shift, NoiseShift::Fixed { bins: 3 });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_band = r#"{ "fit": { "band_hz": [600.0, 10.0] } }"#;
        assert!(matches!(
            AnalysisConfig::from_json(bad_band),
            Err(TransferError::InvalidConfig(_))
        ));
        let bad_channel = r#"{ "calibration": { "reference_channel": 3 } }"#;
        assert!(AnalysisConfig::from_json(bad_channel).is_err());
    }
}
