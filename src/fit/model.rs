use log::{info, warn};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::FitConfig;
use crate::fit::interpolate::{EdgeFit, ExtrapolatingInterpolant, ExtrapolationKind};
use crate::fit::oscillator::DampedOscillator;
use crate::fit::phase::fill_non_finite;
use crate::fit::FitError;
use crate::transfer::freq_map::FrequencyMap;
use crate::transfer::matrix::ComplexMatrix;
use crate::types::{axis_label, Axis, NUM_AXES};

/// How a matrix element is turned into a continuous function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    Parametric,
    Interpolated,
}

impl FitMode {
    /// Oscillator fits on the x and y diagonal, interpolation elsewhere.
    pub fn default_layout() -> [[FitMode; NUM_AXES]; NUM_AXES] {
        let mut modes = [[FitMode::Interpolated; NUM_AXES]; NUM_AXES];
        modes[Axis::X.index()][Axis::X.index()] = FitMode::Parametric;
        modes[Axis::Y.index()][Axis::Y.index()] = FitMode::Parametric;
        modes
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ComponentModel {
    Parametric(DampedOscillator),
    Interpolated {
        magnitude: ExtrapolatingInterpolant,
        phase: ExtrapolatingInterpolant,
    },
    Failed {
        reason: String,
    },
}

impl ComponentModel {
    pub fn is_failed(&self) -> bool {
        matches!(self, ComponentModel::Failed { .. })
    }

    /// `None` for a failed component.
    pub fn evaluate(&self, freq_hz: f64) -> Option<Complex64> {
        match self {
            ComponentModel::Parametric(osc) => Some(osc.response(freq_hz)),
            ComponentModel::Interpolated { magnitude, phase } => Some(Complex64::from_polar(
                magnitude.eval(freq_hz),
                phase.eval(freq_hz),
            )),
            ComponentModel::Failed { .. } => None,
        }
    }
}

/// Continuous 3x3 transfer function, indexed response × drive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction {
    components: [[ComponentModel; NUM_AXES]; NUM_AXES],
}

impl TransferFunction {
    pub fn from_components(components: [[ComponentModel; NUM_AXES]; NUM_AXES]) -> Self {
        Self { components }
    }

    /// Fits or interpolates every element of a (calibrated) transfer matrix.
    ///
    /// Elements whose fit fails are kept as [`ComponentModel::Failed`] so the
    /// rest of the function stays usable.
    pub fn build(h: &FrequencyMap<ComplexMatrix>, config: &FitConfig) -> Result<Self, FitError> {
        if h.is_empty() {
            return Err(FitError::InsufficientData { needed: 1, got: 0 });
        }
        let freqs = h.frequencies();
        let components = std::array::from_fn(|response| {
            std::array::from_fn(|drive| {
                let values: Vec<Complex64> = h.values().map(|m| m[[response, drive]]).collect();
                let model = fit_component(&freqs, &values, response, drive, config);
                match &model {
                    ComponentModel::Failed { reason } => warn!(
                        "{} response to {} drive could not be modelled: {reason}",
                        axis_label(response),
                        axis_label(drive)
                    ),
                    ComponentModel::Parametric(osc) => info!(
                        "{} response to {} drive: f0 = {:.2} Hz, g = {:.2} Hz, A = {:.3e}",
                        axis_label(response),
                        axis_label(drive),
                        osc.resonance_hz,
                        osc.damping_hz,
                        osc.amplitude
                    ),
                    ComponentModel::Interpolated { .. } => info!(
                        "{} response to {} drive interpolated over {} keys",
                        axis_label(response),
                        axis_label(drive),
                        freqs.len()
                    ),
                }
                model
            })
        });
        Ok(Self { components })
    }

    pub fn component(&self, response: usize, drive: usize) -> Option<&ComponentModel> {
        self.components.get(response)?.get(drive)
    }

    pub fn evaluate(
        &self,
        response: usize,
        drive: usize,
        freq_hz: f64,
    ) -> Result<Complex64, FitError> {
        let model = self
            .component(response, drive)
            .ok_or(FitError::OutOfRange { response, drive })?;
        match model {
            ComponentModel::Failed { reason } => Err(FitError::FailedComponent {
                response,
                drive,
                reason: reason.clone(),
            }),
            _ => model.evaluate(freq_hz).ok_or(FitError::NonFinite),
        }
    }

    pub fn evaluate_many(
        &self,
        response: usize,
        drive: usize,
        freqs_hz: &[f64],
    ) -> Result<Vec<Complex64>, FitError> {
        freqs_hz
            .iter()
            .map(|&f| self.evaluate(response, drive, f))
            .collect()
    }

    /// (response, drive) pairs without a usable model.
    pub fn failed_components(&self) -> Vec<(usize, usize)> {
        (0..NUM_AXES)
            .flat_map(|r| (0..NUM_AXES).map(move |d| (r, d)))
            .filter(|&(r, d)| self.components[r][d].is_failed())
            .collect()
    }
}

fn fit_component(
    freqs: &[f64],
    values: &[Complex64],
    response: usize,
    drive: usize,
    config: &FitConfig,
) -> ComponentModel {
    let magnitude = fill_non_finite(&values.iter().map(|z| z.norm()).collect::<Vec<_>>());
    let phase = fill_non_finite(&values.iter().map(|z| z.arg()).collect::<Vec<_>>());
    let phase = if response == drive {
        config.phase_unwrap.apply(&phase)
    } else {
        phase
    };

    let result = match config.modes[response][drive] {
        FitMode::Parametric => {
            match DampedOscillator::fit(freqs, &magnitude, &phase, response, drive, config) {
                Ok(osc) => Ok(ComponentModel::Parametric(osc)),
                // too few keys to pin three parameters; the samples are still usable
                Err(FitError::InsufficientData { got, .. }) => {
                    warn!(
                        "{} response to {} drive has {got} keys in the fit band, interpolating",
                        axis_label(response),
                        axis_label(drive)
                    );
                    interpolate(freqs, &magnitude, &phase, response, drive, config)
                }
                Err(err) => Err(err),
            }
        }
        FitMode::Interpolated => interpolate(freqs, &magnitude, &phase, response, drive, config),
    };
    result.unwrap_or_else(|err| ComponentModel::Failed {
        reason: err.to_string(),
    })
}

fn interpolate(
    freqs: &[f64],
    magnitude: &[f64],
    phase: &[f64],
    response: usize,
    drive: usize,
    config: &FitConfig,
) -> Result<ComponentModel, FitError> {
    let [lo, hi] = config.band_hz;
    let band: Vec<usize> = (0..freqs.len())
        .filter(|&i| freqs[i] >= lo && freqs[i] <= hi)
        .collect();
    let pick = |src: &[f64]| band.iter().map(|&i| src[i]).collect::<Vec<f64>>();
    let keys = pick(freqs);

    let points = &config.extrapolation;
    let z = Axis::Z.index();
    let lower_points = if response == z && drive == z {
        points.lower_z_drive
    } else {
        points.lower
    };
    let (mag_lower, phase_lower) = if response == z {
        (ExtrapolationKind::PowerLaw, ExtrapolationKind::LogLinear)
    } else {
        let constant = ExtrapolationKind::Polynomial { order: 0 };
        (constant, constant)
    };

    let magnitude = ExtrapolatingInterpolant::fit(
        keys.clone(),
        pick(magnitude),
        EdgeFit::new(mag_lower, lower_points),
        EdgeFit::new(ExtrapolationKind::PowerLaw, points.upper_magnitude),
    )?;
    let phase = ExtrapolatingInterpolant::fit(
        keys,
        pick(phase),
        EdgeFit::new(phase_lower, lower_points),
        EdgeFit::new(ExtrapolationKind::LogLinear, points.upper_phase),
    )?;
    Ok(ComponentModel::Interpolated { magnitude, phase })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn synthetic_map(freqs: &[f64]) -> FrequencyMap<ComplexMatrix> {
        let x = DampedOscillator {
            amplitude: 5.0,
            resonance_hz: 150.0,
            damping_hz: 20.0,
            phase_offset: 0.0,
        };
        let y = DampedOscillator {
            amplitude: 4.0,
            resonance_hz: 250.0,
            damping_hz: 30.0,
            phase_offset: 0.0,
        };
        let mut map = FrequencyMap::new();
        for &f in freqs {
            let mut m = Array2::zeros((NUM_AXES, NUM_AXES));
            m[[0, 0]] = x.response(f);
            m[[1, 1]] = y.response(f);
            m[[2, 2]] = Complex64::from_polar(1e-3 * (100.0 / f), -0.2);
            m[[0, 1]] = Complex64::new(1e-6, 1e-6);
            map.insert(f, m);
        }
        map
    }

    #[test]
    fn default_layout_fits_transverse_diagonal() {
        let modes = FitMode::default_layout();
        for r in 0..NUM_AXES {
            for d in 0..NUM_AXES {
                let expected = if r == d && r != Axis::Z.index() {
                    FitMode::Parametric
                } else {
                    FitMode::Interpolated
                };
                assert_eq!(modes[r][d], expected);
            }
        }
    }

    #[test]
    fn builds_and_evaluates_every_component() {
        let freqs: Vec<f64> = (2..=120).map(|i| 5.0 * i as f64).collect();
        let h = synthetic_map(&freqs);
        let tf = TransferFunction::build(&h, &FitConfig::default()).unwrap();
        assert!(tf.failed_components().is_empty());
        assert!(matches!(tf.component(0, 0), Some(ComponentModel::Parametric(_))));

        let at_160 = tf.evaluate(0, 0, 160.0).unwrap();
        let expected = h.get(160.0).unwrap()[[0, 0]];
        assert!((at_160 - expected).norm() < 1e-2 * expected.norm());

        let zz = tf.evaluate(2, 2, 123.0).unwrap();
        assert!((zz.norm() - 1e-3 * 100.0 / 123.0).abs() < 1e-3 * 1e-3);
        assert!((zz.arg() + 0.2).abs() < 1e-9);
        // power-law tail keeps the 1/f trend past the band
        let far = tf.evaluate(2, 2, 1200.0).unwrap();
        assert!((far.norm() / (1e-3 * 100.0 / 1200.0) - 1.0).abs() < 1e-6);

        let many = tf.evaluate_many(1, 1, &[100.0, 200.0, 300.0]).unwrap();
        assert_eq!(many.len(), 3);
    }

    #[test]
    fn short_band_falls_back_to_interpolation() {
        let h = synthetic_map(&[200.0, 300.0]);
        let tf = TransferFunction::build(&h, &FitConfig::default()).unwrap();
        assert!(tf.failed_components().is_empty());
        assert!(matches!(tf.component(0, 0), Some(ComponentModel::Interpolated { .. })));
        let expected = h.get(200.0).unwrap()[[0, 0]];
        assert!((tf.evaluate(0, 0, 200.0).unwrap() - expected).norm() < 1e-12 * expected.norm());

        let single = synthetic_map(&[41.0]);
        let tf = TransferFunction::build(&single, &FitConfig::default()).unwrap();
        assert!(tf.failed_components().is_empty());
        let expected = single.get(41.0).unwrap()[[1, 1]];
        assert!((tf.evaluate(1, 1, 41.0).unwrap() - expected).norm() < 1e-12 * expected.norm());
    }

    #[test]
    fn failed_components_are_reported() {
        let freqs: Vec<f64> = (2..=120).map(|i| 5.0 * i as f64).collect();
        let h = synthetic_map(&freqs);
        let mut config = FitConfig::default();
        config.solver.max_iterations = 1;
        let tf = TransferFunction::build(&h, &config).unwrap();
        assert!(tf.failed_components().contains(&(0, 0)));
        let err = tf.evaluate(0, 0, 250.0).unwrap_err();
        assert!(matches!(err, FitError::FailedComponent { response: 0, drive: 0, .. }));
        assert!(tf.evaluate(0, 1, 250.0).is_ok());
        assert_eq!(
            tf.evaluate(3, 0, 1.0).unwrap_err(),
            FitError::OutOfRange { response: 3, drive: 0 }
        );
    }

    #[test]
    fn survives_json_round_trip() {
        let freqs: Vec<f64> = (2..=60).map(|i| 10.0 * i as f64).collect();
        let tf = TransferFunction::build(&synthetic_map(&freqs), &FitConfig::default()).unwrap();
        let text = serde_json::to_string(&tf).unwrap();
        let back: TransferFunction = serde_json::from_str(&text).unwrap();
        for f in [15.0, 220.0, 800.0] {
            let (a, b) = (back.evaluate(1, 1, f).unwrap(), tf.evaluate(1, 1, f).unwrap());
            assert!((a - b).norm() <= 1e-12 * b.norm());
        }
    }

    #[test]
    fn corrupted_interpolant_is_refused_on_load() {
        let freqs: Vec<f64> = (2..=60).map(|i| 10.0 * i as f64).collect();
        let tf = TransferFunction::build(&synthetic_map(&freqs), &FitConfig::default()).unwrap();
        let mut value = serde_json::to_value(&tf).unwrap();
        let magnitude = &mut value["components"][0][1]["magnitude"]["interpolant"];
        magnitude["xs"] = serde_json::json!([]);
        magnitude["ys"] = serde_json::json!([]);
        assert!(serde_json::from_value::<TransferFunction>(value.clone()).is_err());

        value["components"][0][1]["magnitude"]["interpolant"]["xs"] = serde_json::json!([1.0]);
        value["components"][0][1]["magnitude"]["interpolant"]["ys"] = serde_json::json!([1.0, 2.0]);
        assert!(serde_json::from_value::<TransferFunction>(value).is_err());
    }
}
