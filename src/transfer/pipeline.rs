use std::collections::BTreeMap;

use log::info;

use crate::config::AnalysisConfig;
use crate::fit::TransferFunction;
use crate::transfer::averager::{AveragedSpectra, SpectralAverager};
use crate::transfer::bins::DriveBinDetector;
use crate::transfer::calibrate::{ChargeCalibration, ChargeStepCalibrator};
use crate::transfer::matrix::{TransferMatrices, TransferMatrixBuilder};
use crate::transfer::source::RecordSource;
use crate::transfer::tf_array::TfArray;
use crate::transfer::TransferError;

/// Every intermediate of one calibration run, kept for inspection and plotting.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub spectra: Vec<AveragedSpectra>,
    /// Detected drive bins per drive axis.
    pub drive_bins: BTreeMap<usize, Vec<usize>>,
    pub matrices: TransferMatrices,
    pub calibration: ChargeCalibration,
    pub transfer_function: TransferFunction,
}

impl PipelineOutput {
    /// Samples the fitted transfer function on `grid`.
    pub fn tf_array(&self, grid: &[f64]) -> Result<TfArray, TransferError> {
        TfArray::sample(&self.transfer_function, grid)
    }

    /// Force-from-response array: the slice-wise inverse of [`Self::tf_array`].
    pub fn inverse_tf_array(&self, grid: &[f64]) -> Result<TfArray, TransferError> {
        self.tf_array(grid)?.invert()
    }
}

/// Drains a record source through averaging, bin detection, matrix
/// construction, charge calibration and fitting.
pub struct CalibrationPipeline<S: RecordSource> {
    source: S,
    config: AnalysisConfig,
}

impl<S: RecordSource> CalibrationPipeline<S> {
    pub fn new(source: S, config: AnalysisConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn run(&mut self, volts_per_newton: f64) -> Result<PipelineOutput, TransferError> {
        let spectra = self.average_records()?;

        let detector = DriveBinDetector::new(&self.config.detection);
        let mut builder = TransferMatrixBuilder::new(&self.config.matrix);
        let mut drive_bins = BTreeMap::new();
        for group in &spectra {
            let bins = detector.detect(group)?;
            builder.add_group(group, &bins)?;
            drive_bins.insert(group.axis, bins);
        }
        let matrices = builder.finish()?;
        info!("transfer matrix built at {} drive frequencies", matrices.len());

        let calibration = ChargeStepCalibrator::new(&self.config.calibration)
            .calibrate(&matrices.h, volts_per_newton)?;
        let transfer_function = TransferFunction::build(&calibration.matrices, &self.config.fit)?;

        Ok(PipelineOutput {
            spectra,
            drive_bins,
            matrices,
            calibration,
            transfer_function,
        })
    }

    fn average_records(&mut self) -> Result<Vec<AveragedSpectra>, TransferError> {
        let mut averager = SpectralAverager::new(&self.config.electrodes);
        let mut consumed = 0;
        while let Some(record) = self.source.next_record()? {
            averager.push(&record)?;
            consumed += 1;
        }
        info!(
            "averaged {consumed} records over {} drive axes",
            averager.counts().len()
        );
        averager.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{ComponentModel, FitMode, PhaseUnwrap};
    use crate::transfer::averager::tests::driven_record;
    use crate::transfer::{ManualSource, NoiseShift};
    use crate::types::NUM_AXES;

    const SAMPLES: usize = 512;
    const RATE: f64 = 512.0;

    fn comb() -> Vec<f64> {
        (0..21).map(|k| 11.0 + 10.0 * k as f64).collect()
    }

    fn diagonal_records() -> Vec<crate::transfer::Record> {
        let gains = [2.0, 3.0, 4.0];
        let mut records = Vec::new();
        for axis in 0..NUM_AXES {
            let mut g = [0.0; NUM_AXES];
            g[axis] = gains[axis];
            for _ in 0..2 {
                records.push(driven_record(axis, &comb(), g, SAMPLES, RATE));
            }
        }
        records
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.matrix.noise_shift = NoiseShift::Fixed { bins: 3 };
        config.fit.modes = [[FitMode::Interpolated; NUM_AXES]; NUM_AXES];
        config.fit.phase_unwrap = PhaseUnwrap::None;
        config
    }

    #[test]
    fn diagonal_response_calibrates_end_to_end() {
        let vpn = 1.0e14;
        let source = ManualSource::new(diagonal_records());
        let mut pipeline = CalibrationPipeline::new(source, config()).unwrap();
        let out = pipeline.run(vpn).unwrap();

        assert_eq!(out.spectra.len(), NUM_AXES);
        assert!(out.spectra.iter().all(|s| s.count == 2));
        for bins in out.drive_bins.values() {
            assert_eq!(bins.len(), comb().len());
        }
        assert_eq!(out.matrices.frequencies(), comb());

        let raw = out.matrices.h.get(41.0).unwrap();
        for (k, gain) in [2.0, 3.0, 4.0].iter().enumerate() {
            assert!((raw[[k, k]].norm() - gain).abs() < 1e-9);
        }
        assert_eq!(out.calibration.reference_freq_hz, 41.0);
        let charge = out.calibration.implied_charge_coulombs;
        assert!((charge + 2.0 / vpn).abs() < 1e-9 * 2.0 / vpn);

        let tf = &out.transfer_function;
        assert!(tf.failed_components().is_empty());
        let h00 = tf.evaluate(0, 0, 41.0).unwrap();
        assert!((h00.norm() / vpn - 1.0).abs() < 1e-9);
        let h11 = tf.evaluate(1, 1, 41.0).unwrap();
        assert!((h11.norm() / vpn - 1.5).abs() < 1e-9);
        for (r, d) in [(0, 1), (1, 0), (2, 0), (0, 2)] {
            assert!(tf.evaluate(r, d, 41.0).unwrap().norm() < 1e-6 * vpn);
        }

        let inv = out.inverse_tf_array(&[0.0, 21.0, 41.0, 101.0]).unwrap();
        let f00 = inv.values[[2, 0, 0]];
        assert!((f00.norm() * vpn - 1.0).abs() < 1e-6);
        assert_eq!(inv.slice(0), inv.slice(1));
    }

    #[test]
    fn single_tone_on_one_electrode_with_default_layout() {
        let vpn = 2.0;
        let records: Vec<_> = (0..3)
            .map(|_| driven_record(0, &[41.0], [2.0, 0.0, 0.0], SAMPLES, RATE))
            .collect();
        let mut config = AnalysisConfig::default();
        config.matrix.noise_shift = NoiseShift::Fixed { bins: 3 };
        let mut pipeline = CalibrationPipeline::new(ManualSource::new(records), config).unwrap();
        let out = pipeline.run(vpn).unwrap();

        assert_eq!(out.spectra.len(), 1);
        assert_eq!(out.spectra[0].count, 3);
        assert_eq!(out.matrices.frequencies(), vec![41.0]);
        assert_eq!(out.calibration.reference_freq_hz, 41.0);
        assert!((out.calibration.implied_charge_coulombs + 1.0).abs() < 1e-9);

        let tf = &out.transfer_function;
        assert!(tf.failed_components().is_empty());
        assert!(matches!(tf.component(0, 0), Some(ComponentModel::Interpolated { .. })));
        let h00 = tf.evaluate(0, 0, 41.0).unwrap();
        assert!((h00.norm() - vpn).abs() < 1e-9);
        // constant beyond the lone key
        assert!((tf.evaluate(0, 0, 300.0).unwrap().norm() - vpn).abs() < 1e-9);

        let grid = [0.0, 20.0, 41.0, 100.0];
        let arr = out.tf_array(&grid).unwrap();
        for i in 0..grid.len() {
            assert!((arr.values[[i, 0, 0]].norm() - vpn).abs() < 1e-9);
            for r in 0..NUM_AXES {
                for d in 0..NUM_AXES {
                    if (r, d) != (0, 0) {
                        assert!(arr.values[[i, r, d]].norm() < 1e-9, "({r}, {d}) at {}", grid[i]);
                    }
                }
            }
        }
    }

    #[test]
    fn empty_source_is_an_error() {
        let source = ManualSource::new(Vec::new());
        let mut pipeline = CalibrationPipeline::new(source, config()).unwrap();
        assert!(matches!(pipeline.run(1.0), Err(TransferError::NoRecords)));
    }

    #[test]
    fn invalid_config_is_refused_up_front() {
        let mut config = config();
        config.detection.relative_threshold = 0.0;
        assert!(matches!(
            CalibrationPipeline::new(ManualSource::new(Vec::new()), config),
            Err(TransferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_step_frequency_stops_the_run() {
        let mut config = config();
        config.calibration.step_freq_hz = 400.0;
        let source = ManualSource::new(diagonal_records());
        let mut pipeline = CalibrationPipeline::new(source, config).unwrap();
        assert!(matches!(
            pipeline.run(1.0),
            Err(TransferError::StepFrequencyOutOfRange { .. })
        ));
    }
}
