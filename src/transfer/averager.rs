use std::collections::BTreeMap;

use log::{debug, info};
use ndarray::Array2;
use rustfft::num_complex::Complex64;

use crate::transfer::electrodes::ElectrodeMap;
use crate::transfer::fft::{psd, rfft_freqs, SpectrumBuilder};
use crate::transfer::{Record, TransferError};
use crate::types::{axis_label, NUM_AXES, NUM_QUADRANTS, NUM_SIDES};

/// Fraction of a record's peak drive power that marks its active axis.
pub const GROUP_POWER_FRACTION: f64 = 0.1;

/// Mean spectra of every record driven on one axis.
#[derive(Clone, Debug)]
pub struct AveragedSpectra {
    pub axis: usize,
    pub count: usize,
    pub sample_rate_hz: f64,
    pub num_samples: usize,
    pub frequencies_hz: Vec<f64>,
    pub drive: Array2<Complex64>,     // axes x bins
    pub position: Array2<Complex64>,  // axes x bins
    pub feedback: Array2<Complex64>,  // axes x bins
    pub amplitude: Array2<Complex64>, // quadrants x bins
    pub phase: Array2<Complex64>,     // quadrants x bins
    pub side: Array2<Complex64>,      // sides x bins
}

impl AveragedSpectra {
    pub fn num_bins(&self) -> usize {
        self.frequencies_hz.len()
    }

    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate_hz / self.num_samples as f64
    }

    pub fn drive_psd(&self) -> Array2<f64> {
        psd(&self.drive, self.num_samples, self.sample_rate_hz)
    }
}

struct Accumulator {
    count: usize,
    drive: Array2<Complex64>,
    position: Array2<Complex64>,
    feedback: Array2<Complex64>,
    amplitude: Array2<Complex64>,
    phase: Array2<Complex64>,
    side: Array2<Complex64>,
}

impl Accumulator {
    fn zeros(bins: usize) -> Self {
        Self {
            count: 0,
            drive: Array2::zeros((NUM_AXES, bins)),
            position: Array2::zeros((NUM_AXES, bins)),
            feedback: Array2::zeros((NUM_AXES, bins)),
            amplitude: Array2::zeros((NUM_QUADRANTS, bins)),
            phase: Array2::zeros((NUM_QUADRANTS, bins)),
            side: Array2::zeros((NUM_SIDES, bins)),
        }
    }
}

/// Per-record spectra before they are folded into a group.
struct RecordSpectra {
    drive: Array2<Complex64>,
    position: Array2<Complex64>,
    feedback: Array2<Complex64>,
    amplitude: Array2<Complex64>,
    phase: Array2<Complex64>,
    side: Array2<Complex64>,
}

/// Groups records by active drive axis and averages their complex spectra.
pub struct SpectralAverager {
    electrodes: ElectrodeMap,
    builder: Option<SpectrumBuilder>,
    sample_rate_hz: f64,
    groups: BTreeMap<usize, Accumulator>,
}

impl SpectralAverager {
    pub fn new(electrodes: &ElectrodeMap) -> Self {
        Self {
            electrodes: electrodes.clone(),
            builder: None,
            sample_rate_hz: 0.0,
            groups: BTreeMap::new(),
        }
    }

    /// Adds one record and returns the drive axis it was grouped under.
    pub fn push(&mut self, record: &Record) -> Result<usize, TransferError> {
        record.validate()?;
        let spectra = self.transform(record)?;
        let axis = active_axis(&spectra.drive, GROUP_POWER_FRACTION)
            .ok_or(TransferError::NoDrivePower)?;
        let bins = spectra.drive.ncols();
        let acc = self
            .groups
            .entry(axis)
            .or_insert_with(|| Accumulator::zeros(bins));
        acc.drive += &spectra.drive;
        acc.position += &spectra.position;
        acc.feedback += &spectra.feedback;
        acc.amplitude += &spectra.amplitude;
        acc.phase += &spectra.phase;
        acc.side += &spectra.side;
        acc.count += 1;
        debug!("record grouped under {} drive", axis_label(axis));
        Ok(axis)
    }

    /// Records consumed so far, per drive axis.
    pub fn counts(&self) -> BTreeMap<usize, usize> {
        self.groups.iter().map(|(axis, acc)| (*axis, acc.count)).collect()
    }

    pub fn finish(self) -> Result<Vec<AveragedSpectra>, TransferError> {
        let builder = self.builder.ok_or(TransferError::NoRecords)?;
        let num_samples = builder.fft_size();
        let frequencies_hz = rfft_freqs(num_samples, self.sample_rate_hz);
        let sample_rate_hz = self.sample_rate_hz;
        Ok(self
            .groups
            .into_iter()
            .map(|(axis, acc)| {
                info!("{} drive: averaged {} records", axis_label(axis), acc.count);
                let scale = Complex64::new(1.0 / acc.count as f64, 0.0);
                AveragedSpectra {
                    axis,
                    count: acc.count,
                    sample_rate_hz,
                    num_samples,
                    frequencies_hz: frequencies_hz.clone(),
                    drive: acc.drive.mapv(|z| z * scale),
                    position: acc.position.mapv(|z| z * scale),
                    feedback: acc.feedback.mapv(|z| z * scale),
                    amplitude: acc.amplitude.mapv(|z| z * scale),
                    phase: acc.phase.mapv(|z| z * scale),
                    side: acc.side.mapv(|z| z * scale),
                }
            })
            .collect())
    }

    fn transform(&mut self, record: &Record) -> Result<RecordSpectra, TransferError> {
        let n = record.num_samples();
        if self.builder.is_none() {
            self.builder = Some(SpectrumBuilder::with_size(n));
            self.sample_rate_hz = record.sample_rate_hz;
        }
        let builder = self.builder.as_ref().ok_or(TransferError::NoRecords)?;
        // every record shares the first record's frequency axis
        if builder.fft_size() != n {
            return Err(TransferError::SampleCountMismatch {
                channel: "position",
                expected: builder.fft_size(),
                actual: n,
            });
        }
        if record.sample_rate_hz != self.sample_rate_hz {
            return Err(TransferError::SampleRateMismatch {
                expected: self.sample_rate_hz,
                actual: record.sample_rate_hz,
            });
        }
        let drive = self.electrodes.project(record.drive.view());
        Ok(RecordSpectra {
            drive: builder.compute(drive.view())?,
            position: builder.compute(record.position.view())?,
            feedback: builder.compute(record.feedback.view())?,
            amplitude: builder.compute(record.amplitude.view())?,
            phase: builder.compute(record.phase.view())?,
            side: builder.compute(record.side_channels().view())?,
        })
    }
}

/// Lowest drive axis with any bin above `fraction` of the peak drive power.
pub fn active_axis(drive: &Array2<Complex64>, fraction: f64) -> Option<usize> {
    let power = drive.mapv(|z| z.norm_sqr());
    let peak = power.iter().copied().fold(0.0_f64, f64::max);
    if !(peak > 0.0) {
        return None;
    }
    let threshold = fraction * peak;
    power
        .rows()
        .into_iter()
        .position(|row| row.iter().any(|&p| p > threshold))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::NUM_ELECTRODES;
    use std::f64::consts::PI;

    /// Sinusoidal drive on `axis` at each of `freqs`, response = gains[row] * drive.
    pub(crate) fn driven_record(
        axis: usize,
        freqs: &[f64],
        gains: [f64; NUM_AXES],
        samples: usize,
        sample_rate_hz: f64,
    ) -> Record {
        let drive_wave: Vec<f64> = (0..samples)
            .map(|i| {
                let t = i as f64 / sample_rate_hz;
                freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum()
            })
            .collect();
        let mut drive = Array2::zeros((NUM_ELECTRODES, samples));
        let mut position = Array2::zeros((NUM_AXES, samples));
        for i in 0..samples {
            drive[[axis, i]] = drive_wave[i];
            for (row, gain) in gains.iter().enumerate() {
                position[[row, i]] = gain * drive_wave[i];
            }
        }
        Record {
            sample_rate_hz,
            drive,
            position: position.clone(),
            feedback: position.mapv(|v| 0.5 * v),
            amplitude: Array2::from_shape_fn((NUM_QUADRANTS, samples), |(q, i)| {
                (q as f64 + 1.0) * drive_wave[i]
            }),
            phase: Array2::zeros((NUM_QUADRANTS, samples)),
        }
    }

    #[test]
    fn groups_follow_active_axis() {
        let mut averager = SpectralAverager::new(&ElectrodeMap::identity());
        let records = [
            driven_record(0, &[10.0], [1.0, 0.0, 0.0], 200, 200.0),
            driven_record(1, &[10.0], [0.0, 1.0, 0.0], 200, 200.0),
            driven_record(0, &[20.0], [1.0, 0.0, 0.0], 200, 200.0),
            driven_record(2, &[30.0], [0.0, 0.0, 1.0], 200, 200.0),
        ];
        let axes: Vec<usize> = records.iter().map(|r| averager.push(r).unwrap()).collect();
        assert_eq!(axes, vec![0, 1, 0, 2]);
        let counts = averager.counts();
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&1), Some(&1));
        assert_eq!(counts.values().sum::<usize>(), records.len());
    }

    #[test]
    fn averaging_identical_records_is_idempotent() {
        let record = driven_record(1, &[12.0, 24.0], [0.3, 2.0, -1.0], 256, 256.0);
        let mut single = SpectralAverager::new(&ElectrodeMap::identity());
        single.push(&record).unwrap();
        let single = single.finish().unwrap().remove(0);

        let mut many = SpectralAverager::new(&ElectrodeMap::identity());
        for _ in 0..5 {
            many.push(&record).unwrap();
        }
        let many = many.finish().unwrap().remove(0);

        assert_eq!(many.count, 5);
        for (a, b) in many.position.iter().zip(single.position.iter()) {
            assert!((a - b).norm() <= 1e-12 * (1.0 + b.norm()));
        }
        for (a, b) in many.side.iter().zip(single.side.iter()) {
            assert!((a - b).norm() <= 1e-12 * (1.0 + b.norm()));
        }
    }

    #[test]
    fn mismatched_record_length_is_fatal() {
        let mut averager = SpectralAverager::new(&ElectrodeMap::identity());
        averager
            .push(&driven_record(0, &[10.0], [1.0, 0.0, 0.0], 200, 200.0))
            .unwrap();
        let err = averager
            .push(&driven_record(0, &[10.0], [1.0, 0.0, 0.0], 100, 200.0))
            .unwrap_err();
        assert!(matches!(err, TransferError::SampleCountMismatch { .. }));
    }

    #[test]
    fn undriven_record_is_rejected() {
        let mut record = driven_record(0, &[10.0], [1.0, 0.0, 0.0], 64, 64.0);
        record.drive.fill(0.0);
        let mut averager = SpectralAverager::new(&ElectrodeMap::identity());
        assert!(matches!(averager.push(&record), Err(TransferError::NoDrivePower)));
    }

    #[test]
    fn empty_averager_has_no_output() {
        let averager = SpectralAverager::new(&ElectrodeMap::identity());
        assert!(matches!(averager.finish(), Err(TransferError::NoRecords)));
    }
}
