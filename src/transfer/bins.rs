use log::debug;
use ndarray::ArrayView2;

use crate::config::DetectionConfig;
use crate::transfer::averager::AveragedSpectra;
use crate::transfer::freq_map::nearest_index;
use crate::transfer::TransferError;

/// Picks the frequency bins that carry injected drive power.
///
/// Deliberately permissive: harmonics and the odd noise outlier come
/// through and are weeded out by the comb check when matrices are built.
#[derive(Clone, Debug)]
pub struct DriveBinDetector {
    relative_threshold: f64,
    min_freq_hz: f64,
    line_freqs_hz: Vec<f64>,
}

impl DriveBinDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            relative_threshold: config.relative_threshold,
            min_freq_hz: config.min_freq_hz,
            line_freqs_hz: config.line_freqs_hz.clone(),
        }
    }

    pub fn detect(&self, spectra: &AveragedSpectra) -> Result<Vec<usize>, TransferError> {
        let bins = self.detect_in_psd(spectra.drive_psd().view(), &spectra.frequencies_hz);
        if bins.is_empty() {
            return Err(TransferError::NoDriveBins { axis: spectra.axis });
        }
        debug!(
            "axis {}: {} drive bins between {:.2} and {:.2} Hz",
            spectra.axis,
            bins.len(),
            spectra.frequencies_hz[bins[0]],
            spectra.frequencies_hz[bins[bins.len() - 1]]
        );
        Ok(bins)
    }

    /// Sorted bin indices where any drive axis exceeds the threshold.
    pub fn detect_in_psd(&self, psd: ArrayView2<f64>, freqs: &[f64]) -> Vec<usize> {
        let peak = psd.iter().copied().fold(0.0_f64, f64::max);
        if !(peak > 0.0) || freqs.is_empty() {
            return Vec::new();
        }
        let threshold = self.relative_threshold * peak;
        let bin_width = if freqs.len() > 1 {
            freqs[1] - freqs[0]
        } else {
            0.0
        };
        let min_bin = nearest_index(freqs, self.min_freq_hz).unwrap_or(0);
        let line_bins: Vec<usize> = self
            .line_freqs_hz
            .iter()
            .filter_map(|line| nearest_index(freqs, *line))
            .collect();

        (0..psd.ncols().min(freqs.len()))
            .filter(|&bin| psd.column(bin).iter().any(|&p| p > threshold))
            .filter(|&bin| bin > min_bin && freqs[bin] > self.min_freq_hz)
            .filter(|&bin| {
                let near_line = line_bins.contains(&bin)
                    || self
                        .line_freqs_hz
                        .iter()
                        .any(|line| (freqs[bin] - line).abs() < bin_width);
                if near_line {
                    debug!("ignoring response at line frequency {:.1} Hz", freqs[bin]);
                }
                !near_line
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn detector(min_freq_hz: f64, lines: Vec<f64>) -> DriveBinDetector {
        DriveBinDetector::new(&DetectionConfig {
            relative_threshold: 0.1,
            min_freq_hz,
            line_freqs_hz: lines,
        })
    }

    fn comb_psd(freqs: &[f64], lit: &[usize]) -> Array2<f64> {
        let mut psd = Array2::from_elem((3, freqs.len()), 1e-6);
        for &bin in lit {
            psd[[1, bin]] = 1.0;
        }
        psd
    }

    #[test]
    fn keeps_bins_above_threshold() {
        let freqs: Vec<f64> = (0..200).map(|k| k as f64 * 0.5).collect();
        let psd = comb_psd(&freqs, &[20, 40, 60]);
        let bins = detector(1.0, vec![]).detect_in_psd(psd.view(), &freqs);
        assert_eq!(bins, vec![20, 40, 60]);
    }

    #[test]
    fn skips_dc_and_low_bins() {
        let freqs: Vec<f64> = (0..100).map(|k| k as f64 * 0.5).collect();
        let psd = comb_psd(&freqs, &[0, 1, 2, 3, 10]);
        let bins = detector(1.0, vec![]).detect_in_psd(psd.view(), &freqs);
        assert_eq!(bins, vec![3, 10]);
        assert!(bins.iter().all(|&b| freqs[b] > 1.0));
    }

    #[test]
    fn rejects_line_frequency_neighbourhood() {
        // 0.7 Hz bins put 60 Hz between bins 85 (59.5) and 86 (60.2)
        let freqs: Vec<f64> = (0..200).map(|k| k as f64 * 0.7).collect();
        let psd = comb_psd(&freqs, &[50, 85, 86, 87, 120]);
        let bins = detector(1.0, vec![60.0]).detect_in_psd(psd.view(), &freqs);
        assert_eq!(bins, vec![50, 87, 120]);
        let width = freqs[1] - freqs[0];
        assert!(bins.iter().all(|&b| (freqs[b] - 60.0).abs() >= width));
    }

    #[test]
    fn silent_drive_finds_nothing() {
        let freqs: Vec<f64> = (0..10).map(|k| k as f64).collect();
        let psd = Array2::<f64>::zeros((3, 10));
        assert!(detector(1.0, vec![60.0])
            .detect_in_psd(psd.view(), &freqs)
            .is_empty());
    }
}
