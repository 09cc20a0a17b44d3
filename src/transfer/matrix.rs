use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::MatrixConfig;
use crate::transfer::averager::AveragedSpectra;
use crate::transfer::freq_map::FrequencyMap;
use crate::transfer::TransferError;
use crate::types::{axis_label, NUM_AXES, NUM_QUADRANTS};

/// A candidate bin closer than this fraction of the comb spacing is leakage.
pub const BAD_BIN_SPACING_FRACTION: f64 = 0.9;

pub type ComplexMatrix = Array2<Complex64>;

/// How far the response spectrum is rolled to sample the noise floor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseShift {
    /// Half the drive comb spacing plus up to ±10% jitter.
    Random { seed: Option<u64> },
    /// Exact shift in bins, for reproducible noise matrices.
    Fixed { bins: isize },
}

impl Default for NoiseShift {
    fn default() -> Self {
        NoiseShift::Random { seed: None }
    }
}

/// Transfer matrices keyed by drive frequency; all maps share one key set.
#[derive(Clone, Debug, Default)]
pub struct TransferMatrices {
    pub h: FrequencyMap<ComplexMatrix>,         // response x drive
    pub noise: FrequencyMap<ComplexMatrix>,     // response x drive
    pub feedback: FrequencyMap<ComplexMatrix>,  // feedback x drive
    pub amplitude: FrequencyMap<ComplexMatrix>, // quadrant x drive
    pub phase: FrequencyMap<ComplexMatrix>,     // quadrant x drive
}

impl TransferMatrices {
    pub fn frequencies(&self) -> Vec<f64> {
        self.h.frequencies()
    }

    pub fn len(&self) -> usize {
        self.h.len()
    }

    pub fn is_empty(&self) -> bool {
        self.h.is_empty()
    }
}

/// Rejects frequencies that do not sit on the drive comb.
///
/// The second admitted frequency fixes the nominal spacing; later ones
/// must be at least [`BAD_BIN_SPACING_FRACTION`] of it above the previous
/// admitted frequency. Frequencies already present in the global map are
/// always admitted.
#[derive(Clone, Debug)]
pub struct CombFilter {
    drop_bad_bins: bool,
    previous: Option<f64>,
    nominal: Option<f64>,
}

impl CombFilter {
    pub fn new(drop_bad_bins: bool) -> Self {
        Self {
            drop_bad_bins,
            previous: None,
            nominal: None,
        }
    }

    pub fn admit(&mut self, freq_hz: f64, already_known: bool) -> bool {
        let accept = already_known
            || !self.drop_bad_bins
            || match (self.previous, self.nominal) {
                (Some(prev), Some(nominal)) => {
                    freq_hz - prev >= BAD_BIN_SPACING_FRACTION * nominal
                }
                _ => true,
            };
        if accept {
            if let (Some(prev), None) = (self.previous, self.nominal) {
                self.nominal = Some(freq_hz - prev);
            }
            self.previous = Some(freq_hz);
        }
        accept
    }
}

/// Applies [`CombFilter`] to an ascending key sequence.
pub fn comb_admissible(freqs: &[f64], drop_bad_bins: bool) -> Vec<bool> {
    let mut filter = CombFilter::new(drop_bad_bins);
    freqs.iter().map(|f| filter.admit(*f, false)).collect()
}

/// Folds averaged spectra and their drive bins into [`TransferMatrices`].
pub struct TransferMatrixBuilder {
    drop_bad_bins: bool,
    noise_shift: NoiseShift,
    rng: StdRng,
    matrices: TransferMatrices,
}

impl TransferMatrixBuilder {
    pub fn new(config: &MatrixConfig) -> Self {
        let rng = match config.noise_shift {
            NoiseShift::Random { seed: Some(seed) } => StdRng::seed_from_u64(seed),
            _ => StdRng::from_entropy(),
        };
        Self {
            drop_bad_bins: config.drop_bad_bins,
            noise_shift: config.noise_shift,
            rng,
            matrices: TransferMatrices::default(),
        }
    }

    /// Adds one drive axis' ratios; returns how many bins were kept.
    pub fn add_group(
        &mut self,
        spectra: &AveragedSpectra,
        bins: &[usize],
    ) -> Result<usize, TransferError> {
        let axis = spectra.axis;
        if axis >= NUM_AXES {
            return Err(TransferError::InvalidChannel(axis));
        }
        if bins.is_empty() {
            return Err(TransferError::NoDriveBins { axis });
        }
        if let Some(&bad) = bins.iter().find(|&&b| b >= spectra.num_bins()) {
            return Err(TransferError::SampleCountMismatch {
                channel: "drive bins",
                expected: spectra.num_bins(),
                actual: bad + 1,
            });
        }
        let shift = self.noise_shift_bins(bins);
        let rolled = roll_columns(&spectra.position, shift);
        debug!("{} drive: noise reference shifted by {shift} bins", axis_label(axis));

        let mut filter = CombFilter::new(self.drop_bad_bins);
        let mut kept = 0;
        for &bin in bins {
            let freq = spectra.frequencies_hz[bin];
            if !filter.admit(freq, self.matrices.h.contains(freq)) {
                debug!("dropping {freq:.3} Hz: off the drive comb");
                continue;
            }
            let drive = spectra.drive[[axis, bin]];
            let ratio =
                |col: ArrayView1<Complex64>| -> Array1<Complex64> { col.mapv(|z| z / drive) };

            let m = &mut self.matrices;
            let position = ratio(spectra.position.column(bin));
            add_column(&mut m.h, freq, NUM_AXES, axis, position);
            add_column(&mut m.noise, freq, NUM_AXES, axis, ratio(rolled.column(bin)));
            let feedback = ratio(spectra.feedback.column(bin));
            add_column(&mut m.feedback, freq, NUM_AXES, axis, feedback);
            let amplitude = ratio(spectra.amplitude.column(bin));
            add_column(&mut m.amplitude, freq, NUM_QUADRANTS, axis, amplitude);
            let phase = ratio(spectra.phase.column(bin));
            add_column(&mut m.phase, freq, NUM_QUADRANTS, axis, phase);
            kept += 1;
        }
        info!(
            "{} drive: kept {kept} of {} detected bins",
            axis_label(axis),
            bins.len()
        );
        Ok(kept)
    }

    pub fn finish(self) -> Result<TransferMatrices, TransferError> {
        if self.matrices.is_empty() {
            return Err(TransferError::EmptyTransferMatrix);
        }
        Ok(self.matrices)
    }

    fn noise_shift_bins(&mut self, bins: &[usize]) -> isize {
        match self.noise_shift {
            NoiseShift::Fixed { bins } => bins,
            NoiseShift::Random { .. } => {
                // a lone bin on a comb starting at DC is also the comb spacing
                let spacing = match bins {
                    [first, second, ..] => second.saturating_sub(*first),
                    [only] => *only,
                    [] => 0,
                };
                let base = (0.5 * spacing as f64) as isize;
                let jitter = (0.1 * base as f64) as isize;
                base + self.rng.gen_range(-jitter..=jitter)
            }
        }
    }
}

fn add_column(
    map: &mut FrequencyMap<ComplexMatrix>,
    freq: f64,
    rows: usize,
    col: usize,
    values: Array1<Complex64>,
) {
    let mat = map.get_or_insert_with(freq, || Array2::zeros((rows, NUM_AXES)));
    let mut target = mat.column_mut(col);
    target += &values;
}

/// Circular shift along the frequency axis: `out[.., j] = in[.., j - shift]`.
pub fn roll_columns(spectrum: &Array2<Complex64>, shift: isize) -> Array2<Complex64> {
    let n = spectrum.ncols();
    if n == 0 {
        return spectrum.clone();
    }
    let k = shift.rem_euclid(n as isize) as usize;
    let mut out = Array2::zeros(spectrum.raw_dim());
    out.slice_mut(s![.., k..]).assign(&spectrum.slice(s![.., ..n - k]));
    out.slice_mut(s![.., ..k]).assign(&spectrum.slice(s![.., n - k..]));
    out
}
