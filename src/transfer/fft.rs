use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};

use crate::transfer::TransferError;

/// Frequencies of the one-sided spectrum of an `n`-sample record.
pub fn rfft_freqs(n: usize, sample_rate_hz: f64) -> Vec<f64> {
    let df = sample_rate_hz / n as f64;
    (0..n / 2 + 1).map(|k| k as f64 * df).collect()
}

/// Factor that normalizes a raw FFT to amplitude spectral density units.
pub fn fft_norm(n: usize, sample_rate_hz: f64) -> f64 {
    (2.0 / (n as f64 * sample_rate_hz)).sqrt()
}

/// One-sided FFTs of every row of a channels x samples array.
pub struct SpectrumBuilder {
    fft_size: usize,
    fft: Arc<dyn Fft<f64>>,
}

impl SpectrumBuilder {
    pub fn with_size(fft_size: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self { fft_size, fft }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    pub fn compute(&self, channels: ArrayView2<f64>) -> Result<Array2<Complex64>, TransferError> {
        if channels.ncols() != self.fft_size {
            return Err(TransferError::SampleCountMismatch {
                channel: "spectrum input",
                expected: self.fft_size,
                actual: channels.ncols(),
            });
        }
        let mut out = Array2::zeros((channels.nrows(), self.num_bins()));
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.fft_size];
        for (row, mut dest) in channels.rows().into_iter().zip(out.rows_mut()) {
            for (slot, &value) in buffer.iter_mut().zip(row.iter()) {
                *slot = Complex64::new(value, 0.0);
            }
            self.fft.process(&mut buffer);
            for (d, s) in dest.iter_mut().zip(&buffer) {
                *d = *s;
            }
        }
        Ok(out)
    }
}

/// Power spectral density of a complex spectrum in units of signal²/Hz.
pub fn psd(spectrum: &Array2<Complex64>, n: usize, sample_rate_hz: f64) -> Array2<f64> {
    let norm = fft_norm(n, sample_rate_hz);
    spectrum.mapv(|z| z.norm_sqr() * norm * norm)
}
