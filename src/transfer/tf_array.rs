use log::{debug, warn};
use ndarray::{Array2, Array3, ArrayView2, Axis as NdAxis};
use rustfft::num_complex::Complex64;

use crate::fit::TransferFunction;
use crate::transfer::TransferError;
use crate::types::NUM_AXES;

/// Transfer function sampled on a frequency grid, one response × drive
/// matrix per grid point.
#[derive(Clone, Debug)]
pub struct TfArray {
    pub frequencies_hz: Vec<f64>,
    pub values: Array3<Complex64>,
}

impl TfArray {
    pub fn new(frequencies_hz: Vec<f64>, values: Array3<Complex64>) -> Result<Self, TransferError> {
        if frequencies_hz.len() < 2 {
            return Err(TransferError::GridTooShort(frequencies_hz.len()));
        }
        let (n, rows, cols) = values.dim();
        if n != frequencies_hz.len() {
            return Err(TransferError::SampleCountMismatch {
                channel: "transfer array",
                expected: frequencies_hz.len(),
                actual: n,
            });
        }
        if rows != NUM_AXES || cols != NUM_AXES {
            return Err(TransferError::ChannelMismatch {
                channel: "transfer array",
                expected: NUM_AXES,
                actual: rows.max(cols),
            });
        }
        Ok(Self {
            frequencies_hz,
            values,
        })
    }

    /// Evaluates every element on `grid`; the first (DC) slice is then
    /// overwritten with the second.
    pub fn sample(tf: &TransferFunction, grid: &[f64]) -> Result<Self, TransferError> {
        if grid.len() < 2 {
            return Err(TransferError::GridTooShort(grid.len()));
        }
        let mut values = Array3::zeros((grid.len(), NUM_AXES, NUM_AXES));
        for r in 0..NUM_AXES {
            for d in 0..NUM_AXES {
                for (i, z) in tf.evaluate_many(r, d, grid)?.into_iter().enumerate() {
                    values[[i, r, d]] = z;
                }
            }
        }
        let second = values.index_axis(NdAxis(0), 1).to_owned();
        values.index_axis_mut(NdAxis(0), 0).assign(&second);
        debug!("sampled transfer function on {} grid points", grid.len());
        Ok(Self {
            frequencies_hz: grid.to_vec(),
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.frequencies_hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies_hz.is_empty()
    }

    pub fn slice(&self, index: usize) -> ArrayView2<'_, Complex64> {
        self.values.index_axis(NdAxis(0), index)
    }

    /// Slice-by-slice matrix inverse.
    pub fn invert(&self) -> Result<TfArray, TransferError> {
        let mut out = Array3::zeros(self.values.raw_dim());
        for (index, (slice, mut target)) in self
            .values
            .outer_iter()
            .zip(out.outer_iter_mut())
            .enumerate()
        {
            let inv = invert3(slice).ok_or(TransferError::SingularMatrix {
                index,
                frequency: self.frequencies_hz[index],
            })?;
            target.assign(&inv);
        }
        Ok(TfArray {
            frequencies_hz: self.frequencies_hz.clone(),
            values: out,
        })
    }

    /// 1-norm condition number per slice; infinite where a slice is singular.
    pub fn condition_numbers(&self) -> Vec<f64> {
        let conds: Vec<f64> = self
            .values
            .outer_iter()
            .map(|slice| match invert3(slice.view()) {
                Some(inv) => norm1(slice) * norm1(inv.view()),
                None => f64::INFINITY,
            })
            .collect();
        if let Some((i, c)) = conds
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .filter(|(_, c)| **c > 1e12)
        {
            warn!(
                "transfer matrix is ill-conditioned at {:.2} Hz (cond {c:.2e})",
                self.frequencies_hz[i]
            );
        }
        conds
    }
}

/// Inverse of a 3x3 complex matrix via the adjugate.
pub fn invert3(m: ArrayView2<Complex64>) -> Option<Array2<Complex64>> {
    let c = |i: usize, j: usize| m[[i % 3, j % 3]];
    // cofactor of (j, i), i.e. adjugate entry (i, j)
    let adj = |i: usize, j: usize| {
        c(j + 1, i + 1) * c(j + 2, i + 2) - c(j + 1, i + 2) * c(j + 2, i + 1)
    };
    let det = m[[0, 0]] * adj(0, 0) + m[[0, 1]] * adj(1, 0) + m[[0, 2]] * adj(2, 0);
    if det.norm() == 0.0 || !det.is_finite() {
        return None;
    }
    let inv = Array2::from_shape_fn((3, 3), |(i, j)| adj(i, j) / det);
    inv.iter().all(|z| z.is_finite()).then_some(inv)
}

fn norm1(m: ArrayView2<Complex64>) -> f64 {
    m.columns()
        .into_iter()
        .map(|col| col.iter().map(|z| z.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{
        ComponentModel, DampedOscillator, EdgeFit, ExtrapolatingInterpolant, ExtrapolationKind,
        FitError,
    };

    fn zero_component() -> ComponentModel {
        let constant = EdgeFit::new(ExtrapolationKind::Polynomial { order: 0 }, 1);
        let flat =
            || ExtrapolatingInterpolant::fit(vec![10.0], vec![0.0], constant, constant).unwrap();
        ComponentModel::Interpolated {
            magnitude: flat(),
            phase: flat(),
        }
    }

    fn diagonal_tf() -> TransferFunction {
        TransferFunction::from_components(std::array::from_fn(|r| {
            std::array::from_fn(|d| {
                if r == d {
                    ComponentModel::Parametric(DampedOscillator {
                        amplitude: 1.0 + r as f64,
                        resonance_hz: 100.0 * (r + 1) as f64,
                        damping_hz: 10.0,
                        phase_offset: 0.0,
                    })
                } else {
                    zero_component()
                }
            })
        }))
    }

    #[test]
    fn dc_slice_copies_first_grid_point() {
        let tf = diagonal_tf();
        let arr = TfArray::sample(&tf, &[0.0, 5.0, 50.0, 500.0]).unwrap();
        assert_eq!(arr.len(), 4);
        assert_eq!(arr.slice(0), arr.slice(1));
        assert_ne!(arr.slice(1), arr.slice(2));
        let expected = tf.evaluate(1, 1, 50.0).unwrap();
        assert_eq!(arr.values[[2, 1, 1]], expected);
    }

    #[test]
    fn inverse_of_inverse_is_original() {
        let tf = diagonal_tf();
        let mut arr = TfArray::sample(&tf, &[0.0, 20.0, 150.0, 320.0]).unwrap();
        // some coupling so the inverse is not trivially diagonal
        for mut slice in arr.values.outer_iter_mut() {
            slice[[0, 2]] = Complex64::new(1e-5, -2e-6);
            slice[[2, 1]] = Complex64::new(-3e-6, 1e-6);
        }
        let inv = arr.invert().unwrap();
        let back = inv.invert().unwrap();
        for (a, b) in back.values.iter().zip(arr.values.iter()) {
            assert!((a - b).norm() <= 1e-9 * b.norm().max(1e-6), "{a} vs {b}");
        }
        for i in 0..arr.len() {
            let product = arr.slice(i).dot(&inv.slice(i));
            for r in 0..NUM_AXES {
                for c in 0..NUM_AXES {
                    let expected = if r == c { 1.0 } else { 0.0 };
                    assert!((product[[r, c]] - Complex64::new(expected, 0.0)).norm() < 1e-9);
                }
            }
        }
        assert!(arr.condition_numbers().iter().all(|c| c.is_finite() && *c >= 1.0));
    }

    #[test]
    fn singular_slice_is_reported() {
        let mut values = Array3::zeros((3, NUM_AXES, NUM_AXES));
        for i in 0..3 {
            for k in 0..NUM_AXES {
                values[[i, k, k]] = Complex64::new(1.0, 0.0);
            }
        }
        values[[2, 1, 1]] = Complex64::new(0.0, 0.0);
        let arr = TfArray::new(vec![0.0, 1.0, 2.0], values).unwrap();
        let err = arr.invert().unwrap_err();
        assert!(matches!(
            err,
            TransferError::SingularMatrix { index: 2, frequency } if frequency == 2.0
        ));
        assert!(arr.condition_numbers()[2].is_infinite());
    }

    #[test]
    fn short_grid_and_failed_components_are_errors() {
        let tf = diagonal_tf();
        assert!(matches!(
            TfArray::sample(&tf, &[10.0]),
            Err(TransferError::GridTooShort(1))
        ));
        let broken = TransferFunction::from_components(std::array::from_fn(|_| {
            std::array::from_fn(|_| ComponentModel::Failed {
                reason: "no data".into(),
            })
        }));
        let err = TfArray::sample(&broken, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Fit(FitError::FailedComponent { response: 0, drive: 0, .. })
        ));
    }
}
