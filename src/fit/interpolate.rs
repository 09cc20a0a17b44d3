use serde::{Deserialize, Serialize};

use crate::fit::least_squares::fit_line;
use crate::fit::FitError;

/// Piecewise quadratic through the samples, each point evaluated from the
/// three samples nearest to it.
///
/// Deserialization goes through [`QuadraticInterpolant::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInterpolant")]
pub struct QuadraticInterpolant {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

#[derive(Deserialize)]
struct RawInterpolant {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl TryFrom<RawInterpolant> for QuadraticInterpolant {
    type Error = FitError;

    fn try_from(raw: RawInterpolant) -> Result<Self, Self::Error> {
        Self::new(raw.xs, raw.ys)
    }
}

impl QuadraticInterpolant {
    /// `xs` must be strictly increasing; every value must be finite.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, FitError> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(FitError::InsufficientData {
                needed: 1,
                got: xs.len().min(ys.len()),
            });
        }
        if xs.iter().chain(&ys).any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }
        if xs.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FitError::Unsorted);
        }
        Ok(Self { xs, ys })
    }

    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        match n {
            1 => self.ys[0],
            2 => {
                let t = (x - self.xs[0]) / (self.xs[1] - self.xs[0]);
                self.ys[0] + t * (self.ys[1] - self.ys[0])
            }
            _ => {
                // window of three samples around x, clamped to the ends
                let upper = self.xs.partition_point(|&xi| xi < x);
                let start = upper.saturating_sub(2).min(n - 3);
                let (x0, x1, x2) = (self.xs[start], self.xs[start + 1], self.xs[start + 2]);
                let (y0, y1, y2) = (self.ys[start], self.ys[start + 1], self.ys[start + 2]);
                y0 * (x - x1) * (x - x2) / ((x0 - x1) * (x0 - x2))
                    + y1 * (x - x0) * (x - x2) / ((x1 - x0) * (x1 - x2))
                    + y2 * (x - x0) * (x - x1) / ((x2 - x0) * (x2 - x1))
            }
        }
    }
}

/// How to continue a curve past the sampled range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtrapolationKind {
    Polynomial { order: usize },
    PowerLaw,
    LogLinear,
}

/// A fitted extrapolation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extrapolation {
    /// Ascending coefficients in x.
    Polynomial { coefficients: Vec<f64> },
    /// a·x^p
    PowerLaw { amplitude: f64, exponent: f64 },
    /// c + s·log10(x)
    LogLinear { offset: f64, slope: f64 },
}

impl Extrapolation {
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Extrapolation::Polynomial { coefficients } => {
                coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
            }
            Extrapolation::PowerLaw {
                amplitude,
                exponent,
            } => amplitude * x.powf(*exponent),
            Extrapolation::LogLinear { offset, slope } => offset + slope * x.log10(),
        }
    }

    /// Fits `kind` to the samples. Power laws need positive data and fall
    /// back to a constant otherwise.
    pub fn fit(kind: ExtrapolationKind, xs: &[f64], ys: &[f64]) -> Self {
        match kind {
            ExtrapolationKind::Polynomial { order } => polynomial(xs, ys, order),
            ExtrapolationKind::PowerLaw => {
                if xs.iter().chain(ys).any(|&v| v <= 0.0) {
                    return polynomial(xs, ys, 0);
                }
                let lx: Vec<f64> = xs.iter().map(|x| x.log10()).collect();
                let ly: Vec<f64> = ys.iter().map(|y| y.log10()).collect();
                let exponent = fit_line(&lx, &ly).map_or(0.0, |(slope, _)| slope);
                // least-squares amplitude for the fixed exponent
                let (num, den) = xs.iter().zip(ys).fold((0.0, 0.0), |(n, d), (x, y)| {
                    let basis = x.powf(exponent);
                    (n + y * basis, d + basis * basis)
                });
                Extrapolation::PowerLaw {
                    amplitude: num / den,
                    exponent,
                }
            }
            ExtrapolationKind::LogLinear => {
                if xs.iter().any(|&x| x <= 0.0) {
                    return polynomial(xs, ys, 0);
                }
                let lx: Vec<f64> = xs.iter().map(|x| x.log10()).collect();
                match fit_line(&lx, ys) {
                    Some((slope, offset)) => Extrapolation::LogLinear { offset, slope },
                    None => polynomial(xs, ys, 0),
                }
            }
        }
    }

    /// Adjusts the fit so it passes through `(x, y)`.
    fn match_at(&mut self, x: f64, y: f64) {
        let current = self.eval(x);
        if !current.is_finite() {
            return;
        }
        match self {
            Extrapolation::PowerLaw { amplitude, .. } => {
                if current != 0.0 {
                    *amplitude *= y / current;
                }
            }
            Extrapolation::Polynomial { coefficients } => {
                if let Some(c0) = coefficients.first_mut() {
                    *c0 += y - current;
                }
            }
            Extrapolation::LogLinear { offset, .. } => *offset += y - current,
        }
    }
}

/// Order 0 is the mean; order 1 a least-squares line. Higher orders are
/// clamped to 1.
fn polynomial(xs: &[f64], ys: &[f64], order: usize) -> Extrapolation {
    let mean = if ys.is_empty() {
        0.0
    } else {
        ys.iter().sum::<f64>() / ys.len() as f64
    };
    let coefficients = match (order, fit_line(xs, ys)) {
        (0, _) | (_, None) => vec![mean],
        (_, Some((slope, intercept))) => vec![intercept, slope],
    };
    Extrapolation::Polynomial { coefficients }
}

/// Extrapolation choice and sample count for one side of the band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeFit {
    pub kind: ExtrapolationKind,
    pub points: usize,
}

impl EdgeFit {
    pub fn new(kind: ExtrapolationKind, points: usize) -> Self {
        Self { kind, points }
    }
}

/// Quadratic interpolation inside the sampled range with fitted
/// extrapolations on either side, continuous at the boundary samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtrapolatingInterpolant {
    interpolant: QuadraticInterpolant,
    lower: Extrapolation,
    upper: Extrapolation,
}

impl ExtrapolatingInterpolant {
    pub fn fit(
        xs: Vec<f64>,
        ys: Vec<f64>,
        lower: EdgeFit,
        upper: EdgeFit,
    ) -> Result<Self, FitError> {
        let interpolant = QuadraticInterpolant::new(xs, ys)?;
        let (xs, ys) = (interpolant.xs(), interpolant.ys());
        let n = xs.len();

        let lo = lower.points.clamp(1, n);
        let mut lower_fit = Extrapolation::fit(lower.kind, &xs[..lo], &ys[..lo]);
        lower_fit.match_at(xs[0], ys[0]);

        let hi = n - upper.points.clamp(1, n);
        let mut upper_fit = Extrapolation::fit(upper.kind, &xs[hi..], &ys[hi..]);
        upper_fit.match_at(xs[n - 1], ys[n - 1]);

        Ok(Self {
            interpolant,
            lower: lower_fit,
            upper: upper_fit,
        })
    }

    pub fn lower(&self) -> &Extrapolation {
        &self.lower
    }

    pub fn upper(&self) -> &Extrapolation {
        &self.upper
    }

    pub fn eval(&self, x: f64) -> f64 {
        let xs = self.interpolant.xs();
        if x < xs[0] {
            self.lower.eval(x)
        } else if x > xs[xs.len() - 1] {
            self.upper.eval(x)
        } else {
            self.interpolant.eval(x)
        }
    }
}
