//! Small dense least-squares helpers: a Levenberg–Marquardt minimizer for
//! few-parameter models and straight-line regression.

use linreg::linear_regression;

use crate::config::SolverOptions;
use crate::fit::FitError;

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e20;
const DIFF_STEP: f64 = 1e-7;

#[derive(Clone, Debug)]
pub struct LmSolution<const N: usize> {
    pub params: [f64; N],
    /// Weighted sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
}

/// Minimizes Σ((model(x, p) − y) / σ)² over `p`.
///
/// Jacobians are taken by central differences; damping uses Marquardt's
/// diagonal scaling so parameters of very different magnitude share one
/// step.
pub fn levenberg_marquardt<const N: usize, F>(
    model: F,
    xs: &[f64],
    ys: &[f64],
    sigma: &[f64],
    initial: [f64; N],
    options: &SolverOptions,
) -> Result<LmSolution<N>, FitError>
where
    F: Fn(f64, &[f64; N]) -> f64,
{
    if xs.len() < N || ys.len() != xs.len() || sigma.len() != xs.len() {
        return Err(FitError::InsufficientData {
            needed: N,
            got: xs.len().min(ys.len()).min(sigma.len()),
        });
    }
    let residuals = |p: &[f64; N]| -> Vec<f64> {
        xs.iter()
            .zip(ys)
            .zip(sigma)
            .map(|((&x, &y), &s)| (model(x, p) - y) / s)
            .collect()
    };
    let cost_of = |r: &[f64]| r.iter().map(|v| v * v).sum::<f64>();

    let mut params = initial;
    let mut r = residuals(&params);
    let mut cost = cost_of(&r);
    if !cost.is_finite() {
        return Err(FitError::NonFinite);
    }
    let mut lambda = LAMBDA_START;

    for iteration in 1..=options.max_iterations {
        let jac = jacobian(&residuals, &params, xs.len());
        let mut jtj = [[0.0; N]; N];
        let mut jtr = [0.0; N];
        for (row, &ri) in jac.iter().zip(&r) {
            for a in 0..N {
                jtr[a] += row[a] * ri;
                for b in 0..N {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }

        let mut accepted = None;
        while lambda <= LAMBDA_MAX {
            let mut damped = jtj;
            for (a, row) in damped.iter_mut().enumerate() {
                row[a] += lambda * jtj[a][a].max(f64::MIN_POSITIVE);
            }
            let rhs = jtr.map(|v| -v);
            if let Some(step) = solve(damped, rhs) {
                let mut trial = params;
                for (p, d) in trial.iter_mut().zip(step) {
                    *p += d;
                }
                let trial_r = residuals(&trial);
                let trial_cost = cost_of(&trial_r);
                if trial_cost.is_finite() && trial_cost < cost {
                    accepted = Some((trial, trial_r, trial_cost));
                    lambda = (lambda * 0.1).max(1e-12);
                    break;
                }
            }
            lambda *= 10.0;
        }

        let Some((trial, trial_r, trial_cost)) = accepted else {
            // no damping level improves the cost: we sit on a minimum
            return Ok(LmSolution {
                params,
                cost,
                iterations: iteration,
            });
        };
        let improvement = cost - trial_cost;
        params = trial;
        r = trial_r;
        cost = trial_cost;
        if improvement <= options.tolerance * cost || cost == 0.0 {
            return Ok(LmSolution {
                params,
                cost,
                iterations: iteration,
            });
        }
    }
    Err(FitError::NotConverged {
        iterations: options.max_iterations,
    })
}

fn jacobian<const N: usize>(
    residuals: &impl Fn(&[f64; N]) -> Vec<f64>,
    params: &[f64; N],
    rows: usize,
) -> Vec<[f64; N]> {
    let mut jac = vec![[0.0; N]; rows];
    for j in 0..N {
        let h = DIFF_STEP * params[j].abs().max(1e-3);
        let mut up = *params;
        let mut down = *params;
        up[j] += h;
        down[j] -= h;
        let r_up = residuals(&up);
        let r_down = residuals(&down);
        for (row, (u, d)) in jac.iter_mut().zip(r_up.iter().zip(&r_down)) {
            row[j] = (u - d) / (2.0 * h);
        }
    }
    jac
}

/// Gaussian elimination with partial pivoting; `None` for singular systems.
fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < f64::MIN_POSITIVE || !a[pivot][col].is_finite() {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Ordinary least-squares line; returns `(slope, intercept)`.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    if xs.len() < 2 {
        return None;
    }
    linear_regression::<f64, f64, f64>(xs, ys)
        .ok()
        .filter(|(slope, intercept)| slope.is_finite() && intercept.is_finite())
}
