//! L2-penalized Poisson regression with a log link.
//!
//! Minimizes `mean(exp(eta) - y * eta) + alpha / 2 * ||w||^2` where
//! `eta = b + x . w`, which is half the mean Poisson deviance up to a
//! constant. The intercept `b` is not penalized.
//!
//! Fitting runs damped Newton steps on column-centered features. Because the
//! intercept is free, centering only shifts `b` and leaves the optimum for
//! `w` unchanged; the raw intercept is recovered after the fit. Starting
//! from `b = ln(mean y)` and `w = 0` makes every fit deterministic.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RegressionConfig;
use crate::error::{EngineError, Result};

const ARMIJO_C: f64 = 1e-4;
const MIN_STEP: f64 = 1e-10;
const STEP_TOL: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct PoissonRegressor {
    config: RegressionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedPoisson {
    coefficients: Vec<f64>,
    intercept: f64,
    alpha: f64,
    iterations: usize,
    converged: bool,
    mean_deviance: f64,
}

impl PoissonRegressor {
    pub fn new(config: RegressionConfig) -> Self {
        Self { config }
    }

    pub fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Result<FittedPoisson> {
        let n = y.len();
        if n == 0 {
            return Err(EngineError::ModelTraining("empty training set".into()));
        }
        if x.len() != n {
            return Err(EngineError::ModelTraining(format!(
                "{} feature rows for {} targets",
                x.len(),
                n
            )));
        }
        let p = x[0].len();
        if let Some(row) = x.iter().find(|row| row.len() != p) {
            return Err(EngineError::ModelTraining(format!(
                "ragged design matrix: expected {p} columns, found {}",
                row.len()
            )));
        }
        if y.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EngineError::ModelTraining(
                "targets must be finite non-negative counts".into(),
            ));
        }
        if x.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EngineError::ModelTraining("non-finite feature value".into()));
        }
        let mean_y = y.iter().sum::<f64>() / n as f64;
        if mean_y <= 0.0 {
            return Err(EngineError::ModelTraining("all targets are zero".into()));
        }

        let alpha = self.config.alpha;
        let means: Vec<f64> = (0..p)
            .map(|j| x.iter().map(|row| row[j]).sum::<f64>() / n as f64)
            .collect();
        let centered: Vec<Vec<f64>> = x
            .iter()
            .map(|row| row.iter().zip(&means).map(|(v, m)| v - m).collect())
            .collect();

        // theta[0] is the intercept, theta[1..] the coefficients.
        let mut theta = vec![0.0; p + 1];
        theta[0] = mean_y.ln();
        let mut objective = penalized_objective(&centered, y, &theta, alpha);
        if !objective.is_finite() {
            return Err(EngineError::ModelTraining("objective is not finite at start".into()));
        }

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iter {
            let (gradient, hessian) = gradient_and_hessian(&centered, y, &theta, alpha);
            let max_gradient = gradient.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
            if max_gradient <= self.config.tol {
                converged = true;
                break;
            }

            let direction = solve_symmetric(&hessian, &gradient).ok_or_else(|| {
                EngineError::ModelTraining("Hessian is not positive definite".into())
            })?;
            let decrement: f64 = gradient.iter().zip(&direction).map(|(g, d)| g * d).sum();
            let slack = 16.0 * f64::EPSILON * objective.abs().max(1.0);

            let mut step = 1.0;
            let mut accepted = None;
            while step >= MIN_STEP {
                let candidate: Vec<f64> = theta
                    .iter()
                    .zip(&direction)
                    .map(|(t, d)| t - step * d)
                    .collect();
                let value = penalized_objective(&centered, y, &candidate, alpha);
                if value.is_finite() && value <= objective - ARMIJO_C * step * decrement + slack {
                    accepted = Some((candidate, value));
                    break;
                }
                step *= 0.5;
            }

            let Some((candidate, value)) = accepted else {
                warn!(iterations, max_gradient, "line search stalled before convergence");
                break;
            };

            let scale = 1.0 + theta.iter().fold(0.0_f64, |acc, t| acc.max(t.abs()));
            let moved = theta
                .iter()
                .zip(&candidate)
                .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
            theta = candidate;
            objective = value;
            iterations += 1;
            debug!(iteration = iterations, objective, step, max_gradient, "newton step");

            if moved <= STEP_TOL * scale {
                converged = true;
                break;
            }
        }

        if theta.iter().any(|t| !t.is_finite()) {
            return Err(EngineError::ModelTraining("coefficients diverged".into()));
        }
        if !converged {
            warn!(iterations, "poisson fit stopped without converging");
        }

        let coefficients = theta[1..].to_vec();
        let shift: f64 = coefficients.iter().zip(&means).map(|(w, m)| w * m).sum();
        let intercept = theta[0] - shift;
        let mean_deviance = mean_poisson_deviance(&centered, y, &theta);

        Ok(FittedPoisson {
            coefficients,
            intercept,
            alpha,
            iterations,
            converged,
            mean_deviance,
        })
    }
}

impl FittedPoisson {
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn mean_deviance(&self) -> f64 {
        self.mean_deviance
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Log of the expected count.
    pub fn linear_predictor(&self, x: &[f64]) -> Result<f64> {
        if x.len() != self.coefficients.len() {
            return Err(EngineError::DimensionMismatch {
                expected: self.coefficients.len(),
                got: x.len(),
            });
        }
        Ok(self.intercept + dot(&self.coefficients, x))
    }

    /// Expected count, always strictly positive for finite inputs.
    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        Ok(self.linear_predictor(x)?.exp())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(u, v)| u * v).sum()
}

fn eta(row: &[f64], theta: &[f64]) -> f64 {
    theta[0] + dot(&theta[1..], row)
}

fn penalized_objective(z: &[Vec<f64>], y: &[f64], theta: &[f64], alpha: f64) -> f64 {
    let n = y.len() as f64;
    let loss: f64 = z
        .iter()
        .zip(y)
        .map(|(row, target)| {
            let e = eta(row, theta);
            e.exp() - target * e
        })
        .sum();
    let penalty: f64 = theta[1..].iter().map(|w| w * w).sum();
    loss / n + 0.5 * alpha * penalty
}

fn gradient_and_hessian(
    z: &[Vec<f64>],
    y: &[f64],
    theta: &[f64],
    alpha: f64,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let k = theta.len();
    let n = y.len() as f64;
    let mut gradient = vec![0.0; k];
    let mut hessian = vec![vec![0.0; k]; k];

    for (row, target) in z.iter().zip(y) {
        let mu = eta(row, theta).exp();
        let residual = mu - target;

        gradient[0] += residual;
        hessian[0][0] += mu;
        for (a, za) in row.iter().enumerate() {
            gradient[a + 1] += residual * za;
            hessian[0][a + 1] += mu * za;
            for (b, zb) in row.iter().enumerate().skip(a) {
                hessian[a + 1][b + 1] += mu * za * zb;
            }
        }
    }

    for i in 0..k {
        gradient[i] /= n;
        for j in i..k {
            hessian[i][j] /= n;
        }
    }
    for j in 1..k {
        gradient[j] += alpha * theta[j];
        hessian[j][j] += alpha;
    }
    for i in 0..k {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (gradient, hessian)
}

fn mean_poisson_deviance(z: &[Vec<f64>], y: &[f64], theta: &[f64]) -> f64 {
    let total: f64 = z
        .iter()
        .zip(y)
        .map(|(row, target)| {
            let mu = eta(row, theta).exp();
            if *target > 0.0 {
                2.0 * (target * (target / mu).ln() - (target - mu))
            } else {
                2.0 * mu
            }
        })
        .sum();
    total / y.len() as f64
}

/// Solves `A x = b` for symmetric positive definite `A` by Cholesky.
fn solve_symmetric(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n {
        return None;
    }

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    let mut forward = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * forward[j];
        }
        forward[i] = sum / l[i][i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = forward[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regressor(alpha: f64) -> PoissonRegressor {
        PoissonRegressor::new(RegressionConfig {
            alpha,
            ..RegressionConfig::default()
        })
    }

    fn exponential_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = x.iter().map(|row| (0.5 + 0.3 * row[0]).exp()).collect();
        (x, y)
    }

    #[test]
    fn recovers_log_linear_relationship() {
        let (x, y) = exponential_data();
        let fit = regressor(1e-9).fit(&x, &y).unwrap();

        assert!(fit.converged());
        assert!((fit.coefficients()[0] - 0.3).abs() < 1e-3);
        assert!((fit.intercept() - 0.5).abs() < 1e-2);
        assert!(fit.mean_deviance() < 1e-4);
    }

    #[test]
    fn constant_targets_give_flat_model() {
        let x = vec![vec![1.0, 3.0], vec![0.0, 5.0], vec![1.0, 9.0]];
        let y = vec![4.0, 4.0, 4.0];
        let fit = regressor(0.1).fit(&x, &y).unwrap();

        for row in &x {
            assert!((fit.predict(row).unwrap() - 4.0).abs() < 1e-9);
        }
        assert!(fit.coefficients().iter().all(|w| w.abs() < 1e-9));
    }

    #[test]
    fn fitting_is_deterministic() {
        let (x, y) = exponential_data();
        let first = regressor(0.1).fit(&x, &y).unwrap();
        let second = regressor(0.1).fit(&x, &y).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stronger_penalty_shrinks_coefficients() {
        let (x, y) = exponential_data();
        let loose = regressor(1e-6).fit(&x, &y).unwrap();
        let tight = regressor(10.0).fit(&x, &y).unwrap();
        assert!(tight.coefficients()[0].abs() < loose.coefficients()[0].abs());
    }

    #[test]
    fn handles_calendar_scale_features() {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for year in [2022.0, 2023.0, 2024.0] {
            for month in 1..=12 {
                x.push(vec![1.0, 0.0, year, month as f64]);
                y.push(((year - 2021.0) + (month % 3) as f64).max(1.0));
            }
        }
        let fit = regressor(0.1).fit(&x, &y).unwrap();

        assert!(fit.converged());
        let future = fit.predict(&[0.0, 0.0, 2025.0, 2.0]).unwrap();
        assert!(future.is_finite() && future > 0.0);
    }

    #[test]
    fn predictions_are_strictly_positive() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        let y = vec![9.0, 1.0, 0.0];
        let fit = regressor(0.01).fit(&x, &y).unwrap();
        assert!(fit.predict(&[50.0]).unwrap() > 0.0);
    }

    #[test]
    fn rejects_unusable_training_data() {
        let reg = regressor(0.1);
        assert!(matches!(reg.fit(&[], &[]), Err(EngineError::ModelTraining(_))));
        assert!(matches!(
            reg.fit(&[vec![1.0]], &[-1.0]),
            Err(EngineError::ModelTraining(_))
        ));
        assert!(matches!(
            reg.fit(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0]),
            Err(EngineError::ModelTraining(_))
        ));
        assert!(matches!(
            reg.fit(&[vec![1.0], vec![2.0]], &[0.0, 0.0]),
            Err(EngineError::ModelTraining(_))
        ));
    }

    #[test]
    fn predict_checks_width() {
        let (x, y) = exponential_data();
        let fit = regressor(0.1).fit(&x, &y).unwrap();
        assert_eq!(
            fit.predict(&[1.0, 2.0]),
            Err(EngineError::DimensionMismatch { expected: 1, got: 2 })
        );
    }

    #[test]
    fn cholesky_solves_spd_system() {
        let a = vec![vec![4.0, 1.0], vec![1.0, 3.0]];
        let x = solve_symmetric(&a, &[1.0, 2.0]).unwrap();
        assert!((4.0 * x[0] + x[1] - 1.0).abs() < 1e-12);
        assert!((x[0] + 3.0 * x[1] - 2.0).abs() < 1e-12);
        assert!(solve_symmetric(&[vec![0.0]], &[1.0]).is_none());
    }
}
