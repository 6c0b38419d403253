//! Bounded Levenberg–Marquardt least squares.
//!
//! The optimizer works in scaled coordinates `u = p / scale`, so every
//! parameter is O(1) regardless of physical units. Residual functions may
//! return `None` to signal that a trial point lies outside the model domain;
//! such steps are rejected and the damping is increased.

use nalgebra::{DMatrix, DVector};

use crate::config::OptimizerConfig;
use crate::error::{Error, Result};

/// Outcome of a converged minimisation.
#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: Vec<f64>,
    /// 1-sigma errors from the residual-variance-scaled covariance, when
    /// there are more residuals than parameters and `JᵀJ` is invertible.
    pub errors: Option<Vec<f64>>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
}

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e20;
const DIAG_FLOOR: f64 = 1e-30;

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

fn all_finite(r: &[f64]) -> bool {
    r.iter().all(|v| v.is_finite())
}

fn minimize<F>(residuals: F, p0: &[f64], scales: &[f64], opts: &OptimizerConfig) -> Result<LmReport>
where
    F: Fn(&[f64]) -> Option<Vec<f64>>,
{
    let k = p0.len();
    if k == 0 || scales.len() != k {
        return Err(Error::config("parameter and scale vectors must be non-empty and equal length"));
    }
    if scales.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(Error::poor_fit(format!("non-positive parameter scale in {scales:?}")));
    }

    let to_params = |u: &DVector<f64>| -> Vec<f64> { u.iter().zip(scales).map(|(v, s)| v * s).collect() };
    let eval = |u: &DVector<f64>| -> Option<Vec<f64>> {
        let r = residuals(&to_params(u))?;
        all_finite(&r).then_some(r)
    };

    let mut u = DVector::from_iterator(k, p0.iter().zip(scales).map(|(p, s)| p / s));
    let mut r = eval(&u).ok_or_else(|| Error::poor_fit("initial guess outside the model domain"))?;
    let m = r.len();
    if m < k {
        return Err(Error::insufficient(format!("{m} residuals for {k} parameters")));
    }
    let mut cost = sum_sq(&r);
    let mut jac = jacobian(&eval, &u, &r)?;
    let mut lambda = LAMBDA_INIT;

    for iter in 1..=opts.max_iterations {
        if cost == 0.0 {
            return Ok(finish(to_params(&u), &jac, cost, iter));
        }

        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let neg_grad = -(&jt * DVector::from_column_slice(&r));

        // Marquardt damping on the diagonal; retried with more damping until
        // a step improves the cost or the step becomes negligible.
        loop {
            let mut a = jtj.clone();
            for i in 0..k {
                a[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
            }
            let step = match a.cholesky() {
                Some(chol) => chol.solve(&neg_grad),
                None => {
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        return Err(Error::poor_fit("singular normal equations"));
                    }
                    continue;
                }
            };
            let step_small = step.norm() <= opts.xtol * (u.norm() + opts.xtol);
            let trial = &u + &step;
            let accepted = eval(&trial).map(|rt| (sum_sq(&rt), rt)).filter(|(c, _)| *c < cost);

            match accepted {
                Some((new_cost, new_r)) => {
                    let reduction = cost - new_cost;
                    u = trial;
                    r = new_r;
                    let old_cost = cost;
                    cost = new_cost;
                    lambda = (lambda / 10.0).max(1e-12);
                    jac = jacobian(&eval, &u, &r)?;
                    if reduction <= opts.ftol * old_cost || step_small {
                        log::trace!("lm converged after {iter} iterations, cost {cost:e}");
                        return Ok(finish(to_params(&u), &jac, cost, iter));
                    }
                    break;
                }
                None => {
                    if step_small {
                        // No representable improvement left around `u`.
                        return Ok(finish(to_params(&u), &jac, cost, iter));
                    }
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        return Err(Error::poor_fit("optimizer stalled without converging"));
                    }
                }
            }
        }
    }

    Err(Error::poor_fit(format!(
        "no convergence within {} iterations",
        opts.max_iterations
    )))
}

/// Forward-difference Jacobian in scaled coordinates; falls back to a
/// backward difference when the forward point leaves the model domain.
fn jacobian<F>(eval: &F, u: &DVector<f64>, r: &[f64]) -> Result<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> Option<Vec<f64>>,
{
    let k = u.len();
    let m = r.len();
    let mut jac = DMatrix::zeros(m, k);
    for j in 0..k {
        let h = 1e-7 * u[j].abs().max(1.0);
        let mut probe = u.clone();
        probe[j] += h;
        let (rp, signed_h) = match eval(&probe) {
            Some(rp) => (rp, h),
            None => {
                probe[j] = u[j] - h;
                let rm = eval(&probe)
                    .ok_or_else(|| Error::poor_fit("model undefined on both sides of the current point"))?;
                (rm, -h)
            }
        };
        for i in 0..m {
            jac[(i, j)] = (rp[i] - r[i]) / signed_h;
        }
    }
    Ok(jac)
}

fn finish(params: Vec<f64>, jac: &DMatrix<f64>, cost: f64, iterations: usize) -> LmReport {
    let (m, k) = jac.shape();
    let errors = if m > k {
        let jtj = jac.transpose() * jac;
        jtj.try_inverse().and_then(|cov| {
            let sigma2 = cost / (m - k) as f64;
            let errs: Vec<f64> = (0..k).map(|i| (cov[(i, i)] * sigma2).abs().sqrt()).collect();
            errs.iter().all(|e| e.is_finite()).then_some(errs)
        })
    } else {
        None
    };
    LmReport {
        params,
        errors,
        cost,
        iterations,
    }
}

impl LmReport {
    fn scale_errors(mut self, scales: &[f64]) -> Self {
        if let Some(errs) = self.errors.as_mut() {
            for (e, s) in errs.iter_mut().zip(scales) {
                *e *= s;
            }
        }
        self
    }
}

/// Minimise `Σ r_i(p)²` starting from `p0`.
///
/// `scales` must be positive and have the same length as `p0`. Fails with
/// [`Error::PoorFit`] when the start point is outside the model domain or the
/// iteration cap is reached without convergence. Errors are reported in
/// parameter units.
pub fn least_squares<F>(residuals: F, p0: &[f64], scales: &[f64], opts: &OptimizerConfig) -> Result<LmReport>
where
    F: Fn(&[f64]) -> Option<Vec<f64>>,
{
    minimize(residuals, p0, scales, opts).map(|rep| rep.scale_errors(scales))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn opts() -> OptimizerConfig {
        OptimizerConfig::default()
    }

    #[test]
    fn fits_exponential_decay() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|&v| 4.0 * (-0.7 * v).exp()).collect();
        let rep = least_squares(
            |p| Some(t.iter().zip(&y).map(|(&ti, &yi)| p[0] * (-p[1] * ti).exp() - yi).collect()),
            &[1.0, 0.2],
            &[1.0, 0.1],
            &opts(),
        )
        .unwrap();
        assert_relative_eq!(rep.params[0], 4.0, max_relative = 1e-6);
        assert_relative_eq!(rep.params[1], 0.7, max_relative = 1e-6);
    }

    #[test]
    fn respects_model_domain() {
        // sqrt(a - x) is only defined for a >= max(x)
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| (12.0 - v).sqrt()).collect();
        let rep = least_squares(
            |p| {
                x.iter()
                    .zip(&y)
                    .map(|(&xi, &yi)| (p[0] >= xi).then(|| (p[0] - xi).sqrt() - yi))
                    .collect()
            },
            &[20.0],
            &[2.0],
            &opts(),
        )
        .unwrap();
        assert_relative_eq!(rep.params[0], 12.0, max_relative = 1e-6);
    }

    #[test]
    fn infeasible_start_is_poor_fit() {
        let err = least_squares(|_| None, &[1.0], &[1.0], &opts()).unwrap_err();
        assert!(matches!(err, Error::PoorFit(_)));
    }

    #[test]
    fn iteration_cap_is_enforced() {
        let capped = OptimizerConfig {
            max_iterations: 1,
            ..OptimizerConfig::default()
        };
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|&v| 4.0 * (-0.7 * v).exp()).collect();
        let res = least_squares(
            |p| Some(t.iter().zip(&y).map(|(&ti, &yi)| p[0] * (-p[1] * ti).exp() - yi).collect()),
            &[1.0, 0.2],
            &[1.0, 0.1],
            &capped,
        );
        assert!(matches!(res, Err(Error::PoorFit(_))));
    }

    #[test]
    fn errors_reported_for_noisy_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| 2.0 * v + 1.0 + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let rep = least_squares(
            |p| Some(x.iter().zip(&y).map(|(&xi, &yi)| p[0] * xi + p[1] - yi).collect()),
            &[1.0, 0.0],
            &[1.0, 1.0],
            &opts(),
        )
        .unwrap();
        let errs = rep.errors.unwrap();
        assert_eq!(errs.len(), 2);
        assert!(errs[0] > 0.0 && errs[0] < 0.01);
    }
}
