use faer::Side;
use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::faer_ndarray::FaerCholesky;

#[derive(Debug, Error)]
pub enum NllsError {
    #[error("residual vector contains non-finite values")]
    NonFiniteResidual,
    #[error(
        "Levenberg-Marquardt did not converge within {iterations} iterations (last cost {last_cost:.6e})"
    )]
    DidNotConverge { iterations: usize, last_cost: f64 },
}

#[derive(Debug, Clone)]
pub struct LmOptions {
    pub max_iterations: usize,
    pub cost_tolerance: f64,
    pub step_tolerance: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            cost_tolerance: 1e-12,
            step_tolerance: 1e-12,
        }
    }
}

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;

fn forward_difference_jacobian<F>(
    residual: &F,
    params: &Array1<f64>,
    r0: &Array1<f64>,
) -> Array2<f64>
where
    F: Fn(&Array1<f64>) -> Array1<f64>,
{
    let m = r0.len();
    let np = params.len();
    let mut jac = Array2::<f64>::zeros((m, np));
    for j in 0..np {
        let h = f64::EPSILON.sqrt() * params[j].abs().max(1.0);
        let mut shifted = params.clone();
        shifted[j] += h;
        let r_shifted = residual(&shifted);
        for i in 0..m {
            jac[[i, j]] = (r_shifted[i] - r0[i]) / h;
        }
    }
    jac
}

/// Damped least squares with a forward-difference Jacobian; no analytic
/// Jacobian is required of the caller. The damping term uses Marquardt's
/// diagonal scaling and a multiplicative accept/reject schedule.
pub fn levenberg_marquardt<F>(
    residual: F,
    initial: Array1<f64>,
    options: &LmOptions,
) -> Result<Array1<f64>, NllsError>
where
    F: Fn(&Array1<f64>) -> Array1<f64>,
{
    let mut params = initial;
    let mut r = residual(&params);
    if !r.iter().all(|v| v.is_finite()) {
        return Err(NllsError::NonFiniteResidual);
    }
    let mut cost = 0.5 * r.dot(&r);
    let mut lambda = LAMBDA_INIT;

    for iteration in 0..options.max_iterations {
        let jac = forward_difference_jacobian(&residual, &params, &r);
        let gradient = jac.t().dot(&r);
        let hessian_approx = jac.t().dot(&jac);

        let mut accepted = false;
        while lambda <= LAMBDA_MAX {
            let mut damped = hessian_approx.clone();
            for j in 0..damped.nrows() {
                damped[[j, j]] += lambda * hessian_approx[[j, j]].max(1e-12);
            }
            let factor = match damped.cholesky(Side::Lower) {
                Ok(f) => f,
                Err(_) => {
                    lambda *= 10.0;
                    continue;
                }
            };
            let step = factor.solve_vec(&gradient.mapv(|v| -v));
            if !step.iter().all(|v| v.is_finite()) {
                lambda *= 10.0;
                continue;
            }

            let trial = &params + &step;
            let r_trial = residual(&trial);
            let trial_cost = if r_trial.iter().all(|v| v.is_finite()) {
                0.5 * r_trial.dot(&r_trial)
            } else {
                f64::INFINITY
            };

            if trial_cost < cost {
                let improvement = cost - trial_cost;
                let step_norm = step.dot(&step).sqrt();
                let param_norm = params.dot(&params).sqrt();
                params = trial;
                r = r_trial;
                cost = trial_cost;
                lambda = (lambda / 3.0).max(1e-12);
                accepted = true;

                let converged = improvement <= options.cost_tolerance * cost.max(1e-30)
                    || step_norm <= options.step_tolerance * (param_norm + options.step_tolerance);
                if converged {
                    return Ok(params);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // Damping exhausted: the current point is a (numerical)
            // stationary point if the gradient is already small.
            let grad_norm = gradient.dot(&gradient).sqrt();
            if grad_norm <= 1e-8 * cost.max(1.0) {
                return Ok(params);
            }
            return Err(NllsError::DidNotConverge {
                iterations: iteration + 1,
                last_cost: cost,
            });
        }
    }

    Err(NllsError::DidNotConverge {
        iterations: options.max_iterations,
        last_cost: cost,
    })
}
