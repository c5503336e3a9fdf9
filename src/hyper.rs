use faer::Side;
use ndarray::{Array1, Array2};
use wolfe_bfgs::{Bfgs, BfgsError};

use crate::estimate::FitError;
use crate::faer_ndarray::FaerCholesky;
use crate::kernel::ExactSeKernel;

/// Cost assigned to hyperparameter proposals whose covariance cannot be
/// factorized, steering the line search back toward feasible lengthscales.
const INFEASIBLE_COST: f64 = 1e10;

/// Negative log marginal likelihood of the envelope-scaled GP and its
/// derivative with respect to `rho = ln(l)`. Returns `None` when the
/// observation covariance at this lengthscale is not positive-definite.
pub(crate) struct NlmlProblem<'a> {
    pub sig_f: f64,
    pub x: &'a Array1<f64>,
    pub alpha: &'a Array1<f64>,
    pub y: &'a Array1<f64>,
    pub noise_var: f64,
}

impl NlmlProblem<'_> {
    pub(crate) fn value_and_grad(&self, rho: f64) -> Option<(f64, f64)> {
        let l = rho.exp();
        if !l.is_finite() || l <= 0.0 {
            return None;
        }
        let kernel = ExactSeKernel { sig_f: self.sig_f, l };
        let n = self.x.len();
        let kyy = kernel.observation_covariance(self.x, self.alpha, self.noise_var);
        let factor = kyy.cholesky(Side::Lower).ok()?;

        let weights = factor.solve_vec(self.y);
        let log_det_half = factor.diag().mapv(f64::ln).sum();
        let nlml = 0.5 * self.y.dot(&weights)
            + log_det_half
            + 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

        // dK/drho = K ∘ (d²/l²) for the noise-free part; the noise diagonal
        // does not depend on the lengthscale.
        let mut dk = Array2::<f64>::zeros((n, n));
        let k = kernel.covariance(self.x, self.alpha);
        let l2 = l * l;
        for i in 0..n {
            for j in 0..n {
                let d = self.x[i] - self.x[j];
                dk[[i, j]] = k[[i, j]] * d * d / l2;
            }
        }
        let kyy_inv_dk = factor.solve_mat(&dk);
        let trace = (0..n).map(|i| kyy_inv_dk[[i, i]]).sum::<f64>();
        let grad = 0.5 * (trace - weights.dot(&dk.dot(&weights)));

        if nlml.is_finite() && grad.is_finite() {
            Some((nlml, grad))
        } else {
            None
        }
    }
}

/// Smallest lengthscale the data can support: ten mean grid spacings in
/// scaled units, below which the kernel stops coupling neighboring points.
pub(crate) fn lengthscale_floor(x: &Array1<f64>) -> f64 {
    let n = x.len();
    10.0 * (x[n - 1] - x[0]) / (n - 1) as f64
}

/// Maximize the marginal likelihood over the lengthscale with BFGS in
/// `rho = ln(l)`, starting from `l = 1` in scaled units. Partial line-search
/// or iteration-limit failures fall back to the best point visited; the
/// result is clamped to the grid-resolution floor.
pub fn optimise_lengthscale(
    sig_f: f64,
    x: &Array1<f64>,
    alpha: &Array1<f64>,
    y: &Array1<f64>,
    noise_var: f64,
) -> Result<f64, FitError> {
    let problem = NlmlProblem {
        sig_f,
        x,
        alpha,
        y,
        noise_var,
    };
    let objective = |p: &Array1<f64>| match problem.value_and_grad(p[0]) {
        Some((value, grad)) => (value, Array1::from(vec![grad])),
        None => (INFEASIBLE_COST, Array1::from(vec![0.0])),
    };

    let result = Bfgs::new(Array1::from(vec![0.0]), objective)
        .with_tolerance(1e-6)
        .with_max_iterations(100)
        .run();

    let rho = match result {
        Ok(solution) => solution.final_point[0],
        Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
            log::warn!(
                "lengthscale line search stalled after {} iterations; keeping best value {:.4e}",
                last_solution.iterations,
                last_solution.final_value
            );
            last_solution.final_point[0]
        }
        Err(BfgsError::MaxIterationsReached { last_solution }) => {
            log::warn!("lengthscale optimization hit the iteration limit; keeping best value");
            last_solution.final_point[0]
        }
        Err(e) => {
            return Err(FitError::HyperparameterOptimizationFailed(format!("{e:?}")));
        }
    };

    let l = rho.exp();
    if !l.is_finite() || l <= 0.0 {
        return Err(FitError::HyperparameterOptimizationFailed(format!(
            "optimizer returned lengthscale {l}"
        )));
    }
    let floor = lengthscale_floor(x);
    if l < floor {
        log::warn!("optimized lengthscale {l:.4e} below grid floor {floor:.4e}; clamping");
        return Ok(floor);
    }
    log::debug!("optimized lengthscale {l:.4e} (scaled units)");
    Ok(l)
}
