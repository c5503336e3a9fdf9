use faer::Side;
use ndarray::{Array1, Array2};

use crate::estimate::FitError;
use crate::faer_ndarray::{
    factorize_symmetric_with_fallback, solve_lower_triangular, symmetric_sqrt, FaerArrayView,
    FaerCholesky, FaerCholeskyFactor, FaerSymmetricFactor,
};
use crate::kernel::ExactSeKernel;

/// Posterior of the transition function and its derivative on a test grid,
/// in scaled input units. `transform` is an `nx × r` matrix with
/// `T·Tᵀ` equal to the derivative posterior covariance, so
/// `deriv_mean + T·z` with standard-normal `z` is a posterior realization.
#[derive(Debug, Clone)]
pub struct DerivativePosterior {
    pub grid: Array1<f64>,
    /// Posterior-mean transition estimate on the grid.
    pub fest_grid: Array1<f64>,
    /// Posterior-mean transition estimate at the observation inputs.
    pub fest_obs: Array1<f64>,
    /// Posterior mean of the transition derivative on the grid.
    pub deriv_mean: Array1<f64>,
    pub transform: Array2<f64>,
    /// Whether the sampling transform came from the eigendecomposition
    /// square-root fallback rather than Cholesky.
    pub sqrt_fallback: bool,
}

/// Capability interface shared by the exact-kernel and reduced-rank
/// covariance suppliers, so the Monte-Carlo edge locator is backend-agnostic.
pub trait CovarianceBackend {
    /// Condition on the residual `y = Tr - g1(tof)` and return the
    /// derivative posterior on this backend's test grid.
    fn derivative_posterior(&self, y: &Array1<f64>) -> Result<DerivativePosterior, FitError>;
}

/// Symmetric solver handle: Cholesky when the matrix is numerically
/// positive-definite, LDLT otherwise.
pub(crate) enum ObservationFactor {
    Llt(FaerCholeskyFactor),
    Ldlt(FaerSymmetricFactor),
}

impl ObservationFactor {
    pub(crate) fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        match self {
            ObservationFactor::Llt(f) => f.solve_vec(rhs),
            ObservationFactor::Ldlt(f) => f.solve_vec(rhs),
        }
    }
}

/// Factorize a symmetric positive-definite system matrix: plain Cholesky
/// first, then a jittered retry, then jittered LDLT as the last resort.
pub(crate) fn factorize_spd(
    matrix: &Array2<f64>,
    jitter: f64,
    label: &str,
) -> Result<ObservationFactor, FitError> {
    if let Ok(factor) = matrix.cholesky(Side::Lower) {
        return Ok(ObservationFactor::Llt(factor));
    }
    log::warn!("{label} not positive-definite; retrying with jitter {jitter:e}");
    let mut jittered = matrix.clone();
    for i in 0..jittered.nrows() {
        jittered[[i, i]] += jitter;
    }
    if let Ok(factor) = jittered.cholesky(Side::Lower) {
        return Ok(ObservationFactor::Llt(factor));
    }
    log::warn!("jittered Cholesky of {label} failed; falling back to LDLT");
    let view = FaerArrayView::new(&jittered);
    let factor = factorize_symmetric_with_fallback(view.as_ref(), Side::Lower)
        .map_err(FitError::LinearSystemSolveFailed)?;
    Ok(ObservationFactor::Ldlt(factor))
}

/// Sampling transform for a derivative covariance: lower Cholesky factor of
/// the jittered matrix, or its symmetric eigendecomposition square root when
/// Cholesky fails outright. Either way `T·Tᵀ` reproduces the covariance, so
/// sample marginals are unchanged by the fallback.
pub(crate) fn sampling_transform(
    cov: &Array2<f64>,
    jitter: f64,
) -> Result<(Array2<f64>, bool), FitError> {
    let mut jittered = cov.clone();
    for i in 0..jittered.nrows() {
        jittered[[i, i]] += jitter;
    }
    if let Ok(factor) = jittered.cholesky(Side::Lower) {
        return Ok((factor.lower_triangular(), false));
    }
    log::warn!(
        "derivative covariance not positive-definite with jitter {jitter:e}; \
         using matrix-square-root fallback"
    );
    let root = symmetric_sqrt(&jittered).map_err(FitError::EigendecompositionFailed)?;
    if !root.iter().all(|v| v.is_finite()) {
        return Err(FitError::NonFiniteValue("matrix square root"));
    }
    Ok((root, true))
}

/// Exact squared-exponential backend: dense kernel matrices over the scaled
/// observation inputs and test grid.
pub struct ExactBackend {
    pub kernel: ExactSeKernel,
    /// Scaled observation inputs.
    pub x: Array1<f64>,
    /// Envelope weights `g2 - g1` at the observations.
    pub alpha: Array1<f64>,
    /// Scaled test grid.
    pub grid: Array1<f64>,
    pub noise_var: f64,
    pub jitter: f64,
}

impl CovarianceBackend for ExactBackend {
    fn derivative_posterior(&self, y: &Array1<f64>) -> Result<DerivativePosterior, FitError> {
        let kyy = self
            .kernel
            .observation_covariance(&self.x, &self.alpha, self.noise_var);
        let factor = factorize_spd(&kyy, self.jitter, "observation covariance")?;

        // Posterior means are two triangular solves against the residual on
        // the Cholesky path; the LDLT fallback solves through its own factor.
        let weights = factor.solve_vec(y);
        if !weights.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFiniteValue("observation solve"));
        }

        let kfyp = self.kernel.cross_transition(&self.grid, &self.x, &self.alpha);
        let fest_grid = kfyp.dot(&weights);
        let kfyp_obs = self.kernel.cross_transition(&self.x, &self.x, &self.alpha);
        let fest_obs = kfyp_obs.dot(&weights);

        let dkfy = self.kernel.cross_derivative(&self.grid, &self.x, &self.alpha);
        let deriv_mean = dkfy.dot(&weights);

        let ddkff = self.kernel.derivative_covariance(&self.grid);
        let correction = match &factor {
            ObservationFactor::Llt(f) => {
                let l = f.lower_triangular();
                let v = solve_lower_triangular(&l, &dkfy.t());
                v.t().dot(&v)
            }
            ObservationFactor::Ldlt(f) => dkfy.dot(&f.solve_mat(&dkfy.t().to_owned())),
        };
        let deriv_cov = &ddkff - &correction;

        let (transform, sqrt_fallback) = sampling_transform(&deriv_cov, self.jitter)?;
        if !deriv_mean.iter().all(|v| v.is_finite())
            || !fest_grid.iter().all(|v| v.is_finite())
        {
            return Err(FitError::NonFiniteValue("derivative posterior mean"));
        }

        Ok(DerivativePosterior {
            grid: self.grid.clone(),
            fest_grid,
            fest_obs,
            deriv_mean,
            transform,
            sqrt_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn sample_covariance(transform: &Array2<f64>, draws: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let (n, r) = transform.dim();
        let mut cov = Array2::<f64>::zeros((n, n));
        for _ in 0..draws {
            let z = Array1::from_iter((0..r).map(|_| rng.sample::<f64, _>(StandardNormal)));
            let s = transform.dot(&z);
            for i in 0..n {
                for j in 0..n {
                    cov[[i, j]] += s[i] * s[j];
                }
            }
        }
        cov.mapv(|v| v / draws as f64)
    }

    #[test]
    fn cholesky_transform_reproduces_covariance() {
        let cov = ndarray::array![[1.0, 0.6, 0.2], [0.6, 1.0, 0.5], [0.2, 0.5, 1.0]];
        let (t, fell_back) = sampling_transform(&cov, 1e-10).expect("transform");
        assert!(!fell_back);
        let rec = t.dot(&t.t());
        let err = (&rec - &cov).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(err < 1e-8);
    }

    #[test]
    fn square_root_fallback_matches_cholesky_statistics() {
        // A singular covariance forces the eigen square root; its sample
        // statistics must match the Cholesky path on a matched PD input.
        let base = ndarray::array![[1.0, 0.9, 0.7], [0.9, 1.0, 0.9], [0.7, 0.9, 1.0]];
        let v = ndarray::array![[1.0], [2.0], [-1.0]];
        let singular = v.dot(&v.t());

        let (t_chol, chol_fallback) = sampling_transform(&base, 1e-10).expect("chol transform");
        assert!(!chol_fallback);
        let (t_root, root_fallback) = sampling_transform(&singular, 0.0).expect("root transform");
        assert!(root_fallback);

        let draws = 60_000;
        let cov_chol = sample_covariance(&t_chol, draws, 7);
        let cov_root = sample_covariance(&t_root, draws, 8);

        // Each path must reproduce its own target covariance within MC noise.
        let err_chol = (&cov_chol - &base).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let err_root = (&cov_root - &singular)
            .iter()
            .fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(err_chol < 0.05, "cholesky path error {err_chol}");
        assert!(err_root < 0.12, "square-root path error {err_root}");
    }

    #[test]
    fn exact_backend_tracks_noiseless_derivative() {
        // Unit envelope, smooth sigmoid observations: the derivative mean
        // must peak near the true inflection.
        let n = 60;
        let x: Array1<f64> = Array1::linspace(0.0, 1.0, n);
        let alpha = Array1::from_elem(n, 1.0);
        let f = x.mapv(|v| 1.0 / (1.0 + (-(v - 0.5) / 0.05).exp()));
        let backend = ExactBackend {
            kernel: ExactSeKernel { sig_f: 1.0, l: 0.05 },
            x: x.clone(),
            alpha,
            grid: Array1::linspace(0.0, 1.0, 200),
            noise_var: 1e-6,
            jitter: 1e-10,
        };
        let post = backend.derivative_posterior(&f).expect("posterior");
        let (imax, _) = post
            .deriv_mean
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
                if v > bv { (i, v) } else { (bi, bv) }
            });
        assert!(
            (post.grid[imax] - 0.5).abs() < 0.02,
            "derivative peak at {}",
            post.grid[imax]
        );
        // Transition estimate should approach 0 and 1 at the ends.
        assert!(post.fest_grid[0].abs() < 0.1);
        assert!((post.fest_grid[199] - 1.0).abs() < 0.1);
    }
}
