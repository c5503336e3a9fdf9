use ndarray::{Array1, Array2};

use crate::estimate::FitError;
use crate::faer_ndarray::symmetric_sqrt;
use crate::posterior::{
    factorize_spd, CovarianceBackend, DerivativePosterior, ObservationFactor,
};

/// Reduced-rank Hilbert-space approximation of the squared-exponential
/// kernel: `m` fixed sine basis functions on `[-L, L]`, each weighted by the
/// SE spectral density at its frequency. Conditioning happens in weight
/// space, so the only dense factorization is of the `m × m` precision
/// matrix rather than an `n × n` kernel matrix.
pub struct HilbertSpaceBackend {
    pub sig_f: f64,
    /// Lengthscale in scaled input units.
    pub l: f64,
    /// Number of sine basis functions.
    pub m: usize,
    /// Domain half-width `L` in scaled units; must cover the centered
    /// scaled inputs `[-1/2, 1/2]`.
    pub domain: f64,
    /// Scaled observation inputs.
    pub x: Array1<f64>,
    /// Envelope weights at the observations.
    pub alpha: Array1<f64>,
    /// Scaled test grid.
    pub grid: Array1<f64>,
    pub noise_var: f64,
    pub jitter: f64,
}

impl HilbertSpaceBackend {
    #[inline]
    fn frequency(&self, j: usize) -> f64 {
        std::f64::consts::PI * (j + 1) as f64 / (2.0 * self.domain)
    }

    /// SE spectral density `S(ω) = sig_f²·√(2π)·l·exp(-½ l² ω²)`.
    #[inline]
    fn spectral_density(&self, omega: f64) -> f64 {
        self.sig_f * self.sig_f
            * (2.0 * std::f64::consts::PI).sqrt()
            * self.l
            * (-0.5 * self.l * self.l * omega * omega).exp()
    }

    /// Basis matrix Φ at the given scaled inputs (centered internally).
    pub fn basis(&self, xs: &Array1<f64>) -> Array2<f64> {
        let norm = 1.0 / self.domain.sqrt();
        let mut phi = Array2::<f64>::zeros((xs.len(), self.m));
        for (i, &xv) in xs.iter().enumerate() {
            let u = xv - 0.5 + self.domain;
            for j in 0..self.m {
                phi[[i, j]] = norm * (self.frequency(j) * u).sin();
            }
        }
        phi
    }

    /// Derivative-of-basis matrix dΦ at the given scaled inputs.
    pub fn basis_derivative(&self, xs: &Array1<f64>) -> Array2<f64> {
        let norm = 1.0 / self.domain.sqrt();
        let mut dphi = Array2::<f64>::zeros((xs.len(), self.m));
        for (i, &xv) in xs.iter().enumerate() {
            let u = xv - 0.5 + self.domain;
            for j in 0..self.m {
                let omega = self.frequency(j);
                dphi[[i, j]] = norm * omega * (omega * u).cos();
            }
        }
        dphi
    }

    /// Spectral-density weights for each basis function, floored relative to
    /// the largest weight so their reciprocals stay finite.
    pub fn spectral_weights(&self) -> Array1<f64> {
        let raw = Array1::from_iter((0..self.m).map(|j| self.spectral_density(self.frequency(j))));
        let max = raw.iter().fold(0.0f64, |m, &v| m.max(v));
        raw.mapv(|v| v.max(max * 1e-16))
    }

    /// Materialized kernel approximation `Φ Λ Φᵀ`; exposed for verification
    /// against the exact squared-exponential kernel.
    pub fn approximate_covariance(&self, xs: &Array1<f64>) -> Array2<f64> {
        let phi = self.basis(xs);
        let lambda = self.spectral_weights();
        let mut weighted = phi.clone();
        for j in 0..self.m {
            for i in 0..xs.len() {
                weighted[[i, j]] *= lambda[j];
            }
        }
        weighted.dot(&phi.t())
    }
}

impl CovarianceBackend for HilbertSpaceBackend {
    fn derivative_posterior(&self, y: &Array1<f64>) -> Result<DerivativePosterior, FitError> {
        let phi_obs = self.basis(&self.x);
        let lambda = self.spectral_weights();

        // Scaled design A = diag(alpha)·Φ and weight-space precision
        // P = AᵀA/sn² + Λ⁻¹.
        let mut design = phi_obs.clone();
        for i in 0..self.x.len() {
            for j in 0..self.m {
                design[[i, j]] *= self.alpha[i];
            }
        }
        let mut precision = design.t().dot(&design).mapv(|v| v / self.noise_var);
        for j in 0..self.m {
            precision[[j, j]] += 1.0 / lambda[j];
        }

        let factor = factorize_spd(&precision, self.jitter, "weight-space precision")?;
        let rhs = design.t().dot(y).mapv(|v| v / self.noise_var);
        let mean_w = factor.solve_vec(&rhs);
        if !mean_w.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFiniteValue("weight-space mean"));
        }

        let phi_grid = self.basis(&self.grid);
        let dphi_grid = self.basis_derivative(&self.grid);
        let fest_grid = phi_grid.dot(&mean_w);
        let fest_obs = phi_obs.dot(&mean_w);
        let deriv_mean = dphi_grid.dot(&mean_w);

        // Low-rank sampling transform T = dΦ·L⁻ᵀ (so T·Tᵀ = dΦ·P⁻¹·dΦᵀ), or
        // the dense square root of P⁻¹ on the LDLT path.
        let (transform, sqrt_fallback) = match &factor {
            ObservationFactor::Llt(f) => {
                let l = f.lower_triangular();
                let vt = crate::faer_ndarray::solve_lower_triangular(&l, &dphi_grid.t());
                (vt.t().to_owned(), false)
            }
            ObservationFactor::Ldlt(f) => {
                let identity = Array2::<f64>::eye(self.m);
                let cov_w = f.solve_mat(&identity);
                let root =
                    symmetric_sqrt(&cov_w).map_err(FitError::EigendecompositionFailed)?;
                (dphi_grid.dot(&root), true)
            }
        };
        if sqrt_fallback {
            log::warn!("weight-space covariance used the matrix-square-root fallback");
        }
        if !deriv_mean.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFiniteValue("reduced-rank derivative mean"));
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
