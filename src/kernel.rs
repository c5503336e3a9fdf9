use ndarray::{Array1, Array2};

use crate::types::BaselineParameters;

/// Affine map of time-of-flight onto [0, 1], built once from the observed
/// global minimum/maximum and reused for every test grid so observations and
/// test points share one coordinate system.
#[derive(Debug, Clone, Copy)]
pub struct InputScaling {
    t_min: f64,
    range: f64,
}

impl InputScaling {
    pub fn from_tof(tof: &Array1<f64>) -> Self {
        let t_min = tof[0];
        let t_max = tof[tof.len() - 1];
        Self {
            t_min,
            range: t_max - t_min,
        }
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.range
    }

    #[inline]
    pub fn scale_value(&self, t: f64) -> f64 {
        (t - self.t_min) / self.range
    }

    #[inline]
    pub fn unscale_value(&self, x: f64) -> f64 {
        self.t_min + x * self.range
    }

    pub fn scale(&self, tof: &Array1<f64>) -> Array1<f64> {
        tof.mapv(|t| self.scale_value(t))
    }

    pub fn unscale(&self, x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|v| self.unscale_value(v))
    }
}

/// Envelope weight `g2 - g1` at each time-of-flight: the gap between the
/// post-edge asymptote and the pre-edge asymptote that reshapes the unit
/// transition function into transmission units.
pub fn envelope_weights(baseline: &BaselineParameters, tof: &Array1<f64>) -> Array1<f64> {
    tof.mapv(|t| baseline.post_edge(t) - baseline.pre_edge(t))
}

/// Squared-exponential kernel over rescaled inputs. The GP prior is placed
/// on the unscaled transition function; envelope weights reshape it before
/// comparison to data.
#[derive(Debug, Clone, Copy)]
pub struct ExactSeKernel {
    pub sig_f: f64,
    /// Lengthscale in scaled input units.
    pub l: f64,
}

impl ExactSeKernel {
    #[inline]
    fn se(&self, dx: f64) -> f64 {
        let r = dx / self.l;
        self.sig_f * self.sig_f * (-0.5 * r * r).exp()
    }

    /// `K`: prior covariance of the observed (envelope-scaled) transition.
    pub fn covariance(&self, x: &Array1<f64>, alpha: &Array1<f64>) -> Array2<f64> {
        let n = x.len();
        let mut k = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let v = alpha[i] * alpha[j] * self.se(x[i] - x[j]);
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
        }
        k
    }

    /// `Kyy = K + sn²·I`.
    pub fn observation_covariance(
        &self,
        x: &Array1<f64>,
        alpha: &Array1<f64>,
        noise_var: f64,
    ) -> Array2<f64> {
        let mut kyy = self.covariance(x, alpha);
        for i in 0..x.len() {
            kyy[[i, i]] += noise_var;
        }
        kyy
    }

    /// `Kfy`: cross covariance of the envelope-scaled transition at test
    /// points against the observations (envelopes on both sides).
    pub fn cross_scaled(
        &self,
        xs: &Array1<f64>,
        alpha_test: &Array1<f64>,
        x: &Array1<f64>,
        alpha: &Array1<f64>,
    ) -> Array2<f64> {
        let mut k = Array2::<f64>::zeros((xs.len(), x.len()));
        for p in 0..xs.len() {
            for j in 0..x.len() {
                k[[p, j]] = alpha_test[p] * alpha[j] * self.se(xs[p] - x[j]);
            }
        }
        k
    }

    /// `Kfyp`: cross covariance of the transition function itself at test
    /// points against the observations, with no test-side envelope
    /// reweighting, so solving against the data reconstructs the transition
    /// estimate itself.
    pub fn cross_transition(
        &self,
        xs: &Array1<f64>,
        x: &Array1<f64>,
        alpha: &Array1<f64>,
    ) -> Array2<f64> {
        let mut k = Array2::<f64>::zeros((xs.len(), x.len()));
        for p in 0..xs.len() {
            for j in 0..x.len() {
                k[[p, j]] = alpha[j] * self.se(xs[p] - x[j]);
            }
        }
        k
    }

    /// `dKfy`: derivative of `Kfyp` with respect to the test location.
    pub fn cross_derivative(
        &self,
        xs: &Array1<f64>,
        x: &Array1<f64>,
        alpha: &Array1<f64>,
    ) -> Array2<f64> {
        let l2 = self.l * self.l;
        let mut k = Array2::<f64>::zeros((xs.len(), x.len()));
        for p in 0..xs.len() {
            for j in 0..x.len() {
                let d = xs[p] - x[j];
                k[[p, j]] = alpha[j] * self.se(d) * (-d / l2);
            }
        }
        k
    }

    /// `ddKff`: test-to-test covariance of the transition derivative,
    /// `∂²k/∂x ∂x'`.
    pub fn derivative_covariance(&self, xs: &Array1<f64>) -> Array2<f64> {
        let l2 = self.l * self.l;
        let n = xs.len();
        let mut k = Array2::<f64>::zeros((n, n));
        for p in 0..n {
            for q in 0..=p {
                let d = xs[p] - xs[q];
                let v = self.se(d) * (1.0 - d * d / l2) / l2;
                k[[p, q]] = v;
                k[[q, p]] = v;
            }
        }
        k
    }
}
