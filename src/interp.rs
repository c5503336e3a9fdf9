use ndarray::Array1;

/// Natural cubic spline over sorted knots, used by the coarse-grid scheme to
/// re-evaluate the posterior mean and every sampled realization on a finer
/// grid before locating the arg-max.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Array1<f64>,
    y: Array1<f64>,
    /// Second derivatives at the knots (zero at both ends).
    m: Array1<f64>,
}

impl CubicSpline {
    pub fn natural(x: &Array1<f64>, y: &Array1<f64>) -> Self {
        let n = x.len();
        debug_assert_eq!(y.len(), n);
        debug_assert!(n >= 3, "spline needs at least 3 knots");

        // Tridiagonal system for interior second derivatives, solved with the
        // Thomas algorithm.
        let mut m = Array1::<f64>::zeros(n);
        if n > 2 {
            let interior = n - 2;
            let mut diag = vec![0.0; interior];
            let mut upper = vec![0.0; interior];
            let mut lower = vec![0.0; interior];
            let mut rhs = vec![0.0; interior];
            for k in 0..interior {
                let i = k + 1;
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                lower[k] = h0;
                diag[k] = 2.0 * (h0 + h1);
                upper[k] = h1;
                rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            }
            for k in 1..interior {
                let w = lower[k] / diag[k - 1];
                diag[k] -= w * upper[k - 1];
                rhs[k] -= w * rhs[k - 1];
            }
            m[interior] = rhs[interior - 1] / diag[interior - 1];
            for k in (0..interior - 1).rev() {
                m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
            }
        }

        Self {
            x: x.to_owned(),
            y: y.to_owned(),
            m,
        }
    }

    /// Evaluate at `xq`; queries outside the knot range are clamped onto the
    /// boundary intervals.
    pub fn evaluate(&self, xq: f64) -> f64 {
        let n = self.x.len();
        let i = match self
            .x
            .as_slice()
            .expect("knots are contiguous")
            .partition_point(|&v| v < xq)
        {
            0 => 0,
            p if p >= n => n - 2,
            p => p - 1,
        };

        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - xq) / h;
        let b = (xq - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }

    pub fn evaluate_many(&self, xs: &Array1<f64>) -> Array1<f64> {
        xs.mapv(|v| self.evaluate(v))
    }
}
