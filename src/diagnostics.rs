use ndarray::Array1;

use crate::types::FitDiagnostics;

/// Ratio of assumed measurement noise to the realized residual spread.
/// Values far from one mean the noise model and the data disagree.
pub fn fit_quality(noise_std: f64, std_residual: f64) -> f64 {
    noise_std / std_residual
}

/// A fit-quality ratio at or beyond a factor of two in either direction is
/// reported to the caller through the log.
pub(crate) fn fit_quality_flagged(fitqual: f64) -> bool {
    !(fitqual > 0.5 && fitqual < 2.0)
}

/// Standard deviation (ddof 1) and RMS of the model residuals.
pub fn residual_stats(residuals: &Array1<f64>) -> (f64, f64) {
    let n = residuals.len() as f64;
    let mean = residuals.sum() / n;
    let var = residuals.mapv(|r| (r - mean).powi(2)).sum() / (n - 1.0);
    let rms = (residuals.mapv(|r| r * r).sum() / n).sqrt();
    (var.sqrt(), rms)
}

/// Full width of the derivative peak at half its maximum, in the grid's
/// units. The profile must cross the half-maximum level exactly twice;
/// otherwise the width is undefined and NaN is returned.
pub fn width_at_half_height(grid: &Array1<f64>, deriv: &Array1<f64>) -> f64 {
    let peak = deriv.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if !peak.is_finite() || peak <= 0.0 {
        return f64::NAN;
    }
    let half = 0.5 * peak;

    let mut crossings = Vec::new();
    for i in 0..deriv.len() - 1 {
        let a = deriv[i] - half;
        let b = deriv[i + 1] - half;
        if a == 0.0 {
            crossings.push(grid[i]);
        } else if a * b < 0.0 {
            let t = a / (a - b);
            crossings.push(grid[i] + t * (grid[i + 1] - grid[i]));
        }
    }
    if deriv[deriv.len() - 1] - half == 0.0 {
        crossings.push(grid[deriv.len() - 1]);
    }

    if crossings.len() == 2 {
        crossings[1] - crossings[0]
    } else {
        f64::NAN
    }
}

/// Assemble the per-fit diagnostics and emit the fit-quality warning when
/// the noise model disagrees with the residuals.
pub fn compute_diagnostics(
    lengthscale: f64,
    noise_std: f64,
    residuals: &Array1<f64>,
    grid_tof: &Array1<f64>,
    deriv_mean: &Array1<f64>,
) -> FitDiagnostics {
    let (std_residual, rms_residual) = residual_stats(residuals);
    let fitqual = fit_quality(noise_std, std_residual);
    if fit_quality_flagged(fitqual) {
        log::warn!(
            "fit quality {fitqual:.3} outside (0.5, 2): noise estimate {noise_std:.3e} \
             vs residual spread {std_residual:.3e}"
        );
    }
    FitDiagnostics {
        lengthscale,
        std_residual,
        rms_residual,
        fitqual,
        width_at_half_height: width_at_half_height(grid_tof, deriv_mean),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_flag_is_inclusive_at_both_bounds() {
        assert!(fit_quality_flagged(0.5));
        assert!(fit_quality_flagged(2.0));
        assert!(fit_quality_flagged(0.1));
        assert!(fit_quality_flagged(10.0));
        assert!(!fit_quality_flagged(0.51));
        assert!(!fit_quality_flagged(1.0));
        assert!(!fit_quality_flagged(1.99));
    }

    #[test]
    fn gaussian_peak_width_matches_analytic_fwhm() {
        let grid: Array1<f64> = Array1::linspace(0.0, 1.0, 4001);
        let c = 0.004;
        let deriv = grid.mapv(|v| (-(v - 0.5).powi(2) / c).exp());
        let width = width_at_half_height(&grid, &deriv);
        let expected = 2.0 * (c * 2.0f64.ln()).sqrt();
        assert!((width - expected).abs() < 1e-3, "width {width} vs {expected}");
    }

    #[test]
    fn monotone_profile_has_undefined_width() {
        let grid = Array1::linspace(0.0, 1.0, 101);
        let deriv = grid.clone();
        assert!(width_at_half_height(&grid, &deriv).is_nan());
    }

    #[test]
    fn twin_peaks_have_undefined_width() {
        let grid: Array1<f64> = Array1::linspace(0.0, 1.0, 2001);
        let deriv = grid.mapv(|v| {
            (-(v - 0.3).powi(2) / 0.002).exp() + (-(v - 0.7).powi(2) / 0.002).exp()
        });
        assert!(width_at_half_height(&grid, &deriv).is_nan());
    }

    #[test]
    fn residual_stats_on_known_values() {
        let r = Array1::from(vec![1.0, -1.0, 1.0, -1.0]);
        let (std, rms) = residual_stats(&r);
        assert!((rms - 1.0).abs() < 1e-15);
        assert!((std - (4.0 / 3.0f64).sqrt()).abs() < 1e-12);
    }
}
