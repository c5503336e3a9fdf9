use std::fmt;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::baseline::{estimate_noise_variance, fit_baseline};
use crate::diagnostics::compute_diagnostics;
use crate::faer_ndarray::FaerLinalgError;
use crate::hilbert::HilbertSpaceBackend;
use crate::hyper::optimise_lengthscale;
use crate::interp::CubicSpline;
use crate::kernel::{envelope_weights, ExactSeKernel, InputScaling};
use crate::montecarlo::{locate_edge_exact, locate_edge_interp, EdgeSamples};
use crate::posterior::{CovarianceBackend, DerivativePosterior, ExactBackend};
use crate::types::{
    BaselineParameters, CovFunc, EdgeEstimate, FitConfig, FitDiagnostics, FitWindow, GpScheme,
    HyperOptimisation, TransitionFitCurve, TransmissionCurve,
};

/// Everything that can go wrong during an edge fit. Configuration and input
/// errors are caller mistakes and always surface as `Err`; the numerical
/// variants can be downgraded to a NaN sentinel by [`fit_edge_or_sentinel`].
#[derive(Error)]
pub enum FitError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("baseline fit failed: {0}")]
    BaselineFitFailed(String),
    #[error("linear system solve failed: {0}")]
    LinearSystemSolveFailed(FaerLinalgError),
    #[error("eigendecomposition failed: {0}")]
    EigendecompositionFailed(FaerLinalgError),
    #[error("non-finite value in {0}")]
    NonFiniteValue(&'static str),
    #[error("hyperparameter optimization failed: {0}")]
    HyperparameterOptimizationFailed(String),
}

impl fmt::Debug for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FitError {
    /// Whether this error is a caller mistake rather than a numerical
    /// failure on valid inputs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FitError::InvalidConfiguration(_) | FitError::InvalidInput(_)
        )
    }
}

/// Complete result of a single-curve edge fit.
#[derive(Debug, Clone)]
pub struct EdgeFit {
    pub estimate: EdgeEstimate,
    pub baseline: BaselineParameters,
    pub diagnostics: FitDiagnostics,
    /// Reconstructed transmission and transition estimate on the fine grid.
    pub transition: TransitionFitCurve,
}

impl EdgeFit {
    fn sentinel() -> Self {
        Self {
            estimate: EdgeEstimate::nan(),
            baseline: BaselineParameters {
                a0: f64::NAN,
                b0: f64::NAN,
                a_hkl: f64::NAN,
                b_hkl: f64::NAN,
            },
            diagnostics: FitDiagnostics::nan(),
            transition: TransitionFitCurve::empty(),
        }
    }
}

/// Fit a single Bragg edge: baseline pre-fit, GP regression over the
/// transition, Monte-Carlo localization of the derivative maximum.
pub fn fit_edge(
    curve: &TransmissionCurve,
    window: &FitWindow,
    config: &FitConfig,
) -> Result<EdgeFit, FitError> {
    config.validate()?;
    window.validate(curve.len())?;

    let baseline = fit_baseline(curve, window, &config.baseline_init)?;
    let noise_var = estimate_noise_variance(curve, window, &baseline);

    let tof = curve.tof();
    let scaling = InputScaling::from_tof(tof);
    let x = scaling.scale(tof);
    let alpha = envelope_weights(&baseline, tof);

    // The GP sees the pre-edge asymptote subtracted out, so the residual is
    // the envelope-scaled transition plus noise.
    let y = Array1::from_iter(
        tof.iter()
            .zip(curve.transmission().iter())
            .map(|(&t, &tr)| tr - baseline.pre_edge(t)),
    );

    let mut l_scaled = config.hyper.l / scaling.range();
    if config.optimise_hp == HyperOptimisation::All {
        l_scaled = optimise_lengthscale(config.hyper.sig_f, &x, &alpha, &y, noise_var)?;
    }
    let CovFunc::SquaredExponential = config.covfunc;
    let kernel = ExactSeKernel {
        sig_f: config.hyper.sig_f,
        l: l_scaled,
    };

    let fine_grid = Array1::linspace(0.0, 1.0, config.hyper.nx);
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let (post, samples): (DerivativePosterior, EdgeSamples) = match config.scheme {
        GpScheme::Full => {
            let backend = ExactBackend {
                kernel,
                x: x.clone(),
                alpha: alpha.clone(),
                grid: fine_grid.clone(),
                noise_var,
                jitter: config.jitter,
            };
            let post = backend.derivative_posterior(&y)?;
            let samples = locate_edge_exact(&post, config.hyper.ns, &mut rng)?;
            (post, samples)
        }
        GpScheme::Interp => {
            let coarse_grid = Array1::linspace(0.0, 1.0, curve.len());
            let backend = ExactBackend {
                kernel,
                x: x.clone(),
                alpha: alpha.clone(),
                grid: coarse_grid,
                noise_var,
                jitter: config.jitter,
            };
            let post = backend.derivative_posterior(&y)?;
            let samples = locate_edge_interp(&post, &fine_grid, config.hyper.ns, &mut rng)?;
            (post, samples)
        }
        GpScheme::HilbertSpace => {
            let backend = HilbertSpaceBackend {
                sig_f: config.hyper.sig_f,
                l: l_scaled,
                m: config.hilbert_basis,
                domain: config.hilbert_domain,
                x: x.clone(),
                alpha: alpha.clone(),
                grid: fine_grid.clone(),
                noise_var,
                jitter: config.jitter,
            };
            let post = backend.derivative_posterior(&y)?;
            let samples = locate_edge_exact(&post, config.hyper.ns, &mut rng)?;
            (post, samples)
        }
    };

    let estimate = EdgeEstimate {
        edge_pos: scaling.unscale_value(samples.mean),
        sigma: samples.std * scaling.range(),
    };
    if !estimate.edge_pos.is_finite() || !estimate.sigma.is_finite() {
        return Err(FitError::NonFiniteValue("edge estimate"));
    }

    // Transition estimate and derivative mean on the fine grid; the coarse
    // scheme re-evaluates both through the same spline the locator used.
    let (transition_fine, deriv_fine) = if post.grid.len() == fine_grid.len() {
        (post.fest_grid.clone(), post.deriv_mean.clone())
    } else {
        let f_spline = CubicSpline::natural(&post.grid, &post.fest_grid);
        let d_spline = CubicSpline::natural(&post.grid, &post.deriv_mean);
        (
            f_spline.evaluate_many(&fine_grid),
            d_spline.evaluate_many(&fine_grid),
        )
    };

    let tof_fine = scaling.unscale(&fine_grid);
    let transmission_fine = Array1::from_iter(
        tof_fine
            .iter()
            .zip(transition_fine.iter())
            .map(|(&t, &f)| {
                baseline.pre_edge(t) + (baseline.post_edge(t) - baseline.pre_edge(t)) * f
            }),
    );
    let transition = TransitionFitCurve {
        tof: tof_fine.clone(),
        transmission: transmission_fine,
        transition: transition_fine,
    };

    // Residuals against the reconstructed transmission at the observations.
    let residuals = Array1::from_iter(tof.iter().enumerate().map(|(i, &t)| {
        curve.transmission()[i] - (baseline.pre_edge(t) + alpha[i] * post.fest_obs[i])
    }));
    let diagnostics = compute_diagnostics(
        l_scaled * scaling.range(),
        noise_var.sqrt(),
        &residuals,
        &tof_fine,
        &deriv_fine,
    );

    log::info!(
        "edge at {:.6} ± {:.2e} (scheme {:?}, lengthscale {:.3e})",
        estimate.edge_pos,
        estimate.sigma,
        config.scheme,
        diagnostics.lengthscale
    );

    Ok(EdgeFit {
        estimate,
        baseline,
        diagnostics,
        transition,
    })
}

/// Batch-friendly wrapper: numerical failures on a valid curve become a NaN
/// sentinel result so a scan over many curves keeps going, while
/// configuration and input errors still abort.
pub fn fit_edge_or_sentinel(
    curve: &TransmissionCurve,
    window: &FitWindow,
    config: &FitConfig,
) -> Result<EdgeFit, FitError> {
    match fit_edge(curve, window, config) {
        Ok(fit) => Ok(fit),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => {
            log::error!("edge fit failed, returning NaN sentinel: {e}");
            Ok(EdgeFit::sentinel())
        }
    }
}
