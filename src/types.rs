use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::estimate::FitError;

/// A single measured transmission spectrum: normalized transmission against
/// strictly increasing time-of-flight. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct TransmissionCurve {
    tof: Array1<f64>,
    transmission: Array1<f64>,
}

impl TransmissionCurve {
    pub fn new(tof: Array1<f64>, transmission: Array1<f64>) -> Result<Self, FitError> {
        if tof.len() != transmission.len() {
            return Err(FitError::InvalidInput(format!(
                "tof and transmission lengths differ: {} vs {}",
                tof.len(),
                transmission.len()
            )));
        }
        if tof.len() < 4 {
            return Err(FitError::InvalidInput(format!(
                "curve needs at least 4 points, got {}",
                tof.len()
            )));
        }
        if !tof.iter().all(|v| v.is_finite()) || !transmission.iter().all(|v| v.is_finite()) {
            return Err(FitError::InvalidInput(
                "curve contains non-finite values".to_string(),
            ));
        }
        if tof.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(FitError::InvalidInput(
                "time-of-flight must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { tof, transmission })
    }

    pub fn tof(&self) -> &Array1<f64> {
        &self.tof
    }

    pub fn transmission(&self) -> &Array1<f64> {
        &self.transmission
    }

    pub fn len(&self) -> usize {
        self.tof.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tof.is_empty()
    }
}

/// Index ranges bracketing the flat pre-edge and post-edge regions used for
/// the baseline fits. The pre-edge range must lie entirely before the
/// post-edge range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitWindow {
    pub pre_edge: Range<usize>,
    pub post_edge: Range<usize>,
}

impl FitWindow {
    pub fn new(pre_edge: Range<usize>, post_edge: Range<usize>) -> Self {
        Self {
            pre_edge,
            post_edge,
        }
    }

    pub fn validate(&self, curve_len: usize) -> Result<(), FitError> {
        for (name, range) in [("pre-edge", &self.pre_edge), ("post-edge", &self.post_edge)] {
            if range.end <= range.start + 1 {
                return Err(FitError::InvalidInput(format!(
                    "{name} window {range:?} needs at least 2 points"
                )));
            }
            if range.end > curve_len {
                return Err(FitError::InvalidInput(format!(
                    "{name} window {range:?} exceeds curve length {curve_len}"
                )));
            }
        }
        if self.pre_edge.end > self.post_edge.start {
            return Err(FitError::InvalidInput(format!(
                "pre-edge window {:?} must lie entirely before post-edge window {:?}",
                self.pre_edge, self.post_edge
            )));
        }
        Ok(())
    }
}

fn default_sig_f() -> f64 {
    1.0
}

fn default_lengthscale() -> f64 {
    1e-4
}

fn default_sample_count() -> usize {
    3000
}

fn default_grid_size() -> usize {
    2500
}

/// GP hyperparameters. The lengthscale `l` is expressed in the original
/// time-of-flight units and is rescaled internally together with the inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpHyperparameters {
    /// Output scale of the squared-exponential kernel.
    #[serde(default = "default_sig_f")]
    pub sig_f: f64,
    /// Kernel lengthscale, in time-of-flight units.
    #[serde(default = "default_lengthscale")]
    pub l: f64,
    /// Number of Monte-Carlo posterior samples.
    #[serde(default = "default_sample_count")]
    pub ns: usize,
    /// Test-grid size.
    #[serde(default = "default_grid_size")]
    pub nx: usize,
}

impl Default for GpHyperparameters {
    fn default() -> Self {
        Self {
            sig_f: default_sig_f(),
            l: default_lengthscale(),
            ns: default_sample_count(),
            nx: default_grid_size(),
        }
    }
}

/// Initial guesses for the two baseline fits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineInit {
    pub a00: f64,
    pub b00: f64,
    pub a_hkl0: f64,
    pub b_hkl0: f64,
}

impl Default for BaselineInit {
    fn default() -> Self {
        Self {
            a00: 0.5,
            b00: 0.5,
            a_hkl0: 0.5,
            b_hkl0: 0.5,
        }
    }
}

/// Covariance strategy for the GP stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpScheme {
    /// Exact kernel on the full test grid.
    Full,
    /// Exact kernel on an observation-sized coarse grid, cubic-spline
    /// interpolated onto the full grid.
    Interp,
    /// Reduced-rank Hilbert-space approximation.
    HilbertSpace,
}

/// Covariance function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovFunc {
    #[serde(rename = "se")]
    SquaredExponential,
}

/// Hyperparameter optimization toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HyperOptimisation {
    None,
    All,
}

fn default_jitter() -> f64 {
    1e-10
}

fn default_hilbert_basis() -> usize {
    100
}

fn default_hilbert_domain() -> f64 {
    1.5
}

/// Full estimator configuration, validated once before any computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    #[serde(default)]
    pub baseline_init: BaselineInit,
    #[serde(default)]
    pub hyper: GpHyperparameters,
    pub scheme: GpScheme,
    pub covfunc: CovFunc,
    #[serde(default = "FitConfig::default_optimise_hp")]
    pub optimise_hp: HyperOptimisation,
    /// Diagonal jitter added when a covariance is not numerically
    /// positive-definite.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Seed for the posterior sampler; `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Number of sine basis functions for the Hilbert-space backend.
    #[serde(default = "default_hilbert_basis")]
    pub hilbert_basis: usize,
    /// Half-width of the Hilbert-space domain, in scaled input units.
    #[serde(default = "default_hilbert_domain")]
    pub hilbert_domain: f64,
}

impl FitConfig {
    fn default_optimise_hp() -> HyperOptimisation {
        HyperOptimisation::None
    }

    pub fn validate(&self) -> Result<(), FitError> {
        let h = &self.hyper;
        if !(h.sig_f.is_finite() && h.sig_f > 0.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "sig_f must be positive, got {}",
                h.sig_f
            )));
        }
        if !(h.l.is_finite() && h.l > 0.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "lengthscale must be positive, got {}",
                h.l
            )));
        }
        if h.ns == 0 || h.nx == 0 {
            return Err(FitError::InvalidConfiguration(format!(
                "ns and nx must be positive integers, got ns={}, nx={}",
                h.ns, h.nx
            )));
        }
        if !(self.jitter.is_finite() && self.jitter >= 0.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "jitter must be non-negative, got {}",
                self.jitter
            )));
        }
        if self.scheme == GpScheme::HilbertSpace {
            if self.hilbert_basis == 0 {
                return Err(FitError::InvalidConfiguration(
                    "hilbert_basis must be a positive integer".to_string(),
                ));
            }
            // Scaled inputs are centered on [-0.5, 0.5]; the sine basis is
            // only valid strictly inside its domain.
            if !(self.hilbert_domain.is_finite() && self.hilbert_domain > 0.5) {
                return Err(FitError::InvalidConfiguration(format!(
                    "hilbert_domain must exceed 0.5 (scaled half-range), got {}",
                    self.hilbert_domain
                )));
            }
        }
        Ok(())
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            baseline_init: BaselineInit::default(),
            hyper: GpHyperparameters::default(),
            scheme: GpScheme::Full,
            covfunc: CovFunc::SquaredExponential,
            optimise_hp: HyperOptimisation::None,
            jitter: default_jitter(),
            seed: None,
            hilbert_basis: default_hilbert_basis(),
            hilbert_domain: default_hilbert_domain(),
        }
    }
}

/// The four baseline scalars defining the two exponential-decay asymptotes.
/// Produced once per curve by the baseline fits and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineParameters {
    pub a0: f64,
    pub b0: f64,
    pub a_hkl: f64,
    pub b_hkl: f64,
}

impl BaselineParameters {
    /// Post-edge asymptote `exp(-(a0 + b0 t))`.
    #[inline]
    pub fn post_edge(&self, t: f64) -> f64 {
        (-(self.a0 + self.b0 * t)).exp()
    }

    /// Pre-edge asymptote: post-edge attenuation times the additional
    /// `exp(-(a_hkl + b_hkl t))` term from the reflecting plane family.
    #[inline]
    pub fn pre_edge(&self, t: f64) -> f64 {
        self.post_edge(t) * (-(self.a_hkl + self.b_hkl * t)).exp()
    }
}

/// Primary output: edge location and its standard deviation, in
/// time-of-flight units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdgeEstimate {
    pub edge_pos: f64,
    pub sigma: f64,
}

impl EdgeEstimate {
    pub(crate) fn nan() -> Self {
        Self {
            edge_pos: f64::NAN,
            sigma: f64::NAN,
        }
    }
}

/// Fit-quality diagnostics, read-only after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Lengthscale actually used, in time-of-flight units.
    pub lengthscale: f64,
    pub std_residual: f64,
    pub rms_residual: f64,
    /// Ratio of measurement-noise std to residual std; values at or outside
    /// [0.5, 2] indicate likely over/underfitting.
    pub fitqual: f64,
    /// Distance between the two half-peak crossings of the posterior-mean
    /// derivative; NaN unless exactly two crossings exist.
    pub width_at_half_height: f64,
}

impl FitDiagnostics {
    pub(crate) fn nan() -> Self {
        Self {
            lengthscale: f64::NAN,
            std_residual: f64::NAN,
            rms_residual: f64::NAN,
            fitqual: f64::NAN,
            width_at_half_height: f64::NAN,
        }
    }
}

/// Reconstructed fit evaluated on the test grid.
#[derive(Debug, Clone)]
pub struct TransitionFitCurve {
    /// Test grid in time-of-flight units.
    pub tof: Array1<f64>,
    /// Reconstructed transmission `g1 + (g2 - g1)·f`.
    pub transmission: Array1<f64>,
    /// Posterior-mean transition function estimate `f` (nominally in [0,1]).
    pub transition: Array1<f64>,
}

impl TransitionFitCurve {
    pub(crate) fn empty() -> Self {
        Self {
            tof: Array1::zeros(0),
            transmission: Array1::zeros(0),
            transition: Array1::zeros(0),
        }
    }
}
