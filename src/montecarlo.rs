use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::estimate::FitError;
use crate::interp::CubicSpline;
use crate::posterior::DerivativePosterior;

/// Monte-Carlo summary of the edge location in scaled input units.
#[derive(Debug, Clone, Copy)]
pub struct EdgeSamples {
    pub mean: f64,
    /// Sample standard deviation of the arg-max locations (ddof 1).
    pub std: f64,
}

fn argmax(values: &Array1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

fn standard_normal_vec<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Array1<f64> {
    Array1::from_iter((0..len).map(|_| rng.sample::<f64, _>(StandardNormal)))
}

/// Mean and ddof-1 standard deviation over the candidate edge positions.
fn summarize(candidates: &[f64]) -> Result<EdgeSamples, FitError> {
    if candidates.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteValue("edge position sample"));
    }
    let n = candidates.len() as f64;
    let mean = candidates.iter().sum::<f64>() / n;
    let var = candidates.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Ok(EdgeSamples {
        mean,
        std: var.sqrt(),
    })
}

/// Locate the edge directly on the posterior grid: `ns` derivative
/// realizations plus the posterior mean path, each contributing its arg-max
/// location as a candidate.
pub fn locate_edge_exact<R: Rng + ?Sized>(
    post: &DerivativePosterior,
    ns: usize,
    rng: &mut R,
) -> Result<EdgeSamples, FitError> {
    let r = post.transform.ncols();
    let mut candidates = Vec::with_capacity(ns + 1);
    candidates.push(post.grid[argmax(&post.deriv_mean)]);
    for _ in 0..ns {
        let z = standard_normal_vec(rng, r);
        let sample = &post.deriv_mean + &post.transform.dot(&z);
        candidates.push(post.grid[argmax(&sample)]);
    }
    summarize(&candidates)
}

/// Locate the edge through a spline refinement: realizations are drawn on
/// the posterior's coarse grid, interpolated onto `fine_grid` with a natural
/// cubic spline, and the arg-max is taken on the fine grid.
pub fn locate_edge_interp<R: Rng + ?Sized>(
    post: &DerivativePosterior,
    fine_grid: &Array1<f64>,
    ns: usize,
    rng: &mut R,
) -> Result<EdgeSamples, FitError> {
    let r = post.transform.ncols();
    let mut candidates = Vec::with_capacity(ns + 1);

    let mean_spline = CubicSpline::natural(&post.grid, &post.deriv_mean);
    let mean_fine = mean_spline.evaluate_many(fine_grid);
    candidates.push(fine_grid[argmax(&mean_fine)]);

    for _ in 0..ns {
        let z = standard_normal_vec(rng, r);
        let sample = &post.deriv_mean + &post.transform.dot(&z);
        if !sample.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFiniteValue("derivative realization"));
        }
        let spline = CubicSpline::natural(&post.grid, &sample);
        let fine = spline.evaluate_many(fine_grid);
        candidates.push(fine_grid[argmax(&fine)]);
    }
    summarize(&candidates)
}
