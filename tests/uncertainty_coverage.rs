//! Statistical check that the reported sigma is a usable uncertainty: over
//! repeated noisy realizations of the same curve, the true edge should fall
//! within three reported sigmas almost always.

use braggfit::{
    fit_edge_or_sentinel, BaselineParameters, FitConfig, FitWindow, GpScheme, TransmissionCurve,
};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const TRUE_EDGE: f64 = 0.0168;
const NOISE_STD: f64 = 0.01;

fn noisy_curve(rng: &mut StdRng) -> (TransmissionCurve, FitWindow) {
    let n = 100;
    let tof = Array1::linspace(0.012, 0.022, n);
    let truth = BaselineParameters {
        a0: 0.2,
        b0: 12.0,
        a_hkl: 0.15,
        b_hkl: 8.0,
    };
    let tr = tof.mapv(|t| {
        let f = 1.0 / (1.0 + (-(t - TRUE_EDGE) / 2e-4).exp());
        let clean = truth.pre_edge(t) + (truth.post_edge(t) - truth.pre_edge(t)) * f;
        clean + NOISE_STD * rng.sample::<f64, _>(StandardNormal)
    });
    (
        TransmissionCurve::new(tof, tr).expect("valid curve"),
        FitWindow::new(0..20, 80..100),
    )
}

#[test]
fn three_sigma_interval_covers_the_true_edge() {
    let mut config = FitConfig::default();
    config.scheme = GpScheme::Interp;
    config.hyper.l = 3e-4;
    config.hyper.ns = 300;
    config.hyper.nx = 800;
    config.seed = Some(7);

    let reps = 100;
    let mut rng = StdRng::seed_from_u64(2024);
    let mut covered = 0usize;
    let mut finite = 0usize;
    for _ in 0..reps {
        let (curve, window) = noisy_curve(&mut rng);
        let fit = fit_edge_or_sentinel(&curve, &window, &config).expect("valid inputs");
        if !fit.estimate.edge_pos.is_finite() {
            continue;
        }
        finite += 1;
        if (fit.estimate.edge_pos - TRUE_EDGE).abs() <= 3.0 * fit.estimate.sigma {
            covered += 1;
        }
    }

    assert!(finite >= 98, "only {finite}/{reps} fits produced an estimate");
    // A 3-sigma interval on a well-calibrated estimator covers essentially
    // always; demand at least 95 of 100 to leave room for MC noise.
    assert!(covered * 100 >= finite * 95, "covered {covered}/{finite}");
}
