use approx::assert_relative_eq;
use marginalia::LogDensity;
use marginalia::draws::PosteriorDraws;
use marginalia::mixture::{MixtureParams, MixturePriors, NormalMixtureModel};
use marginalia::target::central_difference_gradient;
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// --- Helper: two well-separated clusters ---
fn two_cluster_values(seed: u64, n: usize) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let left = Normal::new(-3.0, 0.7).unwrap();
    let right = Normal::new(2.5, 1.1).unwrap();
    Array1::from_iter((0..n).map(|_| {
        if rng.gen_bool(0.4) {
            left.sample(&mut rng)
        } else {
            right.sample(&mut rng)
        }
    }))
}

#[test]
fn far_outliers_stay_finite() {
    init_logging();
    // Raw densities underflow to zero here; the log-domain sum must not.
    let model = NormalMixtureModel::new(array![-400.0, 350.0], 2, MixturePriors::default()).unwrap();
    let params = MixtureParams {
        weights: array![0.5, 0.5],
        means: array![-1.0, 1.0],
        scales: array![0.5, 0.5],
    };
    let ll = model.log_likelihood(&params).unwrap();
    assert!(ll.is_finite());
    let membership = model.membership_probabilities(&params).unwrap();
    assert!(membership[[0, 0]] > 0.999_999);
    assert!(membership[[1, 1]] > 0.999_999);
}

#[test]
fn gradient_matches_finite_differences_for_random_points() {
    let model =
        NormalMixtureModel::new(two_cluster_values(1, 50), 3, MixturePriors::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(12);
    for _ in 0..5 {
        let theta = Array1::from_iter((0..model.dim()).map(|_| rng.gen_range(-0.7..0.7)));
        let (value, analytic) = model.log_density_and_gradient(theta.view()).unwrap();
        assert!(value.is_finite());
        let numeric = central_difference_gradient(&model, theta.view(), 1e-6).unwrap();
        for i in 0..model.dim() {
            assert_relative_eq!(analytic[i], numeric[i], epsilon = 1e-5, max_relative = 1e-5);
        }
    }
}

#[test]
fn truth_beats_a_collapsed_fit() {
    let model =
        NormalMixtureModel::new(two_cluster_values(2, 200), 2, MixturePriors::default()).unwrap();
    let truth = MixtureParams {
        weights: array![0.4, 0.6],
        means: array![-3.0, 2.5],
        scales: array![0.7, 1.1],
    };
    let collapsed = MixtureParams {
        weights: array![0.5, 0.5],
        means: array![0.0, 0.1],
        scales: array![1.0, 1.0],
    };
    assert!(model.log_posterior(&truth).unwrap() > model.log_posterior(&collapsed).unwrap());
}

#[test]
fn per_draw_reports_match_direct_evaluation() {
    let model =
        NormalMixtureModel::new(two_cluster_values(3, 20), 2, MixturePriors::default()).unwrap();
    let draws_params = [
        MixtureParams {
            weights: array![0.4, 0.6],
            means: array![-3.0, 2.5],
            scales: array![0.7, 1.1],
        },
        MixtureParams {
            weights: array![0.3, 0.7],
            means: array![-2.5, 2.0],
            scales: array![1.0, 0.9],
        },
    ];
    let mut samples = Array2::<f64>::zeros((2, model.dim()));
    for (d, params) in draws_params.iter().enumerate() {
        samples.row_mut(d).assign(&model.unconstrain(params).unwrap());
    }
    let draws = PosteriorDraws::new(model.parameter_names(), samples).unwrap();

    let grid = array![-4.0, -1.0, 0.0, 2.0, 5.0];
    let densities = model.predictive_density_draws(&draws, grid.view()).unwrap();
    let membership = model.posterior_membership(&draws).unwrap();

    let mut expected_membership = Array2::<f64>::zeros((20, 2));
    for (d, params) in draws_params.iter().enumerate() {
        let direct = model.predictive_density(params, grid.view()).unwrap();
        for g in 0..grid.len() {
            assert_relative_eq!(densities[[d, g]], direct[g], epsilon = 1e-10);
        }
        expected_membership += &model.membership_probabilities(params).unwrap();
    }
    expected_membership /= 2.0;
    for i in 0..20 {
        for k in 0..2 {
            assert_relative_eq!(membership[[i, k]], expected_membership[[i, k]], epsilon = 1e-10);
        }
    }
}
