use approx::assert_relative_eq;
use marginalia::LogDensity;
use marginalia::draws::PosteriorDraws;
use marginalia::mismeasurement::{
    MismeasurementData, MismeasurementModel, MismeasurementParams, MismeasurementPriors,
};
use marginalia::target::central_difference_gradient;
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// --- Helper: one unvalidated subject with y = 1, x* = 0 and no covariates ---
fn single_subject_model() -> MismeasurementModel {
    let data = MismeasurementData {
        outcome: array![1],
        observed_exposure: array![0],
        true_exposure: vec![None],
        covariates: Array2::zeros((1, 0)),
    };
    MismeasurementModel::new(data, MismeasurementPriors::default()).unwrap()
}

fn scenario_params() -> MismeasurementParams {
    MismeasurementParams {
        intercept: 0.0,
        exposure_effect: 1.0,
        covariate_effects: Array1::zeros(0),
        sensitivity: 0.8,
        specificity: 0.9,
        prevalence: 0.3,
    }
}

#[test]
fn reduced_observation_matches_direct_sum() {
    init_logging();
    let model = single_subject_model();
    let params = scenario_params();
    let direct = (sigmoid(0.0) * 0.9 * 0.7 + sigmoid(1.0) * 0.2 * 0.3).ln();

    let terms = model.reduced_terms(&params, 0).unwrap();
    assert!((terms.marginal() - direct).abs() <= 1e-9);
    assert_relative_eq!(model.log_likelihood(&params).unwrap(), direct, epsilon = 1e-12);

    let p_exposed = sigmoid(1.0) * 0.2 * 0.3 / direct.exp();
    let probabilities = model.exposure_probabilities(&params).unwrap();
    assert_relative_eq!(probabilities[0], p_exposed, epsilon = 1e-12);
}

#[test]
fn validated_subject_uses_single_joint_term() {
    let data = MismeasurementData {
        outcome: array![1],
        observed_exposure: array![0],
        true_exposure: vec![Some(1)],
        covariates: Array2::zeros((1, 0)),
    };
    let model = MismeasurementModel::new(data, MismeasurementPriors::default()).unwrap();
    let ll = model.log_likelihood(&scenario_params()).unwrap();
    assert_relative_eq!(ll, (sigmoid(1.0) * 0.2 * 0.3).ln(), epsilon = 1e-12);
    assert!(model.reduced_indices().is_empty());
}

#[test]
fn impossible_observation_is_negative_infinity_not_nan() {
    let model = single_subject_model();
    let mut params = scenario_params();
    // x* = 0 is impossible when both error rates are zero and x = 1 surely
    params.sensitivity = 1.0;
    params.prevalence = 1.0;
    let ll = model.log_likelihood(&params).unwrap();
    assert_eq!(ll, f64::NEG_INFINITY);
    assert!(model.exposure_probabilities(&params).is_err());
}

// --- Helper: simulated study with a validation subsample ---
fn simulated_model(seed: u64, n: usize) -> MismeasurementModel {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut outcome = Array1::<u8>::zeros(n);
    let mut observed = Array1::<u8>::zeros(n);
    let mut truth = Vec::with_capacity(n);
    let mut covariates = Array2::<f64>::zeros((n, 2));
    for i in 0..n {
        let x = u8::from(rng.gen_bool(0.35));
        let z0: f64 = rng.gen_range(-1.5..1.5);
        let z1 = f64::from(u8::from(rng.gen_bool(0.5)));
        let eta = -0.5 + 1.2 * f64::from(x) + 0.4 * z0 - 0.3 * z1;
        outcome[i] = u8::from(rng.gen_bool(sigmoid(eta)));
        observed[i] = if x == 1 {
            u8::from(rng.gen_bool(0.85))
        } else {
            u8::from(rng.gen_bool(0.08))
        };
        truth.push(if i % 4 == 0 { Some(x) } else { None });
        covariates[[i, 0]] = z0;
        covariates[[i, 1]] = z1;
    }
    let data = MismeasurementData {
        outcome,
        observed_exposure: observed,
        true_exposure: truth,
        covariates,
    };
    MismeasurementModel::new(data, MismeasurementPriors::default()).unwrap()
}

#[test]
fn gradient_matches_finite_differences_on_simulated_data() {
    let model = simulated_model(11, 60);
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..5 {
        let theta = Array1::from_iter((0..model.dim()).map(|_| rng.gen_range(-1.0..1.0)));
        let (value, analytic) = model.log_density_and_gradient(theta.view()).unwrap();
        assert!(value.is_finite());
        let numeric = central_difference_gradient(&model, theta.view(), 1e-6).unwrap();
        for i in 0..model.dim() {
            assert_relative_eq!(analytic[i], numeric[i], epsilon = 1e-5, max_relative = 1e-5);
        }
    }
}

#[test]
fn exposure_probabilities_per_draw_follow_parameter_names() {
    let model = simulated_model(5, 24);
    let names = model.parameter_names();
    let mut header = vec!["lp__".to_string()];
    header.extend(names.iter().cloned());

    let mut rng = StdRng::seed_from_u64(8);
    let mut csv = String::from("# sampler output\n");
    csv.push_str(&header.join(","));
    csv.push('\n');
    let mut rows = Vec::new();
    for _ in 0..6 {
        let theta: Vec<f64> = (0..model.dim()).map(|_| rng.gen_range(-0.8..0.8)).collect();
        let line: Vec<String> = std::iter::once("-1.0".to_string())
            .chain(theta.iter().map(|v| format!("{v:.17}")))
            .collect();
        csv.push_str(&line.join(","));
        csv.push('\n');
        rows.push(theta);
    }

    let draws = PosteriorDraws::from_csv_reader(csv.as_bytes()).unwrap();
    let per_draw = model.exposure_probability_draws(&draws).unwrap();
    assert_eq!(per_draw.shape(), &[6, model.reduced_indices().len()]);
    for (d, theta) in rows.iter().enumerate() {
        let params = model.constrain(Array1::from_vec(theta.clone()).view()).unwrap();
        let direct = model.exposure_probabilities(&params).unwrap();
        for j in 0..direct.len() {
            assert_relative_eq!(per_draw[[d, j]], direct[j], epsilon = 1e-12);
        }
    }

    let means = model.posterior_exposure_probabilities(&draws).unwrap();
    for j in 0..means.len() {
        let expected = per_draw.column(j).sum() / 6.0;
        assert_relative_eq!(means[j], expected, epsilon = 1e-12);
        assert!((0.0..=1.0).contains(&means[j]));
    }
}
