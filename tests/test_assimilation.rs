//! Test the twin experiment assimilation driver.
//!
//! The reference Lorenz63 experiment is run end to end with seeded random sources.

use approx::assert_relative_eq;
use na::{DMatrix, DVector, Dynamic, Vector1, Vector3, U1, U3};
use nalgebra as na;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use ensemble_estimate::assimilation::{assimilate, rmse, run_assimilation, twin_experiment, AssimilationConfig};
use ensemble_estimate::integrators::integrate;
use ensemble_estimate::lorenz::Lorenz63;
use ensemble_estimate::models::{FunctionObserveModel, IdentityObserveModel};
use ensemble_estimate::noise::CorrelatedNoise;
use ensemble_estimate::EstimateError;

/// Last step of the observation window of the reference experiment.
const WINDOW: usize = 200;

fn first_element(x: &Vector3<f64>) -> Vector1<f64> {
    Vector1::new(x[0])
}

fn first_element_jacobian(_x: &Vector3<f64>) -> na::Matrix1x3<f64> {
    na::Matrix1x3::new(1., 0., 0.)
}

fn null_observation(_x: &Vector3<f64>) -> Vector3<f64> {
    Vector3::zeros()
}

fn null_jacobian(_x: &Vector3<f64>) -> na::Matrix3<f64> {
    na::Matrix3::zeros()
}

#[test]
fn test_reference_schedule() {
    let config = AssimilationConfig::lorenz63_twin();
    assert_eq!(config.steps().unwrap(), 1000);
    let times = config.times().unwrap();
    assert_eq!(times.len(), 1001);
    assert_eq!(times[0], 0.);
    assert_relative_eq!(times[1000], 10., epsilon = 1e-12);

    let schedule = config.observation_schedule().unwrap();
    assert_eq!(schedule, (1..=10).map(|j| 20 * j).collect::<Vec<_>>());
    config.validate().unwrap();
}

#[test]
fn test_schedule_within_observation_horizon() {
    // The horizon is not a multiple of the interval
    let mut config = AssimilationConfig::lorenz63_twin();
    config.observation_interval = 0.3;
    let schedule = config.observation_schedule().unwrap();
    assert_eq!(schedule, vec![30, 60, 90, 120, 150, 180]);
    for &k in schedule.iter() {
        assert!(k as f64 * config.dt <= config.observation_horizon);
    }

    let mut config = AssimilationConfig::lorenz63_twin();
    config.observation_horizon = 1.99;
    assert_eq!(config.observation_schedule().unwrap().len(), 9);
}

#[test]
fn test_time_grid_within_horizon() {
    // The horizon is not a multiple of the step
    let mut config = AssimilationConfig::lorenz63_twin();
    config.horizon = 10.006;
    assert_eq!(config.steps().unwrap(), 1000);
    let times = config.times().unwrap();
    assert!(times[times.len() - 1] <= config.horizon);

    config.horizon = 0.019;
    assert_eq!(config.steps().unwrap(), 1);
}

#[test]
fn test_observation_noise_not_psd() {
    let mut config = AssimilationConfig::lorenz63_twin();
    config.observe_noise = CorrelatedNoise::scaled_identity(U3, -0.0225);
    assert!(matches!(config.validate(), Err(EstimateError::Configuration { .. })));

    // Rejected before any observation is sampled
    let mut rng = Pcg64::seed_from_u64(9);
    assert!(matches!(
        twin_experiment(&config, &IdentityObserveModel, &mut rng),
        Err(EstimateError::Configuration { .. })
    ));
}

#[test]
fn test_noise_covariance_not_square() {
    let d = Dynamic::new(3);
    let mut config = AssimilationConfig {
        model: |x: &DVector<f64>| -x,
        dt: 0.1,
        horizon: 1.,
        true_initial: DVector::from_vec(vec![1., 2., 3.]),
        background_initial: DVector::from_vec(vec![1., 2., 3.]),
        background_noise: CorrelatedNoise::scaled_identity(d, 0.1),
        process_noise: CorrelatedNoise {
            Q: DMatrix::identity(3, 2),
        },
        observe_noise: CorrelatedNoise::scaled_identity(d, 0.1),
        observation_interval: 0.5,
        observation_horizon: 1.,
        ensemble_size: 4,
    };
    assert!(matches!(config.validate(), Err(EstimateError::Shape { .. })));

    config.process_noise = CorrelatedNoise::scaled_identity(d, 0.);
    config.observe_noise = CorrelatedNoise {
        Q: DMatrix::identity(3, 2),
    };
    assert!(matches!(config.validate(), Err(EstimateError::Shape { .. })));

    config.observe_noise = CorrelatedNoise::scaled_identity(d, 0.1);
    config.validate().unwrap();
}

#[test]
fn test_invalid_configuration() {
    let mut config = AssimilationConfig::lorenz63_twin();
    config.ensemble_size = 1;
    assert!(matches!(config.validate(), Err(EstimateError::Configuration { .. })));

    // Observation interval shorter than a step
    let mut config = AssimilationConfig::lorenz63_twin();
    config.observation_interval = 0.004;
    assert!(matches!(config.observation_schedule(), Err(EstimateError::Configuration { .. })));

    // Observations beyond the horizon
    let mut config = AssimilationConfig::lorenz63_twin();
    config.observation_horizon = 12.;
    assert!(matches!(config.observation_schedule(), Err(EstimateError::Configuration { .. })));

    let mut config = AssimilationConfig::lorenz63_twin();
    config.dt = 0.;
    assert!(matches!(config.steps(), Err(EstimateError::Configuration { .. })));

    let mut rng = Pcg64::seed_from_u64(1);
    let mut config = AssimilationConfig::lorenz63_twin();
    config.ensemble_size = 0;
    assert!(matches!(
        run_assimilation(&config, &IdentityObserveModel, &mut rng),
        Err(EstimateError::Configuration { .. })
    ));
}

#[test]
fn test_dimension_mismatch() {
    let d = Dynamic::new(3);
    let config = AssimilationConfig {
        model: |x: &DVector<f64>| -x,
        dt: 0.1,
        horizon: 1.,
        true_initial: DVector::from_vec(vec![1., 2., 3.]),
        background_initial: DVector::from_vec(vec![1., 2.]),
        background_noise: CorrelatedNoise::scaled_identity(d, 0.1),
        process_noise: CorrelatedNoise::scaled_identity(d, 0.),
        observe_noise: CorrelatedNoise::scaled_identity(d, 0.1),
        observation_interval: 0.5,
        observation_horizon: 1.,
        ensemble_size: 4,
    };
    assert!(matches!(config.validate(), Err(EstimateError::Shape { .. })));
}

#[test]
fn test_twin_observations() {
    let mut rng = Pcg64::seed_from_u64(2);
    let config = AssimilationConfig::lorenz63_twin();
    let (truth, observations) = twin_experiment(&config, &IdentityObserveModel, &mut rng).unwrap();

    assert_eq!(truth.len(), 1001);
    assert_eq!(truth, integrate(&Lorenz63::<f64>::default(), &Vector3::new(1., 0., 0.), 0.01, 1000));
    assert_eq!(observations.steps, config.observation_schedule().unwrap());
    assert_eq!(observations.values.len(), 10);
    for (j, (&k, z)) in observations.steps.iter().zip(observations.values.iter()).enumerate() {
        assert_relative_eq!(observations.times[j], k as f64 * 0.01, epsilon = 1e-12);
        // Observation noise has standard deviation 0.15
        assert!((z - &truth[k]).amax() < 1.);
    }
}

#[test]
fn test_reproducible_for_seed() {
    let config = AssimilationConfig::lorenz63_twin();
    let run = |seed| {
        let mut rng = Pcg64::seed_from_u64(seed);
        run_assimilation(&config, &IdentityObserveModel, &mut rng).unwrap()
    };

    let first = run(3);
    let second = run(3);
    assert_eq!(first.analysis_mean, second.analysis_mean);
    assert_eq!(first.spread, second.spread);
    assert_eq!(first.observations.values, second.observations.values);
    assert_eq!(first.rmse().unwrap(), second.rmse().unwrap());

    // The truth and background do not depend on the random source
    let other = run(4);
    assert_eq!(first.truth, other.truth);
    assert_eq!(first.background, other.background);
    assert_ne!(first.analysis_mean, other.analysis_mean);
}

#[test]
fn test_analysis_beats_background() {
    let config = AssimilationConfig::lorenz63_twin();
    for seed in 0..3 {
        let mut rng = Pcg64::seed_from_u64(seed);
        let result = run_assimilation(&config, &IdentityObserveModel, &mut rng).unwrap();

        assert_eq!(result.times.len(), 1001);
        assert_eq!(result.truth.len(), 1001);
        assert_eq!(result.background.len(), 1001);
        assert_eq!(result.analysis_mean.len(), 1001);
        assert_eq!(result.spread.len(), 1001);
        assert_eq!(result.analysis_mean[0], config.background_initial);

        let analysis = rmse(&result.analysis_mean[..=WINDOW], &result.truth[..=WINDOW]).unwrap();
        let background = rmse(&result.background[..=WINDOW], &result.truth[..=WINDOW]).unwrap();
        assert!(analysis < background, "analysis {} background {}", analysis, background);

        // Estimate near the truth at the end of the observation window
        let last = (&result.analysis_mean[WINDOW] - &result.truth[WINDOW]).amax();
        assert!(last < 3., "error {} at the last observation", last);
        assert!(result.spread.iter().all(|s| s.is_finite()));
    }
}

#[test]
fn test_partial_observation() {
    let mut rng = Pcg64::seed_from_u64(5);
    let base = AssimilationConfig::lorenz63_twin();
    let config = AssimilationConfig {
        model: base.model,
        dt: base.dt,
        horizon: base.horizon,
        true_initial: base.true_initial,
        background_initial: base.background_initial,
        background_noise: base.background_noise,
        process_noise: base.process_noise,
        observe_noise: CorrelatedNoise::scaled_identity(U1, 0.0225),
        observation_interval: base.observation_interval,
        observation_horizon: base.observation_horizon,
        ensemble_size: base.ensemble_size,
    };
    let h = FunctionObserveModel {
        h: first_element,
        Hx: first_element_jacobian,
    };

    let result = run_assimilation(&config, &h, &mut rng).unwrap();
    assert_eq!(result.observations.values.len(), 10);
    assert!(result.rmse().unwrap().is_finite());
}

#[test]
fn test_without_observations_mean_follows_background() {
    let mut rng = Pcg64::seed_from_u64(6);
    let mut config = AssimilationConfig::lorenz63_twin();
    config.observation_horizon = 0.;
    config.background_noise = CorrelatedNoise::scaled_identity(U3, 0.);
    config.horizon = 1.;

    let result = run_assimilation(&config, &IdentityObserveModel, &mut rng).unwrap();
    assert!(result.observations.steps.is_empty());
    for (a, b) in result.analysis_mean.iter().zip(result.background.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
    assert!(result.spread.iter().all(|&s| s < 1e-9));
}

#[test]
fn test_failed_analysis_aborts() {
    let mut rng = Pcg64::seed_from_u64(7);
    let mut config = AssimilationConfig::lorenz63_twin();
    config.observe_noise = CorrelatedNoise::scaled_identity(U3, 0.);
    // A state independent observation without noise has a zero innovation covariance
    let h = FunctionObserveModel {
        h: null_observation,
        Hx: null_jacobian,
    };

    let res = run_assimilation(&config, &h, &mut rng);
    assert!(matches!(res, Err(EstimateError::Numerical { .. })));
}

#[test]
fn test_unused_observations() {
    let mut rng = Pcg64::seed_from_u64(8);
    let config = AssimilationConfig::lorenz63_twin();
    let (_, mut observations) = twin_experiment(&config, &IdentityObserveModel, &mut rng).unwrap();
    observations.steps.push(2000);
    observations.times.push(20.);
    observations.values.push(Vector3::zeros());

    let res = assimilate(&config, &IdentityObserveModel, &observations, &mut rng);
    assert!(matches!(res, Err(EstimateError::Configuration { .. })));
}

#[test]
fn test_rmse() {
    let a = vec![Vector3::new(1., 2., 3.), Vector3::new(0., 0., 0.)];
    let b = vec![Vector3::new(1., 2., 3.), Vector3::new(3., 0., 0.)];
    assert_relative_eq!(rmse(&a, &b).unwrap(), (9f64 / 6.).sqrt(), epsilon = 1e-15);
    assert_eq!(rmse(&a, &a).unwrap(), 0.);

    assert!(matches!(rmse(&a, &b[..1]), Err(EstimateError::Shape { .. })));
    let empty: Vec<Vector3<f64>> = Vec::new();
    assert!(matches!(rmse(&empty, &empty), Err(EstimateError::Configuration { .. })));
}
