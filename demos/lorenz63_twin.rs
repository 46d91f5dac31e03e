//! Data assimilation of the Lorenz63 model in a twin experiment.
//!
//! An ensemble Kalman filter started from a wrong initial guess assimilates noisy observations of a known truth.
//! Set RUST_LOG=debug to see each analysis.

use rand::SeedableRng;
use rand_pcg::Pcg64;

use ensemble_estimate::assimilation::{rmse, run_assimilation, AssimilationConfig};
use ensemble_estimate::models::IdentityObserveModel;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let config = AssimilationConfig::lorenz63_twin();
    let mut rng = Pcg64::seed_from_u64(2021);
    let result = run_assimilation(&config, &IdentityObserveModel, &mut rng)?;

    println!("   t        truth                      analysis mean              background");
    for k in (0..result.times.len()).step_by(50) {
        let (t, a, b) = (&result.truth[k], &result.analysis_mean[k], &result.background[k]);
        println!(
            "{:5.2}  {:7.2} {:7.2} {:7.2}    {:7.2} {:7.2} {:7.2}    {:7.2} {:7.2} {:7.2}",
            result.times[k], t[0], t[1], t[2], a[0], a[1], a[2], b[0], b[1], b[2]
        );
    }

    let last = *result.observations.steps.last().unwrap_or(&0);
    println!(
        "rmse over the observation window: analysis {:.4} background {:.4}",
        rmse(&result.analysis_mean[..=last], &result.truth[..=last])?,
        rmse(&result.background[..=last], &result.truth[..=last])?
    );
    println!(
        "rmse over the experiment: analysis {:.4} background {:.4}",
        result.rmse()?,
        result.background_rmse()?
    );
    Ok(())
}
