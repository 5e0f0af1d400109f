//! # Random Portfolio Frontier
//!
//! $$
//! \mathbf w = \frac{\mathbf e}{\mathbf 1^\top \mathbf e},\quad e_i \sim \mathrm{Exp}(1)
//! \;\Longrightarrow\; \mathbf w \sim \mathrm{Dirichlet}(\mathbf 1)
//! $$
//!
//! Uniform sampling of long-only portfolios for risk/return scatter plots.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::Distribution;
use rand_distr::Exp;
use tracing::warn;

use super::data::RiskModel;

/// One sampled portfolio.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe: f64,
  pub weights: Vec<f64>,
}

/// Draw `count` portfolios uniformly from the simplex and evaluate them on `risk`.
pub fn sample_random_portfolios(risk: &RiskModel, risk_free: f64, count: usize, seed: u64) -> Vec<FrontierPoint> {
  let n = risk.n_assets();
  if n == 0 {
    return Vec::new();
  }

  let exp = match Exp::new(1.0) {
    Ok(exp) => exp,
    Err(err) => {
      warn!(error = %err, "exponential sampler unavailable");
      return Vec::new();
    }
  };

  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|_| {
      let draws: Vec<f64> = exp.sample_iter(&mut rng).take(n).collect();
      let total: f64 = draws.iter().sum();
      let weights: Vec<f64> = draws.iter().map(|d| d / total).collect();

      let (expected_return, volatility) = risk.performance(&weights);
      let sharpe = risk.sharpe(&weights, risk_free);
      FrontierPoint {
        expected_return,
        volatility,
        sharpe,
        weights,
      }
    })
    .collect()
}
