//! # Return Signals
//!
//! $$
//! m_i = 252\cdot\frac{1}{k}\sum_{t=T-k+1}^{T} r_{t,i},\qquad
//! f_i = 252\cdot\frac{1}{h}\sum_{j=1}^{h}\hat r_{T+j,i}
//! $$
//!
//! Trailing momentum and model-based forward return estimates feeding the multi-factor
//! expected-return blend.

use rayon::prelude::*;
use tracing::debug;

use super::data::ReturnPanel;
use super::data::sample_mean;
use crate::stats::arima::Arima111;

/// Annualized return signals of one asset.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AssetSignals {
  /// Annualized mean of the full return history.
  pub historical: f64,
  /// Annualized mean of the trailing window.
  pub momentum: f64,
  /// Annualized mean of the model forecast.
  pub forward: f64,
}

/// Mean of the last `window` returns, annualized. `None` if the history is shorter.
pub fn trailing_momentum(returns: &[f64], window: usize, periods_per_year: f64) -> Option<f64> {
  if window == 0 || returns.len() < window {
    return None;
  }
  Some(sample_mean(&returns[returns.len() - window..]) * periods_per_year)
}

/// Mean of an ARIMA(1,1,1) forecast over `horizon` periods, annualized.
///
/// Falls back to the annualized historical mean when the model cannot be fitted.
pub fn forward_return_estimate(returns: &[f64], horizon: usize, periods_per_year: f64) -> f64 {
  let historical = sample_mean(returns) * periods_per_year;
  if horizon == 0 {
    return historical;
  }

  match Arima111::fit(returns) {
    Some(model) => {
      let path = model.forecast(horizon);
      sample_mean(&path) * periods_per_year
    }
    None => {
      debug!(n = returns.len(), "forward estimate falls back to historical mean");
      historical
    }
  }
}

/// Signals for every column of `returns`, computed in parallel.
pub fn compute_signals(
  returns: &ReturnPanel,
  momentum_window: usize,
  forecast_horizon: usize,
  periods_per_year: f64,
) -> Vec<AssetSignals> {
  (0..returns.tickers.len())
    .into_par_iter()
    .map(|j| {
      let series = returns.column(j).to_vec();
      let historical = sample_mean(&series) * periods_per_year;
      AssetSignals {
        historical,
        momentum: trailing_momentum(&series, momentum_window, periods_per_year).unwrap_or(historical),
        forward: forward_return_estimate(&series, forecast_horizon, periods_per_year),
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn momentum_uses_trailing_window() {
    let mut returns = vec![0.0; 20];
    returns.extend([0.01; 12]);

    assert_abs_diff_eq!(
      trailing_momentum(&returns, 12, 252.0).unwrap(),
      0.01 * 252.0,
      epsilon = 1e-12
    );
    assert!(trailing_momentum(&returns[..5], 12, 252.0).is_none());
  }

  #[test]
  fn short_history_falls_back_to_mean() {
    let returns = [0.01, 0.03];
    assert_abs_diff_eq!(
      forward_return_estimate(&returns, 12, 252.0),
      0.02 * 252.0,
      epsilon = 1e-12
    );
  }

  #[test]
  fn constant_returns_forecast_themselves() {
    let returns = [0.001; 60];
    assert_abs_diff_eq!(
      forward_return_estimate(&returns, 12, 252.0),
      0.252,
      epsilon = 1e-9
    );
  }
}
