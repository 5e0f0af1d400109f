//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums, bounds and result containers for portfolio optimization.

use std::fmt::Display;

/// Supported portfolio optimization objectives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptimizerMethod {
  /// Maximize the Sharpe ratio on historical annualized moments.
  #[default]
  MaxSharpe,
  /// Equalize each asset's share of portfolio variance.
  RiskParity,
  /// Blended expected returns, turnover cost, sector and style bands.
  MultiFactor,
  /// Black-Litterman posterior expected returns with a max-Sharpe solve.
  BlackLitterman,
}

impl OptimizerMethod {
  /// Parse a string into an [`OptimizerMethod`].
  pub fn from_str(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "risk-parity" | "riskparity" | "rp" => Self::RiskParity,
      "multi-factor" | "multifactor" | "factor" => Self::MultiFactor,
      "bl" | "black-litterman" | "blacklitterman" => Self::BlackLitterman,
      _ => Self::MaxSharpe,
    }
  }
}

impl Display for OptimizerMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OptimizerMethod::MaxSharpe => write!(f, "max-sharpe"),
      OptimizerMethod::RiskParity => write!(f, "risk-parity"),
      OptimizerMethod::MultiFactor => write!(f, "multi-factor"),
      OptimizerMethod::BlackLitterman => write!(f, "black-litterman"),
    }
  }
}

/// Per-asset weight bounds shared by every optimizer mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightBounds {
  /// Minimum weight of any asset.
  pub lower: f64,
  /// Maximum weight of any asset.
  pub upper: f64,
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self {
      lower: 0.0,
      upper: 1.0,
    }
  }
}

impl WeightBounds {
  /// Whether `n` assets can hold a fully invested portfolio inside these bounds.
  pub fn admits(&self, n: usize) -> bool {
    let n = n as f64;
    self.lower <= self.upper && n * self.lower <= 1.0 + 1e-12 && n * self.upper >= 1.0 - 1e-12
  }

  pub(crate) fn expand(&self, n: usize) -> (Vec<f64>, Vec<f64>) {
    (vec![self.lower; n], vec![self.upper; n])
  }
}

/// Output of a portfolio optimization run.
#[derive(Clone, Debug, Default)]
pub struct PortfolioResult {
  /// Asset identifiers, aligned with `weights`.
  pub tickers: Vec<String>,
  /// Final portfolio weights.
  pub weights: Vec<f64>,
  /// Model expected portfolio return (annualized).
  pub expected_return: f64,
  /// Model portfolio volatility (annualized).
  pub volatility: f64,
  /// Sharpe ratio computed as `(expected_return - risk_free) / volatility`.
  pub sharpe: f64,
  /// Solver iterations spent.
  pub iterations: u64,
}

impl PortfolioResult {
  /// `(ticker, weight)` pairs in universe order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
    self
      .tickers
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }

  /// Weight of `ticker`, if it is part of the universe.
  pub fn weight_of(&self, ticker: &str) -> Option<f64> {
    self.iter().find(|(t, _)| *t == ticker).map(|(_, w)| w)
  }
}

pub(crate) fn equal_weights(n: usize) -> Vec<f64> {
  if n == 0 {
    Vec::new()
  } else {
    vec![1.0 / n as f64; n]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn method_parsing_falls_back_to_max_sharpe() {
    assert_eq!(OptimizerMethod::from_str("Risk-Parity"), OptimizerMethod::RiskParity);
    assert_eq!(OptimizerMethod::from_str("bl"), OptimizerMethod::BlackLitterman);
    assert_eq!(OptimizerMethod::from_str("factor"), OptimizerMethod::MultiFactor);
    assert_eq!(OptimizerMethod::from_str("anything"), OptimizerMethod::MaxSharpe);
  }

  #[test]
  fn bounds_reject_unfillable_universe() {
    let bounds = WeightBounds {
      lower: 0.0,
      upper: 0.2,
    };

    assert!(!bounds.admits(4));
    assert!(bounds.admits(5));
  }
}
