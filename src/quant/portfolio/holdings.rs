//! # Holdings
//!
//! $$
//! w_i^{\text{cur}} = \frac{q_i P_i}{\sum_j q_j P_j}
//! $$
//!
//! Adapter over ledger positions: current market-value weights for rebalancing and summary
//! performance of the held book.

use std::collections::HashMap;

use impl_new_derive::ImplNew;

use crate::error::EngineError;
use crate::error::Result;

/// A held lot as recorded by the transaction ledger.
#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct Position {
  pub ticker: String,
  pub shares: f64,
  /// Average price paid per share.
  pub cost_basis: f64,
}

/// Summary of the held book at current prices.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LedgerMetrics {
  pub total_invested: f64,
  pub current_value: f64,
  /// Total return in percent.
  pub total_return_pct: f64,
}

/// Market-value weights of `positions` over `tickers`, priced at `prices`.
///
/// Positions outside the universe are ignored. `None` when nothing in the universe is held.
pub fn current_weights(positions: &[Position], tickers: &[String], prices: &[f64]) -> Option<Vec<f64>> {
  let mut values = vec![0.0; tickers.len()];
  for p in positions {
    if let Some(i) = tickers.iter().position(|t| *t == p.ticker) {
      let v = p.shares * prices.get(i).copied().unwrap_or(0.0);
      if v.is_finite() {
        values[i] += v.max(0.0);
      }
    }
  }

  let total: f64 = values.iter().sum();
  if total <= 0.0 {
    return None;
  }
  Some(values.into_iter().map(|v| v / total).collect())
}

/// Invested amount, current value and return of `positions`.
pub fn ledger_metrics(positions: &[Position], prices: &HashMap<String, f64>) -> Result<LedgerMetrics> {
  let mut total_invested = 0.0;
  let mut current_value = 0.0;

  for p in positions {
    let price = prices
      .get(&p.ticker)
      .copied()
      .filter(|v| v.is_finite())
      .ok_or_else(|| EngineError::InvalidInput(format!("no current price for {}", p.ticker)))?;
    total_invested += p.shares * p.cost_basis;
    current_value += p.shares * price;
  }

  let total_return_pct = if total_invested > 0.0 {
    (current_value / total_invested - 1.0) * 100.0
  } else {
    0.0
  };

  Ok(LedgerMetrics {
    total_invested,
    current_value,
    total_return_pct,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn weights_follow_market_value() {
    let positions = vec![
      Position::new("AAA".to_string(), 10.0, 5.0),
      Position::new("BBB".to_string(), 5.0, 20.0),
      Position::new("AAA".to_string(), 10.0, 6.0),
      Position::new("ZZZ".to_string(), 100.0, 1.0),
    ];
    let tickers = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
    let w = current_weights(&positions, &tickers, &[10.0, 40.0, 7.0]).unwrap();

    assert_abs_diff_eq!(w[0], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 0.5, epsilon = 1e-12);
    assert_eq!(w[2], 0.0);
  }

  #[test]
  fn nothing_held_yields_none() {
    let tickers = vec!["AAA".to_string()];
    assert!(current_weights(&[], &tickers, &[10.0]).is_none());
  }

  #[test]
  fn ledger_metrics_summarize_book() -> anyhow::Result<()> {
    let positions = vec![
      Position::new("AAA".to_string(), 10.0, 5.0),
      Position::new("BBB".to_string(), 2.0, 25.0),
    ];
    let prices = HashMap::from([("AAA".to_string(), 6.0), ("BBB".to_string(), 30.0)]);
    let m = ledger_metrics(&positions, &prices)?;

    assert_abs_diff_eq!(m.total_invested, 100.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.current_value, 120.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.total_return_pct, 20.0, epsilon = 1e-9);
    Ok(())
  }

  #[test]
  fn missing_price_is_an_error() {
    let positions = vec![Position::new("AAA".to_string(), 1.0, 5.0)];
    assert!(ledger_metrics(&positions, &HashMap::new()).is_err());
  }
}
