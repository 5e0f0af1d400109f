//! # Integer Share Allocation
//!
//! $$
//! q_i = \left\lfloor \frac{B\,w_i}{P_i} \right\rfloor,\qquad \sum_i q_i P_i \le B
//! $$
//!
//! Greedy conversion of target weights into whole shares under a cash budget. Assets are
//! visited by descending weight; a first pass buys the floored target, a second pass spends
//! the remaining cash on whole shares in the same order. The result is a heuristic, not a
//! knapsack optimum, and leftover cash is expected when prices do not divide the budget.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::error::EngineError;
use crate::error::Result;

// Absorbs rounding in `budget * w / price` so exact fits are not floored away.
const ROUNDING_GUARD: f64 = 1e-9;

/// Shares bought for one asset.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationLot {
  pub ticker: String,
  pub shares: u64,
  pub price: f64,
}

impl AllocationLot {
  pub fn value(&self) -> f64 {
    self.shares as f64 * self.price
  }
}

/// Whole-share allocation with the cash left over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Allocation {
  /// One lot per asset, in input order (zero-share lots included).
  pub lots: Vec<AllocationLot>,
  /// Cash spent on shares.
  pub invested: f64,
  /// Budget minus `invested`.
  pub remaining_cash: f64,
}

impl Allocation {
  /// Shares allocated to `ticker`.
  pub fn shares_of(&self, ticker: &str) -> Option<u64> {
    self.lots.iter().find(|l| l.ticker == ticker).map(|l| l.shares)
  }

  /// Realized weights `shares * price / invested`, in input order.
  pub fn realized_weights(&self) -> Vec<f64> {
    if self.invested <= 0.0 {
      return vec![0.0; self.lots.len()];
    }
    self.lots.iter().map(|l| l.value() / self.invested).collect()
  }
}

/// Allocate `budget` across assets with the given prices and target weights.
pub fn allocate_integer_shares(
  budget: f64,
  tickers: &[String],
  prices: &[f64],
  weights: &[f64],
) -> Result<Allocation> {
  if !budget.is_finite() || budget < 0.0 {
    return Err(EngineError::InvalidInput(format!("budget must be non-negative, got {budget}")));
  }
  if tickers.len() != prices.len() || tickers.len() != weights.len() {
    return Err(EngineError::InvalidInput(format!(
      "{} tickers, {} prices, {} weights",
      tickers.len(),
      prices.len(),
      weights.len()
    )));
  }
  if let Some(i) = prices.iter().position(|p| !p.is_finite() || *p <= 0.0) {
    return Err(EngineError::InvalidInput(format!(
      "{} has non-positive price {}",
      tickers[i], prices[i]
    )));
  }
  if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
    return Err(EngineError::InvalidInput(format!("{} has non-finite weight", tickers[i])));
  }

  let mut order: Vec<usize> = (0..tickers.len()).collect();
  order.sort_by_key(|&i| Reverse(OrderedFloat(weights[i])));

  let tol = ROUNDING_GUARD * budget.max(1.0);
  let mut shares = vec![0u64; tickers.len()];
  let mut remaining = budget;

  for &i in &order {
    let target = (budget * weights[i] / prices[i] + ROUNDING_GUARD).floor();
    if target >= 1.0 {
      let cost = target * prices[i];
      if cost <= remaining + tol {
        shares[i] = target as u64;
        remaining = (remaining - cost).max(0.0);
      }
    }
  }

  for &i in &order {
    if prices[i] <= remaining + tol {
      let mut extra = (remaining / prices[i] + ROUNDING_GUARD).floor();
      if extra * prices[i] > remaining + tol {
        extra -= 1.0;
      }
      if extra >= 1.0 {
        shares[i] += extra as u64;
        remaining = (remaining - extra * prices[i]).max(0.0);
      }
    }
  }

  let lots: Vec<AllocationLot> = tickers
    .iter()
    .zip(prices.iter())
    .zip(shares.iter())
    .map(|((t, &price), &shares)| AllocationLot {
      ticker: t.clone(),
      shares,
      price,
    })
    .collect();
  let invested: f64 = lots.iter().map(AllocationLot::value).sum();

  debug!(budget, invested, remaining, "integer allocation done");

  Ok(Allocation {
    lots,
    invested,
    remaining_cash: (budget - invested).max(0.0),
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn tickers(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("T{i}")).collect()
  }

  #[test]
  fn exact_budget_is_fully_spent() {
    let alloc = allocate_integer_shares(10_000.0, &tickers(2), &[3000.0, 4000.0], &[0.6, 0.4]).unwrap();

    assert_eq!(alloc.shares_of("T0"), Some(2));
    assert_eq!(alloc.shares_of("T1"), Some(1));
    assert_abs_diff_eq!(alloc.invested, 10_000.0, epsilon = 1e-9);
    assert_abs_diff_eq!(alloc.remaining_cash, 0.0, epsilon = 1e-9);
  }

  #[test]
  fn leftover_cash_is_accepted() {
    let prices = [333.0, 517.0, 71.0];
    let alloc = allocate_integer_shares(1_000.0, &tickers(3), &prices, &[0.5, 0.3, 0.2]).unwrap();

    assert!(alloc.invested <= 1_000.0 + 1e-9);
    assert!(alloc.remaining_cash > 0.0);
    // No price fits into what is left.
    assert!(prices.iter().all(|p| *p > alloc.remaining_cash));
  }

  #[test]
  fn second_pass_follows_weight_order() {
    // First pass: T1 gets 1 share (50), T0 gets 0 (weight 0.3 * 100 < 40). 50 left:
    // T1 fits once more, then 0 left.
    let alloc = allocate_integer_shares(100.0, &tickers(2), &[40.0, 50.0], &[0.3, 0.7]).unwrap();

    assert_eq!(alloc.shares_of("T1"), Some(2));
    assert_eq!(alloc.shares_of("T0"), Some(0));
    assert_eq!(alloc.remaining_cash, 0.0);
  }

  #[test]
  fn zero_budget_buys_nothing() {
    let alloc = allocate_integer_shares(0.0, &tickers(2), &[10.0, 20.0], &[0.5, 0.5]).unwrap();
    assert!(alloc.lots.iter().all(|l| l.shares == 0));
    assert_eq!(alloc.remaining_cash, 0.0);
  }

  #[test]
  fn invalid_inputs_are_rejected() {
    assert!(allocate_integer_shares(-1.0, &tickers(1), &[10.0], &[1.0]).is_err());
    assert!(allocate_integer_shares(100.0, &tickers(1), &[0.0], &[1.0]).is_err());
    assert!(allocate_integer_shares(100.0, &tickers(2), &[10.0], &[1.0]).is_err());
  }
}
