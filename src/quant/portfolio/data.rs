//! # Portfolio Data Utilities
//!
//! $$
//! r_{t,i} = \frac{P_{t,i}}{P_{t-1,i}} - 1,\qquad
//! \Sigma^{\text{ann}} = 252\,\hat\Sigma
//! $$
//!
//! Price panels, return preprocessing and the annualized risk model (mean returns and a
//! sample or shrunk covariance) consumed by the optimizers.

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use tracing::debug;

use crate::error::EngineError;
use crate::error::Result;
use crate::stats::shrinkage::ledoit_wolf;

/// Date-indexed close prices, one column per asset. `NaN` marks a missing observation.
#[derive(Clone, Debug, Default)]
pub struct PricePanel {
  /// Row index.
  pub dates: Vec<NaiveDate>,
  /// Column index.
  pub tickers: Vec<String>,
  /// `dates.len() x tickers.len()` prices.
  pub prices: Array2<f64>,
}

impl PricePanel {
  /// Build a panel, checking that the matrix shape matches the indices.
  pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if prices.dim() != (dates.len(), tickers.len()) {
      return Err(EngineError::InvalidInput(format!(
        "price matrix is {:?} but index is {} dates x {} tickers",
        prices.dim(),
        dates.len(),
        tickers.len()
      )));
    }

    Ok(Self {
      dates,
      tickers,
      prices,
    })
  }

  /// Build a panel from per-asset columns of equal length.
  pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
    let n = dates.len();
    if let Some((ticker, col)) = columns.iter().find(|(_, c)| c.len() != n) {
      return Err(EngineError::InvalidInput(format!(
        "{ticker} has {} prices for {n} dates",
        col.len()
      )));
    }

    let tickers: Vec<String> = columns.iter().map(|(t, _)| t.clone()).collect();
    let prices = Array2::from_shape_fn((n, columns.len()), |(t, j)| columns[j].1[t]);
    Self::new(dates, tickers, prices)
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty() || self.tickers.is_empty()
  }

  /// Column index of `ticker`.
  pub fn column(&self, ticker: &str) -> Option<usize> {
    self.tickers.iter().position(|t| t == ticker)
  }

  /// Observed prices of `ticker` in date order; gaps are skipped, not zero-filled.
  pub fn series(&self, ticker: &str) -> Option<Vec<f64>> {
    let j = self.column(ticker)?;
    Some(
      self
        .prices
        .column(j)
        .iter()
        .copied()
        .filter(|p| p.is_finite())
        .collect(),
    )
  }

  /// Number of periods with a finite return for `ticker`.
  pub fn return_periods(&self, ticker: &str) -> Option<usize> {
    let j = self.column(ticker)?;
    let column = self.prices.column(j).to_vec();
    Some(
      column
        .windows(2)
        .filter(|w| (w[1] / w[0] - 1.0).is_finite())
        .count(),
    )
  }

  /// Sub-panel restricted to `tickers`, in the order given.
  pub fn select(&self, tickers: &[String]) -> Result<Self> {
    let cols = tickers
      .iter()
      .map(|t| {
        self
          .column(t)
          .ok_or_else(|| EngineError::InvalidInput(format!("{t} is not in the price panel")))
      })
      .collect::<Result<Vec<_>>>()?;

    let prices = self.prices.select(Axis(1), &cols);
    Self::new(self.dates.clone(), tickers.to_vec(), prices)
  }
}

/// Periodic returns aligned across assets.
#[derive(Clone, Debug, Default)]
pub struct ReturnPanel {
  /// Date of the later price in each return.
  pub dates: Vec<NaiveDate>,
  /// Column index.
  pub tickers: Vec<String>,
  /// `dates.len() x tickers.len()` fractional returns.
  pub returns: Array2<f64>,
}

impl ReturnPanel {
  /// Number of return periods.
  pub fn periods(&self) -> usize {
    self.returns.nrows()
  }

  pub fn is_empty(&self) -> bool {
    self.returns.is_empty()
  }

  /// Returns of asset `j` in date order.
  pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
    self.returns.column(j)
  }
}

/// Consecutive relative price changes for every asset in `panel`.
///
/// A row with any non-finite value (missing price, zero previous price) is dropped for all
/// assets so the result stays rectangular. An empty panel yields an empty result.
pub fn simple_returns(panel: &PricePanel) -> ReturnPanel {
  let n_assets = panel.tickers.len();
  if panel.dates.len() < 2 || n_assets == 0 {
    return ReturnPanel {
      dates: Vec::new(),
      tickers: panel.tickers.clone(),
      returns: Array2::zeros((0, n_assets)),
    };
  }

  let mut dates = Vec::with_capacity(panel.dates.len() - 1);
  let mut flat = Vec::with_capacity((panel.dates.len() - 1) * n_assets);
  let mut dropped = 0usize;

  for t in 1..panel.dates.len() {
    let prev = panel.prices.row(t - 1);
    let curr = panel.prices.row(t);
    let row: Vec<f64> = prev
      .iter()
      .zip(curr.iter())
      .map(|(p0, p1)| p1 / p0 - 1.0)
      .collect();

    if row.iter().all(|r| r.is_finite()) {
      dates.push(panel.dates[t]);
      flat.extend(row);
    } else {
      dropped += 1;
    }
  }

  if dropped > 0 {
    debug!(dropped, kept = dates.len(), "dropped non-finite return rows");
  }

  let returns = Array2::from_shape_vec((dates.len(), n_assets), flat)
    .unwrap_or_else(|_| Array2::zeros((0, n_assets)));

  ReturnPanel {
    dates,
    tickers: panel.tickers.clone(),
    returns,
  }
}

/// Consecutive relative changes of a single price series, skipping non-finite values.
pub fn series_returns(prices: &[f64]) -> Vec<f64> {
  prices
    .windows(2)
    .map(|w| w[1] / w[0] - 1.0)
    .filter(|r| r.is_finite())
    .collect()
}

/// Total return from the first to the last observed price.
pub fn cumulative_return(prices: &[f64]) -> Option<f64> {
  let first = prices.iter().copied().find(|p| p.is_finite() && *p > 0.0)?;
  let last = prices.iter().rev().copied().find(|p| p.is_finite())?;
  let r = last / first - 1.0;
  r.is_finite().then_some(r)
}

/// Annualized Sharpe ratio of a single return series.
pub fn asset_sharpe(returns: &[f64], risk_free: f64, periods_per_year: f64) -> Option<f64> {
  if returns.len() < 2 {
    return None;
  }

  let mean = sample_mean(returns);
  let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
  let vol = var.sqrt() * periods_per_year.sqrt();
  if vol < 1e-15 {
    None
  } else {
    Some((mean * periods_per_year - risk_free) / vol)
  }
}

pub(crate) fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

pub(crate) fn pearson(x: &[f64], y: &[f64]) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = sample_mean(&x[..n]);
  let my = sample_mean(&y[..n]);

  let mut cov = 0.0;
  let mut sx = 0.0;
  let mut sy = 0.0;

  for i in 0..n {
    let dx = x[i] - mx;
    let dy = y[i] - my;
    cov += dx * dy;
    sx += dx * dx;
    sy += dy * dy;
  }

  let denom = (sx * sy).sqrt();
  if denom < 1e-15 {
    0.0
  } else {
    (cov / denom).clamp(-1.0, 1.0)
  }
}

/// Pearson correlation matrix of the return panel columns.
pub fn correlation_matrix(returns: &ReturnPanel) -> Array2<f64> {
  let n = returns.tickers.len();
  let cols: Vec<Vec<f64>> = (0..n).map(|j| returns.column(j).to_vec()).collect();
  let mut corr = Array2::<f64>::eye(n);

  for i in 0..n {
    for j in (i + 1)..n {
      let r = pearson(&cols[i], &cols[j]);
      corr[[i, j]] = r;
      corr[[j, i]] = r;
    }
  }

  corr
}

/// Covariance estimator used to build a [`RiskModel`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CovarianceEstimator {
  /// Sample covariance (`ddof = 1`).
  Sample,
  /// Ledoit-Wolf shrinkage toward a scaled identity.
  LedoitWolf,
  /// Sample covariance unless the asset count reaches half the observation count.
  #[default]
  Auto,
}

/// Annualized first and second moments of a return panel.
#[derive(Clone, Debug)]
pub struct RiskModel {
  /// Asset identifiers.
  pub tickers: Vec<String>,
  /// Annualized mean return per asset.
  pub mean_returns: Array1<f64>,
  /// Annualized covariance matrix.
  pub covariance: Array2<f64>,
  /// Number of return periods the moments were estimated from.
  pub periods: usize,
  /// Shrinkage intensity applied (zero for the sample estimator).
  pub shrinkage: f64,
}

impl RiskModel {
  /// Estimate annualized moments from `returns`.
  pub fn from_returns(
    returns: &ReturnPanel,
    estimator: CovarianceEstimator,
    periods_per_year: f64,
  ) -> Result<Self> {
    let periods = returns.periods();
    let n_assets = returns.tickers.len();
    if n_assets == 0 {
      return Err(EngineError::InsufficientData {
        context: "risk model assets".to_string(),
        required: 1,
        available: 0,
      });
    }
    if periods < 2 {
      return Err(EngineError::InsufficientData {
        context: "risk model return periods".to_string(),
        required: 2,
        available: periods,
      });
    }

    let mean_returns = returns
      .returns
      .mean_axis(Axis(0))
      .map(|m| m * periods_per_year)
      .ok_or_else(|| EngineError::InvalidInput("empty return panel".to_string()))?;

    let use_shrinkage = match estimator {
      CovarianceEstimator::Sample => false,
      CovarianceEstimator::LedoitWolf => true,
      CovarianceEstimator::Auto => 2 * n_assets >= periods,
    };

    let (covariance, shrinkage) = if use_shrinkage {
      let est = ledoit_wolf(returns.returns.view())
        .ok_or_else(|| EngineError::InvalidInput("empty return panel".to_string()))?;
      (est.covariance * periods_per_year, est.shrinkage)
    } else {
      let cov = returns
        .returns
        .t()
        .cov(1.0)
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
      (cov * periods_per_year, 0.0)
    };

    debug!(n_assets, periods, shrinkage, "risk model estimated");

    Ok(Self {
      tickers: returns.tickers.clone(),
      mean_returns,
      covariance,
      periods,
      shrinkage,
    })
  }

  /// Build a model directly from annualized moments.
  pub fn from_moments(tickers: Vec<String>, mean_returns: Vec<f64>, covariance: Array2<f64>) -> Result<Self> {
    let n = tickers.len();
    if mean_returns.len() != n || covariance.dim() != (n, n) {
      return Err(EngineError::InvalidInput(format!(
        "{n} tickers with {} means and a {:?} covariance",
        mean_returns.len(),
        covariance.dim()
      )));
    }

    Ok(Self {
      tickers,
      mean_returns: Array1::from_vec(mean_returns),
      covariance,
      periods: 0,
      shrinkage: 0.0,
    })
  }

  pub fn n_assets(&self) -> usize {
    self.tickers.len()
  }

  /// Annualized `(return, volatility)` of the portfolio `weights`.
  pub fn performance(&self, weights: &[f64]) -> (f64, f64) {
    let ret: f64 = weights
      .iter()
      .zip(self.mean_returns.iter())
      .map(|(w, m)| w * m)
      .sum();
    let vol = quad_form(&self.covariance, weights).max(0.0).sqrt();
    (ret, vol)
  }

  /// Sharpe ratio of `weights`, zero when the volatility vanishes.
  pub fn sharpe(&self, weights: &[f64], risk_free: f64) -> f64 {
    let (ret, vol) = self.performance(weights);
    if vol > 1e-15 {
      (ret - risk_free) / vol
    } else {
      0.0
    }
  }
}

/// Annualized `(return, volatility)` of `weights` under `risk`.
pub fn portfolio_performance(weights: &[f64], risk: &RiskModel) -> (f64, f64) {
  risk.performance(weights)
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn mat_vec_mul(mat: &Array2<f64>, v: &[f64]) -> Vec<f64> {
  mat
    .rows()
    .into_iter()
    .map(|row| row.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
    .collect()
}

pub(crate) fn quad_form(mat: &Array2<f64>, v: &[f64]) -> f64 {
  dot(v, &mat_vec_mul(mat, v))
}
