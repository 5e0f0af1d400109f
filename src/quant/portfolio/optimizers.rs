//! # Portfolio Optimizers
//!
//! $$
//! \mathbf w^\* = \arg\min_{\mathbf w\in\mathcal W}\ \mathcal L(\mathbf w),\qquad
//! \mathcal W = \{\mathbf w : \mathbf 1^\top\mathbf w = 1,\ \ell \le \mathbf w \le u\}
//! $$
//!
//! Max-Sharpe, risk parity, multi-factor constrained and Black-Litterman objectives on the
//! shared constrained solver, plus anomaly-aware post-processing of the resulting weights.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use nalgebra::DMatrix;
use nalgebra::DVector;
use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use super::constraints::SectorBand;
use super::constraints::StyleBand;
use super::constraints::build_constraints;
use super::data::RiskModel;
use super::data::dot;
use super::data::mat_vec_mul;
use super::data::quad_form;
use super::data::series_returns;
use super::fundamentals::AssetRecord;
use super::signals::AssetSignals;
use super::solver::ConstrainedSolver;
use super::solver::LinearConstraint;
use super::solver::SolverConfig;
use super::solver::SolverError;
use super::solver::project_capped_simplex;
use super::types::OptimizerMethod;
use super::types::PortfolioResult;
use super::types::WeightBounds;
use super::types::equal_weights;
use crate::error::EngineError;
use crate::error::Result;
use crate::quant::TRADING_DAYS;

/// Portfolio variance at or below this is treated as degenerate.
pub const VARIANCE_FLOOR: f64 = 1e-14;

// Volatility floor of the Sharpe objectives.
const VOL_FLOOR: f64 = 1e-12;

// Smoothing of |x| in the turnover cost, sqrt(x^2 + eps^2) - eps.
const TURNOVER_SMOOTHING: f64 = 1e-4;

/// Multi-factor objective parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiFactorConfig {
  /// Multiplier of the turnover cost.
  pub risk_aversion: f64,
  /// Cost per unit of traded weight.
  pub cost_per_trade: f64,
  /// Trailing momentum window in periods.
  pub momentum_window: usize,
  /// Forecast horizon of the forward estimate in periods.
  pub forecast_horizon: usize,
  pub sector_bands: Vec<SectorBand>,
  pub style_bands: Vec<StyleBand>,
}

impl Default for MultiFactorConfig {
  fn default() -> Self {
    Self {
      risk_aversion: 1.0,
      cost_per_trade: 0.001,
      momentum_window: 12,
      forecast_horizon: 12,
      sector_bands: Vec::new(),
      style_bands: Vec::new(),
    }
  }
}

/// Black-Litterman parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlackLittermanConfig {
  /// Scale of the prior covariance.
  pub tau: f64,
  /// Risk aversion used when no market series is supplied.
  pub risk_aversion: f64,
}

impl Default for BlackLittermanConfig {
  fn default() -> Self {
    Self {
      tau: 0.05,
      risk_aversion: 2.5,
    }
  }
}

/// A view on a linear combination of assets.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
  /// `(ticker, pick weight)` pairs.
  pub picks: Vec<(String, f64)>,
  /// Expected annualized return of the combination.
  pub expected: f64,
}

impl View {
  /// Absolute view on one asset.
  pub fn absolute(ticker: impl Into<String>, expected: f64) -> Self {
    Self {
      picks: vec![(ticker.into(), 1.0)],
      expected,
    }
  }
}

/// Investor views, keyed by ticker so they survive universe selection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewSet {
  pub views: Vec<View>,
}

impl ViewSet {
  /// Pick matrix and view returns over `tickers`.
  ///
  /// Views that reference an asset outside `tickers` are dropped.
  pub fn resolve(&self, tickers: &[String]) -> Option<(DMatrix<f64>, DVector<f64>)> {
    let mut rows = Vec::new();
    let mut q = Vec::new();

    'views: for view in &self.views {
      let mut row = vec![0.0; tickers.len()];
      for (ticker, pick) in &view.picks {
        match tickers.iter().position(|t| t == ticker) {
          Some(i) => row[i] += pick,
          None => {
            debug!(ticker = %ticker, "view references an asset outside the universe");
            continue 'views;
          }
        }
      }
      rows.push(row);
      q.push(view.expected);
    }

    if rows.is_empty() {
      return None;
    }
    let k = rows.len();
    let n = tickers.len();
    Some((
      DMatrix::from_fn(k, n, |r, c| rows[r][c]),
      DVector::from_vec(q),
    ))
  }
}

/// Settings shared by all optimizer modes.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerSettings {
  pub risk_free: f64,
  pub bounds: WeightBounds,
  pub solver: SolverConfig,
  pub multi_factor: MultiFactorConfig,
  pub black_litterman: BlackLittermanConfig,
}

impl Default for OptimizerSettings {
  fn default() -> Self {
    Self {
      risk_free: 0.0,
      bounds: WeightBounds::default(),
      solver: SolverConfig::default(),
      multi_factor: MultiFactorConfig::default(),
      black_litterman: BlackLittermanConfig::default(),
    }
  }
}

/// Per-call inputs beyond the risk model, aligned with `risk.tickers`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OptimizationInputs<'a> {
  /// Fundamentals of the selected assets (multi-factor quality and bands).
  pub records: &'a [AssetRecord],
  /// Momentum and forward signals (multi-factor).
  pub signals: &'a [AssetSignals],
  /// Currently held weights (turnover cost and, projected onto the bounds, the starting point of
  /// every mode).
  pub current_weights: Option<&'a [f64]>,
  /// Market capitalizations (Black-Litterman prior).
  pub market_caps: Option<&'a [f64]>,
  /// Market index prices (implied risk aversion).
  pub market_prices: Option<&'a [f64]>,
  pub views: Option<&'a ViewSet>,
}

fn map_solver_error(
  err: SolverError,
  method: OptimizerMethod,
  n_assets: usize,
) -> EngineError {
  match err {
    SolverError::Infeasible {
      constraints,
      detail,
    } => EngineError::ConstraintInfeasible {
      method,
      n_assets,
      constraints,
      detail,
    },
    SolverError::Objective(msg) => EngineError::InvalidInput(format!("{method} objective: {msg}")),
  }
}

fn check_bounds(method: OptimizerMethod, n: usize, bounds: &WeightBounds) -> Result<()> {
  if bounds.admits(n) {
    Ok(())
  } else {
    Err(EngineError::ConstraintInfeasible {
      method,
      n_assets: n,
      constraints: vec!["bounds".to_string()],
      detail: format!(
        "{n} assets cannot sum to 1 within [{}, {}]",
        bounds.lower, bounds.upper
      ),
    })
  }
}

/// Weights plus historical-model metrics.
pub fn evaluate(risk: &RiskModel, weights: Vec<f64>, risk_free: f64, iterations: u64) -> PortfolioResult {
  let (expected_return, volatility) = risk.performance(&weights);
  let sharpe = risk.sharpe(&weights, risk_free);

  PortfolioResult {
    tickers: risk.tickers.clone(),
    weights,
    expected_return,
    volatility,
    sharpe,
    iterations,
  }
}

/// Equal-weight portfolio, used as the configured fallback.
pub fn equal_weight_portfolio(risk: &RiskModel, risk_free: f64) -> PortfolioResult {
  evaluate(risk, equal_weights(risk.n_assets()), risk_free, 0)
}

fn solve<C>(
  method: OptimizerMethod,
  cost: C,
  n: usize,
  constraints: Vec<LinearConstraint>,
  x0: &[f64],
  settings: &OptimizerSettings,
) -> Result<(Vec<f64>, u64)>
where
  C: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  let (lower, upper) = settings.bounds.expand(n);
  let n_constraints = constraints.len();
  let solver = ConstrainedSolver::new(cost, lower, upper, settings.solver).with_constraints(constraints);
  let report = solver
    .minimize_with_gradient(x0)
    .map_err(|e| map_solver_error(e, method, n))?;

  if !report.converged {
    return Err(EngineError::SolverNonConvergence {
      method,
      n_assets: n,
      n_constraints,
      iterations: report.iterations,
      residual: report.residual,
    });
  }

  debug!(
    %method,
    iterations = report.iterations,
    cost = report.cost,
    "optimizer converged"
  );
  Ok((report.x, report.iterations))
}

/// Starting weights: `current` projected onto the bounds when it matches the universe, else
/// equal weights. A riskless candidate is skipped; if every candidate is riskless the
/// variance is reported as degenerate.
fn starting_point(
  method: OptimizerMethod,
  risk: &RiskModel,
  current: Option<&[f64]>,
  bounds: &WeightBounds,
) -> Result<Vec<f64>> {
  let n = risk.n_assets();
  let (lower, upper) = bounds.expand(n);
  let supplied = current
    .filter(|w| w.len() == n && w.iter().all(|x| x.is_finite()))
    .map(|w| project_capped_simplex(w, &lower, &upper));
  let equal = project_capped_simplex(&equal_weights(n), &lower, &upper);

  let mut variance = 0.0;
  for x0 in supplied.into_iter().chain(std::iter::once(equal)) {
    variance = quad_form(&risk.covariance, &x0);
    if variance > VARIANCE_FLOOR {
      return Ok(x0);
    }
    debug!(%method, variance, "riskless starting point skipped");
  }
  Err(EngineError::DegenerateVariance {
    method,
    n_assets: n,
    variance,
  })
}

// Gradient of (wᵀμ - r_f) / σ(w) with σ floored as in the objectives.
fn sharpe_gradient(mu: &[f64], cov: &Array2<f64>, risk_free: f64, w: &[f64]) -> Vec<f64> {
  let sigma_w = mat_vec_mul(cov, w);
  let vol = dot(w, &sigma_w).max(0.0).sqrt();
  if vol < VOL_FLOOR {
    return mu.iter().map(|m| m / VOL_FLOOR).collect();
  }
  let excess = dot(w, mu) - risk_free;
  mu.iter()
    .zip(sigma_w.iter())
    .map(|(m, s)| m / vol - excess * s / vol.powi(3))
    .collect()
}

struct NegativeSharpe {
  mu: Vec<f64>,
  cov: Array2<f64>,
  risk_free: f64,
}

impl CostFunction for NegativeSharpe {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let ret = dot(w, &self.mu);
    let vol = quad_form(&self.cov, w).max(0.0).sqrt().max(VOL_FLOOR);
    Ok(-(ret - self.risk_free) / vol)
  }
}

impl Gradient for NegativeSharpe {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    Ok(
      sharpe_gradient(&self.mu, &self.cov, self.risk_free, w)
        .into_iter()
        .map(|g| -g)
        .collect(),
    )
  }
}

fn max_sharpe_with(
  method: OptimizerMethod,
  mu: &[f64],
  risk: &RiskModel,
  current: Option<&[f64]>,
  settings: &OptimizerSettings,
) -> Result<PortfolioResult> {
  let n = risk.n_assets();
  check_bounds(method, n, &settings.bounds)?;
  let x0 = starting_point(method, risk, current, &settings.bounds)?;

  if n == 1 {
    return Ok(evaluate(risk, vec![1.0], settings.risk_free, 0));
  }

  let cost = NegativeSharpe {
    mu: mu.to_vec(),
    cov: risk.covariance.clone(),
    risk_free: settings.risk_free,
  };
  let (w, iterations) = solve(method, cost, n, Vec::new(), &x0, settings)?;

  let end_var = quad_form(&risk.covariance, &w);
  if end_var <= VARIANCE_FLOOR {
    return Err(EngineError::DegenerateVariance {
      method,
      n_assets: n,
      variance: end_var,
    });
  }

  Ok(evaluate(risk, w, settings.risk_free, iterations))
}

/// Maximize the Sharpe ratio on the historical annualized moments.
pub fn optimize_max_sharpe(
  risk: &RiskModel,
  inputs: &OptimizationInputs<'_>,
  settings: &OptimizerSettings,
) -> Result<PortfolioResult> {
  let mu = risk.mean_returns.to_vec();
  max_sharpe_with(OptimizerMethod::MaxSharpe, &mu, risk, inputs.current_weights, settings)
}

/// Share of portfolio variance contributed by each asset, `w_i (Σw)_i / wᵀΣw`.
pub fn risk_contributions(weights: &[f64], cov: &Array2<f64>) -> Vec<f64> {
  let sigma_w = mat_vec_mul(cov, weights);
  let var = dot(weights, &sigma_w);
  if var <= 0.0 {
    return vec![0.0; weights.len()];
  }
  weights
    .iter()
    .zip(sigma_w.iter())
    .map(|(w, s)| w * s / var)
    .collect()
}

struct RiskParityCost {
  cov: Array2<f64>,
}

impl CostFunction for RiskParityCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let target = 1.0 / w.len() as f64;
    Ok(
      risk_contributions(w, &self.cov)
        .iter()
        .map(|rc| (rc - target).powi(2))
        .sum(),
    )
  }
}

impl Gradient for RiskParityCost {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    let n = w.len();
    let sigma_w = mat_vec_mul(&self.cov, w);
    let var = dot(w, &sigma_w);
    if var <= 0.0 {
      return Ok(vec![0.0; n]);
    }

    // e_i = rc_i - 1/n, with rc_i = w_i (Σw)_i / V.
    let target = 1.0 / n as f64;
    let e: Vec<f64> = w
      .iter()
      .zip(sigma_w.iter())
      .map(|(wi, si)| wi * si / var - target)
      .collect();
    let ew: Vec<f64> = e.iter().zip(w.iter()).map(|(ei, wi)| ei * wi).collect();
    let cov_ew = mat_vec_mul(&self.cov, &ew);
    let a = dot(&ew, &sigma_w);

    Ok(
      (0..n)
        .map(|j| 2.0 * (e[j] * sigma_w[j] + cov_ew[j]) / var - 4.0 * a * sigma_w[j] / (var * var))
        .collect(),
    )
  }
}

/// Equalize each asset's share of portfolio variance.
pub fn optimize_risk_parity(
  risk: &RiskModel,
  inputs: &OptimizationInputs<'_>,
  settings: &OptimizerSettings,
) -> Result<PortfolioResult> {
  let method = OptimizerMethod::RiskParity;
  let n = risk.n_assets();
  check_bounds(method, n, &settings.bounds)?;
  let x0 = starting_point(method, risk, inputs.current_weights, &settings.bounds)?;
  if n == 1 {
    return Ok(evaluate(risk, vec![1.0], settings.risk_free, 0));
  }

  let cost = RiskParityCost {
    cov: risk.covariance.clone(),
  };
  let (w, iterations) = solve(method, cost, n, Vec::new(), &x0, settings)?;
  Ok(evaluate(risk, w, settings.risk_free, iterations))
}

/// Blended annualized expected returns of the multi-factor mode.
///
/// `0.3 * historical + 0.3 * momentum + 0.4 * forward + 0.1 * quality` per asset.
pub fn blended_expected_returns(signals: &[AssetSignals], records: &[AssetRecord]) -> Vec<f64> {
  signals
    .iter()
    .zip(records.iter())
    .map(|(s, r)| {
      0.3 * s.historical + 0.3 * s.momentum + 0.4 * s.forward + 0.1 * r.fundamental_quality()
    })
    .collect()
}

struct MultiFactorCost {
  mu: Vec<f64>,
  cov: Array2<f64>,
  risk_free: f64,
  current: Vec<f64>,
  turnover_weight: f64,
}

impl CostFunction for MultiFactorCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let ret = dot(w, &self.mu);
    let vol = quad_form(&self.cov, w).max(0.0).sqrt().max(VOL_FLOOR);
    let turnover: f64 = w
      .iter()
      .zip(self.current.iter())
      .map(|(a, b)| {
        let d = a - b;
        (d * d + TURNOVER_SMOOTHING * TURNOVER_SMOOTHING).sqrt() - TURNOVER_SMOOTHING
      })
      .sum();
    Ok(-(ret - self.risk_free) / vol + self.turnover_weight * turnover)
  }
}

impl Gradient for MultiFactorCost {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    Ok(
      sharpe_gradient(&self.mu, &self.cov, self.risk_free, w)
        .iter()
        .zip(w.iter().zip(self.current.iter()))
        .map(|(g, (a, b))| {
          let d = a - b;
          -g + self.turnover_weight * d / (d * d + TURNOVER_SMOOTHING * TURNOVER_SMOOTHING).sqrt()
        })
        .collect(),
    )
  }
}

/// Blended-return Sharpe with a turnover cost and sector and style bands.
pub fn optimize_multi_factor(
  risk: &RiskModel,
  inputs: &OptimizationInputs<'_>,
  settings: &OptimizerSettings,
) -> Result<PortfolioResult> {
  let method = OptimizerMethod::MultiFactor;
  let n = risk.n_assets();
  if inputs.records.len() != n || inputs.signals.len() != n {
    return Err(EngineError::InvalidInput(format!(
      "{method} needs {n} records and signals, got {} and {}",
      inputs.records.len(),
      inputs.signals.len()
    )));
  }
  check_bounds(method, n, &settings.bounds)?;

  let cfg = &settings.multi_factor;
  let mu = blended_expected_returns(inputs.signals, inputs.records);
  let constraints = build_constraints(inputs.records, &cfg.sector_bands, &cfg.style_bands);

  let current = match inputs.current_weights {
    Some(w) if w.len() == n => w.to_vec(),
    _ => vec![0.0; n],
  };
  let x0 = starting_point(method, risk, inputs.current_weights, &settings.bounds)?;

  let cost = MultiFactorCost {
    mu,
    cov: risk.covariance.clone(),
    risk_free: settings.risk_free,
    current,
    turnover_weight: cfg.risk_aversion * cfg.cost_per_trade,
  };
  let (w, iterations) = solve(method, cost, n, constraints, &x0, settings)?;
  Ok(evaluate(risk, w, settings.risk_free, iterations))
}

/// Risk aversion implied by a market price series, `(E[r_m] - r_f) / Var[r_m]`, annualized.
pub fn market_implied_risk_aversion(prices: &[f64], risk_free: f64, periods_per_year: f64) -> Option<f64> {
  let rets = series_returns(prices);
  if rets.len() < 2 {
    return None;
  }
  let mean = rets.iter().sum::<f64>() / rets.len() as f64;
  let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rets.len() - 1) as f64;
  if var <= 0.0 {
    return None;
  }
  let delta = (mean * periods_per_year - risk_free) / (var * periods_per_year);
  delta.is_finite().then_some(delta)
}

/// Black-Litterman posterior expected returns.
///
/// Without views the posterior is the equilibrium prior `delta * Σ * w_mkt`.
pub fn black_litterman_returns(
  risk: &RiskModel,
  market_weights: &[f64],
  delta: f64,
  tau: f64,
  views: Option<&ViewSet>,
) -> Result<Vec<f64>> {
  let n = risk.n_assets();
  let sigma = DMatrix::from_fn(n, n, |i, j| risk.covariance[[i, j]]);
  let w_mkt = DVector::from_column_slice(market_weights);
  let pi = &sigma * &w_mkt * delta;

  let Some((p, q)) = views.and_then(|v| v.resolve(&risk.tickers)) else {
    return Ok(pi.iter().copied().collect());
  };

  let tau_sigma = &sigma * tau;
  let view_cov = &p * &tau_sigma * p.transpose();
  let omega = DMatrix::from_diagonal(&view_cov.diagonal());
  let a = &view_cov + &omega;
  let a_inv = a.try_inverse().ok_or_else(|| {
    EngineError::InvalidInput("black-litterman view covariance is singular".to_string())
  })?;

  let posterior = &pi + &tau_sigma * p.transpose() * a_inv * (&q - &p * &pi);
  Ok(posterior.iter().copied().collect())
}

/// Max-Sharpe on Black-Litterman posterior returns.
pub fn optimize_black_litterman(
  risk: &RiskModel,
  inputs: &OptimizationInputs<'_>,
  settings: &OptimizerSettings,
) -> Result<PortfolioResult> {
  let method = OptimizerMethod::BlackLitterman;
  let n = risk.n_assets();
  let cfg = &settings.black_litterman;

  let market_weights = match inputs.market_caps {
    Some(caps) if caps.len() == n && caps.iter().all(|c| c.is_finite() && *c > 0.0) => {
      let total: f64 = caps.iter().sum();
      caps.iter().map(|c| c / total).collect()
    }
    _ => equal_weights(n),
  };

  let delta = inputs
    .market_prices
    .and_then(|p| market_implied_risk_aversion(p, settings.risk_free, TRADING_DAYS))
    .unwrap_or(cfg.risk_aversion);

  let mu = black_litterman_returns(risk, &market_weights, delta, cfg.tau, inputs.views)?;
  debug!(delta, tau = cfg.tau, ?mu, "black-litterman posterior");
  max_sharpe_with(method, &mu, risk, inputs.current_weights, settings)
}

/// Dispatch to the selected optimizer.
pub fn optimize_with_method(
  method: OptimizerMethod,
  risk: &RiskModel,
  inputs: &OptimizationInputs<'_>,
  settings: &OptimizerSettings,
) -> Result<PortfolioResult> {
  if risk.n_assets() == 0 {
    return Err(EngineError::InsufficientData {
      context: format!("{method} universe"),
      required: 1,
      available: 0,
    });
  }

  match method {
    OptimizerMethod::MaxSharpe => optimize_max_sharpe(risk, inputs, settings),
    OptimizerMethod::RiskParity => optimize_risk_parity(risk, inputs, settings),
    OptimizerMethod::MultiFactor => optimize_multi_factor(risk, inputs, settings),
    OptimizerMethod::BlackLitterman => optimize_black_litterman(risk, inputs, settings),
  }
}

fn renormalize_into_bounds(scaled: Vec<f64>, unscaled: &[f64], bounds: &WeightBounds) -> Vec<f64> {
  let total: f64 = scaled.iter().sum();
  if !total.is_finite() || total <= 1e-12 {
    warn!("weight adjustment removed all exposure, keeping optimized weights");
    return unscaled.to_vec();
  }

  let normalized: Vec<f64> = scaled.iter().map(|w| w / total).collect();
  if bounds.admits(normalized.len()) {
    let (lower, upper) = bounds.expand(normalized.len());
    project_capped_simplex(&normalized, &lower, &upper)
  } else {
    normalized
  }
}

/// Scale each weight by `1 - anomaly`, renormalize and re-project into the bounds.
pub fn apply_anomaly_scaling(weights: &[f64], anomaly: &[f64], bounds: &WeightBounds) -> Vec<f64> {
  let scaled = weights
    .iter()
    .zip(anomaly.iter())
    .map(|(w, a)| w * (1.0 - a.clamp(0.0, 1.0)))
    .collect();
  renormalize_into_bounds(scaled, weights, bounds)
}

/// Scale each weight by `1 - 0.5 * anomaly + 0.5 * growth_norm`, then renormalize.
///
/// `growth` is min-max normalized across the universe; a flat growth profile contributes zero.
pub fn apply_growth_tilt(
  weights: &[f64],
  anomaly: &[f64],
  growth: &[f64],
  bounds: &WeightBounds,
) -> Vec<f64> {
  let lo = growth.iter().copied().fold(f64::INFINITY, f64::min);
  let hi = growth.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  let span = hi - lo;

  let scaled = weights
    .iter()
    .zip(anomaly.iter().zip(growth.iter()))
    .map(|(w, (a, g))| {
      let g_norm = if span > 1e-15 { (g - lo) / span } else { 0.0 };
      w * (1.0 - 0.5 * a.clamp(0.0, 1.0) + 0.5 * g_norm)
    })
    .collect();
  renormalize_into_bounds(scaled, weights, bounds)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;
  use crate::quant::portfolio::constraints::Style;
  use crate::quant::portfolio::fundamentals::tests::snapshot;

  fn tickers(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("A{i}")).collect()
  }

  fn three_asset_model() -> RiskModel {
    RiskModel::from_moments(
      tickers(3),
      vec![0.12, 0.08, 0.05],
      array![
        [0.040, 0.006, 0.002],
        [0.006, 0.025, 0.004],
        [0.002, 0.004, 0.010]
      ],
    )
    .unwrap()
  }

  fn assert_feasible(w: &[f64], bounds: &WeightBounds) {
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
    for &x in w {
      assert!(x >= bounds.lower - 1e-9 && x <= bounds.upper + 1e-9, "weight {x} out of bounds");
    }
  }

  #[test]
  fn max_sharpe_beats_equal_weights() {
    let risk = three_asset_model();
    let settings = OptimizerSettings {
      risk_free: 0.02,
      ..Default::default()
    };
    let res = optimize_max_sharpe(&risk, &OptimizationInputs::default(), &settings).unwrap();

    assert_feasible(&res.weights, &settings.bounds);
    let eq = equal_weight_portfolio(&risk, 0.02);
    assert!(res.sharpe >= eq.sharpe - 1e-9);
  }

  #[test]
  fn max_sharpe_respects_caps() {
    let risk = three_asset_model();
    let settings = OptimizerSettings {
      bounds: WeightBounds {
        lower: 0.1,
        upper: 0.5,
      },
      ..Default::default()
    };
    let res = optimize_max_sharpe(&risk, &OptimizationInputs::default(), &settings).unwrap();

    assert_feasible(&res.weights, &settings.bounds);
  }

  #[test]
  fn single_asset_max_sharpe() {
    let risky = RiskModel::from_moments(tickers(1), vec![0.1], array![[0.04]]).unwrap();
    let res = optimize_max_sharpe(&risky, &OptimizationInputs::default(), &OptimizerSettings::default()).unwrap();
    assert_eq!(res.weights, vec![1.0]);

    let flat = RiskModel::from_moments(tickers(1), vec![0.1], array![[0.0]]).unwrap();
    let err = optimize_max_sharpe(&flat, &OptimizationInputs::default(), &OptimizerSettings::default()).unwrap_err();
    assert!(matches!(err, EngineError::DegenerateVariance { n_assets: 1, .. }));
  }

  #[test]
  fn riskless_asset_makes_max_sharpe_degenerate() {
    let risk = RiskModel::from_moments(
      tickers(3),
      vec![0.10, 0.06, 0.05],
      array![[0.0, 0.0, 0.0], [0.0, 0.04, 0.0], [0.0, 0.0, 0.02]],
    )
    .unwrap();
    let err = optimize_max_sharpe(&risk, &OptimizationInputs::default(), &OptimizerSettings::default()).unwrap_err();

    assert!(matches!(
      err,
      EngineError::DegenerateVariance {
        method: OptimizerMethod::MaxSharpe,
        n_assets: 3,
        ..
      }
    ));
  }

  fn central_difference<C>(cost: &C, w: &[f64]) -> Vec<f64>
  where
    C: CostFunction<Param = Vec<f64>, Output = f64>,
  {
    let h = 1e-6;
    (0..w.len())
      .map(|i| {
        let mut up = w.to_vec();
        let mut down = w.to_vec();
        up[i] += h;
        down[i] -= h;
        (cost.cost(&up).unwrap() - cost.cost(&down).unwrap()) / (2.0 * h)
      })
      .collect()
  }

  fn assert_gradient_matches<C>(cost: &C, w: &[f64])
  where
    C: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
  {
    let analytic = cost.gradient(&w.to_vec()).unwrap();
    for (a, n) in analytic.iter().zip(central_difference(cost, w).iter()) {
      assert_abs_diff_eq!(a, n, epsilon = 1e-5);
    }
  }

  #[test]
  fn analytic_gradients_match_central_differences() {
    let risk = three_asset_model();
    let w = [0.5, 0.3, 0.2];

    assert_gradient_matches(
      &NegativeSharpe {
        mu: risk.mean_returns.to_vec(),
        cov: risk.covariance.clone(),
        risk_free: 0.02,
      },
      &w,
    );
    assert_gradient_matches(
      &RiskParityCost {
        cov: risk.covariance.clone(),
      },
      &w,
    );
    assert_gradient_matches(
      &MultiFactorCost {
        mu: vec![0.11, 0.07, 0.06],
        cov: risk.covariance.clone(),
        risk_free: 0.0,
        current: vec![0.2, 0.3, 0.5],
        turnover_weight: 0.05,
      },
      &w,
    );
  }

  #[test]
  fn iteration_cap_surfaces_as_non_convergence() {
    let risk = three_asset_model();
    let settings = OptimizerSettings {
      solver: SolverConfig {
        max_iters: 1,
        ..Default::default()
      },
      ..Default::default()
    };

    for method in [OptimizerMethod::MaxSharpe, OptimizerMethod::RiskParity] {
      match optimize_with_method(method, &risk, &OptimizationInputs::default(), &settings) {
        Err(EngineError::SolverNonConvergence {
          method: reported,
          n_assets,
          iterations,
          ..
        }) => {
          assert_eq!(reported, method);
          assert_eq!(n_assets, 3);
          assert_eq!(iterations, 1);
        }
        other => panic!("{method}: expected non-convergence, got {other:?}"),
      }
    }
  }

  #[test]
  fn current_weights_seed_every_mode() {
    let risk = three_asset_model();
    let settings = OptimizerSettings::default();
    let cold = optimize_risk_parity(&risk, &OptimizationInputs::default(), &settings).unwrap();
    let warm = optimize_risk_parity(
      &risk,
      &OptimizationInputs {
        current_weights: Some(cold.weights.as_slice()),
        ..Default::default()
      },
      &settings,
    )
    .unwrap();

    assert!(warm.iterations < cold.iterations);
    for (a, b) in warm.weights.iter().zip(cold.weights.iter()) {
      assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }

    // A riskless holding is skipped in favor of equal weights.
    let flat_first = RiskModel::from_moments(
      tickers(2),
      vec![0.05, 0.08],
      array![[0.0, 0.0], [0.0, 0.03]],
    )
    .unwrap();
    let x0 = starting_point(
      OptimizerMethod::MaxSharpe,
      &flat_first,
      Some(&[1.0, 0.0][..]),
      &WeightBounds::default(),
    )
    .unwrap();
    assert_abs_diff_eq!(x0[0], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(x0[1], 0.5, epsilon = 1e-12);
  }

  #[test]
  fn infeasible_bounds_are_reported() {
    let risk = three_asset_model();
    let settings = OptimizerSettings {
      bounds: WeightBounds {
        lower: 0.0,
        upper: 0.2,
      },
      ..Default::default()
    };

    assert!(matches!(
      optimize_risk_parity(&risk, &OptimizationInputs::default(), &settings),
      Err(EngineError::ConstraintInfeasible { .. })
    ));
  }

  #[test]
  fn risk_parity_equalizes_contributions() {
    let risk = three_asset_model();
    let settings = OptimizerSettings::default();
    let res = optimize_risk_parity(&risk, &OptimizationInputs::default(), &settings).unwrap();

    assert_feasible(&res.weights, &settings.bounds);
    for rc in risk_contributions(&res.weights, &risk.covariance) {
      assert_abs_diff_eq!(rc, 1.0 / 3.0, epsilon = 1e-3);
    }
    // Lower-variance assets get more weight.
    assert!(res.weights[2] > res.weights[0]);
  }

  fn mf_records() -> Vec<AssetRecord> {
    [("A0", "Tech", 1.2), ("A1", "Tech", 2.5), ("A2", "Energy", 4.0)]
      .iter()
      .map(|&(t, sector, pb)| {
        let mut s = snapshot(t);
        s.sector = Some(sector.to_string());
        s.pb = Some(pb);
        AssetRecord::try_from(s).unwrap()
      })
      .collect()
  }

  fn mf_signals() -> Vec<AssetSignals> {
    vec![
      AssetSignals {
        historical: 0.12,
        momentum: 0.15,
        forward: 0.10,
      },
      AssetSignals {
        historical: 0.08,
        momentum: 0.05,
        forward: 0.09,
      },
      AssetSignals {
        historical: 0.05,
        momentum: 0.04,
        forward: 0.06,
      },
    ]
  }

  #[test]
  fn multi_factor_respects_sector_band() {
    let risk = three_asset_model();
    let records = mf_records();
    let signals = mf_signals();
    let settings = OptimizerSettings {
      multi_factor: MultiFactorConfig {
        sector_bands: vec![SectorBand::new("Tech", 0.0, 0.4)],
        ..Default::default()
      },
      ..Default::default()
    };
    let inputs = OptimizationInputs {
      records: &records,
      signals: &signals,
      ..Default::default()
    };
    let res = optimize_multi_factor(&risk, &inputs, &settings).unwrap();

    assert_feasible(&res.weights, &settings.bounds);
    assert!(res.weights[0] + res.weights[1] <= 0.4 + 1e-5);
  }

  #[test]
  fn multi_factor_reports_conflicting_bands() {
    let risk = three_asset_model();
    let records = mf_records();
    let signals = mf_signals();
    // Value = {A0} (P/B below the 2.5 median), Tech = {A0, A1}. With A0 <= 0.2 and a 0.45
    // cap, Tech exposure tops out at 0.65.
    let settings = OptimizerSettings {
      bounds: WeightBounds {
        lower: 0.0,
        upper: 0.45,
      },
      multi_factor: MultiFactorConfig {
        sector_bands: vec![SectorBand::new("Tech", 0.7, 1.0)],
        style_bands: vec![StyleBand {
          style: Style::Value,
          lower: 0.0,
          upper: 0.2,
        }],
        ..Default::default()
      },
      ..Default::default()
    };
    let inputs = OptimizationInputs {
      records: &records,
      signals: &signals,
      ..Default::default()
    };

    match optimize_multi_factor(&risk, &inputs, &settings).unwrap_err() {
      EngineError::ConstraintInfeasible {
        method,
        n_assets,
        constraints,
        ..
      } => {
        assert_eq!(method, OptimizerMethod::MultiFactor);
        assert_eq!(n_assets, 3);
        assert!(!constraints.is_empty());
      }
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn black_litterman_without_views_is_the_prior() {
    let risk = three_asset_model();
    let w = equal_weights(3);
    let mu = black_litterman_returns(&risk, &w, 2.5, 0.05, None).unwrap();
    let sigma_w = mat_vec_mul(&risk.covariance, &w);

    for (m, s) in mu.iter().zip(sigma_w.iter()) {
      assert_abs_diff_eq!(*m, 2.5 * s, epsilon = 1e-12);
    }
  }

  #[test]
  fn black_litterman_view_moves_posterior_toward_view() {
    let risk = three_asset_model();
    let w = equal_weights(3);
    let prior = black_litterman_returns(&risk, &w, 2.5, 0.05, None).unwrap();
    let views = ViewSet {
      views: vec![View::absolute("A2", 0.20), View::absolute("ZZZ", 0.5)],
    };
    let post = black_litterman_returns(&risk, &w, 2.5, 0.05, Some(&views)).unwrap();

    assert!(post[2] > prior[2]);
    assert!(post[2] < 0.20);
    // With Ω = diag(PτΣPᵀ) a single absolute view lands halfway.
    assert_abs_diff_eq!(post[2], 0.5 * (prior[2] + 0.20), epsilon = 1e-12);
  }

  #[test]
  fn black_litterman_mode_returns_feasible_weights() {
    let risk = three_asset_model();
    let settings = OptimizerSettings::default();
    let res = optimize_with_method(
      OptimizerMethod::BlackLitterman,
      &risk,
      &OptimizationInputs::default(),
      &settings,
    )
    .unwrap();

    assert_feasible(&res.weights, &settings.bounds);
  }

  #[test]
  fn anomaly_scaling_shifts_weight_away() {
    let bounds = WeightBounds::default();
    let w = apply_anomaly_scaling(&[0.5, 0.5], &[0.5, 0.0], &bounds);

    assert_abs_diff_eq!(w[0], 1.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 2.0 / 3.0, epsilon = 1e-12);
  }

  #[test]
  fn anomaly_scaling_reprojects_into_bounds() {
    let bounds = WeightBounds {
      lower: 0.0,
      upper: 0.6,
    };
    let w = apply_anomaly_scaling(&[0.5, 0.5], &[0.9, 0.0], &bounds);

    assert_feasible(&w, &bounds);
    assert_abs_diff_eq!(w[1], 0.6, epsilon = 1e-12);
  }

  #[test]
  fn full_anomaly_everywhere_keeps_weights() {
    let w = apply_anomaly_scaling(&[0.3, 0.7], &[1.0, 1.0], &WeightBounds::default());
    assert_eq!(w, vec![0.3, 0.7]);
  }

  #[test]
  fn growth_tilt_prefers_growth() {
    let w = apply_growth_tilt(&[0.5, 0.5], &[0.0, 0.0], &[0.02, 0.10], &WeightBounds::default());

    assert_abs_diff_eq!(w[0], 1.0 / 2.5, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 1.5 / 2.5, epsilon = 1e-12);
  }

  #[test]
  fn market_implied_delta_is_finite() {
    let prices: Vec<f64> = (0..100)
      .map(|t| 100.0 * (1.0 + 0.001 * t as f64) * (1.0 + 0.01 * ((t % 5) as f64 - 2.0)))
      .collect();
    let delta = market_implied_risk_aversion(&prices, 0.0, 252.0).unwrap();
    assert!(delta.is_finite());
    assert!(market_implied_risk_aversion(&[100.0; 10], 0.0, 252.0).is_none());
  }
}
