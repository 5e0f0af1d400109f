//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}\big(\mu, \Sigma, \operatorname{TopN}(s^{\text{adj}})\big)
//! $$
//!
//! High-level orchestration: fundamentals and prices in, ranked scores, target weights and a
//! whole-share allocation out.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::info;
use tracing::warn;

use super::adjust::ScoredAsset;
use super::adjust::adjust_score;
use super::adjust::rank_top_n;
use super::allocation::Allocation;
use super::allocation::allocate_integer_shares;
use super::anomaly::AnomalyConfig;
use super::anomaly::detect_panel;
use super::data::CovarianceEstimator;
use super::data::PricePanel;
use super::data::RiskModel;
use super::data::cumulative_return;
use super::data::simple_returns;
use super::frontier::FrontierPoint;
use super::frontier::sample_random_portfolios;
use super::fundamentals::AssetRecord;
use super::fundamentals::FundamentalSnapshot;
use super::fundamentals::validate_snapshots;
use super::holdings::Position;
use super::holdings::current_weights;
use super::optimizers::BlackLittermanConfig;
use super::optimizers::MultiFactorConfig;
use super::optimizers::OptimizationInputs;
use super::optimizers::OptimizerSettings;
use super::optimizers::ViewSet;
use super::optimizers::apply_anomaly_scaling;
use super::optimizers::apply_growth_tilt;
use super::optimizers::equal_weight_portfolio;
use super::optimizers::evaluate;
use super::optimizers::optimize_with_method;
use super::scoring::FactorWeights;
use super::scoring::calibrate_or_equal;
use super::scoring::static_score;
use super::signals::compute_signals;
use super::solver::SolverConfig;
use super::types::OptimizerMethod;
use super::types::PortfolioResult;
use super::types::WeightBounds;
use crate::error::EngineError;
use crate::error::Result;
use crate::quant::TRADING_DAYS;

/// Fewest return periods an asset, and the aligned selection, must have.
pub const MIN_RETURN_PERIODS: usize = 2;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug)]
pub struct PortfolioEngineConfig {
  /// Optimizer used for the target weights.
  pub method: OptimizerMethod,
  /// Annual risk-free rate used in Sharpe computations.
  pub risk_free: f64,
  /// Return periods per year used for annualization.
  pub periods_per_year: f64,
  /// Number of top-ranked assets passed to the optimizer.
  pub top_n: usize,
  pub bounds: WeightBounds,
  /// Estimator for max-Sharpe and risk parity; the other modes always shrink.
  pub covariance: CovarianceEstimator,
  pub anomaly: AnomalyConfig,
  pub solver: SolverConfig,
  /// Scale optimized weights by `1 - anomaly score`.
  pub apply_anomaly_scaling: bool,
  /// Tilt optimized weights toward growth (replaces plain anomaly scaling when set).
  pub growth_tilt: bool,
  /// Replace a failed optimization with equal weights instead of returning the error.
  pub fallback_to_equal_weights: bool,
  pub multi_factor: MultiFactorConfig,
  pub black_litterman: BlackLittermanConfig,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      method: OptimizerMethod::MaxSharpe,
      risk_free: 0.0,
      periods_per_year: TRADING_DAYS,
      top_n: 10,
      bounds: WeightBounds::default(),
      covariance: CovarianceEstimator::Auto,
      anomaly: AnomalyConfig::default(),
      solver: SolverConfig::default(),
      apply_anomaly_scaling: true,
      growth_tilt: false,
      fallback_to_equal_weights: false,
      multi_factor: MultiFactorConfig::default(),
      black_litterman: BlackLittermanConfig::default(),
    }
  }
}

/// Inputs of one recommendation run.
#[derive(Clone, Debug, Default)]
pub struct RecommendationRequest {
  /// Price history over the calibration window; gaps are `NaN`.
  pub prices: PricePanel,
  pub fundamentals: Vec<FundamentalSnapshot>,
  /// Cash to allocate in whole shares; no allocation when `None`.
  pub budget: Option<f64>,
  /// Current holdings, used as turnover reference and initial guess.
  pub positions: Vec<Position>,
  /// Market index prices for the implied risk aversion.
  pub market_prices: Option<Vec<f64>>,
  pub views: Option<ViewSet>,
}

/// An asset dropped from the universe and why.
#[derive(Clone, Debug, PartialEq)]
pub struct Exclusion {
  pub ticker: String,
  pub reason: EngineError,
}

/// Output of [`PortfolioEngine::recommend`].
#[derive(Clone, Debug)]
pub struct Recommendation {
  /// Score table over every validated asset, in input order.
  pub scores: Vec<ScoredAsset>,
  /// Top-N candidates by adjusted score.
  pub ranked: Vec<ScoredAsset>,
  pub factor_weights: FactorWeights,
  /// Final target weights and metrics over the ranked candidates.
  pub portfolio: PortfolioResult,
  pub allocation: Option<Allocation>,
  pub excluded: Vec<Exclusion>,
  /// Optimization error replaced by equal weights, if any.
  pub fallback: Option<EngineError>,
}

/// Single entry-point engine for scoring, optimization and allocation.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Optimizer settings derived from the engine configuration.
  pub fn optimizer_settings(&self) -> OptimizerSettings {
    OptimizerSettings {
      risk_free: self.config.risk_free,
      bounds: self.config.bounds,
      solver: self.config.solver,
      multi_factor: self.config.multi_factor.clone(),
      black_litterman: self.config.black_litterman,
    }
  }

  /// Annualized risk model over `tickers` of `prices`.
  pub fn risk_model(&self, prices: &PricePanel, tickers: &[String]) -> Result<RiskModel> {
    let estimator = match self.config.method {
      OptimizerMethod::MultiFactor | OptimizerMethod::BlackLitterman => CovarianceEstimator::LedoitWolf,
      _ => self.config.covariance,
    };
    let returns = simple_returns(&prices.select(tickers)?);
    RiskModel::from_returns(&returns, estimator, self.config.periods_per_year)
  }

  /// Random long-only portfolios over `tickers` for frontier display.
  pub fn frontier(
    &self,
    prices: &PricePanel,
    tickers: &[String],
    count: usize,
    seed: u64,
  ) -> Result<Vec<FrontierPoint>> {
    let risk = self.risk_model(prices, tickers)?;
    Ok(sample_random_portfolios(&risk, self.config.risk_free, count, seed))
  }

  /// Run the full pipeline: validate, score, rank, optimize, post-process and allocate.
  pub fn recommend(&self, request: &RecommendationRequest) -> Result<Recommendation> {
    let cfg = &self.config;
    let (records, rejected) = validate_snapshots(request.fundamentals.clone());
    let mut excluded: Vec<Exclusion> = rejected
      .into_iter()
      .map(|(ticker, reason)| Exclusion { ticker, reason })
      .collect();

    let histories: Vec<(usize, Option<f64>)> = records
      .par_iter()
      .map(|r| {
        let periods = request.prices.return_periods(&r.ticker).unwrap_or(0);
        let trailing = request
          .prices
          .series(&r.ticker)
          .and_then(|s| cumulative_return(&s));
        (periods, trailing)
      })
      .collect();

    let mut usable = Vec::with_capacity(records.len());
    let mut targets = Vec::with_capacity(records.len());
    for (record, (periods, trailing)) in records.into_iter().zip(histories) {
      match trailing {
        Some(r) if periods >= MIN_RETURN_PERIODS => {
          usable.push(record);
          targets.push(r);
        }
        _ => excluded.push(Exclusion {
          ticker: record.ticker,
          reason: EngineError::InsufficientData {
            context: "price history return periods".to_string(),
            required: MIN_RETURN_PERIODS,
            available: periods,
          },
        }),
      }
    }
    for ex in &excluded {
      warn!(ticker = %ex.ticker, reason = %ex.reason, "asset excluded");
    }

    if usable.is_empty() {
      return Err(EngineError::InsufficientData {
        context: "candidate universe".to_string(),
        required: 1,
        available: 0,
      });
    }
    info!(universe = usable.len(), excluded = excluded.len(), "universe validated");

    let tickers: Vec<String> = usable.iter().map(|r| r.ticker.clone()).collect();
    let flags = detect_panel(&request.prices, &tickers, &cfg.anomaly);
    let factor_weights = calibrate_or_equal(&usable, &targets, &cfg.solver);

    let scores: Vec<ScoredAsset> = usable
      .iter()
      .zip(flags.iter())
      .zip(targets.iter())
      .map(|((record, f), &cumulative)| {
        let composite = factor_weights.composite(record);
        ScoredAsset {
          ticker: record.ticker.clone(),
          sector: record.sector.clone(),
          static_score: static_score(record),
          composite,
          adjusted: adjust_score(composite, record, f),
          anomalies: *f,
          cumulative_return: cumulative,
        }
      })
      .collect();

    let mut ranked = rank_top_n(scores.clone(), cfg.top_n);
    self.align_selection(&request.prices, &mut ranked, &mut excluded)?;
    let selected: Vec<String> = ranked.iter().map(|a| a.ticker.clone()).collect();
    if selected.is_empty() {
      return Err(EngineError::InsufficientData {
        context: "ranked candidates".to_string(),
        required: 1,
        available: 0,
      });
    }
    info!(method = %cfg.method, selected = ?selected, "candidates ranked");

    let by_ticker: HashMap<&str, &AssetRecord> = usable.iter().map(|r| (r.ticker.as_str(), r)).collect();
    let selected_records: Vec<AssetRecord> = selected
      .iter()
      .filter_map(|t| by_ticker.get(t.as_str()).map(|r| (*r).clone()))
      .collect();

    let (portfolio, fallback) = self.optimize_selected(request, &selected, &selected_records)?;
    let anomaly: Vec<f64> = ranked.iter().map(|a| a.anomalies.anomaly_score()).collect();
    let portfolio = self.post_process(request, portfolio, &anomaly, &selected_records)?;

    let allocation = match request.budget {
      Some(budget) => {
        let prices: Vec<f64> = selected_records.iter().map(|r| r.current_price).collect();
        Some(allocate_integer_shares(budget, &selected, &prices, &portfolio.weights)?)
      }
      None => None,
    };

    info!(
      expected_return = portfolio.expected_return,
      volatility = portfolio.volatility,
      sharpe = portfolio.sharpe,
      fallback = fallback.is_some(),
      "portfolio constructed"
    );

    Ok(Recommendation {
      scores,
      ranked,
      factor_weights,
      portfolio,
      allocation,
      excluded,
      fallback,
    })
  }

  // Gaps that never overlap can leave the aligned selection without return periods even when
  // every asset has enough on its own. Drop the sparsest asset until the panel is usable.
  fn align_selection(
    &self,
    prices: &PricePanel,
    ranked: &mut Vec<ScoredAsset>,
    excluded: &mut Vec<Exclusion>,
  ) -> Result<()> {
    while ranked.len() > 1 {
      let tickers: Vec<String> = ranked.iter().map(|a| a.ticker.clone()).collect();
      let aligned = simple_returns(&prices.select(&tickers)?).periods();
      if aligned >= MIN_RETURN_PERIODS {
        break;
      }

      let Some(sparsest) = (0..ranked.len())
        .min_by_key(|&i| prices.return_periods(&ranked[i].ticker).unwrap_or(0))
      else {
        break;
      };
      let dropped = ranked.remove(sparsest);
      let reason = EngineError::InsufficientData {
        context: "aligned return periods".to_string(),
        required: MIN_RETURN_PERIODS,
        available: aligned,
      };
      warn!(ticker = %dropped.ticker, reason = %reason, "asset excluded");
      excluded.push(Exclusion {
        ticker: dropped.ticker,
        reason,
      });
    }
    Ok(())
  }

  fn optimize_selected(
    &self,
    request: &RecommendationRequest,
    selected: &[String],
    records: &[AssetRecord],
  ) -> Result<(PortfolioResult, Option<EngineError>)> {
    let cfg = &self.config;
    let risk = self.risk_model(&request.prices, selected)?;
    let returns = simple_returns(&request.prices.select(selected)?);

    let signals = match cfg.method {
      OptimizerMethod::MultiFactor => compute_signals(
        &returns,
        cfg.multi_factor.momentum_window,
        cfg.multi_factor.forecast_horizon,
        cfg.periods_per_year,
      ),
      _ => Vec::new(),
    };
    let prices: Vec<f64> = records.iter().map(|r| r.current_price).collect();
    let held = current_weights(&request.positions, selected, &prices);
    let caps: Option<Vec<f64>> = records.iter().map(|r| r.market_cap).collect();

    let inputs = OptimizationInputs {
      records,
      signals: &signals,
      current_weights: held.as_deref(),
      market_caps: caps.as_deref(),
      market_prices: request.market_prices.as_deref(),
      views: request.views.as_ref(),
    };

    match optimize_with_method(cfg.method, &risk, &inputs, &self.optimizer_settings()) {
      Ok(res) => Ok((res, None)),
      Err(err) if err.is_optimization_error() && cfg.fallback_to_equal_weights => {
        warn!(method = %cfg.method, error = %err, "optimization failed, using equal weights");
        Ok((equal_weight_portfolio(&risk, cfg.risk_free), Some(err)))
      }
      Err(err) => Err(err),
    }
  }

  fn post_process(
    &self,
    request: &RecommendationRequest,
    portfolio: PortfolioResult,
    anomaly: &[f64],
    records: &[AssetRecord],
  ) -> Result<PortfolioResult> {
    let cfg = &self.config;
    let weights = if cfg.growth_tilt {
      let growth: Vec<f64> = records.iter().map(AssetRecord::mean_growth).collect();
      apply_growth_tilt(&portfolio.weights, anomaly, &growth, &cfg.bounds)
    } else if cfg.apply_anomaly_scaling {
      apply_anomaly_scaling(&portfolio.weights, anomaly, &cfg.bounds)
    } else {
      return Ok(portfolio);
    };

    let risk = self.risk_model(&request.prices, &portfolio.tickers)?;
    Ok(evaluate(&risk, weights, cfg.risk_free, portfolio.iterations))
  }
}
