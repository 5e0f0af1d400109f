//! # Factor Scoring
//!
//! $$
//! s_i = \sum_{k=1}^{7} \beta_k x_{ik},\qquad
//! \beta^\* = \arg\max_{\beta\in\Delta_7} \operatorname{corr}(X\beta, y)
//! $$
//!
//! Composite scores from the seven factor inputs of an [`AssetRecord`], with factor weights
//! calibrated against realized trailing returns.

use argmin::core::CostFunction;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use super::data::pearson;
use super::fundamentals::AssetRecord;
use super::fundamentals::FACTOR_NAMES;
use super::fundamentals::N_FACTORS;
use super::solver::ConstrainedSolver;
use super::solver::SolverConfig;
use crate::error::EngineError;

/// Weights of the seven factor inputs, in [`FACTOR_NAMES`] order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactorWeights(pub [f64; N_FACTORS]);

impl Default for FactorWeights {
  fn default() -> Self {
    Self([1.0 / N_FACTORS as f64; N_FACTORS])
  }
}

impl FactorWeights {
  pub fn as_slice(&self) -> &[f64] {
    &self.0
  }

  /// `(factor name, weight)` pairs.
  pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
    FACTOR_NAMES.iter().copied().zip(self.0.iter().copied())
  }

  /// Composite score of `record`.
  pub fn composite(&self, record: &AssetRecord) -> f64 {
    composite_score(&record.factor_inputs(), self)
  }
}

/// Weighted sum of factor inputs.
pub fn composite_score(inputs: &[f64; N_FACTORS], weights: &FactorWeights) -> f64 {
  inputs.iter().zip(weights.0.iter()).map(|(x, w)| x * w).sum()
}

/// Screening score `ROE/PE + 1/PB + ln(volume)`, used for pre-ranking only.
pub fn static_score(record: &AssetRecord) -> f64 {
  record.roe / record.pe + 1.0 / record.pb + record.average_volume.ln()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
  #[error("{records} records for {targets} targets")]
  LengthMismatch { records: usize, targets: usize },

  #[error("need at least 2 assets, got {0}")]
  TooFewAssets(usize),

  #[error("factor `{0}` is constant across the universe")]
  ConstantFactor(&'static str),

  #[error("target returns are constant or non-finite")]
  DegenerateTarget,

  #[error("solver did not converge after {iterations} iterations")]
  NonConvergence { iterations: u64 },

  #[error("solver failed: {0}")]
  Solver(String),
}

impl From<CalibrationError> for EngineError {
  fn from(err: CalibrationError) -> Self {
    EngineError::Calibration(err.to_string())
  }
}

struct NegativeCorrelation {
  inputs: Vec<[f64; N_FACTORS]>,
  targets: Vec<f64>,
}

impl CostFunction for NegativeCorrelation {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let scores: Vec<f64> = self
      .inputs
      .iter()
      .map(|x| x.iter().zip(w.iter()).map(|(a, b)| a * b).sum())
      .collect();
    Ok(-pearson(&scores, &self.targets))
  }
}

fn is_constant(xs: &[f64]) -> bool {
  let first = xs[0];
  xs.iter().all(|x| (x - first).abs() <= 1e-12 * (1.0 + first.abs()))
}

/// Factor weights maximizing the correlation between composite scores and `targets`.
///
/// Starts from equal weights and is fully deterministic.
pub fn calibrate(
  records: &[AssetRecord],
  targets: &[f64],
  config: &SolverConfig,
) -> Result<FactorWeights, CalibrationError> {
  if records.len() != targets.len() {
    return Err(CalibrationError::LengthMismatch {
      records: records.len(),
      targets: targets.len(),
    });
  }
  if records.len() < 2 {
    return Err(CalibrationError::TooFewAssets(records.len()));
  }
  if targets.iter().any(|t| !t.is_finite()) || is_constant(targets) {
    return Err(CalibrationError::DegenerateTarget);
  }

  let inputs: Vec<[f64; N_FACTORS]> = records.iter().map(AssetRecord::factor_inputs).collect();
  for (k, name) in FACTOR_NAMES.iter().enumerate() {
    let column: Vec<f64> = inputs.iter().map(|x| x[k]).collect();
    if is_constant(&column) {
      return Err(CalibrationError::ConstantFactor(*name));
    }
  }

  let cost = NegativeCorrelation {
    inputs,
    targets: targets.to_vec(),
  };
  let solver = ConstrainedSolver::new(cost, vec![0.0; N_FACTORS], vec![1.0; N_FACTORS], *config);
  let report = solver
    .minimize(FactorWeights::default().as_slice())
    .map_err(|e| CalibrationError::Solver(e.to_string()))?;

  if !report.converged {
    return Err(CalibrationError::NonConvergence {
      iterations: report.iterations,
    });
  }

  let mut weights = [0.0; N_FACTORS];
  weights.copy_from_slice(&report.x);
  debug!(
    correlation = -report.cost,
    iterations = report.iterations,
    ?weights,
    "factor weights calibrated"
  );
  Ok(FactorWeights(weights))
}

/// [`calibrate`], falling back to equal weights on failure.
pub fn calibrate_or_equal(records: &[AssetRecord], targets: &[f64], config: &SolverConfig) -> FactorWeights {
  match calibrate(records, targets, config) {
    Ok(w) => w,
    Err(err) => {
      warn!(error = %err, "factor calibration failed, using equal weights");
      FactorWeights::default()
    }
  }
}
