//! Error types shared by every stage of the engine.

use thiserror::Error;

use crate::quant::portfolio::OptimizerMethod;

/// Errors produced by the portfolio engine.
///
/// Data-availability variants ([`EngineError::InsufficientData`], [`EngineError::MissingField`])
/// exclude a single asset from the universe. Optimization variants carry the objective, the
/// asset count and the constraint context so the caller can retry or fall back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
  #[error("insufficient data for {context}: need {required}, got {available}")]
  InsufficientData {
    context: String,
    required: usize,
    available: usize,
  },

  #[error("missing or non-finite field `{field}` for {ticker}")]
  MissingField { ticker: String, field: &'static str },

  #[error("factor weight calibration failed: {0}")]
  Calibration(String),

  #[error("degenerate portfolio variance {variance:e} for {method} over {n_assets} assets")]
  DegenerateVariance {
    method: OptimizerMethod,
    n_assets: usize,
    variance: f64,
  },

  #[error("constraints infeasible for {method} over {n_assets} assets ({}): {detail}", .constraints.join(", "))]
  ConstraintInfeasible {
    method: OptimizerMethod,
    n_assets: usize,
    constraints: Vec<String>,
    detail: String,
  },

  #[error("{method} solver did not converge over {n_assets} assets with {n_constraints} group constraints after {iterations} iterations (residual {residual:e})")]
  SolverNonConvergence {
    method: OptimizerMethod,
    n_assets: usize,
    n_constraints: usize,
    iterations: u64,
    residual: f64,
  },

  #[error("invalid input: {0}")]
  InvalidInput(String),
}

impl EngineError {
  /// Errors that only disqualify one asset, not the whole run.
  pub fn is_data_error(&self) -> bool {
    matches!(
      self,
      EngineError::InsufficientData { .. } | EngineError::MissingField { .. }
    )
  }

  /// Errors raised by the joint optimization step.
  pub fn is_optimization_error(&self) -> bool {
    matches!(
      self,
      EngineError::DegenerateVariance { .. }
        | EngineError::ConstraintInfeasible { .. }
        | EngineError::SolverNonConvergence { .. }
    )
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_messages_carry_optimizer_context() {
    let err = EngineError::SolverNonConvergence {
      method: OptimizerMethod::RiskParity,
      n_assets: 4,
      n_constraints: 2,
      iterations: 500,
      residual: 1e-3,
    };
    let msg = err.to_string();

    assert!(msg.contains("risk-parity"));
    assert!(msg.contains("4 assets"));
    assert!(err.is_optimization_error());
    assert!(!err.is_data_error());
  }

  #[test]
  fn infeasible_error_lists_constraints() {
    let err = EngineError::ConstraintInfeasible {
      method: OptimizerMethod::MultiFactor,
      n_assets: 3,
      constraints: vec!["sector:Energy".to_string(), "style:value".to_string()],
      detail: "bands exceed bounds".to_string(),
    };

    assert!(err.to_string().contains("sector:Energy, style:value"));
  }
}
