//! # Score Adjustment
//!
//! $$
//! \tilde s_i = s_i\,\bigl(1 + 0.1\,\tfrac{\text{ROE}_i + \text{ROIC}_i}{2}\bigr)\,
//! \max\bigl(0,\ 1 - 0.05\,(a^{p}_i + a^{o}_i)\bigr)
//! $$
//!
//! Quality multiplier, anomaly penalty and top-N selection of candidates.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use super::anomaly::AnomalyFlags;
use super::fundamentals::AssetRecord;

/// Scale of the quality term.
pub const QUALITY_SCALE: f64 = 0.1;
/// Score penalty per unit of combined anomaly rate.
pub const ANOMALY_PENALTY: f64 = 0.05;

/// One row of the score table.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredAsset {
  pub ticker: String,
  pub sector: String,
  /// Screening score, independent of calibration.
  pub static_score: f64,
  /// Calibrated composite score.
  pub composite: f64,
  /// Composite after the quality multiplier and anomaly penalty.
  pub adjusted: f64,
  pub anomalies: AnomalyFlags,
  /// Realized trailing return the calibration targets.
  pub cumulative_return: f64,
}

/// `1 + 0.1 * (ROE + ROIC) / 2`.
pub fn quality_multiplier(record: &AssetRecord) -> f64 {
  1.0 + QUALITY_SCALE * (record.roe + record.roic) / 2.0
}

/// `max(0, 1 - 0.05 * (price_rate + oscillator_rate))`.
pub fn anomaly_penalty(flags: &AnomalyFlags) -> f64 {
  (1.0 - ANOMALY_PENALTY * flags.total()).max(0.0)
}

/// Composite score adjusted for quality and anomalies.
pub fn adjust_score(composite: f64, record: &AssetRecord, flags: &AnomalyFlags) -> f64 {
  composite * quality_multiplier(record) * anomaly_penalty(flags)
}

/// Sort by adjusted score, ties by composite score then input order, and keep the first `n`.
pub fn rank_top_n(mut assets: Vec<ScoredAsset>, n: usize) -> Vec<ScoredAsset> {
  assets.sort_by_key(|a| (Reverse(OrderedFloat(a.adjusted)), Reverse(OrderedFloat(a.composite))));
  assets.truncate(n);
  assets
}
