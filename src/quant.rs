//! # Quant
//!
//! $$
//! \mu^{\text{ann}} = 252\,\bar r,\qquad \sigma^{\text{ann}} = \sqrt{252}\,s
//! $$
//!
//! Portfolio construction and the conventions shared by its stages.

pub mod portfolio;

/// Trading periods per year used to annualize daily moments.
pub const TRADING_DAYS: f64 = 252.0;
