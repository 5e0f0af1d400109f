//! # Fundamentals
//!
//! $$
//! g = \left(\frac{x_T}{x_{T-k}}\right)^{1/k} - 1,\qquad
//! \text{ROIC} = 100\,\frac{NI}{TA - TL - C}
//! $$
//!
//! Fundamental snapshots as delivered by the data collaborator, their validation into
//! [`AssetRecord`]s and the growth and return-on-capital derivations.

use impl_new_derive::ImplNew;

use crate::error::EngineError;
use crate::error::Result;

/// Number of factor inputs feeding the composite score.
pub const N_FACTORS: usize = 7;

/// Factor input names in [`AssetRecord::factor_inputs`] order.
pub const FACTOR_NAMES: [&str; N_FACTORS] = [
  "roe_to_pe",
  "inverse_pb",
  "log_volume",
  "revenue_growth",
  "income_growth",
  "debt_stability",
  "dividend_yield",
];

/// Raw fundamental record. `None` marks a value the provider could not supply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FundamentalSnapshot {
  pub ticker: String,
  pub sector: Option<String>,
  pub pe: Option<f64>,
  pub pb: Option<f64>,
  pub roe: Option<f64>,
  pub roic: Option<f64>,
  pub debt_to_equity: Option<f64>,
  pub dividend_yield: Option<f64>,
  pub revenue_growth: Option<f64>,
  pub income_growth: Option<f64>,
  pub debt_stability: Option<f64>,
  pub current_price: Option<f64>,
  pub average_volume: Option<f64>,
  pub market_cap: Option<f64>,
}

impl FundamentalSnapshot {
  /// Snapshot with every field unavailable.
  pub fn empty(ticker: impl Into<String>) -> Self {
    Self {
      ticker: ticker.into(),
      ..Self::default()
    }
  }

  /// Fill the three growth fields from derived history metrics.
  pub fn with_growth(mut self, growth: &GrowthMetrics) -> Self {
    self.revenue_growth = growth.revenue_growth;
    self.income_growth = growth.income_growth;
    self.debt_stability = growth.debt_stability;
    self
  }
}

/// Validated per-asset fundamentals. Every scoring field is present and finite.
#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct AssetRecord {
  pub ticker: String,
  pub sector: String,
  pub pe: f64,
  pub pb: f64,
  pub roe: f64,
  pub roic: f64,
  pub debt_to_equity: f64,
  pub dividend_yield: f64,
  pub revenue_growth: f64,
  pub income_growth: f64,
  pub debt_stability: f64,
  pub current_price: f64,
  pub average_volume: f64,
  pub market_cap: Option<f64>,
}

fn required(ticker: &str, field: &'static str, value: Option<f64>) -> Result<f64> {
  match value {
    Some(v) if v.is_finite() => Ok(v),
    _ => Err(EngineError::MissingField {
      ticker: ticker.to_string(),
      field,
    }),
  }
}

impl TryFrom<FundamentalSnapshot> for AssetRecord {
  type Error = EngineError;

  fn try_from(s: FundamentalSnapshot) -> Result<Self> {
    let t = s.ticker.as_str();
    let missing = |field| EngineError::MissingField {
      ticker: t.to_string(),
      field,
    };

    let pe = required(t, "pe", s.pe)?;
    let pb = required(t, "pb", s.pb)?;
    let average_volume = required(t, "average_volume", s.average_volume)?;
    let current_price = required(t, "current_price", s.current_price)?;
    // Derived inputs ROE/PE, 1/PB and ln(volume) must be finite too.
    if pe == 0.0 {
      return Err(missing("pe"));
    }
    if pb == 0.0 {
      return Err(missing("pb"));
    }
    if average_volume <= 0.0 {
      return Err(missing("average_volume"));
    }
    if current_price <= 0.0 {
      return Err(missing("current_price"));
    }

    let roe = required(t, "roe", s.roe)?;
    let roic = required(t, "roic", s.roic)?;
    let debt_to_equity = required(t, "debt_to_equity", s.debt_to_equity)?;
    let dividend_yield = required(t, "dividend_yield", s.dividend_yield)?;
    let revenue_growth = required(t, "revenue_growth", s.revenue_growth)?;
    let income_growth = required(t, "income_growth", s.income_growth)?;
    let debt_stability = required(t, "debt_stability", s.debt_stability)?;

    Ok(Self {
      sector: s.sector.unwrap_or_else(|| "Unknown".to_string()),
      pe,
      pb,
      roe,
      roic,
      debt_to_equity,
      dividend_yield,
      revenue_growth,
      income_growth,
      debt_stability,
      current_price,
      average_volume,
      market_cap: s.market_cap.filter(|c| c.is_finite() && *c > 0.0),
      ticker: s.ticker,
    })
  }
}

impl AssetRecord {
  /// The seven factor inputs in [`FACTOR_NAMES`] order.
  pub fn factor_inputs(&self) -> [f64; N_FACTORS] {
    [
      self.roe / self.pe,
      1.0 / self.pb,
      self.average_volume.ln(),
      self.revenue_growth,
      self.income_growth,
      self.debt_stability,
      self.dividend_yield,
    ]
  }

  /// Profitability per unit of valuation, discounted by leverage.
  ///
  /// Without positive leverage the ratio is returned undiscounted.
  pub fn fundamental_quality(&self) -> f64 {
    let base = self.roe / self.pe;
    if self.debt_to_equity > 1e-12 {
      base / self.debt_to_equity
    } else {
      base
    }
  }

  /// Mean of revenue and income growth.
  pub fn mean_growth(&self) -> f64 {
    0.5 * (self.revenue_growth + self.income_growth)
  }
}

/// Annualized growth rates derived from yearly statements, oldest first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GrowthMetrics {
  pub revenue_growth: Option<f64>,
  pub income_growth: Option<f64>,
  /// Negated debt growth: shrinking debt is stable.
  pub debt_stability: Option<f64>,
}

fn round2(x: f64) -> f64 {
  (x * 100.0).round() / 100.0
}

/// Compound annual growth over at most `years` intervals, rounded to two decimals.
pub fn cagr(history: &[f64], years: usize) -> Option<f64> {
  let history: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
  if history.len() < 2 || years == 0 {
    return None;
  }

  let k = (history.len() - 1).min(years);
  let last = history[history.len() - 1];
  let base = history[history.len() - 1 - k];
  if base == 0.0 {
    return None;
  }

  let g = (last / base).powf(1.0 / k as f64) - 1.0;
  g.is_finite().then(|| round2(g))
}

impl GrowthMetrics {
  /// Derive growth metrics from annual revenue, net income and total debt, oldest first.
  pub fn from_annual_history(
    revenue: &[f64],
    net_income: &[f64],
    total_debt: &[f64],
    years: usize,
  ) -> Self {
    let income_base_positive = net_income
      .iter()
      .find(|v| v.is_finite())
      .is_some_and(|v| *v > 0.0);

    Self {
      revenue_growth: cagr(revenue, years),
      income_growth: if income_base_positive {
        cagr(net_income, years)
      } else {
        None
      },
      debt_stability: cagr(total_debt, years).map(|g| round2(-g)),
    }
  }
}

/// Return on invested capital in percent.
pub fn roic(net_income: f64, total_assets: f64, total_liabilities: f64, cash: f64) -> Option<f64> {
  let invested = total_assets - total_liabilities - cash;
  if invested == 0.0 {
    return None;
  }
  let r = net_income / invested * 100.0;
  r.is_finite().then_some(r)
}

/// Validate snapshots, splitting usable records from rejected tickers.
pub fn validate_snapshots(
  snapshots: Vec<FundamentalSnapshot>,
) -> (Vec<AssetRecord>, Vec<(String, EngineError)>) {
  let mut records = Vec::with_capacity(snapshots.len());
  let mut rejected = Vec::new();

  for snap in snapshots {
    let ticker = snap.ticker.clone();
    match AssetRecord::try_from(snap) {
      Ok(rec) => records.push(rec),
      Err(err) => rejected.push((ticker, err)),
    }
  }

  (records, rejected)
}

#[cfg(test)]
pub(crate) mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  pub(crate) fn snapshot(ticker: &str) -> FundamentalSnapshot {
    FundamentalSnapshot {
      ticker: ticker.to_string(),
      sector: Some("Technology".to_string()),
      pe: Some(15.0),
      pb: Some(2.0),
      roe: Some(0.18),
      roic: Some(12.0),
      debt_to_equity: Some(0.8),
      dividend_yield: Some(0.02),
      revenue_growth: Some(0.07),
      income_growth: Some(0.05),
      debt_stability: Some(0.01),
      current_price: Some(40.0),
      average_volume: Some(1.0e6),
      market_cap: Some(5.0e9),
    }
  }

  #[test]
  fn complete_snapshot_validates() {
    let rec = AssetRecord::try_from(snapshot("AAA")).unwrap();
    let f = rec.factor_inputs();

    assert_abs_diff_eq!(f[0], 0.012, epsilon = 1e-12);
    assert_abs_diff_eq!(f[1], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(f[2], 1.0e6_f64.ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(rec.fundamental_quality(), 0.012 / 0.8, epsilon = 1e-12);
  }

  #[test]
  fn missing_and_degenerate_fields_are_rejected_not_zero_filled() {
    let mut snap = snapshot("AAA");
    snap.roic = None;
    let err = AssetRecord::try_from(snap).unwrap_err();
    assert_eq!(
      err,
      EngineError::MissingField {
        ticker: "AAA".to_string(),
        field: "roic"
      }
    );

    let mut snap = snapshot("BBB");
    snap.pe = Some(0.0);
    assert!(matches!(
      AssetRecord::try_from(snap),
      Err(EngineError::MissingField { field: "pe", .. })
    ));

    let mut snap = snapshot("CCC");
    snap.dividend_yield = Some(f64::NAN);
    assert!(AssetRecord::try_from(snap).is_err());
  }

  #[test]
  fn validation_splits_records() {
    let mut bad = snapshot("BAD");
    bad.average_volume = Some(0.0);
    let (ok, rejected) = validate_snapshots(vec![snapshot("AAA"), bad]);

    assert_eq!(ok.len(), 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, "BAD");
  }

  #[test]
  fn growth_metrics_follow_cagr() {
    let revenue = [100.0, 110.0, 121.0];
    let income = [-5.0, 10.0, 12.0];
    let debt = [50.0, 45.0, 40.5];
    let g = GrowthMetrics::from_annual_history(&revenue, &income, &debt, 5);

    assert_eq!(g.revenue_growth, Some(0.1));
    assert_eq!(g.income_growth, None);
    assert_eq!(g.debt_stability, Some(0.1));
  }

  #[test]
  fn cagr_uses_at_most_requested_years() {
    let revenue = [1.0, 100.0, 121.0];
    assert_eq!(cagr(&revenue, 1), Some(0.21));
    assert_eq!(cagr(&[5.0], 3), None);
  }

  #[test]
  fn roic_requires_invested_capital() {
    assert_abs_diff_eq!(roic(10.0, 200.0, 90.0, 10.0).unwrap(), 10.0, epsilon = 1e-12);
    assert!(roic(10.0, 100.0, 90.0, 10.0).is_none());
  }
}
