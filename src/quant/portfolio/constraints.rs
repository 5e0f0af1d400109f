//! # Sector and Style Bands
//!
//! $$
//! a_j \le \sum_{i \in G_j} w_i \le b_j
//! $$
//!
//! Group exposure bands for the multi-factor optimizer. Each band is resolved against the
//! candidate universe once, producing a [`LinearConstraint`] that owns its member indices.

use std::fmt::Display;

use ordered_float::OrderedFloat;

use super::fundamentals::AssetRecord;
use super::solver::LinearConstraint;

/// Investment style used to group assets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Style {
  /// Price-to-book below the universe median.
  Value,
  /// ROE above the universe median.
  Growth,
  /// Positive dividend yield.
  Dividend,
}

impl Display for Style {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Style::Value => write!(f, "value"),
      Style::Growth => write!(f, "growth"),
      Style::Dividend => write!(f, "dividend"),
    }
  }
}

/// Exposure band for all assets of one sector.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorBand {
  pub sector: String,
  pub lower: f64,
  pub upper: f64,
}

/// Exposure band for all assets of one style.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StyleBand {
  pub style: Style,
  pub lower: f64,
  pub upper: f64,
}

/// Median with the midpoint convention for even lengths; `None` when empty.
pub fn median(xs: &[f64]) -> Option<f64> {
  if xs.is_empty() {
    return None;
  }
  let mut sorted = xs.to_vec();
  sorted.sort_by_key(|x| OrderedFloat(*x));
  let mid = sorted.len() / 2;
  if sorted.len() % 2 == 0 {
    Some(0.5 * (sorted[mid - 1] + sorted[mid]))
  } else {
    Some(sorted[mid])
  }
}

/// Indices of `records` belonging to `style`.
pub fn style_members(style: Style, records: &[AssetRecord]) -> Vec<usize> {
  let pick = |pred: &dyn Fn(&AssetRecord) -> bool| {
    records
      .iter()
      .enumerate()
      .filter(|(_, r)| pred(r))
      .map(|(i, _)| i)
      .collect::<Vec<_>>()
  };

  match style {
    Style::Value => {
      let pbs: Vec<f64> = records.iter().map(|r| r.pb).collect();
      match median(&pbs) {
        Some(m) => pick(&|r: &AssetRecord| r.pb < m),
        None => Vec::new(),
      }
    }
    Style::Growth => {
      let roes: Vec<f64> = records.iter().map(|r| r.roe).collect();
      match median(&roes) {
        Some(m) => pick(&|r: &AssetRecord| r.roe > m),
        None => Vec::new(),
      }
    }
    Style::Dividend => pick(&|r: &AssetRecord| r.dividend_yield > 0.0),
  }
}

impl SectorBand {
  pub fn new(sector: impl Into<String>, lower: f64, upper: f64) -> Self {
    Self {
      sector: sector.into(),
      lower,
      upper,
    }
  }

  /// Resolve against `records`.
  pub fn resolve(&self, records: &[AssetRecord]) -> LinearConstraint {
    let members = records
      .iter()
      .enumerate()
      .filter(|(_, r)| r.sector == self.sector)
      .map(|(i, _)| i)
      .collect();
    LinearConstraint::new(format!("sector:{}", self.sector), members, self.lower, self.upper)
  }
}

impl StyleBand {
  /// Resolve against `records`.
  pub fn resolve(&self, records: &[AssetRecord]) -> LinearConstraint {
    LinearConstraint::new(
      format!("style:{}", self.style),
      style_members(self.style, records),
      self.lower,
      self.upper,
    )
  }
}

/// All sector and style bands as linear constraints over `records`.
pub fn build_constraints(
  records: &[AssetRecord],
  sectors: &[SectorBand],
  styles: &[StyleBand],
) -> Vec<LinearConstraint> {
  sectors
    .iter()
    .map(|b| b.resolve(records))
    .chain(styles.iter().map(|b| b.resolve(records)))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::quant::portfolio::fundamentals::tests::snapshot;

  fn records() -> Vec<AssetRecord> {
    [
      ("AAA", "Tech", 1.0, 0.10, 0.00),
      ("BBB", "Tech", 2.0, 0.20, 0.01),
      ("CCC", "Energy", 3.0, 0.30, 0.02),
      ("DDD", "Utilities", 4.0, 0.40, 0.00),
    ]
    .iter()
    .map(|&(t, sector, pb, roe, dy)| {
      let mut s = snapshot(t);
      s.sector = Some(sector.to_string());
      s.pb = Some(pb);
      s.roe = Some(roe);
      s.dividend_yield = Some(dy);
      AssetRecord::try_from(s).unwrap()
    })
    .collect()
  }

  #[test]
  fn median_handles_even_and_odd() {
    assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    assert_eq!(median(&[]), None);
  }

  #[test]
  fn styles_select_expected_members() {
    let recs = records();

    assert_eq!(style_members(Style::Value, &recs), vec![0, 1]);
    assert_eq!(style_members(Style::Growth, &recs), vec![2, 3]);
    assert_eq!(style_members(Style::Dividend, &recs), vec![1, 2]);
  }

  #[test]
  fn bands_snapshot_their_members() {
    let recs = records();
    let constraints = build_constraints(
      &recs,
      &[SectorBand::new("Tech", 0.1, 0.5)],
      &[StyleBand {
        style: Style::Dividend,
        lower: 0.2,
        upper: 1.0,
      }],
    );

    assert_eq!(constraints.len(), 2);
    assert_eq!(constraints[0].label, "sector:Tech");
    assert_eq!(constraints[0].members, vec![0, 1]);
    assert_eq!(constraints[1].label, "style:dividend");

    let w = [0.3, 0.3, 0.2, 0.2];
    assert!((constraints[0].exposure(&w) - 0.6).abs() < 1e-12);
    assert!((constraints[0].violation(&w) - 0.1).abs() < 1e-12);
    assert_eq!(constraints[1].violation(&w), 0.0);
  }
}
