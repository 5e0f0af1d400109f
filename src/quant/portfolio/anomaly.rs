//! # Anomaly Detection
//!
//! $$
//! z_t = \frac{\varepsilon_t - \bar\varepsilon_{t}^{(w)}}{s_{t}^{(w)}},\qquad
//! \text{RSI}_t = 100 - \frac{100}{1 + \overline{G}_t / \overline{L}_t}
//! $$
//!
//! Two per-asset anomaly rates. The residual rate standardizes ARIMA(1,1,1) residuals of the
//! return series against a trailing window and counts large deviations. The oscillator rate
//! counts overbought and oversold readings of a trailing-average RSI on prices.

use rayon::prelude::*;
use tracing::debug;

use super::data::PricePanel;
use super::data::series_returns;
use crate::stats::arima::Arima111;
use crate::stats::rolling::rolling_mean;
use crate::stats::rolling::rolling_zscores;

/// Rolling standard deviations at or below this never produce a flag.
pub const NOISE_FLOOR: f64 = 1e-12;

/// Detector configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnomalyConfig {
  /// Trailing window for residual standardization.
  pub window: usize,
  /// Absolute z-score above which a residual is anomalous.
  pub threshold: f64,
  /// RSI averaging window.
  pub rsi_window: usize,
  /// RSI level above which a period is overbought.
  pub overbought: f64,
  /// RSI level below which a period is oversold.
  pub oversold: f64,
}

impl Default for AnomalyConfig {
  fn default() -> Self {
    Self {
      window: 20,
      threshold: 2.0,
      rsi_window: 14,
      overbought: 70.0,
      oversold: 30.0,
    }
  }
}

/// Anomaly rates of one asset, each in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnomalyFlags {
  /// Fraction of standardized residuals beyond the threshold.
  pub price_rate: f64,
  /// Fraction of periods with an overbought or oversold RSI.
  pub oscillator_rate: f64,
}

impl AnomalyFlags {
  /// Combined rate used by the score penalty.
  pub fn total(&self) -> f64 {
    self.price_rate + self.oscillator_rate
  }

  /// Rate used to scale optimized weights.
  pub fn anomaly_score(&self) -> f64 {
    self.price_rate
  }
}

/// Fraction of ARIMA residuals of the return series whose trailing z-score exceeds the threshold.
///
/// Series too short to fit yield `0.0`.
pub fn residual_anomaly_rate(prices: &[f64], config: &AnomalyConfig) -> f64 {
  let returns = series_returns(prices);
  let Some(model) = Arima111::fit(&returns) else {
    debug!(n = returns.len(), "series too short for residual anomalies");
    return 0.0;
  };

  let residuals = &model.residuals;
  if residuals.is_empty() {
    return 0.0;
  }

  let flagged = rolling_zscores(residuals, config.window, NOISE_FLOOR)
    .into_iter()
    .flatten()
    .filter(|z| z.abs() > config.threshold)
    .count();

  flagged as f64 / residuals.len() as f64
}

/// Trailing-average RSI of a price series.
///
/// `None` until the window is full and where both average gain and average loss are zero.
pub fn rsi(prices: &[f64], window: usize) -> Vec<Option<f64>> {
  if prices.is_empty() {
    return Vec::new();
  }

  let mut gains = Vec::with_capacity(prices.len() - 1);
  let mut losses = Vec::with_capacity(prices.len() - 1);
  for w in prices.windows(2) {
    let d = w[1] - w[0];
    gains.push(d.max(0.0));
    losses.push((-d).max(0.0));
  }

  let avg_gain = rolling_mean(&gains, window);
  let avg_loss = rolling_mean(&losses, window);

  let mut out = Vec::with_capacity(prices.len());
  // The first price has no change behind it.
  out.push(None);
  out.extend(
    avg_gain
      .into_iter()
      .zip(avg_loss)
      .map(|(g, l)| match (g, l) {
        (Some(g), Some(l)) if g > 0.0 || l > 0.0 => {
          if l == 0.0 {
            Some(100.0)
          } else {
            Some(100.0 - 100.0 / (1.0 + g / l))
          }
        }
        _ => None,
      }),
  );
  out
}

/// Fraction of periods, over the full series length, with RSI above `overbought` or below `oversold`.
pub fn oscillator_anomaly_rate(prices: &[f64], config: &AnomalyConfig) -> f64 {
  if prices.is_empty() {
    return 0.0;
  }

  let flagged = rsi(prices, config.rsi_window)
    .into_iter()
    .flatten()
    .filter(|r| *r > config.overbought || *r < config.oversold)
    .count();

  flagged as f64 / prices.len() as f64
}

/// Both anomaly rates for one price series (gaps already removed).
pub fn detect(prices: &[f64], config: &AnomalyConfig) -> AnomalyFlags {
  AnomalyFlags {
    price_rate: residual_anomaly_rate(prices, config),
    oscillator_rate: oscillator_anomaly_rate(prices, config),
  }
}

/// Detect anomalies for every ticker in parallel, in `tickers` order.
///
/// Tickers absent from the panel get zero rates.
pub fn detect_panel(panel: &PricePanel, tickers: &[String], config: &AnomalyConfig) -> Vec<AnomalyFlags> {
  tickers
    .par_iter()
    .map(|t| {
      let flags = panel
        .series(t)
        .map(|prices| detect(&prices, config))
        .unwrap_or_default();
      debug!(
        ticker = %t,
        price_rate = flags.price_rate,
        oscillator_rate = flags.oscillator_rate,
        "anomaly rates"
      );
      flags
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;

  fn noisy_prices(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0005, 0.01).unwrap();
    let mut p = 100.0;
    let mut out = vec![p];
    for _ in 1..n {
      p *= 1.0 + normal.sample(&mut rng);
      out.push(p);
    }
    out
  }

  #[test]
  fn constant_prices_have_no_anomalies() {
    let flags = detect(&[50.0; 120], &AnomalyConfig::default());

    assert_eq!(flags.price_rate, 0.0);
    assert_eq!(flags.oscillator_rate, 0.0);
  }

  #[test]
  fn short_series_yields_zero_residual_rate() {
    let cfg = AnomalyConfig::default();
    assert_eq!(residual_anomaly_rate(&[1.0, 1.1, 1.2], &cfg), 0.0);
    assert_eq!(oscillator_anomaly_rate(&[], &cfg), 0.0);
  }

  fn geometric_prices(n: usize, growth: f64) -> Vec<f64> {
    (0..n).map(|t| 100.0 * (1.0 + growth).powi(t as i32)).collect()
  }

  #[test]
  fn steady_growth_has_no_residual_anomalies() {
    let prices = geometric_prices(253, 0.001);
    assert_eq!(residual_anomaly_rate(&prices, &AnomalyConfig::default()), 0.0);
  }

  #[test]
  fn return_spike_is_flagged() {
    let mut prices = geometric_prices(253, 0.001);
    for p in prices.iter_mut().skip(150) {
      *p *= 1.10;
    }

    assert!(residual_anomaly_rate(&prices, &AnomalyConfig::default()) > 0.0);
  }

  #[test]
  fn gaussian_noise_flags_a_small_fraction() {
    let rate = residual_anomaly_rate(&noisy_prices(500, 11), &AnomalyConfig::default());
    assert!(rate < 0.2);
  }

  #[test]
  fn rising_prices_are_overbought() {
    let prices: Vec<f64> = (0..40).map(|t| 10.0 + t as f64).collect();
    let r = rsi(&prices, 14);

    assert_eq!(r.len(), 40);
    assert!(r[..14].iter().all(Option::is_none));
    assert_eq!(r[14], Some(100.0));

    // 26 defined readings out of 40 periods.
    let rate = oscillator_anomaly_rate(&prices, &AnomalyConfig::default());
    assert!((rate - 26.0 / 40.0).abs() < 1e-12);
  }

  #[test]
  fn rsi_balances_to_fifty() {
    let prices: Vec<f64> = (0..30).map(|t| if t % 2 == 0 { 10.0 } else { 11.0 }).collect();
    let r = rsi(&prices, 14);

    assert!((r[29].unwrap() - 50.0).abs() < 1e-9);
  }

  #[test]
  fn panel_detection_preserves_order() {
    let dates: Vec<chrono::NaiveDate> = (0..60)
      .map(|i| chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i))
      .collect();
    let panel = PricePanel::from_columns(
      dates,
      vec![
        ("FLAT".to_string(), vec![20.0; 60]),
        ("NOISY".to_string(), noisy_prices(60, 5)),
      ],
    )
    .unwrap();
    let tickers = vec!["FLAT".to_string(), "MISSING".to_string(), "NOISY".to_string()];
    let flags = detect_panel(&panel, &tickers, &AnomalyConfig::default());

    assert_eq!(flags.len(), 3);
    assert_eq!(flags[0], AnomalyFlags::default());
    assert_eq!(flags[1], AnomalyFlags::default());
  }
}
