//! # Rolling Moments
//!
//! $$
//! z_t = \frac{x_t - \bar x_{t-w+1:t}}{s_{t-w+1:t}}
//! $$
//!
//! Trailing-window statistics. The value at `t` summarises `x[t + 1 - window..=t]` and is
//! `None` until the window is full, like a pandas rolling window with `min_periods = window`.

use statrs::statistics::Statistics;

/// Trailing mean over `window` observations.
pub fn rolling_mean(xs: &[f64], window: usize) -> Vec<Option<f64>> {
  (0..xs.len())
    .map(|t| trailing(xs, t, window).map(|w| w.mean()))
    .collect()
}

/// Trailing sample standard deviation (`ddof = 1`) over `window` observations.
pub fn rolling_std(xs: &[f64], window: usize) -> Vec<Option<f64>> {
  (0..xs.len())
    .map(|t| {
      trailing(xs, t, window)
        .filter(|w| w.len() > 1)
        .map(|w| w.std_dev())
    })
    .collect()
}

/// Trailing z-score of each observation against its own window.
///
/// Windows whose standard deviation is at or below `noise_floor` yield `None`: a flat window
/// has no meaningful dispersion to standardize against.
pub fn rolling_zscores(xs: &[f64], window: usize, noise_floor: f64) -> Vec<Option<f64>> {
  let means = rolling_mean(xs, window);
  let stds = rolling_std(xs, window);

  xs.iter()
    .zip(means.iter().zip(stds.iter()))
    .map(|(&x, (mean, std))| match (mean, std) {
      (Some(m), Some(s)) if s.is_finite() && *s > noise_floor => Some((x - m) / s),
      _ => None,
    })
    .collect()
}

fn trailing(xs: &[f64], t: usize, window: usize) -> Option<&[f64]> {
  if window == 0 || t + 1 < window {
    None
  } else {
    Some(&xs[t + 1 - window..=t])
  }
}
