//! # ARIMA(1,1,1) Estimator
//!
//! $$
//! (1-\phi B)(1-B)y_t = (1+\theta B)\varepsilon_t
//! $$
//!
//! Conditional-sum-of-squares fit of a low-order ARIMA model. The differenced series
//! $\Delta y_t$ is filtered through the ARMA(1,1) recursion
//! $\varepsilon_t = \Delta y_t - \phi\,\Delta y_{t-1} - \theta\,\varepsilon_{t-1}$ and
//! $\sum_t \varepsilon_t^2$ is minimized with Nelder-Mead. Both coefficients are mapped through
//! `tanh` so the fitted model is always stationary and invertible.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

/// Shortest level series the estimator accepts.
pub const MIN_OBSERVATIONS: usize = 10;

/// Fitted ARIMA(1,1,1) model.
#[derive(Clone, Debug)]
pub struct Arima111 {
  /// AR coefficient of the differenced series.
  pub phi: f64,
  /// MA coefficient of the innovations.
  pub theta: f64,
  /// Innovation variance (mean squared residual).
  pub sigma2: f64,
  /// One residual per differenced observation.
  pub residuals: Vec<f64>,
  last_level: f64,
  last_diff: f64,
}

struct CssCost {
  diffs: Vec<f64>,
}

impl CostFunction for CssCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let (phi, theta) = constrained(x);
    let e = css_residuals(&self.diffs, phi, theta);
    Ok(e.iter().skip(1).map(|v| v * v).sum())
  }
}

fn constrained(x: &[f64]) -> (f64, f64) {
  (x[0].tanh(), x[1].tanh())
}

fn css_residuals(diffs: &[f64], phi: f64, theta: f64) -> Vec<f64> {
  let mut e = Vec::with_capacity(diffs.len());
  for t in 0..diffs.len() {
    let val = if t == 0 {
      diffs[0]
    } else {
      diffs[t] - phi * diffs[t - 1] - theta * e[t - 1]
    };
    e.push(val);
  }
  e
}

impl Arima111 {
  /// Fit the model to `series`.
  ///
  /// Returns `None` when the series is shorter than [`MIN_OBSERVATIONS`], holds non-finite
  /// values, or the simplex search fails.
  pub fn fit(series: &[f64]) -> Option<Self> {
    if series.len() < MIN_OBSERVATIONS || series.iter().any(|v| !v.is_finite()) {
      return None;
    }

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let cost = CssCost {
      diffs: diffs.clone(),
    };

    let simplex = vec![vec![0.0, 0.0], vec![0.5, 0.0], vec![0.0, 0.5]];
    let solver = NelderMead::new(simplex).with_sd_tolerance(1e-12).ok()?;
    let best = match Executor::new(cost, solver)
      .configure(|state| state.max_iters(500))
      .run()
    {
      Ok(res) => res.state.best_param.unwrap_or_else(|| vec![0.0, 0.0]),
      Err(err) => {
        debug!(error = %err, n = series.len(), "ARIMA(1,1,1) fit failed");
        return None;
      }
    };

    let (phi, theta) = constrained(&best);
    let residuals = css_residuals(&diffs, phi, theta);
    let sigma2 = if residuals.len() > 1 {
      residuals.iter().skip(1).map(|v| v * v).sum::<f64>() / (residuals.len() - 1) as f64
    } else {
      0.0
    };

    Some(Self {
      phi,
      theta,
      sigma2,
      last_level: series[series.len() - 1],
      last_diff: diffs[diffs.len() - 1],
      residuals,
    })
  }

  /// Level forecast for the next `horizon` periods.
  pub fn forecast(&self, horizon: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(horizon);
    let last_resid = self.residuals.last().copied().unwrap_or(0.0);
    let mut level = self.last_level;
    let mut diff = self.phi * self.last_diff + self.theta * last_resid;

    for _ in 0..horizon {
      level += diff;
      out.push(level);
      diff *= self.phi;
    }

    out
  }
}
