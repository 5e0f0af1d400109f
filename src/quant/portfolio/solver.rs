//! # Constrained Weight Solver
//!
//! $$
//! \min_{\mathbf w} f(\mathbf w)\quad\text{s.t.}\quad \mathbf 1^\top\mathbf w = 1,\;
//! \ell_i \le w_i \le u_i,\; a_j \le \sum_{i\in G_j} w_i \le b_j
//! $$
//!
//! Local solver shared by every optimizer mode and the factor calibration. The budget and box
//! constraints are handled exactly by Euclidean projection onto the capped simplex; the inner
//! search is a spectral (Barzilai-Borwein) projected gradient with Armijo backtracking. Group
//! bands are folded into an augmented Lagrangian whose multipliers are updated in an outer loop.
//! Objectives implement argmin's [`CostFunction`]; those that also implement [`Gradient`] can be
//! solved with their analytic gradient, the rest are differentiated by central differences.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use thiserror::Error;
use tracing::debug;

/// Iteration limits and tolerances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverConfig {
  /// Inner projected-gradient iterations per subproblem.
  pub max_iters: u64,
  /// Projected-gradient norm at which the inner search stops.
  pub tolerance: f64,
  /// Projected-gradient norm, relative to the gradient scale, accepted when the line search
  /// stalls.
  pub stall_tolerance: f64,
  /// Relative finite-difference step.
  pub fd_step: f64,
  /// Augmented-Lagrangian multiplier updates.
  pub max_outer_iters: usize,
  /// Largest accepted group band violation.
  pub constraint_tolerance: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 2000,
      tolerance: 1e-8,
      stall_tolerance: 1e-5,
      fd_step: 1e-6,
      max_outer_iters: 20,
      constraint_tolerance: 1e-6,
    }
  }
}

/// Band on the summed weight of a group of assets.
///
/// Owns a snapshot of its member indices, so later changes to the universe cannot alter it.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraint {
  /// Human-readable name used in error reports.
  pub label: String,
  /// Asset indices in the group.
  pub members: Vec<usize>,
  /// Minimum group exposure.
  pub lower: f64,
  /// Maximum group exposure.
  pub upper: f64,
}

impl LinearConstraint {
  pub fn new(label: impl Into<String>, members: Vec<usize>, lower: f64, upper: f64) -> Self {
    Self {
      label: label.into(),
      members,
      lower,
      upper,
    }
  }

  /// Summed weight of the members.
  pub fn exposure(&self, w: &[f64]) -> f64 {
    self.members.iter().filter_map(|&i| w.get(i)).sum()
  }

  /// Distance of the exposure from the band, zero inside it.
  pub fn violation(&self, w: &[f64]) -> f64 {
    let e = self.exposure(w);
    (self.lower - e).max(e - self.upper).max(0.0)
  }

  // Exposure range reachable under the budget and box constraints alone.
  fn reachable(&self, lower: &[f64], upper: &[f64]) -> (f64, f64) {
    let (mut in_lo, mut in_hi, mut out_lo, mut out_hi) = (0.0, 0.0, 0.0, 0.0);
    for i in 0..lower.len() {
      if self.members.contains(&i) {
        in_lo += lower[i];
        in_hi += upper[i];
      } else {
        out_lo += lower[i];
        out_hi += upper[i];
      }
    }
    (in_lo.max(1.0 - out_hi), in_hi.min(1.0 - out_lo))
  }
}

/// Outcome of a solve.
#[derive(Clone, Debug)]
pub struct SolverReport {
  /// Best point found; always satisfies the budget and box constraints.
  pub x: Vec<f64>,
  /// Objective value at `x`.
  pub cost: f64,
  /// Inner iterations across all subproblems.
  pub iterations: u64,
  /// Whether the stopping criteria were met.
  pub converged: bool,
  /// Largest group band violation at `x`.
  pub residual: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
  #[error("infeasible constraints {constraints:?}: {detail}")]
  Infeasible {
    constraints: Vec<String>,
    detail: String,
  },

  #[error("objective evaluation failed: {0}")]
  Objective(String),
}

/// Euclidean projection of `v` onto `{w : sum(w) = 1, lower <= w <= upper}`.
///
/// Finds the shift `tau` with `sum(clip(v - tau, lower, upper)) = 1` by bisection. The caller
/// guarantees `sum(lower) <= 1 <= sum(upper)`.
pub fn project_capped_simplex(v: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
  let clip = |tau: f64| -> Vec<f64> {
    v.iter()
      .zip(lower.iter().zip(upper.iter()))
      .map(|(&x, (&lo, &hi))| (x - tau).clamp(lo, hi))
      .collect()
  };

  let mut lo = v
    .iter()
    .zip(upper.iter())
    .map(|(x, u)| x - u)
    .fold(f64::INFINITY, f64::min)
    - 1.0;
  let mut hi = v
    .iter()
    .zip(lower.iter())
    .map(|(x, l)| x - l)
    .fold(f64::NEG_INFINITY, f64::max)
    + 1.0;

  for _ in 0..200 {
    let mid = 0.5 * (lo + hi);
    let s: f64 = clip(mid).iter().sum();
    if (s - 1.0).abs() <= 1e-15 {
      return clip(mid);
    }
    if s > 1.0 {
      lo = mid;
    } else {
      hi = mid;
    }
    if hi - lo <= f64::EPSILON * (1.0 + lo.abs().max(hi.abs())) {
      break;
    }
  }

  clip(0.5 * (lo + hi))
}

fn inf_norm_diff(a: &[f64], b: &[f64]) -> f64 {
  a.iter()
    .zip(b.iter())
    .map(|(x, y)| (x - y).abs())
    .fold(0.0, f64::max)
}

fn inf_norm(a: &[f64]) -> f64 {
  a.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// Step length that moves the largest coordinate by one unit along the gradient.
fn unit_step(g: &[f64]) -> f64 {
  1.0 / inf_norm(g).max(1e-12)
}

struct InnerResult {
  x: Vec<f64>,
  f: f64,
  iterations: u64,
  converged: bool,
}

/// Projected-gradient solver over the capped simplex with optional group bands.
pub struct ConstrainedSolver<C> {
  cost: C,
  lower: Vec<f64>,
  upper: Vec<f64>,
  constraints: Vec<LinearConstraint>,
  config: SolverConfig,
}

impl<C> ConstrainedSolver<C>
where
  C: CostFunction<Param = Vec<f64>, Output = f64>,
{
  pub fn new(cost: C, lower: Vec<f64>, upper: Vec<f64>, config: SolverConfig) -> Self {
    Self {
      cost,
      lower,
      upper,
      constraints: Vec::new(),
      config,
    }
  }

  pub fn with_constraints(mut self, constraints: Vec<LinearConstraint>) -> Self {
    self.constraints = constraints;
    self
  }

  /// Project `x` onto the budget and box constraints.
  pub fn project(&self, x: &[f64]) -> Vec<f64> {
    project_capped_simplex(x, &self.lower, &self.upper)
  }

  fn objective(&self, x: &[f64]) -> Result<f64, SolverError> {
    self
      .cost
      .cost(&x.to_vec())
      .map_err(|e| SolverError::Objective(e.to_string()))
  }

  fn max_violation(&self, x: &[f64]) -> f64 {
    self
      .constraints
      .iter()
      .map(|c| c.violation(x))
      .fold(0.0, f64::max)
  }

  fn check_static_feasibility(&self) -> Result<(), SolverError> {
    let n = self.lower.len();
    if self.upper.len() != n {
      return Err(SolverError::Infeasible {
        constraints: vec!["bounds".to_string()],
        detail: format!("{} lower bounds for {} upper bounds", n, self.upper.len()),
      });
    }
    if let Some(i) = (0..n).find(|&i| self.lower[i] > self.upper[i]) {
      return Err(SolverError::Infeasible {
        constraints: vec!["bounds".to_string()],
        detail: format!(
          "asset {i} has lower bound {} above upper bound {}",
          self.lower[i], self.upper[i]
        ),
      });
    }

    let lo: f64 = self.lower.iter().sum();
    let hi: f64 = self.upper.iter().sum();
    if lo > 1.0 + 1e-12 || hi < 1.0 - 1e-12 {
      return Err(SolverError::Infeasible {
        constraints: vec!["budget".to_string()],
        detail: format!("weights must sum to 1 but bounds allow [{lo}, {hi}]"),
      });
    }

    for c in &self.constraints {
      let (reach_lo, reach_hi) = c.reachable(&self.lower, &self.upper);
      if c.lower > c.upper
        || reach_hi < c.lower - self.config.constraint_tolerance
        || reach_lo > c.upper + self.config.constraint_tolerance
      {
        return Err(SolverError::Infeasible {
          constraints: vec![c.label.clone()],
          detail: format!(
            "band [{}, {}] outside reachable exposure [{reach_lo}, {reach_hi}]",
            c.lower, c.upper
          ),
        });
      }
    }

    Ok(())
  }

  fn finite_difference<F>(&self, f: &F, x: &[f64]) -> Result<Vec<f64>, SolverError>
  where
    F: Fn(&[f64]) -> Result<f64, SolverError>,
  {
    let mut g = vec![0.0; x.len()];
    let mut shifted = x.to_vec();
    for i in 0..x.len() {
      let h = self.config.fd_step * x[i].abs().max(1.0);
      shifted[i] = x[i] + h;
      let up = f(&shifted)?;
      shifted[i] = x[i] - h;
      let down = f(&shifted)?;
      shifted[i] = x[i];
      g[i] = (up - down) / (2.0 * h);
    }
    Ok(g)
  }

  // Projected direction for step length `alpha`, then Armijo backtracking along it.
  fn line_search<F>(
    &self,
    f: &F,
    x: &[f64],
    fx: f64,
    g: &[f64],
    alpha: f64,
  ) -> Result<Option<(Vec<f64>, f64)>, SolverError>
  where
    F: Fn(&[f64]) -> Result<f64, SolverError>,
  {
    let trial: Vec<f64> = x
      .iter()
      .zip(g.iter())
      .map(|(xi, gi)| xi - alpha * gi)
      .collect();
    let d: Vec<f64> = self
      .project(&trial)
      .iter()
      .zip(x.iter())
      .map(|(p, xi)| p - xi)
      .collect();
    let slope = dot(g, &d);
    if !slope.is_finite() || slope >= 0.0 {
      return Ok(None);
    }

    let mut t = 1.0;
    loop {
      let cand: Vec<f64> = x.iter().zip(d.iter()).map(|(xi, di)| xi + t * di).collect();
      let fc = f(&cand)?;
      if fc.is_finite() && fc <= fx + 1e-4 * t * slope {
        return Ok(Some((cand, fc)));
      }
      t *= 0.5;
      if t < 1e-12 {
        return Ok(None);
      }
    }
  }

  fn spectral_projected_gradient<F, G>(&self, f: &F, grad: &G, x0: &[f64]) -> Result<InnerResult, SolverError>
  where
    F: Fn(&[f64]) -> Result<f64, SolverError>,
    G: Fn(&[f64]) -> Result<Vec<f64>, SolverError>,
  {
    let cfg = &self.config;
    let mut x = self.project(x0);
    let mut fx = f(&x)?;
    if !fx.is_finite() {
      return Err(SolverError::Objective(format!(
        "non-finite objective {fx} at the starting point"
      )));
    }
    let mut g = grad(&x)?;
    let mut alpha = unit_step(&g);

    for k in 0..cfg.max_iters {
      let unit: Vec<f64> = x.iter().zip(g.iter()).map(|(xi, gi)| xi - gi).collect();
      let pg_norm = inf_norm_diff(&self.project(&unit), &x);
      if pg_norm <= cfg.tolerance {
        return Ok(InnerResult {
          x,
          f: fx,
          iterations: k,
          converged: true,
        });
      }

      let mut accepted = self.line_search(f, &x, fx, &g, alpha)?;
      let reset = unit_step(&g);
      if accepted.is_none() && alpha != reset {
        // A spectral step fitted to a non-convex stretch can leave almost no descent.
        accepted = self.line_search(f, &x, fx, &g, reset)?;
      }

      let Some((x_new, f_new)) = accepted else {
        return Ok(InnerResult {
          x,
          f: fx,
          iterations: k,
          converged: pg_norm <= cfg.stall_tolerance * inf_norm(&g).max(1.0),
        });
      };

      let g_new = grad(&x_new)?;
      if g_new.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::Objective(
          "non-finite gradient during the search".to_string(),
        ));
      }
      let s: Vec<f64> = x_new.iter().zip(x.iter()).map(|(a, b)| a - b).collect();
      let y: Vec<f64> = g_new.iter().zip(g.iter()).map(|(a, b)| a - b).collect();
      let sy = dot(&s, &y);
      alpha = if sy > 1e-20 {
        (dot(&s, &s) / sy).clamp(1e-10, 1e10)
      } else {
        unit_step(&g_new)
      };

      let step = inf_norm(&s);
      let df = (fx - f_new).abs();
      x = x_new;
      fx = f_new;
      g = g_new;

      if step <= 1e-14 && df <= 1e-15 * (1.0 + fx.abs()) {
        let unit: Vec<f64> = x.iter().zip(g.iter()).map(|(xi, gi)| xi - gi).collect();
        let pg_norm = inf_norm_diff(&self.project(&unit), &x);
        return Ok(InnerResult {
          x,
          f: fx,
          iterations: k + 1,
          converged: pg_norm <= cfg.stall_tolerance * inf_norm(&g).max(1.0),
        });
      }
    }

    Ok(InnerResult {
      x,
      f: fx,
      iterations: cfg.max_iters,
      converged: false,
    })
  }

  // Convex phase 1: smallest squared band violation reachable from `x0`.
  fn feasible_start(&self, x0: &[f64]) -> Result<(Vec<f64>, u64), SolverError> {
    let penalty = |x: &[f64]| -> Result<f64, SolverError> {
      Ok(
        self
          .constraints
          .iter()
          .map(|c| c.violation(x).powi(2))
          .sum(),
      )
    };
    let penalty_gradient = |x: &[f64]| -> Result<Vec<f64>, SolverError> {
      let mut g = vec![0.0; x.len()];
      for c in &self.constraints {
        let e = c.exposure(x);
        let slope = if e < c.lower {
          -2.0 * (c.lower - e)
        } else if e > c.upper {
          2.0 * (e - c.upper)
        } else {
          continue;
        };
        for &i in &c.members {
          g[i] += slope;
        }
      }
      Ok(g)
    };

    let res = self.spectral_projected_gradient(&penalty, &penalty_gradient, x0)?;
    let residual = self.max_violation(&res.x);
    if residual > self.config.constraint_tolerance {
      let violated: Vec<String> = self
        .constraints
        .iter()
        .filter(|c| c.violation(&res.x) > self.config.constraint_tolerance)
        .map(|c| c.label.clone())
        .collect();
      return Err(SolverError::Infeasible {
        constraints: violated,
        detail: format!("closest feasible point still violates bands by {residual:e}"),
      });
    }

    Ok((res.x, res.iterations))
  }

  /// Minimize the objective from `x0`, which is projected onto the feasible box first.
  ///
  /// The objective is differentiated by central differences.
  pub fn minimize(&self, x0: &[f64]) -> Result<SolverReport, SolverError> {
    let objective = |x: &[f64]| self.objective(x);
    self.run(x0, &|x: &[f64]| self.finite_difference(&objective, x))
  }

  fn run<G>(&self, x0: &[f64], objective_gradient: &G) -> Result<SolverReport, SolverError>
  where
    G: Fn(&[f64]) -> Result<Vec<f64>, SolverError>,
  {
    self.check_static_feasibility()?;

    if self.constraints.is_empty() {
      let res = self.spectral_projected_gradient(&|x: &[f64]| self.objective(x), objective_gradient, x0)?;
      debug!(
        iterations = res.iterations,
        converged = res.converged,
        cost = res.f,
        "projected gradient finished"
      );
      return Ok(SolverReport {
        x: res.x,
        cost: res.f,
        iterations: res.iterations,
        converged: res.converged,
        residual: 0.0,
      });
    }

    let (mut x, mut iterations) = self.feasible_start(x0)?;
    let m = self.constraints.len();
    // One multiplier per side of each band: (lower - e <= 0, e - upper <= 0).
    let mut lambdas = vec![(0.0_f64, 0.0_f64); m];
    let mut rho = 10.0;
    let mut prev_violation = f64::INFINITY;
    let mut inner_converged = false;
    let mut fx = self.objective(&x)?;

    for outer in 0..self.config.max_outer_iters {
      let lam = lambdas.clone();
      let augmented = |w: &[f64]| -> Result<f64, SolverError> {
        let mut val = self.objective(w)?;
        for (c, (l_lo, l_hi)) in self.constraints.iter().zip(lam.iter()) {
          let e = c.exposure(w);
          for (g, l) in [(c.lower - e, *l_lo), (e - c.upper, *l_hi)] {
            val += ((l + rho * g).max(0.0).powi(2) - l * l) / (2.0 * rho);
          }
        }
        Ok(val)
      };
      let augmented_gradient = |w: &[f64]| -> Result<Vec<f64>, SolverError> {
        let mut grad = objective_gradient(w)?;
        for (c, (l_lo, l_hi)) in self.constraints.iter().zip(lam.iter()) {
          let e = c.exposure(w);
          let slope = (l_hi + rho * (e - c.upper)).max(0.0) - (l_lo + rho * (c.lower - e)).max(0.0);
          for &i in &c.members {
            grad[i] += slope;
          }
        }
        Ok(grad)
      };

      let res = self.spectral_projected_gradient(&augmented, &augmented_gradient, &x)?;
      iterations += res.iterations;
      inner_converged = res.converged;
      x = res.x;
      fx = self.objective(&x)?;

      let violation = self.max_violation(&x);
      debug!(outer, rho, violation, cost = fx, "augmented Lagrangian step");
      if violation <= self.config.constraint_tolerance && inner_converged {
        return Ok(SolverReport {
          x,
          cost: fx,
          iterations,
          converged: true,
          residual: violation,
        });
      }

      for (c, (l_lo, l_hi)) in self.constraints.iter().zip(lambdas.iter_mut()) {
        let e = c.exposure(&x);
        *l_lo = (*l_lo + rho * (c.lower - e)).max(0.0);
        *l_hi = (*l_hi + rho * (e - c.upper)).max(0.0);
      }
      if violation > 0.25 * prev_violation {
        rho = (rho * 10.0).min(1e8);
      }
      prev_violation = violation;
    }

    let residual = self.max_violation(&x);
    Ok(SolverReport {
      x,
      cost: fx,
      iterations,
      converged: inner_converged && residual <= self.config.constraint_tolerance,
      residual,
    })
  }
}

impl<C> ConstrainedSolver<C>
where
  C: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  /// Same as [`ConstrainedSolver::minimize`], using the objective's analytic gradient.
  pub fn minimize_with_gradient(&self, x0: &[f64]) -> Result<SolverReport, SolverError> {
    self.run(x0, &|x: &[f64]| {
      self
        .cost
        .gradient(&x.to_vec())
        .map_err(|e| SolverError::Objective(e.to_string()))
    })
  }
}
