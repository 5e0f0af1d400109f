//! # Covariance Shrinkage
//!
//! $$
//! \hat\Sigma = (1-\delta^\*)\,S + \delta^\*\,\frac{\operatorname{tr}S}{p}\,I
//! $$
//!
//! Ledoit-Wolf estimator with the scaled-identity target. The shrinkage intensity
//! $\delta^\*$ is the closed-form optimum of the Frobenius loss, clipped to `[0, 1]`.

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

/// Shrunk covariance with the intensity that produced it.
#[derive(Clone, Debug)]
pub struct ShrunkCovariance {
  /// Covariance estimate (`1/n` normalization, not annualized).
  pub covariance: Array2<f64>,
  /// Weight given to the identity target.
  pub shrinkage: f64,
}

/// Ledoit-Wolf shrinkage of the covariance of `x` (rows are observations, columns variables).
///
/// Returns `None` for an empty sample.
pub fn ledoit_wolf(x: ArrayView2<f64>) -> Option<ShrunkCovariance> {
  let (n, p) = x.dim();
  if n == 0 || p == 0 {
    return None;
  }

  let mean = x.mean_axis(Axis(0))?;
  let xc = &x - &mean;
  let nf = n as f64;
  let pf = p as f64;

  let emp_cov = xc.t().dot(&xc) / nf;
  if p == 1 {
    return Some(ShrunkCovariance {
      covariance: emp_cov,
      shrinkage: 0.0,
    });
  }

  let x2 = xc.mapv(|v| v * v);
  let emp_trace: f64 = x2.sum() / nf;
  let mu = emp_trace / pf;

  let beta_raw = x2.t().dot(&x2).sum();
  let delta_raw = xc.t().dot(&xc).mapv(|v| v * v).sum() / (nf * nf);

  let beta = (beta_raw / nf - delta_raw) / (pf * nf);
  let delta = (delta_raw - 2.0 * mu * emp_trace + pf * mu * mu) / pf;
  let beta = beta.min(delta);

  let shrinkage = if beta <= 0.0 || delta <= 0.0 {
    0.0
  } else {
    (beta / delta).clamp(0.0, 1.0)
  };

  let mut covariance = emp_cov * (1.0 - shrinkage);
  for i in 0..p {
    covariance[[i, i]] += shrinkage * mu;
  }

  Some(ShrunkCovariance {
    covariance,
    shrinkage,
  })
}

#[cfg(test)]
mod tests {
  use nalgebra::DMatrix;
  use ndarray::Array2;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;

  fn gaussian_sample(n: usize, p: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.01).unwrap();
    Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng))
  }

  #[test]
  fn shrinkage_keeps_wide_sample_invertible() {
    let x = gaussian_sample(6, 12, 7);
    let est = ledoit_wolf(x.view()).unwrap();

    assert!(est.shrinkage > 0.0 && est.shrinkage <= 1.0);
    let m = DMatrix::from_fn(12, 12, |i, j| est.covariance[[i, j]]);
    assert!(m.cholesky().is_some());
  }

  #[test]
  fn shrunk_covariance_is_symmetric() {
    let x = gaussian_sample(200, 4, 11);
    let est = ledoit_wolf(x.view()).unwrap();

    for i in 0..4 {
      for j in 0..4 {
        assert!((est.covariance[[i, j]] - est.covariance[[j, i]]).abs() < 1e-15);
      }
    }
    assert!((0.0..=1.0).contains(&est.shrinkage));
  }

  #[test]
  fn empty_sample_has_no_estimate() {
    let x = Array2::<f64>::zeros((0, 3));
    assert!(ledoit_wolf(x.view()).is_none());
  }
}
