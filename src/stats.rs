//! # Stats
//!
//! $$
//! \hat\Sigma_{\text{shrunk}} = (1-\delta)\,S + \delta\,\mu I
//! $$
//!
//! Estimators used by the portfolio pipeline: an ARIMA(1,1,1) residual model, trailing
//! window moments and a Ledoit-Wolf covariance shrinkage.
pub mod arima;
pub mod rolling;
pub mod shrinkage;
