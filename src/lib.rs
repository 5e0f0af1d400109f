//! # portfolio-engine
//!
//! $$
//! \mathbf{w}^\* = \arg\max_{\mathbf{w}\in\Delta} \frac{\mathbf{w}^\top\mu - r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! $$
//!
//! Portfolio construction from prices and fundamentals: factor scoring with calibrated weights,
//! residual and oscillator anomaly detection, constrained weight optimization and integer-share
//! allocation under a cash budget.
//!
//! Everything is a pure function of its inputs. The risk-free rate and every other knob are
//! passed explicitly through [`quant::portfolio::PortfolioEngineConfig`].

pub mod error;
pub mod quant;
pub mod stats;

pub use error::EngineError;
pub use error::Result;
