//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Portfolio construction: factor scoring, anomaly detection, constrained weight optimization
//! and integer-share allocation.

pub mod adjust;
pub mod allocation;
pub mod anomaly;
pub mod constraints;
pub mod data;
pub mod engine;
pub mod frontier;
pub mod fundamentals;
pub mod holdings;
pub mod optimizers;
pub mod scoring;
pub mod signals;
pub mod solver;
pub mod types;

pub use adjust::ScoredAsset;
pub use adjust::rank_top_n;
pub use allocation::Allocation;
pub use allocation::AllocationLot;
pub use allocation::allocate_integer_shares;
pub use anomaly::AnomalyConfig;
pub use anomaly::AnomalyFlags;
pub use constraints::SectorBand;
pub use constraints::Style;
pub use constraints::StyleBand;
pub use data::CovarianceEstimator;
pub use data::PricePanel;
pub use data::ReturnPanel;
pub use data::RiskModel;
pub use data::correlation_matrix;
pub use data::simple_returns;
pub use engine::Exclusion;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use engine::Recommendation;
pub use engine::RecommendationRequest;
pub use frontier::FrontierPoint;
pub use frontier::sample_random_portfolios;
pub use fundamentals::AssetRecord;
pub use fundamentals::FundamentalSnapshot;
pub use fundamentals::GrowthMetrics;
pub use holdings::Position;
pub use optimizers::BlackLittermanConfig;
pub use optimizers::MultiFactorConfig;
pub use optimizers::OptimizationInputs;
pub use optimizers::OptimizerSettings;
pub use optimizers::View;
pub use optimizers::ViewSet;
pub use optimizers::optimize_black_litterman;
pub use optimizers::optimize_max_sharpe;
pub use optimizers::optimize_multi_factor;
pub use optimizers::optimize_risk_parity;
pub use optimizers::optimize_with_method;
pub use scoring::FactorWeights;
pub use solver::SolverConfig;
pub use types::OptimizerMethod;
pub use types::PortfolioResult;
pub use types::WeightBounds;
