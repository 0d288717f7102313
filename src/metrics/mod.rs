//! Signal math: implied move, VRP, skew, liquidity, tail risk, scoring.
//!
//! Every function here is pure over its inputs; providers and stores stay on
//! the other side of the pipeline boundary.

pub mod implied_move;
pub mod liquidity;
pub mod scoring;
pub mod skew;
pub mod tail_risk;
pub mod vrp;

pub use liquidity::LiquidityConfig;
pub use scoring::ScoringWeights;
pub use skew::SkewConfig;
pub use tail_risk::TailRiskConfig;
pub use vrp::VrpConfig;
