//! Signal-engine record types.
//!
//! Everything here is created inside one pipeline execution and discarded at
//! its end; persistence happens only through the storage layer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::money::{Money, Percentage, Strike};
use crate::domain::options::OptionType;

/// When earnings are announced relative to market hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EarningsTiming {
    /// Before market open.
    Bmo,
    /// After market close.
    Amc,
    /// During market hours (rare).
    Dmh,
    Unknown,
}

impl EarningsTiming {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "BMO" => EarningsTiming::Bmo,
            "AMC" => EarningsTiming::Amc,
            "DMH" => EarningsTiming::Dmh,
            _ => EarningsTiming::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EarningsTiming::Bmo => "BMO",
            EarningsTiming::Amc => "AMC",
            EarningsTiming::Dmh => "DMH",
            EarningsTiming::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub ticker: String,
    pub date: NaiveDate,
    pub timing: EarningsTiming,
    pub confirmed: bool,
}

/// One historical earnings reaction. Percentages are absolute magnitudes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalMove {
    pub ticker: String,
    pub earnings_date: NaiveDate,
    pub prev_close: Money,
    pub earnings_close: Money,
    pub close_move_pct: Percentage,
    pub gap_move_pct: Percentage,
    pub intraday_move_pct: Percentage,
}

/// Which historical move series feeds the VRP mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveMetric {
    Close,
    Intraday,
    Gap,
}

impl MoveMetric {
    pub fn extract(&self, m: &HistoricalMove) -> Percentage {
        match self {
            MoveMetric::Close => m.close_move_pct,
            MoveMetric::Intraday => m.intraday_move_pct,
            MoveMetric::Gap => m.gap_move_pct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpliedMove {
    pub ticker: String,
    pub expiration: NaiveDate,
    pub stock_price: Money,
    pub atm_strike: Strike,
    pub straddle_cost: Money,
    pub implied_move_pct: Percentage,
    pub upper_bound: Money,
    pub lower_bound: Money,
    pub call_iv: Option<f64>,
    pub put_iv: Option<f64>,
    pub avg_iv: Option<f64>,
}

/// Quality rating for a VRP opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Excellent,
    Good,
    Marginal,
    Skip,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Excellent => "EXCELLENT",
            Recommendation::Good => "GOOD",
            Recommendation::Marginal => "MARGINAL",
            Recommendation::Skip => "SKIP",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrpResult {
    pub ticker: String,
    pub expiration: NaiveDate,
    pub implied_move_pct: Percentage,
    pub historical_mean_pct: f64,
    pub historical_median_pct: f64,
    pub historical_std_pct: f64,
    pub vrp_ratio: f64,
    /// MAD / median; 999.0 sentinel when the median is not positive.
    pub consistency: f64,
    pub edge_score: f64,
    pub recommendation: Recommendation,
    pub quarters_of_data: usize,
}

/// Directional bias inferred from the put-call IV skew slope.
/// Declared worst-to-best for bearish so `strength()` is the only ordering
/// that matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectionalBias {
    StrongBearish,
    Bearish,
    WeakBearish,
    Neutral,
    WeakBullish,
    Bullish,
    StrongBullish,
}

impl DirectionalBias {
    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            DirectionalBias::WeakBullish | DirectionalBias::Bullish | DirectionalBias::StrongBullish
        )
    }

    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            DirectionalBias::WeakBearish | DirectionalBias::Bearish | DirectionalBias::StrongBearish
        )
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, DirectionalBias::Neutral)
    }

    /// 0 = neutral, 1 = weak, 2 = moderate, 3 = strong.
    pub fn strength(&self) -> u8 {
        match self {
            DirectionalBias::Neutral => 0,
            DirectionalBias::WeakBullish | DirectionalBias::WeakBearish => 1,
            DirectionalBias::Bullish | DirectionalBias::Bearish => 2,
            DirectionalBias::StrongBullish | DirectionalBias::StrongBearish => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionalBias::StrongBearish => "STRONG_BEARISH",
            DirectionalBias::Bearish => "BEARISH",
            DirectionalBias::WeakBearish => "WEAK_BEARISH",
            DirectionalBias::Neutral => "NEUTRAL",
            DirectionalBias::WeakBullish => "WEAK_BULLISH",
            DirectionalBias::Bullish => "BULLISH",
            DirectionalBias::StrongBullish => "STRONG_BULLISH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewAnalysis {
    pub ticker: String,
    pub stock_price: Money,
    /// OLS slope of (put IV - call IV) against moneyness.
    pub slope_atm: f64,
    /// Fitted skew at zero moneyness (the OLS intercept).
    pub skew_atm: f64,
    pub directional_bias: DirectionalBias,
    /// R-squared of the fit, clamped to [0, 1].
    pub bias_confidence: f64,
    pub num_points: usize,
}

/// Liquidity tier, declared worst-to-best so `min` picks the worse tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiquidityTier {
    Reject,
    Warning,
    Good,
    Excellent,
}

impl LiquidityTier {
    /// The worse of two tiers.
    pub fn worse_of(a: LiquidityTier, b: LiquidityTier) -> LiquidityTier {
        a.min(b)
    }

    /// Component score fed into the composite scorer.
    pub fn score(&self) -> f64 {
        match self {
            LiquidityTier::Excellent => 100.0,
            LiquidityTier::Good => 75.0,
            LiquidityTier::Warning => 50.0,
            LiquidityTier::Reject => 20.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LiquidityTier::Excellent => "EXCELLENT",
            LiquidityTier::Good => "GOOD",
            LiquidityTier::Warning => "WARNING",
            LiquidityTier::Reject => "REJECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TailRiskLevel {
    Low,
    Normal,
    High,
}

impl TailRiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TailRiskLevel::Low => "LOW",
            TailRiskLevel::Normal => "NORMAL",
            TailRiskLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLimits {
    pub ticker: String,
    pub tail_risk_ratio: f64,
    pub tail_risk_level: TailRiskLevel,
    pub max_contracts: u32,
    pub max_notional: Money,
    pub avg_move: Percentage,
    pub max_move: Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    BullPutSpread,
    BearCallSpread,
    IronCondor,
    IronButterfly,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::BullPutSpread => "Bull Put Spread",
            StrategyType::BearCallSpread => "Bear Call Spread",
            StrategyType::IronCondor => "Iron Condor",
            StrategyType::IronButterfly => "Iron Butterfly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyLeg {
    pub side: LegSide,
    pub option_type: OptionType,
    pub strike: Strike,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub strategy_type: StrategyType,
    pub legs: Vec<StrategyLeg>,
    /// Net credit received, per spread, per contract.
    pub max_profit: Money,
    pub max_risk: Money,
    /// Probability of profit in [0, 1].
    pub pop: f64,
    pub description: String,
    pub required_liquidity_floor: LiquidityTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub direction: SentimentDirection,
    /// Raw provider score; clamp to [-1, 1] at consumption.
    pub score: f64,
    pub catalysts: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_type: String,
    pub severity: AnomalySeverity,
    pub message: String,
}

/// Final tradeability verdict after cross-signal checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalRecommendation {
    Trade,
    ReduceSize,
    DoNotTrade,
}

impl FinalRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalRecommendation::Trade => "TRADE",
            FinalRecommendation::ReduceSize => "REDUCE_SIZE",
            FinalRecommendation::DoNotTrade => "DO_NOT_TRADE",
        }
    }
}

/// Aggregate record for one ticker, assembled by the scan pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub ticker: String,
    pub earnings_date: NaiveDate,
    pub expiration: NaiveDate,
    pub implied_move: ImpliedMove,
    pub vrp: VrpResult,
    pub skew: Option<SkewAnalysis>,
    pub liquidity_tier: LiquidityTier,
    pub position_limits: Option<PositionLimits>,
    pub composite_score: f64,
    pub sentiment: Option<SentimentSnapshot>,
    pub anomalies: Vec<Anomaly>,
    pub final_recommendation: FinalRecommendation,
    pub strategies: Vec<Strategy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_worse_of_is_min() {
        use LiquidityTier::*;
        assert_eq!(LiquidityTier::worse_of(Excellent, Warning), Warning);
        assert_eq!(LiquidityTier::worse_of(Reject, Excellent), Reject);
        assert_eq!(LiquidityTier::worse_of(Good, Good), Good);
    }

    #[test]
    fn bias_predicates() {
        assert!(DirectionalBias::StrongBullish.is_bullish());
        assert!(DirectionalBias::WeakBearish.is_bearish());
        assert!(DirectionalBias::Neutral.is_neutral());
        assert!(!DirectionalBias::Neutral.is_bullish());
        assert_eq!(DirectionalBias::Neutral.strength(), 0);
        assert_eq!(DirectionalBias::WeakBullish.strength(), 1);
        assert_eq!(DirectionalBias::Bearish.strength(), 2);
        assert_eq!(DirectionalBias::StrongBearish.strength(), 3);
    }

    #[test]
    fn timing_parse_round_trip() {
        assert_eq!(EarningsTiming::parse("amc"), EarningsTiming::Amc);
        assert_eq!(EarningsTiming::parse("BMO"), EarningsTiming::Bmo);
        assert_eq!(EarningsTiming::parse("whenever"), EarningsTiming::Unknown);
    }
}
