//! Cross-signal anomaly detection.
//!
//! Runs after an opportunity is assembled. Any critical anomaly, or REJECT
//! liquidity, forces DO_NOT_TRADE regardless of how good the VRP looks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Anomaly, AnomalySeverity, FinalRecommendation, LiquidityTier, Recommendation,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub stale_cache_hours: f64,
    pub min_historical_quarters: usize,
    pub extreme_vrp_threshold: f64,
    /// Earnings this close make stale chain data dangerous.
    pub earnings_proximity_days: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            stale_cache_hours: 24.0,
            min_historical_quarters: 4,
            extreme_vrp_threshold: 20.0,
            earnings_proximity_days: 7,
        }
    }
}

pub struct AnomalyInput {
    pub vrp_ratio: f64,
    pub recommendation: Recommendation,
    pub liquidity_tier: LiquidityTier,
    pub earnings_date: NaiveDate,
    pub today: NaiveDate,
    pub chain_cache_age_hours: f64,
    pub historical_quarters: usize,
}

pub fn detect(config: &AnomalyConfig, input: &AnomalyInput) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    let days_until = (input.earnings_date - input.today).num_days();
    if days_until <= config.earnings_proximity_days
        && input.chain_cache_age_hours > config.stale_cache_hours
    {
        anomalies.push(Anomaly {
            anomaly_type: "stale_data".to_string(),
            severity: AnomalySeverity::Warning,
            message: format!(
                "earnings within {} days but chain data is {:.1}h old (>{:.0}h threshold)",
                config.earnings_proximity_days,
                input.chain_cache_age_hours,
                config.stale_cache_hours
            ),
        });
    }

    if input.historical_quarters < config.min_historical_quarters {
        anomalies.push(Anomaly {
            anomaly_type: "missing_data".to_string(),
            severity: AnomalySeverity::Warning,
            message: format!(
                "only {} quarters of history (minimum: {})",
                input.historical_quarters, config.min_historical_quarters
            ),
        });
    }

    if input.vrp_ratio > config.extreme_vrp_threshold {
        anomalies.push(Anomaly {
            anomaly_type: "extreme_outlier".to_string(),
            severity: AnomalySeverity::Warning,
            message: format!(
                "VRP ratio {:.1}x exceeds extreme threshold ({:.0}x)",
                input.vrp_ratio, config.extreme_vrp_threshold
            ),
        });
    }

    if matches!(
        input.recommendation,
        Recommendation::Excellent | Recommendation::Good
    ) && input.liquidity_tier == LiquidityTier::Reject
    {
        let severity = if input.recommendation == Recommendation::Excellent {
            AnomalySeverity::Critical
        } else {
            AnomalySeverity::Warning
        };
        anomalies.push(Anomaly {
            anomaly_type: "conflicting_signals".to_string(),
            severity,
            message: format!(
                "{} VRP ({:.1}x) but REJECT liquidity - do not trade",
                input.recommendation.as_str(),
                input.vrp_ratio
            ),
        });
    }

    anomalies
}

pub fn final_recommendation(
    anomalies: &[Anomaly],
    liquidity_tier: LiquidityTier,
) -> FinalRecommendation {
    let has_critical = anomalies
        .iter()
        .any(|a| a.severity == AnomalySeverity::Critical);
    let has_warning = anomalies
        .iter()
        .any(|a| a.severity == AnomalySeverity::Warning);

    if has_critical || liquidity_tier == LiquidityTier::Reject {
        FinalRecommendation::DoNotTrade
    } else if has_warning {
        FinalRecommendation::ReduceSize
    } else {
        FinalRecommendation::Trade
    }
}
