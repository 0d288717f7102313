//! Tail-risk sizing caps.
//!
//! TRR = max historical move / mean historical move. Names whose worst
//! quarter dwarfs their average get half the normal position budget.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{HistoricalMove, Money, MoveMetric, Percentage, PositionLimits, TailRiskLevel};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailRiskConfig {
    pub high_threshold: f64,
    pub normal_threshold: f64,
    pub normal_max_contracts: u32,
    pub normal_max_notional: f64,
    pub high_max_contracts: u32,
    pub high_max_notional: f64,
}

impl Default for TailRiskConfig {
    fn default() -> Self {
        Self {
            high_threshold: 2.5,
            normal_threshold: 1.5,
            normal_max_contracts: 100,
            normal_max_notional: 50_000.0,
            high_max_contracts: 50,
            high_max_notional: 25_000.0,
        }
    }
}

pub fn calculate(
    config: &TailRiskConfig,
    ticker: &str,
    moves: &[HistoricalMove],
    metric: MoveMetric,
) -> AppResult<PositionLimits> {
    if moves.is_empty() {
        return Err(AppError::NoData(format!("{ticker}: no history for tail risk")));
    }

    let pcts: Vec<f64> = moves.iter().map(|m| metric.extract(m).as_f64().abs()).collect();
    let mean = pcts.iter().sum::<f64>() / pcts.len() as f64;
    let max = pcts.iter().cloned().fold(0.0_f64, f64::max);

    if !mean.is_finite() || mean <= 0.0 {
        return Err(AppError::Invalid(format!(
            "{ticker}: mean |move| {mean:.2}% unusable for tail risk"
        )));
    }

    let ratio = max / mean;
    let level = if ratio > config.high_threshold {
        TailRiskLevel::High
    } else if ratio >= config.normal_threshold {
        TailRiskLevel::Normal
    } else {
        TailRiskLevel::Low
    };

    let (max_contracts, max_notional) = match level {
        TailRiskLevel::High => (config.high_max_contracts, config.high_max_notional),
        _ => (config.normal_max_contracts, config.normal_max_notional),
    };

    debug!(ticker, trr = format!("{ratio:.2}"), level = level.as_str(), "tail risk");

    Ok(PositionLimits {
        ticker: ticker.to_string(),
        tail_risk_ratio: ratio,
        tail_risk_level: level,
        max_contracts,
        max_notional: Money::new(Decimal::from_f64(max_notional).unwrap_or_default()),
        avg_move: Percentage::from_f64(mean)?,
        max_move: Percentage::from_f64(max)?,
    })
}
