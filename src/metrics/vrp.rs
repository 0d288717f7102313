//! Volatility Risk Premium: implied move vs the issuer's earnings history.
//!
//! VRP ratio = implied move / mean historical move. The edge score divides
//! that by (1 + MAD/median) so steady movers outrank erratic ones.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{HistoricalMove, ImpliedMove, MoveMetric, Recommendation, VrpResult};
use crate::error::{AppError, AppResult};

/// Sentinel consistency factor when the historical median is not positive;
/// drives the edge score to ~0 instead of dividing by zero.
const CONSISTENCY_GUARD: f64 = 999.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrpConfig {
    pub threshold_excellent: f64,
    pub threshold_good: f64,
    pub threshold_marginal: f64,
    pub min_quarters: usize,
    pub move_metric: MoveMetric,
}

impl Default for VrpConfig {
    fn default() -> Self {
        Self {
            threshold_excellent: 7.0,
            threshold_good: 4.0,
            threshold_marginal: 1.5,
            min_quarters: 4,
            move_metric: MoveMetric::Close,
        }
    }
}

impl VrpConfig {
    /// Lower-bar profile for conservative mode.
    pub fn conservative() -> Self {
        Self {
            threshold_excellent: 2.0,
            threshold_good: 1.5,
            threshold_marginal: 1.2,
            ..Self::default()
        }
    }

    pub fn classify(&self, vrp_ratio: f64) -> Recommendation {
        if vrp_ratio >= self.threshold_excellent {
            Recommendation::Excellent
        } else if vrp_ratio >= self.threshold_good {
            Recommendation::Good
        } else if vrp_ratio >= self.threshold_marginal {
            Recommendation::Marginal
        } else {
            Recommendation::Skip
        }
    }
}

pub fn calculate(
    config: &VrpConfig,
    implied: &ImpliedMove,
    historical: &[HistoricalMove],
) -> AppResult<VrpResult> {
    if historical.len() < config.min_quarters {
        return Err(AppError::NoData(format!(
            "{}: need {}+ quarters of history, got {}",
            implied.ticker,
            config.min_quarters,
            historical.len()
        )));
    }

    let pcts: Vec<f64> = historical
        .iter()
        .map(|m| config.move_metric.extract(m).as_f64())
        .collect();

    let mean_move = mean(&pcts);
    if !mean_move.is_finite() || mean_move <= 0.0 {
        return Err(AppError::Invalid(format!(
            "{}: invalid historical mean move {mean_move:.2}%",
            implied.ticker
        )));
    }

    let implied_pct = implied.implied_move_pct.as_f64();
    let vrp_ratio = implied_pct / mean_move;

    let median_move = median(&pcts);
    let mad = median(&pcts.iter().map(|p| (p - median_move).abs()).collect::<Vec<_>>());
    let consistency = if median_move > 0.0 {
        mad / median_move
    } else {
        CONSISTENCY_GUARD
    };
    let edge_score = vrp_ratio / (1.0 + consistency);

    let recommendation = config.classify(vrp_ratio);

    info!(
        ticker = %implied.ticker,
        vrp_ratio = format!("{vrp_ratio:.2}"),
        implied_pct = format!("{implied_pct:.2}"),
        historical_mean = format!("{mean_move:.2}"),
        recommendation = recommendation.as_str(),
        "vrp"
    );

    Ok(VrpResult {
        ticker: implied.ticker.clone(),
        expiration: implied.expiration,
        implied_move_pct: implied.implied_move_pct,
        historical_mean_pct: mean_move,
        historical_median_pct: median_move,
        historical_std_pct: std_dev(&pcts, mean_move),
        vrp_ratio,
        consistency,
        edge_score,
        recommendation,
        quarters_of_data: historical.len(),
    })
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn std_dev(xs: &[f64], mean: f64) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}
