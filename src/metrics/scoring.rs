//! Composite opportunity scoring.
//!
//! Four component scores on a 0-100 scale, weighted into one number, then a
//! sentiment modifier of at most ±15%.

use serde::{Deserialize, Serialize};

use crate::domain::{DirectionalBias, LiquidityTier, StrategyType};
use crate::error::{AppError, AppResult};
use crate::metrics::vrp::VrpConfig;

/// Sentiment can swing the composite by at most this fraction.
const SENTIMENT_MODIFIER_WEIGHT: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub vrp: f64,
    pub consistency: f64,
    pub skew: f64,
    pub liquidity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            vrp: 0.55,
            consistency: 0.15,
            skew: 0.10,
            liquidity: 0.20,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> AppResult<()> {
        for (name, w) in [
            ("vrp", self.vrp),
            ("consistency", self.consistency),
            ("skew", self.skew),
            ("liquidity", self.liquidity),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(AppError::Configuration(format!(
                    "scoring weight {name} = {w} outside [0, 1]"
                )));
            }
        }
        let total = self.vrp + self.consistency + self.skew + self.liquidity;
        if !(0.99..=1.01).contains(&total) {
            return Err(AppError::Configuration(format!(
                "scoring weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }
}

/// VRP ratio mapped onto 0-100 against the active profile's thresholds.
/// Piecewise linear: marginal -> 50, good -> 75, excellent -> 100.
pub fn vrp_score(vrp: &VrpConfig, ratio: f64) -> f64 {
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0.0;
    }
    if ratio >= vrp.threshold_excellent {
        100.0
    } else if ratio >= vrp.threshold_good {
        let span = vrp.threshold_excellent - vrp.threshold_good;
        75.0 + 25.0 * (ratio - vrp.threshold_good) / span
    } else if ratio >= vrp.threshold_marginal {
        let span = vrp.threshold_good - vrp.threshold_marginal;
        50.0 + 25.0 * (ratio - vrp.threshold_marginal) / span
    } else {
        50.0 * ratio / vrp.threshold_marginal
    }
}

/// Consistency factor (MAD/median) mapped onto 0-100; a perfectly steady
/// history scores 100, dispersion eats the score linearly.
pub fn consistency_score(consistency: f64) -> f64 {
    if !consistency.is_finite() || consistency < 0.0 {
        return 0.0;
    }
    (1.0 - consistency).clamp(0.0, 1.0) * 100.0
}

/// Directional intent of a strategy type; None for the neutral premium
/// structures.
fn strategy_intent(strategy: StrategyType) -> Option<DirectionalBias> {
    match strategy {
        StrategyType::BullPutSpread => Some(DirectionalBias::Bullish),
        StrategyType::BearCallSpread => Some(DirectionalBias::Bearish),
        StrategyType::IronCondor | StrategyType::IronButterfly => None,
    }
}

/// Skew favorability, scored against what the book actually sells.
///
/// For a neutral structure the closer the skew sits to flat, the better.
/// For a directional spread an aligned bias is the signal working for us,
/// so it raises the score with its strength; an opposed bias is a headwind.
/// Unknown skew sits in the middle either way.
pub fn skew_score(bias: Option<DirectionalBias>, primary_strategy: Option<StrategyType>) -> f64 {
    let Some(bias) = bias else {
        return 50.0;
    };
    match primary_strategy.and_then(strategy_intent) {
        Some(intent) => {
            let aligned = (intent.is_bullish() && bias.is_bullish())
                || (intent.is_bearish() && bias.is_bearish());
            if aligned {
                match bias.strength() {
                    1 => 75.0,
                    2 => 90.0,
                    _ => 100.0,
                }
            } else if bias.is_neutral() {
                50.0
            } else {
                25.0
            }
        }
        None => match bias.strength() {
            0 => 100.0,
            1 => 75.0,
            2 => 50.0,
            _ => 25.0,
        },
    }
}

pub fn composite(
    weights: &ScoringWeights,
    vrp: &VrpConfig,
    vrp_ratio: f64,
    consistency: f64,
    bias: Option<DirectionalBias>,
    primary_strategy: Option<StrategyType>,
    liquidity: LiquidityTier,
) -> f64 {
    weights.vrp * vrp_score(vrp, vrp_ratio)
        + weights.consistency * consistency_score(consistency)
        + weights.skew * skew_score(bias, primary_strategy)
        + weights.liquidity * liquidity.score()
}

/// Apply the sentiment modifier. Provider scores occasionally run hot;
/// clamp at consumption rather than rejecting.
pub fn apply_sentiment_modifier(score: f64, sentiment_score: f64) -> f64 {
    let clamped = sentiment_score.clamp(-1.0, 1.0);
    score * (1.0 + SENTIMENT_MODIFIER_WEIGHT * clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_validate() {
        ScoringWeights::default().validate().unwrap();
    }

    #[test]
    fn bad_weights_rejected() {
        let w = ScoringWeights {
            vrp: 0.9,
            consistency: 0.9,
            skew: 0.1,
            liquidity: 0.1,
        };
        assert!(matches!(w.validate(), Err(AppError::Configuration(_))));

        let w = ScoringWeights {
            vrp: -0.1,
            consistency: 0.5,
            skew: 0.3,
            liquidity: 0.3,
        };
        assert!(matches!(w.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn vrp_score_hits_anchor_points() {
        let cfg = VrpConfig::default(); // 7.0 / 4.0 / 1.5
        assert_eq!(vrp_score(&cfg, 7.0), 100.0);
        assert_eq!(vrp_score(&cfg, 9.0), 100.0);
        assert_eq!(vrp_score(&cfg, 4.0), 75.0);
        assert_eq!(vrp_score(&cfg, 1.5), 50.0);
        assert_eq!(vrp_score(&cfg, 0.75), 25.0);
        assert_eq!(vrp_score(&cfg, 0.0), 0.0);
        // Midpoint of the good band.
        assert!((vrp_score(&cfg, 5.5) - 87.5).abs() < 1e-9);
    }

    #[test]
    fn vrp_score_is_monotonic() {
        let cfg = VrpConfig::default();
        let mut last = -1.0;
        for r in (0..200).map(|i| i as f64 * 0.05) {
            let s = vrp_score(&cfg, r);
            assert!(s >= last, "score dropped at ratio {r}");
            last = s;
        }
    }

    #[test]
    fn consistency_score_range() {
        assert_eq!(consistency_score(0.0), 100.0);
        assert_eq!(consistency_score(0.25), 75.0);
        assert_eq!(consistency_score(1.5), 0.0);
        assert_eq!(consistency_score(999.0), 0.0);
    }

    #[test]
    fn skew_prefers_neutral_for_neutral_books() {
        let condor = Some(StrategyType::IronCondor);
        assert_eq!(skew_score(Some(DirectionalBias::Neutral), condor), 100.0);
        assert_eq!(skew_score(Some(DirectionalBias::WeakBullish), condor), 75.0);
        assert_eq!(skew_score(Some(DirectionalBias::Bearish), condor), 50.0);
        assert_eq!(skew_score(Some(DirectionalBias::StrongBullish), condor), 25.0);
        assert_eq!(skew_score(None, condor), 50.0);
        // No strategy emitted: same closeness-to-neutral reading.
        assert_eq!(skew_score(Some(DirectionalBias::Neutral), None), 100.0);
        assert_eq!(skew_score(Some(DirectionalBias::StrongBearish), None), 25.0);
    }

    #[test]
    fn aligned_bias_raises_directional_score_with_strength() {
        let bull_put = Some(StrategyType::BullPutSpread);
        assert_eq!(skew_score(Some(DirectionalBias::WeakBullish), bull_put), 75.0);
        assert_eq!(skew_score(Some(DirectionalBias::Bullish), bull_put), 90.0);
        assert_eq!(skew_score(Some(DirectionalBias::StrongBullish), bull_put), 100.0);

        let bear_call = Some(StrategyType::BearCallSpread);
        assert_eq!(skew_score(Some(DirectionalBias::WeakBearish), bear_call), 75.0);
        assert_eq!(skew_score(Some(DirectionalBias::StrongBearish), bear_call), 100.0);
    }

    #[test]
    fn opposed_bias_penalizes_directional_score() {
        let bull_put = Some(StrategyType::BullPutSpread);
        assert_eq!(skew_score(Some(DirectionalBias::Bearish), bull_put), 25.0);
        assert_eq!(skew_score(Some(DirectionalBias::StrongBearish), bull_put), 25.0);
        assert_eq!(skew_score(Some(DirectionalBias::Neutral), bull_put), 50.0);
        assert_eq!(skew_score(None, bull_put), 50.0);
    }

    #[test]
    fn reject_liquidity_penalizes_composite() {
        let w = ScoringWeights::default();
        let cfg = VrpConfig::default();
        let condor = Some(StrategyType::IronCondor);
        let strong = composite(
            &w,
            &cfg,
            7.5,
            0.2,
            Some(DirectionalBias::Neutral),
            condor,
            LiquidityTier::Excellent,
        );
        let weak = composite(
            &w,
            &cfg,
            7.5,
            0.2,
            Some(DirectionalBias::Neutral),
            condor,
            LiquidityTier::Reject,
        );
        assert!(weak < strong);
        assert!((strong - weak - 0.20 * 80.0).abs() < 1e-9);
    }

    #[test]
    fn alignment_flows_through_the_composite() {
        let w = ScoringWeights::default();
        let cfg = VrpConfig::default();
        // Same strong bullish skew: scored against the aligned spread it
        // helps, against a neutral condor it hurts.
        let directional = composite(
            &w,
            &cfg,
            5.0,
            0.2,
            Some(DirectionalBias::StrongBullish),
            Some(StrategyType::BullPutSpread),
            LiquidityTier::Good,
        );
        let neutral_book = composite(
            &w,
            &cfg,
            5.0,
            0.2,
            Some(DirectionalBias::StrongBullish),
            Some(StrategyType::IronCondor),
            LiquidityTier::Good,
        );
        assert!(directional > neutral_book);
        assert!((directional - neutral_book - 0.10 * 75.0).abs() < 1e-9);
    }

    #[test]
    fn sentiment_modifier_arithmetic() {
        assert!((apply_sentiment_modifier(80.0, 0.8) - 89.6).abs() < 1e-9);
        assert!((apply_sentiment_modifier(80.0, -0.8) - 70.4).abs() < 1e-9);
        assert_eq!(apply_sentiment_modifier(80.0, 0.0), 80.0);
        // Out-of-range provider scores clamp instead of erroring.
        assert!((apply_sentiment_modifier(80.0, 3.0) - 92.0).abs() < 1e-9);
        assert!((apply_sentiment_modifier(80.0, -9.0) - 68.0).abs() < 1e-9);
    }
}
