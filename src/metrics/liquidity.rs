//! Liquidity tiering: open interest vs intended size, and quoted spread.
//!
//! The two dimensions are assessed independently; the overall tier is the
//! worse of the two.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::domain::{LiquidityTier, OptionChain, OptionQuote};
use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityConfig {
    pub spread_excellent_pct: f64,
    pub spread_good_pct: f64,
    pub spread_warning_pct: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            spread_excellent_pct: 8.0,
            spread_good_pct: 12.0,
            spread_warning_pct: 15.0,
        }
    }
}

/// Open-interest depth relative to the intended position size.
pub fn oi_tier(open_interest: u64, position_size: u32) -> LiquidityTier {
    let p = u64::from(position_size.max(1));
    if open_interest >= 5 * p {
        LiquidityTier::Excellent
    } else if open_interest >= 2 * p {
        LiquidityTier::Good
    } else if open_interest >= p {
        LiquidityTier::Warning
    } else {
        LiquidityTier::Reject
    }
}

pub fn spread_tier(config: &LiquidityConfig, spread_pct: f64) -> LiquidityTier {
    if spread_pct <= config.spread_excellent_pct {
        LiquidityTier::Excellent
    } else if spread_pct <= config.spread_good_pct {
        LiquidityTier::Good
    } else if spread_pct <= config.spread_warning_pct {
        LiquidityTier::Warning
    } else {
        LiquidityTier::Reject
    }
}

/// Combined tier for one contract. `position_size` is the intended number of
/// contracts; it is a required input, never an internal default.
pub fn classify(
    config: &LiquidityConfig,
    open_interest: u64,
    spread_pct: f64,
    position_size: u32,
) -> LiquidityTier {
    LiquidityTier::worse_of(
        oi_tier(open_interest, position_size),
        spread_tier(config, spread_pct),
    )
}

fn quote_tier(config: &LiquidityConfig, quote: &OptionQuote, position_size: u32) -> LiquidityTier {
    let spread = quote
        .spread_pct()
        .and_then(|d| d.to_f64())
        .unwrap_or(f64::MAX);
    classify(config, quote.open_interest, spread, position_size)
}

/// Tier for the ATM straddle: the worse leg governs.
pub fn assess_atm(
    config: &LiquidityConfig,
    chain: &OptionChain,
    position_size: u32,
) -> AppResult<LiquidityTier> {
    let atm = chain.atm_strike()?;
    let mut tier = LiquidityTier::Excellent;
    for quote in [chain.calls.get(&atm), chain.puts.get(&atm)].into_iter().flatten() {
        tier = LiquidityTier::worse_of(tier, quote_tier(config, quote, position_size));
    }
    Ok(tier)
}

/// Tier for an individual leg quote (used by the strategy generator's
/// per-leg floor check).
pub fn assess_quote(
    config: &LiquidityConfig,
    quote: &OptionQuote,
    position_size: u32,
) -> LiquidityTier {
    quote_tier(config, quote, position_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LiquidityConfig {
        LiquidityConfig::default()
    }

    #[test]
    fn excellent_on_both_dimensions() {
        assert_eq!(classify(&cfg(), 1000, 5.0, 100), LiquidityTier::Excellent);
    }

    #[test]
    fn good_band() {
        assert_eq!(classify(&cfg(), 300, 10.0, 100), LiquidityTier::Good);
    }

    #[test]
    fn warning_band() {
        assert_eq!(classify(&cfg(), 150, 13.0, 100), LiquidityTier::Warning);
    }

    #[test]
    fn reject_on_thin_oi() {
        assert_eq!(classify(&cfg(), 50, 5.0, 100), LiquidityTier::Reject);
    }

    #[test]
    fn reject_on_wide_spread() {
        assert_eq!(classify(&cfg(), 1000, 20.0, 100), LiquidityTier::Reject);
    }

    #[test]
    fn final_tier_is_the_worse_dimension() {
        // Excellent OI, warning spread -> WARNING.
        assert_eq!(classify(&cfg(), 1000, 13.0, 100), LiquidityTier::Warning);
        // Warning OI, excellent spread -> WARNING.
        assert_eq!(classify(&cfg(), 150, 5.0, 100), LiquidityTier::Warning);
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(spread_tier(&cfg(), 8.0), LiquidityTier::Excellent);
        assert_eq!(spread_tier(&cfg(), 12.0), LiquidityTier::Good);
        assert_eq!(spread_tier(&cfg(), 15.0), LiquidityTier::Warning);
        assert_eq!(spread_tier(&cfg(), 15.01), LiquidityTier::Reject);

        assert_eq!(oi_tier(500, 100), LiquidityTier::Excellent);
        assert_eq!(oi_tier(499, 100), LiquidityTier::Good);
        assert_eq!(oi_tier(200, 100), LiquidityTier::Good);
        assert_eq!(oi_tier(199, 100), LiquidityTier::Warning);
        assert_eq!(oi_tier(100, 100), LiquidityTier::Warning);
        assert_eq!(oi_tier(99, 100), LiquidityTier::Reject);
    }

    #[test]
    fn position_size_scales_oi_bands() {
        // Same OI reads differently for a 10-lot vs a 500-lot.
        assert_eq!(oi_tier(1000, 10), LiquidityTier::Excellent);
        assert_eq!(oi_tier(1000, 500), LiquidityTier::Good);
        assert_eq!(oi_tier(1000, 1001), LiquidityTier::Reject);
    }

    #[test]
    fn exhaustive_combination_matches_worse_of() {
        use LiquidityTier::*;
        let oi_for = |t: LiquidityTier| match t {
            Excellent => 500,
            Good => 200,
            Warning => 100,
            Reject => 10,
        };
        let spread_for = |t: LiquidityTier| match t {
            Excellent => 5.0,
            Good => 10.0,
            Warning => 14.0,
            Reject => 30.0,
        };
        for a in [Excellent, Good, Warning, Reject] {
            for b in [Excellent, Good, Warning, Reject] {
                let got = classify(&cfg(), oi_for(a), spread_for(b), 100);
                assert_eq!(got, LiquidityTier::worse_of(a, b), "{a:?} x {b:?}");
            }
        }
    }
}
