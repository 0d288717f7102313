//! Option quote and chain model.
//!
//! Chains key quotes by [`Strike`] in `BTreeMap`s so iteration is always in
//! ascending strike order; ATM discovery and tie-breaking depend on that.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::money::{Money, Strike};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }
}

/// Spread wider than this fraction of mid is treated as untradeable.
const MAX_LIQUID_SPREAD_PCT: Decimal = dec!(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: Strike,
    pub option_type: OptionType,
    pub bid: Money,
    pub ask: Money,
    /// Annualized IV as a fraction (0.30 = 30%), when the feed provides it.
    pub implied_volatility: Option<f64>,
    pub open_interest: u64,
    pub volume: u64,
    pub delta: Option<f64>,
}

impl OptionQuote {
    pub fn mid(&self) -> Money {
        (self.bid + self.ask) / dec!(2)
    }

    /// Quoted spread as a percentage of mid. None when the mid is not positive.
    pub fn spread_pct(&self) -> Option<Decimal> {
        let mid = self.mid();
        if !mid.is_positive() {
            return None;
        }
        Some((self.ask - self.bid).amount() / mid.amount() * dec!(100))
    }

    /// Minimal tradeability gate used before any signal math runs.
    pub fn is_liquid(&self) -> bool {
        if !self.bid.is_positive() || !self.mid().is_positive() {
            return false;
        }
        if self.open_interest == 0 {
            return false;
        }
        match self.spread_pct() {
            Some(spread) => spread <= MAX_LIQUID_SPREAD_PCT,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub ticker: String,
    pub expiration: NaiveDate,
    pub stock_price: Money,
    pub calls: BTreeMap<Strike, OptionQuote>,
    pub puts: BTreeMap<Strike, OptionQuote>,
}

impl OptionChain {
    /// Strike nearest the spot, considering only strikes quoted on both sides
    /// with a positive mid. Ties break to the lowest strike (ascending
    /// iteration plus strict `<` keeps the first candidate).
    pub fn atm_strike(&self) -> AppResult<Strike> {
        let mut best: Option<(Strike, Decimal)> = None;
        for (strike, call) in &self.calls {
            let Some(put) = self.puts.get(strike) else {
                continue;
            };
            if !call.mid().is_positive() || !put.mid().is_positive() {
                continue;
            }
            let dist = strike.distance_to(self.stock_price);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((*strike, dist)),
            }
        }
        best.map(|(k, _)| k).ok_or_else(|| {
            AppError::NoData(format!(
                "{}: no strike quoted on both sides of the {} chain",
                self.ticker, self.expiration
            ))
        })
    }

    /// Closest strike to `target` on one side of the chain.
    pub fn nearest_strike(&self, option_type: OptionType, target: Decimal) -> Option<Strike> {
        let side = match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        };
        side.keys()
            .min_by_key(|k| (k.price() - target).abs())
            .copied()
    }

    /// Next strike strictly below `strike` on the given side.
    pub fn strike_below(&self, option_type: OptionType, strike: Strike) -> Option<Strike> {
        let side = match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        };
        side.range(..strike).next_back().map(|(k, _)| *k)
    }

    /// Next strike strictly above `strike` on the given side.
    pub fn strike_above(&self, option_type: OptionType, strike: Strike) -> Option<Strike> {
        use std::ops::Bound::{Excluded, Unbounded};
        let side = match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        };
        side.range((Excluded(strike), Unbounded)).next().map(|(k, _)| *k)
    }

    pub fn quote(&self, option_type: OptionType, strike: Strike) -> Option<&OptionQuote> {
        match option_type {
            OptionType::Call => self.calls.get(&strike),
            OptionType::Put => self.puts.get(&strike),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{chain, quote};
    use super::*;

    #[test]
    fn mid_and_spread() {
        let q = quote(100.0, OptionType::Call, 3.10, 3.10);
        assert_eq!(q.mid(), Money::from_f64(3.10).unwrap());

        let q = quote(100.0, OptionType::Call, 1.00, 1.20);
        let spread = q.spread_pct().unwrap();
        assert!((spread - dec!(18.181818)).abs() < dec!(0.001), "spread = {spread}");
    }

    #[test]
    fn spread_undefined_for_zero_mid() {
        let q = quote(100.0, OptionType::Call, 0.0, 0.0);
        assert!(q.spread_pct().is_none());
        assert!(!q.is_liquid());
    }

    #[test]
    fn atm_minimizes_distance() {
        let c = chain("NVDA", 101.4, &[95.0, 100.0, 105.0, 110.0]);
        assert_eq!(c.atm_strike().unwrap(), Strike::from_f64(100.0).unwrap());
    }

    #[test]
    fn atm_tie_breaks_to_lowest_strike() {
        // Spot exactly between 100 and 110.
        let c = chain("NVDA", 105.0, &[100.0, 110.0]);
        assert_eq!(c.atm_strike().unwrap(), Strike::from_f64(100.0).unwrap());
    }

    #[test]
    fn atm_requires_both_sides() {
        let mut c = chain("NVDA", 100.0, &[100.0]);
        c.puts.clear();
        assert!(matches!(c.atm_strike(), Err(AppError::NoData(_))));
    }

    #[test]
    fn atm_empty_chain_is_nodata() {
        let c = chain("NVDA", 100.0, &[]);
        assert!(matches!(c.atm_strike(), Err(AppError::NoData(_))));
    }

    #[test]
    fn strike_navigation() {
        let c = chain("NVDA", 100.0, &[90.0, 95.0, 100.0, 105.0, 110.0]);
        let k100 = Strike::from_f64(100.0).unwrap();
        assert_eq!(
            c.strike_below(OptionType::Put, k100),
            Some(Strike::from_f64(95.0).unwrap())
        );
        assert_eq!(
            c.strike_above(OptionType::Call, k100),
            Some(Strike::from_f64(105.0).unwrap())
        );
        assert_eq!(
            c.nearest_strike(OptionType::Call, dec!(103)),
            Some(Strike::from_f64(105.0).unwrap())
        );
    }
}
