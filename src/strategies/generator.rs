//! Defined-risk credit strategy construction.
//!
//! Short strikes start at the implied-move bounds and slide per the skew
//! bias: a bullish book sells puts further away and calls closer in, and the
//! reverse for bearish. Long strikes sit one listed strike wider.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::domain::{
    DirectionalBias, ImpliedMove, LegSide, LiquidityTier, OptionChain, OptionQuote, OptionType,
    PositionLimits, Recommendation, Strategy, StrategyLeg, StrategyType, Strike,
};
use crate::metrics::liquidity::{self, LiquidityConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Baseline short-leg delta target.
    pub base_short_delta: f64,
    /// Per-leg liquidity floor; legs below it drop the candidate.
    pub liquidity_floor: LiquidityTier,
    /// Contracts assumed when no position limits are available.
    pub default_max_contracts: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_short_delta: 0.25,
            liquidity_floor: LiquidityTier::Reject,
            default_max_contracts: 10,
        }
    }
}

/// Delta-shift per bias strength: weak 2, moderate 5, strong 10 points.
fn bias_adjustment(bias: DirectionalBias) -> f64 {
    match bias.strength() {
        0 => 0.0,
        1 => 0.02,
        2 => 0.05,
        _ => 0.10,
    }
}

/// Short-leg delta target for one side of the book under a bias.
/// Bullish shifts the put side safer (lower delta) and the call side
/// riskier; bearish mirrors. Clamped to [0.10, 0.40].
fn short_delta_target(base: f64, option_type: OptionType, bias: DirectionalBias) -> f64 {
    let a = bias_adjustment(bias);
    let shifted = match option_type {
        OptionType::Put => {
            if bias.is_bullish() {
                base - a
            } else if bias.is_bearish() {
                base + a
            } else {
                base
            }
        }
        OptionType::Call => {
            if bias.is_bearish() {
                base - a
            } else if bias.is_bullish() {
                base + a
            } else {
                base
            }
        }
    };
    shifted.clamp(0.10, 0.40)
}

pub struct GeneratorInput<'a> {
    pub chain: &'a OptionChain,
    pub implied: &'a ImpliedMove,
    pub recommendation: Recommendation,
    pub bias: Option<DirectionalBias>,
    pub limits: Option<&'a PositionLimits>,
}

pub fn generate(
    config: &StrategyConfig,
    liq_config: &LiquidityConfig,
    input: &GeneratorInput<'_>,
) -> Vec<Strategy> {
    if input.recommendation == Recommendation::Skip {
        return Vec::new();
    }
    let quantity = position_quantity(config, input);
    if quantity == 0 {
        debug!(ticker = %input.chain.ticker, "notional cap below one contract, no strategies");
        return Vec::new();
    }

    let bias = input.bias.unwrap_or(DirectionalBias::Neutral);
    let good_or_better = matches!(
        input.recommendation,
        Recommendation::Excellent | Recommendation::Good
    );

    let mut out = Vec::new();

    // Neutral-ish books sell both wings.
    if bias.strength() <= 1 {
        if good_or_better {
            if let Some(s) = iron_condor(config, liq_config, input, bias, quantity) {
                out.push(s);
            }
            if bias.is_neutral() {
                if let Some(s) = iron_butterfly(config, liq_config, input, quantity) {
                    out.push(s);
                }
            }
        } else if let Some(s) = iron_condor(config, liq_config, input, bias, quantity) {
            out.push(s);
        }
    }

    if bias.is_bullish() {
        if let Some(s) = vertical(config, liq_config, input, bias, OptionType::Put, quantity) {
            out.push(s);
        }
    } else if bias.is_bearish() {
        if let Some(s) = vertical(config, liq_config, input, bias, OptionType::Call, quantity) {
            out.push(s);
        }
    }

    out.sort_by(|a, b| {
        b.pop
            .partial_cmp(&a.pop)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

fn position_quantity(config: &StrategyConfig, input: &GeneratorInput<'_>) -> u32 {
    let Some(limits) = input.limits else {
        return config.default_max_contracts;
    };
    let spot = input.chain.stock_price.amount();
    let contract_notional = spot * Decimal::from(100u32);
    if contract_notional <= Decimal::ZERO {
        return 0;
    }
    let by_notional = (limits.max_notional.amount() / contract_notional)
        .floor()
        .to_u32()
        .unwrap_or(0);
    limits.max_contracts.min(by_notional)
}

/// Pick the short strike on one side: by quoted delta when the chain carries
/// greeks, else by distance scaled from the implied move.
fn select_short_strike(
    chain: &OptionChain,
    option_type: OptionType,
    target_delta: f64,
    implied_dollars: Decimal,
) -> Option<Strike> {
    let spot = chain.stock_price.amount();
    let side = match option_type {
        OptionType::Call => &chain.calls,
        OptionType::Put => &chain.puts,
    };

    let has_deltas = side.values().any(|q| q.delta.is_some());
    if has_deltas {
        let candidates = side.values().filter(|q| match option_type {
            OptionType::Put => q.strike.price() < spot,
            OptionType::Call => q.strike.price() > spot,
        });
        return candidates
            .filter_map(|q| q.delta.map(|d| (q.strike, (d.abs() - target_delta).abs())))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| k);
    }

    // No greeks: scale the implied-move distance by the delta shift so a
    // safer target lands further out.
    let scale = Decimal::from_f64(0.25 / target_delta.max(0.10)).unwrap_or(Decimal::ONE);
    let distance = implied_dollars * scale;
    let target_price = match option_type {
        OptionType::Put => spot - distance,
        OptionType::Call => spot + distance,
    };
    let strike = chain.nearest_strike(option_type, target_price)?;
    // Keep the short leg out of the money.
    match option_type {
        OptionType::Put if strike.price() >= spot => chain.strike_below(option_type, strike),
        OptionType::Call if strike.price() <= spot => chain.strike_above(option_type, strike),
        _ => Some(strike),
    }
}

struct VerticalLegs<'a> {
    short: &'a OptionQuote,
    long: &'a OptionQuote,
    credit: Decimal,
    width: Decimal,
}

fn build_vertical<'a>(
    chain: &'a OptionChain,
    option_type: OptionType,
    short_strike: Strike,
) -> Option<VerticalLegs<'a>> {
    let long_strike = match option_type {
        OptionType::Put => chain.strike_below(option_type, short_strike)?,
        OptionType::Call => chain.strike_above(option_type, short_strike)?,
    };
    let short = chain.quote(option_type, short_strike)?;
    let long = chain.quote(option_type, long_strike)?;
    let credit = short.mid().amount() - long.mid().amount();
    if credit <= Decimal::ZERO {
        return None;
    }
    let width = (short_strike.price() - long_strike.price()).abs();
    if width <= Decimal::ZERO || credit >= width {
        return None;
    }
    Some(VerticalLegs {
        short,
        long,
        credit,
        width,
    })
}

fn legs_pass_floor(
    config: &StrategyConfig,
    liq_config: &LiquidityConfig,
    quantity: u32,
    quotes: &[&OptionQuote],
) -> bool {
    quotes
        .iter()
        .all(|q| liquidity::assess_quote(liq_config, q, quantity) >= config.liquidity_floor)
}

/// Probability the spot finishes beyond `strike`-side safety, from the short
/// delta when present, else a Normal model with the implied move as 1 sigma.
fn side_pop(short: &OptionQuote, spot: Decimal, implied_dollars: Decimal) -> f64 {
    if let Some(delta) = short.delta {
        return (1.0 - delta.abs()).clamp(0.0, 1.0);
    }
    let sigma = implied_dollars.to_f64().unwrap_or(f64::NAN);
    if !(sigma > 0.0) {
        return 0.5;
    }
    let distance = (short.strike.price() - spot).abs().to_f64().unwrap_or(0.0);
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    normal.cdf(distance / sigma)
}

fn vertical(
    config: &StrategyConfig,
    liq_config: &LiquidityConfig,
    input: &GeneratorInput<'_>,
    bias: DirectionalBias,
    option_type: OptionType,
    quantity: u32,
) -> Option<Strategy> {
    let chain = input.chain;
    let implied_dollars = input.implied.straddle_cost.amount();
    let target = short_delta_target(config.base_short_delta, option_type, bias);
    let short_strike = select_short_strike(chain, option_type, target, implied_dollars)?;
    let legs = build_vertical(chain, option_type, short_strike)?;

    if !legs_pass_floor(config, liq_config, quantity, &[legs.short, legs.long]) {
        return None;
    }

    let pop = side_pop(legs.short, chain.stock_price.amount(), implied_dollars);
    let (strategy_type, label) = match option_type {
        OptionType::Put => (StrategyType::BullPutSpread, "P"),
        OptionType::Call => (StrategyType::BearCallSpread, "C"),
    };

    Some(Strategy {
        strategy_type,
        legs: vec![
            StrategyLeg {
                side: LegSide::Sell,
                option_type,
                strike: legs.short.strike,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Buy,
                option_type,
                strike: legs.long.strike,
                quantity,
            },
        ],
        max_profit: crate::domain::Money::new(legs.credit),
        max_risk: crate::domain::Money::new(legs.width - legs.credit),
        pop,
        description: format!(
            "Sell {}{label} / Buy {}{label} for {:.2} credit ({:.0}% POP)",
            legs.short.strike,
            legs.long.strike,
            legs.credit,
            pop * 100.0
        ),
        required_liquidity_floor: config.liquidity_floor,
    })
}

fn iron_condor(
    config: &StrategyConfig,
    liq_config: &LiquidityConfig,
    input: &GeneratorInput<'_>,
    bias: DirectionalBias,
    quantity: u32,
) -> Option<Strategy> {
    let chain = input.chain;
    let implied_dollars = input.implied.straddle_cost.amount();
    let spot = chain.stock_price.amount();

    let put_target = short_delta_target(config.base_short_delta, OptionType::Put, bias);
    let call_target = short_delta_target(config.base_short_delta, OptionType::Call, bias);

    let short_put = select_short_strike(chain, OptionType::Put, put_target, implied_dollars)?;
    let short_call = select_short_strike(chain, OptionType::Call, call_target, implied_dollars)?;
    if short_put >= short_call {
        return None;
    }

    let put_side = build_vertical(chain, OptionType::Put, short_put)?;
    let call_side = build_vertical(chain, OptionType::Call, short_call)?;

    let all_legs = [put_side.short, put_side.long, call_side.short, call_side.long];
    if !legs_pass_floor(config, liq_config, quantity, &all_legs) {
        return None;
    }

    let credit = put_side.credit + call_side.credit;
    let width = put_side.width.max(call_side.width);
    if credit >= width {
        return None;
    }

    let pop = (side_pop(put_side.short, spot, implied_dollars)
        + side_pop(call_side.short, spot, implied_dollars)
        - 1.0)
        .clamp(0.0, 1.0);

    Some(Strategy {
        strategy_type: StrategyType::IronCondor,
        legs: vec![
            StrategyLeg {
                side: LegSide::Buy,
                option_type: OptionType::Put,
                strike: put_side.long.strike,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Sell,
                option_type: OptionType::Put,
                strike: short_put,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Sell,
                option_type: OptionType::Call,
                strike: short_call,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Buy,
                option_type: OptionType::Call,
                strike: call_side.long.strike,
                quantity,
            },
        ],
        max_profit: crate::domain::Money::new(credit),
        max_risk: crate::domain::Money::new(width - credit),
        pop,
        description: format!(
            "Iron condor {}/{} x {}/{} for {:.2} credit",
            put_side.long.strike, short_put, short_call, call_side.long.strike, credit
        ),
        required_liquidity_floor: config.liquidity_floor,
    })
}

fn iron_butterfly(
    config: &StrategyConfig,
    liq_config: &LiquidityConfig,
    input: &GeneratorInput<'_>,
    quantity: u32,
) -> Option<Strategy> {
    let chain = input.chain;
    let implied_dollars = input.implied.straddle_cost.amount();
    let spot = chain.stock_price.amount();
    let atm = chain.atm_strike().ok()?;

    let short_put = chain.puts.get(&atm)?;
    let short_call = chain.calls.get(&atm)?;

    // Wings roughly one implied move out.
    let long_put_strike =
        chain.nearest_strike(OptionType::Put, atm.price() - implied_dollars)?;
    let long_call_strike =
        chain.nearest_strike(OptionType::Call, atm.price() + implied_dollars)?;
    if long_put_strike >= atm || long_call_strike <= atm {
        return None;
    }
    let long_put = chain.puts.get(&long_put_strike)?;
    let long_call = chain.calls.get(&long_call_strike)?;

    let all_legs = [short_put, short_call, long_put, long_call];
    if !legs_pass_floor(config, liq_config, quantity, &all_legs) {
        return None;
    }

    let credit = short_put.mid().amount() + short_call.mid().amount()
        - long_put.mid().amount()
        - long_call.mid().amount();
    if credit <= Decimal::ZERO {
        return None;
    }
    let width = (atm.price() - long_put_strike.price())
        .abs()
        .max((long_call_strike.price() - atm.price()).abs());
    if credit >= width {
        return None;
    }

    // Breakevens sit at ATM +/- credit; profit needs the spot inside them.
    let sigma = implied_dollars.to_f64().unwrap_or(f64::NAN);
    let pop = if sigma > 0.0 {
        let z = credit.to_f64().unwrap_or(0.0) / sigma;
        let normal = Normal::new(0.0, 1.0).expect("unit normal");
        (2.0 * normal.cdf(z) - 1.0).clamp(0.0, 1.0)
    } else {
        0.5
    };

    Some(Strategy {
        strategy_type: StrategyType::IronButterfly,
        legs: vec![
            StrategyLeg {
                side: LegSide::Buy,
                option_type: OptionType::Put,
                strike: long_put_strike,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Sell,
                option_type: OptionType::Put,
                strike: atm,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Sell,
                option_type: OptionType::Call,
                strike: atm,
                quantity,
            },
            StrategyLeg {
                side: LegSide::Buy,
                option_type: OptionType::Call,
                strike: long_call_strike,
                quantity,
            },
        ],
        max_profit: crate::domain::Money::new(credit),
        max_risk: crate::domain::Money::new(width - credit),
        pop,
        description: format!(
            "Iron butterfly {} body, wings {}/{}, {:.2} credit",
            atm, long_put_strike, long_call_strike, credit
        ),
        required_liquidity_floor: config.liquidity_floor,
    })
}
