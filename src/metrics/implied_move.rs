//! Implied move from the ATM straddle.
//!
//! The straddle cost as a fraction of spot is the market's one-sigma
//! expectation for the move over the option's life.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::domain::{ImpliedMove, OptionChain, Percentage};
use crate::error::{AppError, AppResult};

/// Straddle cost outside this band (as % of spot) is suspicious data, not an
/// error: earnings trades typically price between these.
const MIN_REASONABLE_PCT: Decimal = dec!(0.5);
const MAX_REASONABLE_PCT: Decimal = dec!(30);

pub fn calculate(chain: &OptionChain, today: NaiveDate) -> AppResult<ImpliedMove> {
    if chain.expiration < today {
        return Err(AppError::Invalid(format!(
            "{}: expiration {} is in the past (today: {})",
            chain.ticker, chain.expiration, today
        )));
    }

    let atm = chain.atm_strike()?;

    let call = chain.calls.get(&atm).ok_or_else(|| {
        AppError::NoData(format!("{}: ATM strike {atm} missing from calls", chain.ticker))
    })?;
    let put = chain.puts.get(&atm).ok_or_else(|| {
        AppError::NoData(format!("{}: ATM strike {atm} missing from puts", chain.ticker))
    })?;

    if !call.is_liquid() || !put.is_liquid() {
        return Err(AppError::Invalid(format!(
            "{}: illiquid options at strike {atm}",
            chain.ticker
        )));
    }

    let straddle_cost = call.mid() + put.mid();

    if !chain.stock_price.is_positive() {
        return Err(AppError::Invalid(format!(
            "{}: stock price {} is not positive",
            chain.ticker, chain.stock_price
        )));
    }

    let pct = straddle_cost.amount() / chain.stock_price.amount() * dec!(100);
    if pct < MIN_REASONABLE_PCT {
        warn!(ticker = %chain.ticker, implied_move_pct = %pct, "straddle unusually cheap, validate data");
    } else if pct > MAX_REASONABLE_PCT {
        warn!(ticker = %chain.ticker, implied_move_pct = %pct, "straddle unusually expensive, validate data");
    }
    let implied_move_pct = Percentage::new(pct)?;

    let upper_bound = chain.stock_price + straddle_cost;
    let lower_bound = chain.stock_price - straddle_cost;
    if !lower_bound.is_positive() {
        // Can happen for very volatile names; worth flagging, not rejecting.
        warn!(ticker = %chain.ticker, lower_bound = %lower_bound, "implied lower bound not positive");
    }

    let call_iv = call.implied_volatility;
    let put_iv = put.implied_volatility;
    let avg_iv = match (call_iv, put_iv) {
        (Some(c), Some(p)) => Some((c + p) / 2.0),
        _ => None,
    };

    info!(
        ticker = %chain.ticker,
        implied_move_pct = %implied_move_pct,
        straddle = %straddle_cost,
        "implied move"
    );

    Ok(ImpliedMove {
        ticker: chain.ticker.clone(),
        expiration: chain.expiration,
        stock_price: chain.stock_price,
        atm_strike: atm,
        straddle_cost,
        implied_move_pct,
        upper_bound,
        lower_bound,
        call_iv,
        put_iv,
        avg_iv,
    })
}
