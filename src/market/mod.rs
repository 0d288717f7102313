//! Market-calendar rules parameterised on the NYSE zone.

pub mod hours;

pub use hours::{
    at_et, get_last_trading_day, is_half_day, is_trading_day, market_state, now_et, today_et,
    MarketState, MARKET_TZ,
};
