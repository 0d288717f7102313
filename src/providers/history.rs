//! Historical earnings-day moves.
//!
//! Composes two capabilities: past report dates (Alpha Vantage) and daily
//! bars (Yahoo). Computed moves are appended to the store so subsequent
//! scans read locally; the weekly backfill job uses the same path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::{HistoricalMove, Money, Percentage};
use crate::error::{AppError, AppResult};
use crate::infra::retry_db_once;
use crate::providers::yahoo::{DailyBar, YahooClient};
use crate::providers::{AlphaVantageClient, MarketDataProvider};
use crate::storage::Store;

/// Reaction-day percentages for one report date, all absolute magnitudes.
/// The reaction day is the first session strictly after the report date
/// (AMC reports move the next day; BMO reports gap the same day, which the
/// calendar records as the prior evening's date in practice).
pub fn compute_move(
    ticker: &str,
    bars: &[DailyBar],
    earnings_date: NaiveDate,
) -> Option<HistoricalMove> {
    let reaction_idx = bars.iter().position(|b| b.date > earnings_date)?;
    if reaction_idx == 0 {
        return None;
    }
    let prev = &bars[reaction_idx - 1];
    let reaction = &bars[reaction_idx];
    if prev.close <= 0.0 {
        return None;
    }

    let close_move = ((reaction.close - prev.close) / prev.close * 100.0).abs();
    let gap_move = ((reaction.open - prev.close) / prev.close * 100.0).abs();
    let intraday_move = ((reaction.high - reaction.low) / prev.close * 100.0).abs();

    Some(HistoricalMove {
        ticker: ticker.to_string(),
        earnings_date,
        prev_close: Money::from_f64(prev.close).ok()?,
        earnings_close: Money::from_f64(reaction.close).ok()?,
        close_move_pct: Percentage::from_f64(close_move).ok()?,
        gap_move_pct: Percentage::from_f64(gap_move).ok()?,
        intraday_move_pct: Percentage::from_f64(intraday_move).ok()?,
    })
}

pub struct HistoryService {
    yahoo: Arc<YahooClient>,
    alphavantage: Arc<AlphaVantageClient>,
    store: Arc<Store>,
}

impl HistoryService {
    pub fn new(
        yahoo: Arc<YahooClient>,
        alphavantage: Arc<AlphaVantageClient>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            yahoo,
            alphavantage,
            store,
        }
    }

    /// Fetch report dates and bars, compute moves, persist what is new.
    pub async fn backfill(&self, ticker: &str, limit: usize) -> AppResult<Vec<HistoricalMove>> {
        let dates = self.alphavantage.past_earnings_dates(ticker).await?;
        let bars = self.yahoo.daily_bars(ticker, "5y").await?;

        let mut moves = Vec::new();
        for date in dates.into_iter().take(limit) {
            match compute_move(ticker, &bars, date) {
                Some(m) => {
                    let write =
                        retry_db_once("moves_insert", || self.store.insert_historical_move(&m));
                    if let Err(e) = write {
                        warn!(ticker, error = %e, "failed to persist historical move");
                    }
                    moves.push(m);
                }
                None => debug!(ticker, %date, "no bars around report date"),
            }
        }
        if moves.is_empty() {
            return Err(AppError::NoData(format!(
                "{ticker}: no computable earnings moves"
            )));
        }
        Ok(moves)
    }
}

#[async_trait]
impl MarketDataProvider for HistoryService {
    fn name(&self) -> &'static str {
        "history"
    }

    /// Store first; fall back to a live backfill on a cold cache.
    async fn historical_moves(&self, ticker: &str, limit: usize) -> AppResult<Vec<HistoricalMove>> {
        let cached = retry_db_once("moves_read", || self.store.historical_moves(ticker, limit))?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        self.backfill(ticker, limit).await
    }

    async fn health_probe(&self) -> AppResult<()> {
        self.store.ping()
    }
}
