//! Market-data provider capability set.
//!
//! The core depends only on these traits; concrete adapters (Tradier, Yahoo,
//! Finnhub, Alpha Vantage, the LLM sentiment client) are interchangeable and
//! selected by configuration. A capability an adapter does not serve returns
//! NODATA rather than panicking, so a mis-wired configuration degrades into
//! per-ticker failures instead of a crash.

pub mod alphavantage;
pub mod finnhub;
pub mod history;
pub mod perplexity;
pub mod tradier;
pub mod yahoo;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{
    EarningsEvent, HistoricalMove, Money, OptionChain, SentimentSnapshot,
};
use crate::error::{AppError, AppResult};

pub use alphavantage::AlphaVantageClient;
pub use finnhub::FinnhubClient;
pub use history::HistoryService;
pub use perplexity::PerplexityClient;
pub use tradier::TradierClient;
pub use yahoo::YahooClient;

/// Responses larger than this are rejected before deserialization.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Outbound call deadline; exceeding it is a TIMEOUT for the retry layer.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Tradier,
    Yahoo,
    Finnhub,
    AlphaVantage,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn quote(&self, ticker: &str) -> AppResult<Money> {
        Err(AppError::NoData(format!("{}: quote not supported ({ticker})", self.name())))
    }

    async fn option_chain(&self, ticker: &str, expiration: NaiveDate) -> AppResult<OptionChain> {
        Err(AppError::NoData(format!(
            "{}: option chains not supported ({ticker} {expiration})",
            self.name()
        )))
    }

    async fn earnings_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<EarningsEvent>> {
        Err(AppError::NoData(format!(
            "{}: earnings calendar not supported ({start}..{end})",
            self.name()
        )))
    }

    /// Most recent first.
    async fn historical_moves(&self, ticker: &str, limit: usize) -> AppResult<Vec<HistoricalMove>> {
        Err(AppError::NoData(format!(
            "{}: historical moves not supported ({ticker}, limit {limit})",
            self.name()
        )))
    }

    /// Cheap reachability check for `maintenance health`.
    async fn health_probe(&self) -> AppResult<()>;
}

#[async_trait]
pub trait SentimentProvider: Send + Sync {
    async fn sentiment(
        &self,
        ticker: &str,
        earnings_date: NaiveDate,
    ) -> AppResult<SentimentSnapshot>;
}

/// Read a response body with the size cap enforced, then deserialize.
pub(crate) async fn read_json_capped<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> AppResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(400).collect();
        return Err(AppError::from_status(status.as_u16(), format!("{provider}: {snippet}")));
    }

    if let Some(len) = response.content_length() {
        if len as usize > MAX_RESPONSE_BYTES {
            return Err(AppError::Invalid(format!(
                "{provider}: response of {len} bytes exceeds {MAX_RESPONSE_BYTES} byte cap"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::from_transport(&e))?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(AppError::Invalid(format!(
            "{provider}: response of {} bytes exceeds {MAX_RESPONSE_BYTES} byte cap",
            bytes.len()
        )));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::External(format!("{provider}: malformed response: {e}")))
}

/// Shared reqwest client builder: deadline, UA, rustls.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent("ivscan/0.1 (earnings volatility scanner)")
        .build()
        .expect("reqwest client")
}
