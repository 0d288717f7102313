//! Yahoo Finance adapter: free quotes and daily bars.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use crate::domain::Money;
use crate::error::{AppError, AppResult};
use crate::providers::{http_client, read_json_capped, MarketDataProvider};

const CHART_BASE: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Clone)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

pub struct YahooClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooClient {
    pub fn new() -> Self {
        Self {
            http: http_client(),
            base_url: CHART_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: String) -> Self {
        Self {
            http: http_client(),
            base_url,
        }
    }

    async fn chart(&self, ticker: &str, range: &str) -> AppResult<ChartResult> {
        let url = format!("{}/v8/finance/chart/{ticker}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("range", range), ("interval", "1d"), ("events", "div,splits")])
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;
        let envelope: ChartEnvelope = read_json_capped("yahoo", response).await?;

        let chart = envelope.chart;
        if let Some(err) = chart.error {
            return Err(AppError::NoData(format!("yahoo: {ticker}: {}", err.description)));
        }
        chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| AppError::NoData(format!("yahoo: no chart data for {ticker}")))
    }

    /// Daily OHLC bars, oldest first. Days with missing values are skipped.
    pub async fn daily_bars(&self, ticker: &str, range: &str) -> AppResult<Vec<DailyBar>> {
        let result = self.chart(ticker, range).await?;
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NoData(format!("yahoo: no quote series for {ticker}")))?;

        let mut bars = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let (Some(open), Some(high), Some(low), Some(close)) = (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) else {
                continue;
            };
            let Some(date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
                continue;
            };
            bars.push(DailyBar {
                date,
                open,
                high,
                low,
                close,
            });
        }
        if bars.is_empty() {
            return Err(AppError::NoData(format!("yahoo: empty bar series for {ticker}")));
        }
        debug!(ticker, bars = bars.len(), "yahoo daily bars");
        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[async_trait]
impl MarketDataProvider for YahooClient {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn quote(&self, ticker: &str) -> AppResult<Money> {
        let result = self.chart(ticker, "1d").await?;
        let price = result
            .meta
            .regular_market_price
            .filter(|p| *p > 0.0)
            .ok_or_else(|| AppError::NoData(format!("yahoo: no market price for {ticker}")))?;
        Money::from_f64(price)
    }

    async fn health_probe(&self) -> AppResult<()> {
        self.quote("SPY").await.map(|_| ())
    }
}
