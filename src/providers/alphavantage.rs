//! Alpha Vantage adapter: fundamentals and past earnings report dates.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::providers::{http_client, read_json_capped, MarketDataProvider};

const API_BASE: &str = "https://www.alphavantage.co";

pub struct AlphaVantageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: API_BASE.to_string(),
            api_key: api_key.into(),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_key: &str, base_url: String) -> Self {
        Self {
            http: http_client(),
            base_url,
            api_key: api_key.to_string(),
        }
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        symbol: &str,
    ) -> AppResult<T> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("function", function),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;
        read_json_capped("alphavantage", response).await
    }

    /// Company fundamentals as a raw document for the fundamentals cache.
    pub async fn company_overview(&self, ticker: &str) -> AppResult<serde_json::Value> {
        let value: serde_json::Value = self.query("OVERVIEW", ticker).await?;
        // Alpha Vantage reports limits and unknown symbols as 200s with a
        // Note/empty body.
        if value.get("Note").is_some() {
            return Err(AppError::RateLimit("alphavantage: daily limit note".into()));
        }
        match value.get("Symbol") {
            Some(_) => Ok(value),
            None => Err(AppError::NoData(format!("alphavantage: no overview for {ticker}"))),
        }
    }

    /// Announcement dates of past quarterly reports, most recent first.
    pub async fn past_earnings_dates(&self, ticker: &str) -> AppResult<Vec<NaiveDate>> {
        let envelope: EarningsEnvelope = self.query("EARNINGS", ticker).await?;
        let mut dates: Vec<NaiveDate> = envelope
            .quarterly_earnings
            .iter()
            .filter_map(|q| q.reported_date.parse::<NaiveDate>().ok())
            .collect();
        if dates.is_empty() {
            return Err(AppError::NoData(format!(
                "alphavantage: no quarterly earnings for {ticker}"
            )));
        }
        dates.sort_unstable_by(|a, b| b.cmp(a));
        debug!(ticker, quarters = dates.len(), "alphavantage earnings dates");
        Ok(dates)
    }
}

#[derive(Debug, Deserialize)]
struct EarningsEnvelope {
    #[serde(rename = "quarterlyEarnings", default)]
    quarterly_earnings: Vec<QuarterlyEarning>,
}

#[derive(Debug, Deserialize)]
struct QuarterlyEarning {
    #[serde(rename = "reportedDate", default)]
    reported_date: String,
}

#[async_trait]
impl MarketDataProvider for AlphaVantageClient {
    fn name(&self) -> &'static str {
        "alphavantage"
    }

    async fn health_probe(&self) -> AppResult<()> {
        self.company_overview("IBM").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earnings_envelope_parses_and_sorts() {
        let body = r#"{
            "symbol": "NVDA",
            "quarterlyEarnings": [
                {"fiscalDateEnding": "2026-01-31", "reportedDate": "2026-02-25", "reportedEPS": "0.89"},
                {"fiscalDateEnding": "2026-04-30", "reportedDate": "2026-05-27", "reportedEPS": "0.96"},
                {"fiscalDateEnding": "2025-10-31", "reportedDate": "2025-11-19", "reportedEPS": "0.81"}
            ]
        }"#;
        let envelope: EarningsEnvelope = serde_json::from_str(body).unwrap();
        let mut dates: Vec<NaiveDate> = envelope
            .quarterly_earnings
            .iter()
            .filter_map(|q| q.reported_date.parse().ok())
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2026, 5, 27).unwrap());
        assert_eq!(dates[2], NaiveDate::from_ymd_opt(2025, 11, 19).unwrap());
    }

    #[tokio::test]
    async fn transport_failure_maps_to_external() {
        let client = AlphaVantageClient::with_base_url("key", "http://127.0.0.1:1".to_string());
        let err = client.past_earnings_dates("NVDA").await.unwrap_err();
        assert!(matches!(err, AppError::External(_) | AppError::Timeout(_)));
    }
}
