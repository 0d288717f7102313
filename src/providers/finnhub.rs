//! Finnhub adapter: the forward earnings calendar.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use crate::domain::{EarningsEvent, EarningsTiming};
use crate::error::{AppError, AppResult};
use crate::providers::{http_client, read_json_capped, MarketDataProvider};

const API_BASE: &str = "https://finnhub.io";

pub struct FinnhubClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FinnhubClient {
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
}

#[derive(Debug, Deserialize)]
struct CalendarEnvelope {
    #[serde(rename = "earningsCalendar", default)]
    earnings_calendar: Vec<CalendarEntry>,
}

#[derive(Debug, Deserialize)]
struct CalendarEntry {
    date: String,
    symbol: String,
    /// "bmo", "amc", "dmh" or empty.
    #[serde(default)]
    hour: String,
}

impl CalendarEntry {
    fn timing(&self) -> EarningsTiming {
        EarningsTiming::parse(&self.hour)
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubClient {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn earnings_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<EarningsEvent>> {
        if end < start {
            return Err(AppError::Invalid(format!(
                "finnhub: calendar window end {end} before start {start}"
            )));
        }
        let url = format!("{}/api/v1/calendar/earnings", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("from", start.to_string().as_str()),
                ("to", end.to_string().as_str()),
                ("token", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;
        let envelope: CalendarEnvelope = read_json_capped("finnhub", response).await?;

        let mut events = Vec::with_capacity(envelope.earnings_calendar.len());
        for entry in envelope.earnings_calendar {
            let Ok(date) = entry.date.parse::<NaiveDate>() else {
                continue;
            };
            events.push(EarningsEvent {
                timing: entry.timing(),
                ticker: entry.symbol,
                date,
                confirmed: true,
            });
        }
        info!(from = %start, to = %end, events = events.len(), "finnhub earnings calendar");
        Ok(events)
    }

    async fn health_probe(&self) -> AppResult<()> {
        let url = format!("{}/api/v1/quote", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("symbol", "SPY"), ("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;
        let _: serde_json::Value = read_json_capped("finnhub", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_envelope_parses_finnhub_shape() {
        let body = r#"{
            "earningsCalendar": [
                {"date": "2026-08-26", "symbol": "NVDA", "hour": "amc", "epsEstimate": 1.01},
                {"date": "2026-08-27", "symbol": "KR", "hour": "bmo"},
                {"date": "not-a-date", "symbol": "BAD", "hour": ""}
            ]
        }"#;
        let envelope: CalendarEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.earnings_calendar.len(), 3);
        assert_eq!(envelope.earnings_calendar[0].timing(), EarningsTiming::Amc);
        assert_eq!(envelope.earnings_calendar[1].timing(), EarningsTiming::Bmo);
        assert_eq!(envelope.earnings_calendar[2].timing(), EarningsTiming::Unknown);
    }

    #[test]
    fn empty_calendar_parses() {
        let envelope: CalendarEnvelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.earnings_calendar.is_empty());
    }

    #[tokio::test]
    async fn inverted_window_is_invalid() {
        let client = FinnhubClient::with_base_url("key", "http://127.0.0.1:1".to_string());
        let err = client
            .earnings_calendar(
                NaiveDate::from_ymd_opt(2026, 8, 10).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
    }
}
