//! Tradier market-data adapter: quotes and option chains with greeks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{Money, OptionChain, OptionQuote, OptionType, Strike};
use crate::error::{AppError, AppResult};
use crate::providers::{http_client, read_json_capped, MarketDataProvider};

const PRODUCTION_BASE: &str = "https://api.tradier.com";
const SANDBOX_BASE: &str = "https://sandbox.tradier.com";

pub struct TradierClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TradierClient {
    pub fn new(api_key: impl Into<String>, sandbox: bool) -> Self {
        Self {
            http: http_client(),
            base_url: if sandbox { SANDBOX_BASE } else { PRODUCTION_BASE }.to_string(),
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

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;
        read_json_capped("tradier", response).await
    }
}

#[derive(Debug, Deserialize)]
struct QuotesEnvelope {
    quotes: Option<QuotesBody>,
}

#[derive(Debug, Deserialize)]
struct QuotesBody {
    quote: Option<QuoteNode>,
}

/// Tradier returns an object for one symbol and an array for several.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuoteNode {
    One(Box<TradierQuote>),
    Many(Vec<TradierQuote>),
}

#[derive(Debug, Deserialize)]
struct TradierQuote {
    symbol: String,
    last: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChainEnvelope {
    options: Option<ChainBody>,
}

#[derive(Debug, Deserialize)]
struct ChainBody {
    option: Option<Vec<TradierOption>>,
}

#[derive(Debug, Deserialize)]
struct TradierOption {
    strike: f64,
    option_type: String,
    bid: Option<f64>,
    ask: Option<f64>,
    open_interest: Option<u64>,
    volume: Option<u64>,
    greeks: Option<TradierGreeks>,
}

#[derive(Debug, Deserialize)]
struct TradierGreeks {
    mid_iv: Option<f64>,
    delta: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ClockEnvelope {
    clock: Option<serde_json::Value>,
}

impl TradierClient {
    fn quote_price(q: &TradierQuote) -> Option<f64> {
        // Prefer last; fall back to the bid/ask midpoint off-hours.
        q.last.filter(|p| *p > 0.0).or_else(|| match (q.bid, q.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((b + a) / 2.0),
            _ => None,
        })
    }
}

#[async_trait]
impl MarketDataProvider for TradierClient {
    fn name(&self) -> &'static str {
        "tradier"
    }

    async fn quote(&self, ticker: &str) -> AppResult<Money> {
        let envelope: QuotesEnvelope = self
            .get("/v1/markets/quotes", &[("symbols", ticker)])
            .await?;
        let node = envelope
            .quotes
            .and_then(|q| q.quote)
            .ok_or_else(|| AppError::NoData(format!("tradier: no quote for {ticker}")))?;
        let quote = match node {
            QuoteNode::One(q) => *q,
            QuoteNode::Many(mut qs) => {
                let pos = qs.iter().position(|q| q.symbol.eq_ignore_ascii_case(ticker));
                match pos {
                    Some(i) => qs.swap_remove(i),
                    None => {
                        return Err(AppError::NoData(format!("tradier: no quote for {ticker}")))
                    }
                }
            }
        };
        let price = Self::quote_price(&quote)
            .ok_or_else(|| AppError::NoData(format!("tradier: no price for {ticker}")))?;
        debug!(ticker, price, "tradier quote");
        Money::from_f64(price)
    }

    async fn option_chain(&self, ticker: &str, expiration: NaiveDate) -> AppResult<OptionChain> {
        let expiration_str = expiration.to_string();
        let envelope: ChainEnvelope = self
            .get(
                "/v1/markets/options/chains",
                &[
                    ("symbol", ticker),
                    ("expiration", expiration_str.as_str()),
                    ("greeks", "true"),
                ],
            )
            .await?;

        let options = envelope
            .options
            .and_then(|o| o.option)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                AppError::NoData(format!("tradier: empty chain for {ticker} {expiration}"))
            })?;

        let stock_price = self.quote(ticker).await?;

        let mut calls = BTreeMap::new();
        let mut puts = BTreeMap::new();
        for opt in options {
            let option_type = match opt.option_type.as_str() {
                "call" => OptionType::Call,
                "put" => OptionType::Put,
                other => {
                    debug!(ticker, other, "skipping unknown option type");
                    continue;
                }
            };
            let Some(strike_dec) = Decimal::from_f64(opt.strike) else {
                continue;
            };
            let strike = Strike::new(strike_dec);
            let quote = OptionQuote {
                strike,
                option_type,
                bid: Money::from_f64(opt.bid.unwrap_or(0.0))?,
                ask: Money::from_f64(opt.ask.unwrap_or(0.0))?,
                implied_volatility: opt.greeks.as_ref().and_then(|g| g.mid_iv),
                open_interest: opt.open_interest.unwrap_or(0),
                volume: opt.volume.unwrap_or(0),
                delta: opt.greeks.as_ref().and_then(|g| g.delta),
            };
            match option_type {
                OptionType::Call => calls.insert(strike, quote),
                OptionType::Put => puts.insert(strike, quote),
            };
        }

        info!(
            ticker,
            %expiration,
            calls = calls.len(),
            puts = puts.len(),
            "tradier chain"
        );

        Ok(OptionChain {
            ticker: ticker.to_string(),
            expiration,
            stock_price,
            calls,
            puts,
        })
    }

    async fn health_probe(&self) -> AppResult<()> {
        let _: ClockEnvelope = self.get("/v1/markets/clock", &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_price_prefers_last() {
        let q = TradierQuote {
            symbol: "NVDA".into(),
            last: Some(135.5),
            bid: Some(135.0),
            ask: Some(136.0),
        };
        assert_eq!(TradierClient::quote_price(&q), Some(135.5));
    }

    #[test]
    fn quote_price_falls_back_to_mid() {
        let q = TradierQuote {
            symbol: "NVDA".into(),
            last: None,
            bid: Some(135.0),
            ask: Some(136.0),
        };
        assert_eq!(TradierClient::quote_price(&q), Some(135.5));

        let q = TradierQuote {
            symbol: "NVDA".into(),
            last: Some(0.0),
            bid: None,
            ask: Some(136.0),
        };
        assert_eq!(TradierClient::quote_price(&q), None);
    }

    #[test]
    fn chain_envelope_parses_tradier_shape() {
        let body = r#"{
            "options": {"option": [
                {"strike": 100.0, "option_type": "call", "bid": 3.0, "ask": 3.2,
                 "open_interest": 1200, "volume": 300,
                 "greeks": {"mid_iv": 0.45, "delta": 0.52}},
                {"strike": 100.0, "option_type": "put", "bid": 2.8, "ask": 3.0,
                 "open_interest": 900, "volume": 210,
                 "greeks": {"mid_iv": 0.47, "delta": -0.48}}
            ]}
        }"#;
        let envelope: ChainEnvelope = serde_json::from_str(body).unwrap();
        let options = envelope.options.unwrap().option.unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].greeks.as_ref().unwrap().delta, Some(0.52));
    }

    #[test]
    fn single_quote_envelope_parses() {
        let body = r#"{"quotes": {"quote": {"symbol": "NVDA", "last": 135.5, "bid": 135.0, "ask": 136.0}}}"#;
        let envelope: QuotesEnvelope = serde_json::from_str(body).unwrap();
        match envelope.quotes.unwrap().quote.unwrap() {
            QuoteNode::One(q) => assert_eq!(q.symbol, "NVDA"),
            QuoteNode::Many(_) => panic!("expected single quote"),
        }
    }

    #[test]
    fn missing_chain_is_none() {
        let body = r#"{"options": null}"#;
        let envelope: ChainEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.options.is_none());
    }

    #[tokio::test]
    async fn unreachable_base_url_maps_to_transport_error() {
        let client = TradierClient::with_base_url("key", "http://127.0.0.1:1".to_string());
        let err = client.quote("NVDA").await.unwrap_err();
        assert!(matches!(err, AppError::External(_) | AppError::Timeout(_)));
    }
}
