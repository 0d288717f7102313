//! LLM-backed earnings sentiment, budget-gated.
//!
//! Wire format is the chat-completions shape. Every paid call passes the
//! budget gate first and records its token usage after; cached sentiment is
//! served from the store for 24h so priming and scanning never pay twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::budget::BudgetTracker;
use crate::domain::{SentimentDirection, SentimentSnapshot};
use crate::error::{AppError, AppResult};
use crate::infra::retry_db_once;
use crate::providers::{read_json_capped, SentimentProvider};
use crate::storage::Store;

const API_URL: &str = "https://api.perplexity.ai/chat/completions";
const SERVICE: &str = "perplexity";
const DEFAULT_MODEL: &str = "sonar";
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const SYSTEM_PROMPT: &str = "You are an equity earnings analyst. Reply with a single JSON object: \
{\"direction\": \"bullish\"|\"bearish\"|\"neutral\", \"score\": number in [-1,1], \
\"catalysts\": [strings], \"risks\": [strings]}. No prose outside the JSON.";

pub struct PerplexityClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    budget: Arc<BudgetTracker>,
    store: Arc<Store>,
    cache_ttl: Duration,
}

impl PerplexityClient {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        budget: Arc<BudgetTracker>,
        store: Arc<Store>,
    ) -> Self {
        Self::with_cache_ttl(api_key, model, budget, store, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        api_key: impl Into<String>,
        model: Option<String>,
        budget: Arc<BudgetTracker>,
        store: Arc<Store>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            // Sentiment answers take longer than market-data calls.
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .user_agent("ivscan/0.1 (earnings volatility scanner)")
                .build()
                .expect("reqwest client"),
            api_url: API_URL.to_string(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            budget,
            store,
            cache_ttl,
        }
    }

    fn cached(&self, ticker: &str, earnings_date: NaiveDate) -> Option<SentimentSnapshot> {
        let cached = retry_db_once("sentiment_read", || {
            self.store.get_sentiment(ticker, earnings_date)
        })
        .ok()??;
        let age = Utc::now().timestamp().saturating_sub(cached.inserted_at);
        if age > self.cache_ttl.as_secs() as i64 {
            return None;
        }
        let parsed = serde_json::from_str::<SentimentSnapshot>(&cached.payload).ok()?;
        debug!(ticker, age_s = age, "sentiment cache hit");
        Some(parsed)
    }

    async fn call_model(&self, ticker: &str, earnings_date: NaiveDate) -> AppResult<SentimentSnapshot> {
        let user_prompt = format!(
            "Assess market sentiment going into {ticker}'s earnings report on {earnings_date}. \
             Consider recent news, guidance, analyst moves, and sector tone."
        );
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
            temperature: Some(0.2),
            max_tokens: Some(600),
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;
        let parsed: ChatResponse = read_json_capped(SERVICE, response).await?;

        let usage = parsed.usage.unwrap_or_default();
        if let Err(e) = self.budget.record(
            SERVICE,
            &self.model,
            usage.completion_tokens.unwrap_or(0),
            usage.reasoning_tokens.unwrap_or(0),
            usage.num_search_queries.unwrap_or(0),
        ) {
            warn!(ticker, error = %e, "failed to record sentiment call usage");
        }

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.as_str())
            .ok_or_else(|| AppError::External(format!("{SERVICE}: empty completion")))?;

        parse_sentiment_json(content)
    }
}

/// Model output arrives fenced more often than not; strip before parsing.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

pub(crate) fn parse_sentiment_json(raw: &str) -> AppResult<SentimentSnapshot> {
    let cleaned = strip_code_fences(raw);
    let snapshot: SentimentSnapshot = serde_json::from_str(cleaned)
        .map_err(|e| AppError::External(format!("{SERVICE}: unparseable sentiment: {e}")))?;
    if !snapshot.score.is_finite() {
        return Err(AppError::External(format!(
            "{SERVICE}: non-finite sentiment score"
        )));
    }
    Ok(snapshot)
}

#[async_trait]
impl SentimentProvider for PerplexityClient {
    async fn sentiment(
        &self,
        ticker: &str,
        earnings_date: NaiveDate,
    ) -> AppResult<SentimentSnapshot> {
        if let Some(snapshot) = self.cached(ticker, earnings_date) {
            return Ok(snapshot);
        }

        // Paid path: the gate decides, EXHAUSTED routes callers to fallback.
        self.budget.ensure_can_call(SERVICE)?;

        let snapshot = self.call_model(ticker, earnings_date).await?;
        let payload = serde_json::to_string(&snapshot)
            .map_err(|e| AppError::Calculation(format!("sentiment serialize: {e}")))?;
        let write = retry_db_once("sentiment_write", || {
            self.store
                .put_sentiment(ticker, earnings_date, &payload, Utc::now().timestamp())
        });
        if let Err(e) = write {
            warn!(ticker, error = %e, "failed to cache sentiment");
        }
        info!(
            ticker,
            direction = ?snapshot.direction,
            score = snapshot.score,
            "sentiment"
        );
        Ok(snapshot)
    }
}

/// Neutral fallback used when the budget gate is shut.
pub fn neutral_sentiment() -> SentimentSnapshot {
    SentimentSnapshot {
        direction: SentimentDirection::Neutral,
        score: 0.0,
        catalysts: Vec::new(),
        risks: Vec::new(),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    reasoning_tokens: Option<u64>,
    #[serde(default)]
    num_search_queries: Option<u64>,
}
