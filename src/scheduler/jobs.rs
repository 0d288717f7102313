//! Job implementations behind the dispatcher.
//!
//! Each job is a thin orchestration over the scanner; the dispatcher owns
//! timeouts and status recording.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::market;
use crate::scan::Scanner;
use crate::scheduler::dispatch::JobRunner;

pub struct ScannerJobRunner {
    scanner: Arc<Scanner>,
}

impl ScannerJobRunner {
    pub fn new(scanner: Arc<Scanner>) -> Self {
        Self { scanner }
    }

    /// Refresh the earnings calendar for the next week so later jobs and
    /// scans read it locally.
    async fn pre_market_prep(&self) -> AppResult<serde_json::Value> {
        let start = market::today_et();
        let end = start + ChronoDuration::days(7);
        let events = self
            .scanner
            .universe_for_window(start, end, &CancellationToken::new())
            .await?;
        info!(events = events.len(), "pre-market prep refreshed calendar");
        Ok(json!({"status": "success", "events": events.len()}))
    }

    async fn sentiment_scan(&self) -> AppResult<serde_json::Value> {
        let start = market::today_et();
        let end = start + ChronoDuration::days(4);
        let primed = self
            .scanner
            .prime_sentiment(start, end, CancellationToken::new())
            .await?;
        Ok(json!({"status": "success", "primed": primed}))
    }

    async fn morning_digest(&self) -> AppResult<serde_json::Value> {
        let start = market::today_et();
        let end = start + ChronoDuration::days(self.scanner.config().scan.window_days);
        let universe = self
            .scanner
            .universe_for_window(start, end, &CancellationToken::new())
            .await?;
        let report = self.scanner.scan(universe, CancellationToken::new()).await;

        let top: Vec<_> = report
            .opportunities
            .iter()
            .take(self.scanner.config().scan.top_n)
            .map(|o| {
                json!({
                    "ticker": o.ticker,
                    "earnings_date": o.earnings_date,
                    "score": o.composite_score,
                    "vrp_ratio": o.vrp.vrp_ratio,
                    "recommendation": o.final_recommendation.as_str(),
                })
            })
            .collect();
        Ok(json!({
            "status": "success",
            "scanned": report.scanned,
            "failures": report.failures.len(),
            "top": top,
        }))
    }

    /// Recompute historical moves for names reporting in the next two weeks.
    async fn weekly_backfill(&self) -> AppResult<serde_json::Value> {
        let start = market::today_et();
        let end = start + ChronoDuration::days(14);
        let universe = self
            .scanner
            .universe_for_window(start, end, &CancellationToken::new())
            .await?;

        let mut refreshed = 0usize;
        let mut failed = 0usize;
        for event in universe {
            match self
                .scanner
                .backfill_history(&event.ticker, &CancellationToken::new())
                .await
            {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    warn!(ticker = %event.ticker, error = %e, "backfill failed");
                    failed += 1;
                }
            }
        }
        Ok(json!({"status": "success", "refreshed": refreshed, "failed": failed}))
    }
}

#[async_trait]
impl JobRunner for ScannerJobRunner {
    async fn run(&self, job: &str) -> AppResult<serde_json::Value> {
        match job {
            "pre-market-prep" => self.pre_market_prep().await,
            "sentiment-scan" => self.sentiment_scan().await,
            "morning-digest" => self.morning_digest().await,
            "weekly-backfill" => self.weekly_backfill().await,
            other => Err(AppError::Invalid(format!("unknown job '{other}'"))),
        }
    }
}
