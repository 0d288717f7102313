//! Per-ticker signal pipeline and the bounded-concurrency scan.
//!
//! One `Scanner` owns the providers, caches, per-provider rate limiters and
//! circuit breakers, and the budget tracker. Ticker pipelines share those
//! and nothing else; a ticker's failure lands in `failures` and never aborts
//! the scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::anomaly::{self, AnomalyInput};
use crate::budget::BudgetTracker;
use crate::config::Config;
use crate::domain::{
    EarningsEvent, FinalRecommendation, HistoricalMove, Opportunity, OptionChain,
    SentimentSnapshot,
};
use crate::error::{AppError, AppResult};
use crate::infra::{
    retry_db_once, retry_with_backoff, CircuitBreaker, RetryConfig, TokenBucket, TtlCache,
};
use crate::market;
use crate::metrics::{self, liquidity, scoring, vrp::VrpConfig};
use crate::providers::{perplexity, MarketDataProvider, SentimentProvider};
use crate::storage::Store;
use crate::strategies::{self, GeneratorInput};

#[derive(Clone)]
struct CachedChain {
    chain: OptionChain,
    fetched_at_epoch: i64,
}

#[derive(Debug)]
pub struct ScanReport {
    pub opportunities: Vec<Opportunity>,
    pub failures: BTreeMap<String, AppError>,
    pub scanned: usize,
}

impl ScanReport {
    pub fn has_trade(&self) -> bool {
        self.opportunities
            .iter()
            .any(|o| o.final_recommendation == FinalRecommendation::Trade)
    }
}

struct ProviderGuards {
    limiter: TokenBucket,
    breaker: CircuitBreaker,
}

impl ProviderGuards {
    fn new(name: &'static str, config: &Config) -> Self {
        Self {
            limiter: TokenBucket::new(&config.resilience.rate_limit()),
            breaker: CircuitBreaker::new(name, config.resilience.breaker()),
        }
    }
}

pub struct Scanner {
    config: Config,
    vrp_config: VrpConfig,
    retry: RetryConfig,
    options_provider: Arc<dyn MarketDataProvider>,
    history_provider: Arc<dyn MarketDataProvider>,
    calendar_provider: Arc<dyn MarketDataProvider>,
    sentiment_provider: Option<Arc<dyn SentimentProvider>>,
    pub store: Arc<Store>,
    pub budget: Arc<BudgetTracker>,
    chain_cache: TtlCache<(String, NaiveDate), CachedChain>,
    options_guards: ProviderGuards,
    history_guards: ProviderGuards,
    calendar_guards: ProviderGuards,
}

impl Scanner {
    pub fn new(
        config: Config,
        options_provider: Arc<dyn MarketDataProvider>,
        history_provider: Arc<dyn MarketDataProvider>,
        calendar_provider: Arc<dyn MarketDataProvider>,
        sentiment_provider: Option<Arc<dyn SentimentProvider>>,
        store: Arc<Store>,
        budget: Arc<BudgetTracker>,
    ) -> Self {
        Self {
            vrp_config: config.vrp_config(),
            retry: config.resilience.retry(),
            chain_cache: TtlCache::new(config.cache.chain_ttl(), 512),
            options_guards: ProviderGuards::new(options_provider.name(), &config),
            history_guards: ProviderGuards::new(history_provider.name(), &config),
            calendar_guards: ProviderGuards::new(calendar_provider.name(), &config),
            config,
            options_provider,
            history_provider,
            calendar_provider,
            sentiment_provider,
            store,
            budget,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The configured market-data providers, for health probing.
    pub fn provider_list(&self) -> Vec<&dyn MarketDataProvider> {
        vec![
            self.options_provider.as_ref(),
            self.history_provider.as_ref(),
            self.calendar_provider.as_ref(),
        ]
    }

    /// Expiration used to price the earnings move: the weekly expiry on or
    /// after the reaction day, stepped back if the exchange is closed that
    /// Friday.
    pub fn expiration_for(earnings_date: NaiveDate) -> NaiveDate {
        let mut expiry = earnings_date;
        while expiry.weekday() != Weekday::Fri {
            expiry += ChronoDuration::days(1);
        }
        while !market::is_trading_day(expiry) {
            expiry -= ChronoDuration::days(1);
        }
        expiry
    }

    // ---- guarded provider calls -------------------------------------------

    async fn fetch_chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
        cancel: &CancellationToken,
    ) -> AppResult<CachedChain> {
        let key = (ticker.to_string(), expiration);
        if let Some(cached) = self.chain_cache.get(&key) {
            return Ok(cached);
        }

        let guards = &self.options_guards;
        let provider = &self.options_provider;
        let chain = retry_with_backoff(&self.retry, "option_chain", || async move {
            guards.limiter.acquire_or_cancel(cancel).await?;
            guards
                .breaker
                .call(|| provider.option_chain(ticker, expiration))
                .await
        })
        .await?;

        let cached = CachedChain {
            chain,
            fetched_at_epoch: Utc::now().timestamp(),
        };
        self.chain_cache.insert(key, cached.clone());
        Ok(cached)
    }

    async fn fetch_history(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<HistoricalMove>> {
        let guards = &self.history_guards;
        let provider = &self.history_provider;
        let limit = self.config.scan.history_limit;
        retry_with_backoff(&self.retry, "historical_moves", || async move {
            guards.limiter.acquire_or_cancel(cancel).await?;
            guards
                .breaker
                .call(|| provider.historical_moves(ticker, limit))
                .await
        })
        .await
    }

    async fn fetch_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<EarningsEvent>> {
        let guards = &self.calendar_guards;
        let provider = &self.calendar_provider;
        retry_with_backoff(&self.retry, "earnings_calendar", || async move {
            guards.limiter.acquire_or_cancel(cancel).await?;
            guards
                .breaker
                .call(|| provider.earnings_calendar(start, end))
                .await
        })
        .await
    }

    /// Sentiment with the budget gate. EXHAUSTED degrades to the neutral
    /// fallback; any other failure simply omits sentiment from the score.
    async fn fetch_sentiment(
        &self,
        ticker: &str,
        earnings_date: NaiveDate,
    ) -> Option<SentimentSnapshot> {
        let provider = self.sentiment_provider.as_ref()?;
        match provider.sentiment(ticker, earnings_date).await {
            Ok(snapshot) => Some(snapshot),
            Err(AppError::Exhausted(msg)) => {
                warn!(ticker, %msg, "sentiment budget exhausted, using neutral fallback");
                Some(perplexity::neutral_sentiment())
            }
            Err(e) => {
                debug!(ticker, error = %e, "sentiment unavailable");
                None
            }
        }
    }

    // ---- per-ticker pipeline ----------------------------------------------

    /// Stage order is fixed: chain -> implied move -> history -> VRP -> skew
    /// -> liquidity -> tail risk -> strategies -> sentiment -> score ->
    /// anomalies. Cancellation is observed between stages.
    pub async fn analyze_ticker(
        &self,
        ticker: &str,
        earnings_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> AppResult<Opportunity> {
        let cancelled = || AppError::Timeout(format!("{ticker}: scan cancelled"));
        let today = market::today_et();
        let expiration = Self::expiration_for(earnings_date);

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let cached_chain = self.fetch_chain(ticker, expiration, cancel).await?;
        let chain = &cached_chain.chain;
        let chain_age_hours =
            (Utc::now().timestamp() - cached_chain.fetched_at_epoch).max(0) as f64 / 3600.0;

        let implied = metrics::implied_move::calculate(chain, today)?;

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let history = self.fetch_history(ticker, cancel).await?;

        let vrp = metrics::vrp::calculate(&self.vrp_config, &implied, &history)?;
        if let Ok(payload) = serde_json::to_string(&vrp) {
            let write = retry_db_once("vrp_cache", || {
                self.store
                    .put_vrp(ticker, expiration, &payload, Utc::now().timestamp())
            });
            if let Err(e) = write {
                debug!(ticker, error = %e, "vrp cache write failed");
            }
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let skew = match metrics::skew::analyze(&self.config.skew, chain) {
            Ok(s) => Some(s),
            Err(e) => {
                debug!(ticker, error = %e, "skew unavailable");
                None
            }
        };
        let bias = skew.as_ref().map(|s| s.directional_bias);

        let liquidity_tier = liquidity::assess_atm(
            &self.config.liquidity,
            chain,
            self.config.scan.position_size,
        )?;

        let limits = match metrics::tail_risk::calculate(
            &self.config.tail_risk,
            ticker,
            &history,
            self.vrp_config.move_metric,
        ) {
            Ok(l) => Some(l),
            Err(e) => {
                debug!(ticker, error = %e, "tail risk unavailable");
                None
            }
        };

        // Strategies come before scoring: the skew component is judged
        // against what the book would actually sell.
        let strategies = strategies::generate(
            &self.config.strategy,
            &self.config.liquidity,
            &GeneratorInput {
                chain,
                implied: &implied,
                recommendation: vrp.recommendation,
                bias,
                limits: limits.as_ref(),
            },
        );
        let primary_strategy = strategies.first().map(|s| s.strategy_type);

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let sentiment = self.fetch_sentiment(ticker, earnings_date).await;

        let base_score = scoring::composite(
            &self.config.scoring.weights,
            &self.vrp_config,
            vrp.vrp_ratio,
            vrp.consistency,
            bias,
            primary_strategy,
            liquidity_tier,
        );
        let composite_score = match &sentiment {
            Some(s) => scoring::apply_sentiment_modifier(base_score, s.score),
            None => base_score,
        };

        let anomalies = anomaly::detect(
            &self.config.anomaly,
            &AnomalyInput {
                vrp_ratio: vrp.vrp_ratio,
                recommendation: vrp.recommendation,
                liquidity_tier,
                earnings_date,
                today,
                chain_cache_age_hours: chain_age_hours,
                historical_quarters: vrp.quarters_of_data,
            },
        );
        let final_recommendation = anomaly::final_recommendation(&anomalies, liquidity_tier);

        info!(
            ticker,
            %earnings_date,
            score = format!("{composite_score:.1}"),
            vrp = format!("{:.2}", vrp.vrp_ratio),
            liquidity = liquidity_tier.as_str(),
            verdict = final_recommendation.as_str(),
            "analyzed"
        );

        Ok(Opportunity {
            ticker: ticker.to_string(),
            earnings_date,
            expiration,
            implied_move: implied,
            vrp,
            skew,
            liquidity_tier,
            position_limits: limits,
            composite_score,
            sentiment,
            anomalies,
            final_recommendation,
            strategies,
        })
    }

    // ---- orchestration -----------------------------------------------------

    /// Earnings universe for a window: the provider calendar merged into the
    /// store, then read back (the store is canonical for confirmed dates).
    pub async fn universe_for_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<EarningsEvent>> {
        match self.fetch_calendar(start, end, cancel).await {
            Ok(events) => {
                for event in &events {
                    let write =
                        retry_db_once("earnings_upsert", || self.store.upsert_earnings(event));
                    if let Err(e) = write {
                        warn!(ticker = %event.ticker, error = %e, "calendar upsert failed");
                    }
                }
            }
            Err(e) => {
                // Stale calendar beats no calendar; the store may have a
                // previous fetch.
                warn!(error = %e, "live earnings calendar unavailable, using stored");
            }
        }
        retry_db_once("earnings_between", || self.store.earnings_between(start, end))
    }

    /// Fan out over the universe with bounded concurrency. The aggregate is
    /// deterministic: sorted by composite score descending, ties broken by
    /// ticker ascending.
    pub async fn scan(
        self: &Arc<Self>,
        universe: Vec<EarningsEvent>,
        cancel: CancellationToken,
    ) -> ScanReport {
        let semaphore = Arc::new(Semaphore::new(self.config.scan.concurrency));
        let mut tasks: JoinSet<(String, AppResult<Opportunity>)> = JoinSet::new();
        let scanned = universe.len();

        for event in universe {
            let scanner = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (event.ticker, Err(AppError::Timeout("scan closed".into()))),
                };
                if cancel.is_cancelled() {
                    return (
                        event.ticker.clone(),
                        Err(AppError::Timeout(format!("{}: scan cancelled", event.ticker))),
                    );
                }
                let result = scanner
                    .analyze_ticker(&event.ticker, event.date, &cancel)
                    .await;
                (event.ticker, result)
            });
        }

        let mut opportunities = Vec::new();
        let mut failures = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(opportunity))) => opportunities.push(opportunity),
                Ok((ticker, Err(e))) => {
                    if cancel.is_cancelled() {
                        // Cancelled pipelines return without writing results.
                        debug!(%ticker, "dropped on cancellation");
                    } else {
                        failures.insert(ticker, e);
                    }
                }
                Err(join_err) => {
                    warn!(error = %join_err, "scan task panicked");
                }
            }
        }

        opportunities.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });

        info!(
            scanned,
            produced = opportunities.len(),
            failed = failures.len(),
            "scan complete"
        );

        ScanReport {
            opportunities,
            failures,
            scanned,
        }
    }

    /// Refresh a ticker's historical-move series (the weekly backfill path;
    /// the history provider persists what it computes). Returns the number
    /// of quarters now available.
    pub async fn backfill_history(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> AppResult<usize> {
        let moves = self.fetch_history(ticker, cancel).await?;
        Ok(moves.len())
    }

    /// Pre-populate the sentiment cache for upcoming earnings.
    pub async fn prime_sentiment(
        self: &Arc<Self>,
        start: NaiveDate,
        end: NaiveDate,
        cancel: CancellationToken,
    ) -> AppResult<usize> {
        let universe = self.universe_for_window(start, end, &cancel).await?;
        let mut primed = 0;
        for event in universe {
            if cancel.is_cancelled() {
                break;
            }
            if self.fetch_sentiment(&event.ticker, event.date).await.is_some() {
                primed += 1;
            }
        }
        Ok(primed)
    }
}
