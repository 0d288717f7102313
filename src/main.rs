//! ivscan - earnings volatility opportunity scanner.
//!
//! Thin CLI over the library: scan a window, deep-dive a ticker, prime the
//! sentiment cache, run health checks, or take a scheduler dispatch tick.
//! Output stays deliberately plain; downstream sinks own formatting.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ivscan::api::{self, ApiState};
use ivscan::budget::BudgetTracker;
use ivscan::config::Config;
use ivscan::domain::FinalRecommendation;
use ivscan::health;
use ivscan::market;
use ivscan::providers::{
    AlphaVantageClient, FinnhubClient, HistoryService, PerplexityClient, SentimentProvider,
    TradierClient, YahooClient,
};
use ivscan::scan::{ScanReport, Scanner};
use ivscan::scheduler::{Dispatcher, ScannerJobRunner};
use ivscan::storage::Store;

#[derive(Parser)]
#[command(name = "ivscan", about = "Earnings volatility opportunity scanner")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Show raw per-ticker errors in scan output.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank the top opportunities reporting in [START_DATE, START_DATE+4d].
    Whisper {
        /// Window start (default: today, next 5 days).
        start_date: Option<NaiveDate>,
    },
    /// Deep-dive a single ticker.
    Analyze {
        ticker: String,
        /// Earnings date; auto-detected from the calendar when omitted.
        earnings_date: Option<NaiveDate>,
    },
    /// Pre-populate the sentiment cache for upcoming earnings.
    Prime { start_date: Option<NaiveDate> },
    /// Operational maintenance commands.
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommand,
    },
    /// Scheduler tick for an external cron. Prints JSON.
    Dispatch {
        /// Force-run a specific job, bypassing the slot table.
        #[arg(long)]
        force: Option<String>,
    },
    /// Run the HTTP surface.
    Serve,
}

#[derive(Subcommand)]
enum MaintenanceCommand {
    /// Run all component health checks.
    Health,
}

struct App {
    scanner: Arc<Scanner>,
    dispatcher: Arc<Dispatcher>,
    config: Config,
}

fn build(config: Config) -> Result<App> {
    let store = Arc::new(Store::open(&config.database_path).context("open database")?);
    let budget = Arc::new(BudgetTracker::new(Arc::clone(&store), config.budget.clone()));

    let tradier = Arc::new(TradierClient::new(
        config.providers.tradier_api_key.clone(),
        config.providers.tradier_sandbox,
    ));
    let yahoo = Arc::new(YahooClient::new());
    let alphavantage = Arc::new(AlphaVantageClient::new(
        config.providers.alphavantage_api_key.clone(),
    ));
    let finnhub = Arc::new(FinnhubClient::new(config.providers.finnhub_api_key.clone()));
    let history = Arc::new(HistoryService::new(yahoo, alphavantage, Arc::clone(&store)));

    let sentiment: Option<Arc<dyn SentimentProvider>> =
        if config.providers.perplexity_api_key.trim().is_empty() {
            info!("no sentiment API key configured, scores run unmodified");
            None
        } else {
            Some(Arc::new(PerplexityClient::with_cache_ttl(
                config.providers.perplexity_api_key.clone(),
                config.providers.perplexity_model.clone(),
                Arc::clone(&budget),
                Arc::clone(&store),
                std::time::Duration::from_secs(config.cache.sentiment_ttl_hours * 3600),
            )))
        };

    let scanner = Arc::new(Scanner::new(
        config.clone(),
        tradier,
        history,
        finnhub,
        sentiment,
        Arc::clone(&store),
        budget,
    ));
    let runner = Arc::new(ScannerJobRunner::new(Arc::clone(&scanner)));
    let dispatcher = Arc::new(Dispatcher::new(store, runner, config.scheduler.job_timeout()));

    Ok(App {
        scanner,
        dispatcher,
        config,
    })
}

fn print_report(report: &ScanReport, top_n: usize, verbose: bool) {
    println!(
        "scanned {} names, {} analyzable, {} failed",
        report.scanned,
        report.opportunities.len(),
        report.failures.len()
    );
    for o in report.opportunities.iter().take(top_n) {
        println!(
            "{:<6} {}  score {:>5.1}  implied {}  vrp {:.2}x ({})  liquidity {}  -> {}",
            o.ticker,
            o.earnings_date,
            o.composite_score,
            o.implied_move.implied_move_pct,
            o.vrp.vrp_ratio,
            o.vrp.recommendation.as_str(),
            o.liquidity_tier.as_str(),
            o.final_recommendation.as_str(),
        );
        for anomaly in &o.anomalies {
            println!("       ! {}", anomaly.message);
        }
        if let Some(strategy) = o.strategies.first() {
            println!("       {}", strategy.description);
        }
    }
    if verbose {
        for (ticker, err) in &report.failures {
            println!("       x {ticker}: {err}");
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Whisper { start_date } => {
            let app = build(config)?;
            let start = start_date.unwrap_or_else(market::today_et);
            let end = start + ChronoDuration::days(app.config.scan.window_days);
            let cancel = CancellationToken::new();

            let universe = app.scanner.universe_for_window(start, end, &cancel).await?;
            if universe.is_empty() {
                println!("no earnings between {start} and {end}");
                return Ok(ExitCode::from(1));
            }
            let report = app.scanner.scan(universe, cancel).await;
            print_report(&report, app.config.scan.top_n, cli.verbose);
            Ok(if report.has_trade() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Command::Analyze {
            ticker,
            earnings_date,
        } => {
            let app = build(config)?;
            let ticker = ticker.to_uppercase();
            let cancel = CancellationToken::new();

            let earnings_date = match earnings_date {
                Some(d) => d,
                None => {
                    let start = market::today_et();
                    let end = start + ChronoDuration::days(30);
                    let universe = app.scanner.universe_for_window(start, end, &cancel).await?;
                    universe
                        .iter()
                        .find(|e| e.ticker == ticker)
                        .map(|e| e.date)
                        .with_context(|| {
                            format!("no earnings date found for {ticker} in the next 30 days")
                        })?
                }
            };

            let opportunity = app
                .scanner
                .analyze_ticker(&ticker, earnings_date, &cancel)
                .await?;
            let trade = opportunity.final_recommendation == FinalRecommendation::Trade;
            let report = ScanReport {
                opportunities: vec![opportunity],
                failures: Default::default(),
                scanned: 1,
            };
            print_report(&report, 1, cli.verbose);
            Ok(if trade { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }

        Command::Prime { start_date } => {
            let app = build(config)?;
            let start = start_date.unwrap_or_else(market::today_et);
            let end = start + ChronoDuration::days(app.config.scan.window_days);
            let primed = app
                .scanner
                .prime_sentiment(start, end, CancellationToken::new())
                .await?;
            println!("primed sentiment for {primed} names ({start}..{end})");
            Ok(ExitCode::SUCCESS)
        }

        Command::Maintenance { command } => match command {
            MaintenanceCommand::Health => {
                let app = build(config)?;
                let report = health::check(&app.scanner).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(if report.healthy {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(1)
                })
            }
        },

        Command::Dispatch { force } => {
            let app = build(config)?;
            let response = app
                .dispatcher
                .dispatch(force.as_deref(), market::now_et())
                .await;
            println!("{}", serde_json::to_string(&response)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Serve => {
            let port = config.api.port;
            let api_key = config.api.api_key.clone();
            let app = build(config)?;
            let state = Arc::new(ApiState {
                scanner: Arc::clone(&app.scanner),
                dispatcher: Arc::clone(&app.dispatcher),
                api_key,
            });
            let router = api::router(state);
            let addr = format!("0.0.0.0:{port}");
            info!(%addr, "serving");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("bind {addr}"))?;
            axum::serve(listener, router).await.context("serve")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
