//! Layered configuration: built-in defaults < TOML file < environment.
//!
//! Invalid configuration fails process start; nothing downstream re-checks.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anomaly::AnomalyConfig;
use crate::budget::BudgetLimits;
use crate::domain::MoveMetric;
use crate::error::{AppError, AppResult};
use crate::infra::{BreakerConfig, RateLimitConfig, RetryConfig};
use crate::metrics::{LiquidityConfig, ScoringWeights, SkewConfig, TailRiskConfig, VrpConfig};
use crate::strategies::StrategyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: String,
    pub scan: ScanSettings,
    pub scoring: ScoringSettings,
    pub vrp: VrpSettings,
    pub skew: SkewConfig,
    pub liquidity: LiquidityConfig,
    pub tail_risk: TailRiskConfig,
    pub strategy: StrategyConfig,
    pub anomaly: AnomalyConfig,
    pub cache: CacheSettings,
    pub resilience: ResilienceSettings,
    pub budget: HashMap<String, BudgetLimits>,
    pub providers: ProviderSettings,
    pub api: ApiSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Semaphore width for the ticker fan-out.
    pub concurrency: usize,
    /// Intended position size, the P of the liquidity classifier.
    pub position_size: u32,
    /// Opportunities reported by `whisper`.
    pub top_n: usize,
    /// Forward window length in days for the default scan.
    pub window_days: i64,
    pub history_limit: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            position_size: 100,
            top_n: 10,
            window_days: 4,
            history_limit: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// "aggressive" (7.0/4.0/1.5) or "conservative" (2.0/1.5/1.2).
    pub profile: String,
    pub weights: ScoringWeights,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            profile: "aggressive".to_string(),
            weights: ScoringWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VrpSettings {
    pub move_metric: MoveMetric,
    pub min_quarters: usize,
}

impl Default for VrpSettings {
    fn default() -> Self {
        Self {
            move_metric: MoveMetric::Close,
            min_quarters: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub fundamentals_ttl_minutes: u64,
    pub fundamentals_max_size: usize,
    pub sentiment_ttl_hours: u64,
    pub vrp_ttl_minutes: u64,
    pub chain_ttl_minutes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            fundamentals_ttl_minutes: 15,
            fundamentals_max_size: 1000,
            sentiment_ttl_hours: 24,
            vrp_ttl_minutes: 60,
            chain_ttl_minutes: 10,
        }
    }
}

impl CacheSettings {
    pub fn fundamentals_ttl(&self) -> Duration {
        Duration::from_secs(self.fundamentals_ttl_minutes * 60)
    }

    pub fn vrp_ttl(&self) -> Duration {
        Duration::from_secs(self.vrp_ttl_minutes * 60)
    }

    pub fn chain_ttl(&self) -> Duration {
        Duration::from_secs(self.chain_ttl_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub rate_capacity: f64,
    pub rate_refill_per_sec: f64,
    pub breaker_failures: u32,
    pub breaker_recovery_s: u64,
    pub retry_max: u32,
    pub retry_base_delay_s: f64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            rate_capacity: 5.0,
            rate_refill_per_sec: 2.0,
            breaker_failures: 5,
            breaker_recovery_s: 60,
            retry_max: 3,
            retry_base_delay_s: 2.0,
        }
    }
}

impl ResilienceSettings {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_capacity,
            refill_per_sec: self.rate_refill_per_sec,
        }
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failures,
            recovery_timeout: Duration::from_secs(self.breaker_recovery_s),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_max,
            base_delay: Duration::from_secs_f64(self.retry_base_delay_s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub tradier_api_key: String,
    pub tradier_sandbox: bool,
    pub finnhub_api_key: String,
    pub alphavantage_api_key: String,
    pub perplexity_api_key: String,
    pub perplexity_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub port: u16,
    /// X-API-Key secret; empty means the authenticated surface is disabled.
    pub api_key: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub job_timeout_s: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { job_timeout_s: 600 }
    }
}

impl SchedulerSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_s)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut budget = HashMap::new();
        budget.insert("perplexity".to_string(), BudgetLimits::default());
        Self {
            database_path: "ivscan.db".to_string(),
            scan: ScanSettings::default(),
            scoring: ScoringSettings::default(),
            vrp: VrpSettings::default(),
            skew: SkewConfig::default(),
            liquidity: LiquidityConfig::default(),
            tail_risk: TailRiskConfig::default(),
            strategy: StrategyConfig::default(),
            anomaly: AnomalyConfig::default(),
            cache: CacheSettings::default(),
            resilience: ResilienceSettings::default(),
            budget,
            providers: ProviderSettings::default(),
            api: ApiSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the TOML file when present, then by environment.
    pub fn load(path: Option<&str>) -> AppResult<Config> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| AppError::Configuration(format!("read {p}: {e}")))?;
                toml::from_str(&raw)
                    .map_err(|e| AppError::Configuration(format!("parse {p}: {e}")))?
            }
            Some(p) => {
                return Err(AppError::Configuration(format!("config file {p} not found")))
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        info!(profile = %config.scoring.profile, "configuration loaded");
        Ok(config)
    }

    fn apply_env(&mut self) {
        let overrides: &mut [(&str, &mut String)] = &mut [
            ("IVSCAN_DB_PATH", &mut self.database_path),
            ("TRADIER_API_KEY", &mut self.providers.tradier_api_key),
            ("FINNHUB_API_KEY", &mut self.providers.finnhub_api_key),
            ("ALPHAVANTAGE_API_KEY", &mut self.providers.alphavantage_api_key),
            ("PERPLEXITY_API_KEY", &mut self.providers.perplexity_api_key),
            ("API_KEY", &mut self.api.api_key),
            ("IVSCAN_PROFILE", &mut self.scoring.profile),
        ];
        for (var, slot) in overrides.iter_mut() {
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    **slot = value;
                }
            }
        }
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.api.port = port;
            }
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        self.scoring.weights.validate()?;

        if self.scan.concurrency == 0 {
            return Err(AppError::Configuration("scan.concurrency must be > 0".into()));
        }
        if self.scan.position_size == 0 {
            return Err(AppError::Configuration("scan.position_size must be > 0".into()));
        }
        if self.vrp.min_quarters == 0 {
            return Err(AppError::Configuration("vrp.min_quarters must be > 0".into()));
        }
        if !matches!(self.scoring.profile.as_str(), "aggressive" | "conservative") {
            return Err(AppError::Configuration(format!(
                "unknown scoring profile '{}'",
                self.scoring.profile
            )));
        }

        let vrp = self.vrp_config();
        if !(vrp.threshold_excellent > vrp.threshold_good
            && vrp.threshold_good > vrp.threshold_marginal
            && vrp.threshold_marginal > 0.0)
        {
            return Err(AppError::Configuration(format!(
                "vrp thresholds must be strictly descending, got {}/{}/{}",
                vrp.threshold_excellent, vrp.threshold_good, vrp.threshold_marginal
            )));
        }

        if self.resilience.rate_refill_per_sec <= 0.0 || self.resilience.rate_capacity < 1.0 {
            return Err(AppError::Configuration("invalid rate limiter settings".into()));
        }
        if self.resilience.breaker_failures == 0 {
            return Err(AppError::Configuration("breaker_failures must be > 0".into()));
        }
        Ok(())
    }

    /// VRP thresholds for the active scoring profile.
    pub fn vrp_config(&self) -> VrpConfig {
        let mut vrp = match self.scoring.profile.as_str() {
            "conservative" => VrpConfig::conservative(),
            _ => VrpConfig::default(),
        };
        vrp.min_quarters = self.vrp.min_quarters;
        vrp.move_metric = self.vrp.move_metric;
        vrp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn aggressive_profile_resolves_spec_defaults() {
        let config = Config::default();
        let vrp = config.vrp_config();
        assert_eq!(vrp.threshold_excellent, 7.0);
        assert_eq!(vrp.threshold_good, 4.0);
        assert_eq!(vrp.threshold_marginal, 1.5);
    }

    #[test]
    fn conservative_profile_resolves() {
        let mut config = Config::default();
        config.scoring.profile = "conservative".to_string();
        let vrp = config.vrp_config();
        assert_eq!(vrp.threshold_excellent, 2.0);
        assert_eq!(vrp.threshold_good, 1.5);
        assert_eq!(vrp.threshold_marginal, 1.2);
    }

    #[test]
    fn unknown_profile_is_a_configuration_error() {
        let mut config = Config::default();
        config.scoring.profile = "yolo".to_string();
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = Config::default();
        config.scan.concurrency = 0;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn bad_weights_rejected_at_load() {
        let mut config = Config::default();
        config.scoring.weights.vrp = 0.9;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn toml_overlay_parses() {
        let raw = r#"
            database_path = "/tmp/scan.db"

            [scan]
            concurrency = 4
            position_size = 50

            [scoring]
            profile = "conservative"

            [vrp]
            move_metric = "intraday"

            [budget.perplexity]
            daily_calls = 20
            monthly_dollars = 10.0
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.database_path, "/tmp/scan.db");
        assert_eq!(config.scan.concurrency, 4);
        assert_eq!(config.scan.position_size, 50);
        assert_eq!(config.vrp.move_metric, MoveMetric::Intraday);
        assert_eq!(config.budget["perplexity"].daily_calls, 20);
        config.validate().unwrap();
        assert_eq!(config.vrp_config().threshold_excellent, 2.0);
    }

    #[test]
    fn missing_config_file_fails_fast() {
        assert!(matches!(
            Config::load(Some("/nonexistent/ivscan.toml")),
            Err(AppError::Configuration(_))
        ));
    }
}
