use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::ConfigError;
use crate::domain::value_objects::category::FactorCategory;
use crate::domain::value_objects::weights::CompositeWeights;
use crate::infrastructure::circuit_breaker::CircuitBreakerConfig;
use crate::infrastructure::guard::GuardConfig;

/// Base URLs for the external data sources, one per provider id.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub registry_url: String,
    pub pricing_url: String,
    pub fundamentals_url: String,
    pub ownership_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            registry_url: "http://localhost:8081/registry".to_string(),
            pricing_url: "http://localhost:8081/pricing".to_string(),
            fundamentals_url: "http://localhost:8081/fundamentals".to_string(),
            ownership_url: "http://localhost:8081/ownership".to_string(),
        }
    }
}

/// Engine and pipeline configuration.
///
/// Everything is overridable from the environment; invalid weight tables
/// and thresholds are fatal at load time, before any stage runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Composite weight per category; must sum to 1.0.
    pub weights: CompositeWeights,
    /// Minimum data completeness below which a composite is stored NULL.
    pub min_coverage: f64,
    /// Minimum sector peer-group size for the sector-relative percentile.
    pub sector_rank_min_peers: usize,
    /// Minimum processed fraction for a stage run to count as SUCCESS.
    pub min_success_fraction: f64,
    /// Symbols per ingestion/write batch.
    pub batch_size: usize,
    /// Wall-clock budget per stage execution (seconds).
    pub stage_budget_secs: u64,
    /// Age at which an abandoned single-flight lock is reclaimable (seconds).
    pub lock_ttl_secs: i64,
    /// Calendar days of history each ingestion run requests.
    pub observation_lookback_days: u32,
    /// Raw observations older than this are eligible for cleanup (days).
    pub observation_retention_days: u32,

    // Provider access guard tuning, shared by every provider.
    pub provider_requests_per_minute: u32,
    pub provider_max_retries: u32,
    pub provider_initial_backoff_ms: u64,
    pub provider_max_backoff_ms: u64,
    pub provider_call_timeout_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,

    pub endpoints: ProviderEndpoints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: CompositeWeights::standard(),
            min_coverage: 0.4,
            sector_rank_min_peers: 5,
            min_success_fraction: 0.8,
            batch_size: 500,
            stage_budget_secs: 900,
            lock_ttl_secs: 1800,
            observation_lookback_days: 400,
            observation_retention_days: 730,
            provider_requests_per_minute: 60,
            provider_max_retries: 3,
            provider_initial_backoff_ms: 500,
            provider_max_backoff_ms: 30_000,
            provider_call_timeout_secs: 30,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
            endpoints: ProviderEndpoints::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables. Unparsable values
    /// fall back to defaults with a warning; an invalid weight table or
    /// threshold is a hard error.
    pub fn from_env() -> Result<EngineConfig, ConfigError> {
        let mut config = EngineConfig::default();

        config.min_coverage = env_parse("MIZANI_MIN_COVERAGE", config.min_coverage);
        config.sector_rank_min_peers =
            env_parse("MIZANI_SECTOR_MIN_PEERS", config.sector_rank_min_peers);
        config.min_success_fraction =
            env_parse("MIZANI_MIN_SUCCESS_FRACTION", config.min_success_fraction);
        config.batch_size = env_parse("MIZANI_BATCH_SIZE", config.batch_size);
        config.stage_budget_secs = env_parse("MIZANI_STAGE_BUDGET_SECS", config.stage_budget_secs);
        config.lock_ttl_secs = env_parse("MIZANI_LOCK_TTL_SECS", config.lock_ttl_secs);
        config.observation_lookback_days =
            env_parse("MIZANI_LOOKBACK_DAYS", config.observation_lookback_days);
        config.observation_retention_days =
            env_parse("MIZANI_RETENTION_DAYS", config.observation_retention_days);
        config.provider_requests_per_minute = env_parse(
            "MIZANI_PROVIDER_RPM",
            config.provider_requests_per_minute,
        );
        config.provider_max_retries =
            env_parse("MIZANI_PROVIDER_MAX_RETRIES", config.provider_max_retries);
        config.provider_initial_backoff_ms = env_parse(
            "MIZANI_PROVIDER_BACKOFF_MS",
            config.provider_initial_backoff_ms,
        );
        config.provider_max_backoff_ms = env_parse(
            "MIZANI_PROVIDER_MAX_BACKOFF_MS",
            config.provider_max_backoff_ms,
        );
        config.provider_call_timeout_secs = env_parse(
            "MIZANI_PROVIDER_TIMEOUT_SECS",
            config.provider_call_timeout_secs,
        );
        config.breaker_failure_threshold = env_parse(
            "MIZANI_BREAKER_FAILURES",
            config.breaker_failure_threshold,
        );
        config.breaker_cooldown_secs =
            env_parse("MIZANI_BREAKER_COOLDOWN_SECS", config.breaker_cooldown_secs);

        if let Ok(url) = std::env::var("MIZANI_REGISTRY_URL") {
            config.endpoints.registry_url = url;
        }
        if let Ok(url) = std::env::var("MIZANI_PRICING_URL") {
            config.endpoints.pricing_url = url;
        }
        if let Ok(url) = std::env::var("MIZANI_FUNDAMENTALS_URL") {
            config.endpoints.fundamentals_url = url;
        }
        if let Ok(url) = std::env::var("MIZANI_OWNERSHIP_URL") {
            config.endpoints.ownership_url = url;
        }

        // Per-category weight overrides. Any override rebuilds the whole
        // table so the sum invariant is re-validated.
        let mut weights: BTreeMap<FactorCategory, f64> = config.weights.iter().collect();
        let mut overridden = false;
        for category in FactorCategory::ALL {
            let key = format!("MIZANI_WEIGHT_{}", category.as_str().to_uppercase());
            if let Ok(raw) = std::env::var(&key) {
                match raw.parse::<f64>() {
                    Ok(value) => {
                        weights.insert(category, value);
                        overridden = true;
                    }
                    Err(e) => {
                        return Err(ConfigError::MissingValue(format!(
                            "{} is not a number: {}",
                            key, e
                        )))
                    }
                }
            }
        }
        if overridden {
            config.weights = CompositeWeights::new(weights)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value, max) in [
            ("min_coverage", self.min_coverage, 1.0),
            ("min_success_fraction", self.min_success_fraction, 1.0),
        ] {
            if !value.is_finite() || !(0.0..=max).contains(&value) {
                return Err(ConfigError::InvalidThreshold {
                    name: name.to_string(),
                    value,
                });
            }
        }
        for (name, value) in [
            ("batch_size", self.batch_size as f64),
            ("sector_rank_min_peers", self.sector_rank_min_peers as f64),
            (
                "provider_requests_per_minute",
                self.provider_requests_per_minute as f64,
            ),
            ("stage_budget_secs", self.stage_budget_secs as f64),
        ] {
            if value < 1.0 {
                return Err(ConfigError::InvalidThreshold {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Guard tuning shared by every provider id.
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            requests_per_minute: self.provider_requests_per_minute,
            max_retries: self.provider_max_retries,
            initial_backoff: Duration::from_millis(self.provider_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.provider_max_backoff_ms),
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            },
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_call_timeout_secs)
    }
}

fn env_parse<T: FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    "Failed to parse {} value '{}', using default: {}",
                    key,
                    raw,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}
