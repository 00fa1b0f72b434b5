use thiserror::Error;

/// Errors surfaced by external data providers.
///
/// Transient variants are retried with backoff inside the provider access
/// guard; the rest propagate to the calling stage immediately.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider rate limit hit (429)")]
    RateLimited,

    #[error("Provider server error (status {status})")]
    Server { status: u16 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("Concurrent call already in flight for provider {provider}")]
    Busy { provider: String },
}

impl ProviderError {
    /// Whether the guard should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::RateLimited
                | ProviderError::Server { .. }
                | ProviderError::Unreachable(_)
        )
    }
}

/// A required raw field is missing or malformed for an otherwise active
/// symbol. The symbol is skipped and logged; the batch continues.
#[derive(Debug, Error, Clone)]
#[error("Data integrity error for {symbol}: {reason}")]
pub struct DataIntegrityError {
    pub symbol: String,
    pub reason: String,
}

impl DataIntegrityError {
    pub fn new(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        DataIntegrityError {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

/// Fatal configuration errors. Raised at startup or constructor time,
/// before any stage performs writes.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("Composite weights must sum to 1.0, got {sum:.6}")]
    WeightSum { sum: f64 },

    #[error("Weight for {category} must be in [0.0, 1.0], got {weight}")]
    WeightRange { category: String, weight: f64 },

    #[error("Unknown factor category: {0}")]
    UnknownCategory(String),

    #[error("Invalid threshold {name}: {value}")]
    InvalidThreshold { name: String, value: f64 },

    #[error("Missing configuration value: {0}")]
    MissingValue(String),

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Stage {stage} declares unknown dependency {dependency}")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Duplicate pipeline stage registration: {0}")]
    DuplicateStage(String),

    #[error("Dependency cycle in pipeline graph involving {0}")]
    DependencyCycle(String),
}
