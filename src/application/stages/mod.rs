//! Pipeline stages.
//!
//! Every stage is an independently triggerable batch job behind one trait:
//! universe sync, the per-source observation ingestors, the seven factor
//! metric stages, and the composite scoring stage. Stages communicate only
//! through the persistent store; the orchestrator supplies gating,
//! single-flight locking, and the wall-clock budget.

pub mod composite_stage;
pub mod factor_stage;
pub mod ingest;
pub mod universe_sync;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::application::run_report::SkippedSymbol;
use crate::domain::entities::symbol::Symbol;
use crate::domain::errors::{ConfigError, ProviderError};
use crate::persistence::{DatabaseError, DbPool};

pub const STAGE_UNIVERSE_SYNC: &str = "universe_sync";
pub const STAGE_COMPOSITE: &str = "composite_scoring";

/// Default max-staleness per dependency edge kind.
pub const UNIVERSE_STALENESS: Duration = Duration::from_secs(36 * 3600);
pub const INGEST_STALENESS: Duration = Duration::from_secs(18 * 3600);
pub const FACTOR_STALENESS: Duration = Duration::from_secs(12 * 3600);

/// Bounded retry count for batch writes before the stage fails.
pub(crate) const BATCH_WRITE_RETRIES: u32 = 2;

/// One edge in the stage dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDependency {
    pub stage: &'static str,
    /// How fresh the dependency's last success must be for this stage to
    /// run.
    pub max_staleness: Duration,
}

/// Errors that abort a stage execution. Per-symbol problems never surface
/// here; they are contained in the run outcome's skip list.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Invocation parameters shared by every stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub pool: DbPool,
    pub as_of: NaiveDate,
    pub batch_size: usize,
    pub symbol_filter: Option<Vec<String>>,
}

impl StageContext {
    /// Restrict a symbol set to the caller-supplied filter, if any.
    pub fn apply_filter(&self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        match &self.symbol_filter {
            Some(filter) => symbols
                .into_iter()
                .filter(|s| filter.iter().any(|f| f == &s.ticker))
                .collect(),
            None => symbols,
        }
    }
}

/// What one execution accomplished.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Symbols fully processed without error.
    pub processed: usize,
    /// Symbols skipped, each with a reason for the run report.
    pub skipped: Vec<SkippedSymbol>,
    /// Free-form summary line for the report.
    pub message: Option<String>,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Declared upstream edges with per-edge max staleness.
    fn dependencies(&self) -> Vec<StageDependency> {
        Vec::new()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError>;
}

/// Retry a batch write up to [`BATCH_WRITE_RETRIES`] times before giving
/// up. Each batch owns its own short transaction, so a retry never replays
/// previously committed work.
pub(crate) async fn write_with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DatabaseError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < BATCH_WRITE_RETRIES => {
                attempt += 1;
                warn!(
                    batch = %label,
                    attempt = attempt,
                    max_retries = BATCH_WRITE_RETRIES,
                    error = %e,
                    "Batch write failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
