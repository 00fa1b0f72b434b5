use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::application::run_report::SkippedSymbol;
use crate::application::stages::{
    write_with_retry, PipelineStage, StageContext, StageDependency, StageError, StageOutcome,
    STAGE_UNIVERSE_SYNC, UNIVERSE_STALENESS,
};
use crate::domain::entities::raw_observation::{PricingFields, RawObservation};
use crate::domain::errors::DataIntegrityError;
use crate::domain::value_objects::category::SourceCategory;
use crate::infrastructure::guard::ProviderAccessGuard;
use crate::infrastructure::provider::{DateRange, ObservationProvider, ProviderRecord};
use crate::persistence::observation_repository::ObservationRepository;
use crate::persistence::universe_repository::UniverseRepository;

/// Generic raw-observation ingestor: one instance per source category, each
/// calling exactly one external provider through its access guard.
///
/// Symbols are fetched and upserted in batches, each batch in its own short
/// transaction. A bad record skips its symbol and the run continues; only an
/// unreachable provider aborts the stage.
pub struct ObservationIngestStage {
    source: SourceCategory,
    provider: Arc<dyn ObservationProvider>,
    guard: Arc<ProviderAccessGuard>,
    /// Calendar days of history requested per run.
    lookback_days: u32,
    /// When non-zero, observations older than this many days before the
    /// scoring date are cleaned up at the end of a run.
    retention_days: u32,
}

impl ObservationIngestStage {
    pub fn new(
        source: SourceCategory,
        provider: Arc<dyn ObservationProvider>,
        guard: Arc<ProviderAccessGuard>,
        lookback_days: u32,
    ) -> Self {
        ObservationIngestStage {
            source,
            provider,
            guard,
            lookback_days,
            retention_days: 0,
        }
    }

    pub fn with_retention(mut self, retention_days: u32) -> Self {
        self.retention_days = retention_days;
        self
    }

    /// Validate one provider record into a raw observation.
    fn convert(&self, record: &ProviderRecord) -> Result<RawObservation, DataIntegrityError> {
        if !record.fields.is_object() {
            return Err(DataIntegrityError::new(
                &record.symbol,
                "provider record payload is not an object",
            ));
        }

        if self.source == SourceCategory::Pricing {
            let fields: PricingFields = serde_json::from_value(record.fields.clone())
                .map_err(|e| DataIntegrityError::new(&record.symbol, e.to_string()))?;
            match fields.close {
                Some(close) if close.is_finite() && close > 0.0 => {}
                _ => {
                    return Err(DataIntegrityError::new(
                        &record.symbol,
                        "pricing record missing usable close",
                    ))
                }
            }
        }

        Ok(RawObservation::new(
            record.symbol.clone(),
            record.date,
            self.source,
            record.fields.clone(),
        ))
    }
}

#[async_trait]
impl PipelineStage for ObservationIngestStage {
    fn name(&self) -> &'static str {
        self.source.stage_name()
    }

    fn dependencies(&self) -> Vec<StageDependency> {
        vec![StageDependency {
            stage: STAGE_UNIVERSE_SYNC,
            max_staleness: UNIVERSE_STALENESS,
        }]
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let universe_repo = UniverseRepository::new(ctx.pool.clone());
        let observation_repo = ObservationRepository::new(ctx.pool.clone());

        let universe = ctx.apply_filter(universe_repo.get_active().await?);
        let tickers: Vec<String> = universe.into_iter().map(|s| s.ticker).collect();
        let range = DateRange::trailing(ctx.as_of, self.lookback_days);

        let mut processed = 0usize;
        let mut skipped: Vec<SkippedSymbol> = Vec::new();
        let mut rows_written = 0u64;

        for chunk in tickers.chunks(ctx.batch_size) {
            // Provider unreachable (after guard retries) aborts the whole
            // stage; batches committed so far stay committed.
            let records = match self.guard.call(|| self.provider.fetch(chunk, range)).await {
                Ok(records) => records,
                Err(e) => {
                    let stats = self.guard.stats().await;
                    warn!(
                        stage = self.name(),
                        provider = self.provider.provider_id(),
                        circuit_state = ?stats.circuit_state,
                        error = %e,
                        "Provider fetch failed, aborting stage"
                    );
                    return Err(e.into());
                }
            };

            let mut batch = Vec::with_capacity(records.len());
            let mut delivered: HashSet<String> = HashSet::new();
            let mut failed: HashSet<String> = HashSet::new();

            for record in &records {
                if record.date < range.start || record.date > range.end {
                    debug!(
                        symbol = %record.symbol,
                        date = %record.date,
                        "Dropping out-of-range provider record"
                    );
                    continue;
                }
                match self.convert(record) {
                    Ok(observation) => {
                        delivered.insert(observation.symbol.clone());
                        batch.push(observation);
                    }
                    Err(e) => {
                        warn!(symbol = %e.symbol, reason = %e.reason, "Skipping symbol");
                        failed.insert(e.symbol.clone());
                        skipped.push(SkippedSymbol::new(e.symbol, e.reason));
                    }
                }
            }

            rows_written += write_with_retry(self.name(), || {
                observation_repo.upsert_batch(&batch)
            })
            .await?;

            for ticker in chunk {
                if failed.contains(ticker) {
                    continue;
                }
                if delivered.contains(ticker) {
                    processed += 1;
                } else {
                    skipped.push(SkippedSymbol::new(ticker.clone(), "no data from provider"));
                }
            }
            // Batch dropped here; memory stays bounded by the batch size.
        }

        if self.retention_days > 0 {
            let removed = observation_repo
                .delete_older_than(ctx.as_of, self.retention_days)
                .await?;
            if removed > 0 {
                info!(
                    stage = self.name(),
                    removed = removed,
                    retention_days = self.retention_days,
                    "Expired old observations"
                );
            }
        }

        info!(
            stage = self.name(),
            processed = processed,
            skipped = skipped.len(),
            rows_written = rows_written,
            "Ingestion complete"
        );

        Ok(StageOutcome {
            processed,
            skipped,
            message: Some(format!("rows_written={}", rows_written)),
        })
    }
}
