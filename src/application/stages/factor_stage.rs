use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::application::stages::{
    write_with_retry, PipelineStage, StageContext, StageDependency, StageError, StageOutcome,
    INGEST_STALENESS,
};
use crate::domain::services::factors::{compute_factor_metrics, FactorCalculator};
use crate::domain::value_objects::category::{FactorCategory, SourceCategory};
use crate::persistence::metric_repository::MetricRepository;
use crate::persistence::observation_repository::ObservationRepository;
use crate::persistence::universe_repository::UniverseRepository;

/// Source stages a factor category reads from.
fn source_stages(category: FactorCategory) -> Vec<SourceCategory> {
    match category {
        FactorCategory::Momentum | FactorCategory::Risk => vec![SourceCategory::Pricing],
        FactorCategory::Value => vec![SourceCategory::Pricing, SourceCategory::Fundamentals],
        FactorCategory::Quality | FactorCategory::Growth => vec![SourceCategory::Fundamentals],
        FactorCategory::Positioning | FactorCategory::Sentiment => vec![SourceCategory::Ownership],
    }
}

/// Wraps one [`FactorCalculator`] as a pipeline stage: loads the active
/// universe and its observation history, computes the cross-sectionally
/// normalized category scores, and upserts one metric row per symbol.
pub struct FactorMetricStage {
    calculator: Arc<dyn FactorCalculator>,
}

impl FactorMetricStage {
    pub fn new(calculator: Arc<dyn FactorCalculator>) -> Self {
        FactorMetricStage { calculator }
    }
}

#[async_trait]
impl PipelineStage for FactorMetricStage {
    fn name(&self) -> &'static str {
        self.calculator.category().stage_name()
    }

    fn dependencies(&self) -> Vec<StageDependency> {
        source_stages(self.calculator.category())
            .into_iter()
            .map(|source| StageDependency {
                stage: source.stage_name(),
                max_staleness: INGEST_STALENESS,
            })
            .collect()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let universe_repo = UniverseRepository::new(ctx.pool.clone());
        let observation_repo = ObservationRepository::new(ctx.pool.clone());
        let metric_repo = MetricRepository::new(ctx.pool.clone());

        let universe = ctx.apply_filter(universe_repo.get_active().await?);
        let history_days = self.calculator.history_days();

        let mut data = HashMap::with_capacity(universe.len());
        for symbol in &universe {
            let observations = observation_repo
                .load_observations(&symbol.ticker, ctx.as_of, history_days)
                .await?;
            data.insert(symbol.ticker.clone(), observations);
        }

        let metrics = compute_factor_metrics(self.calculator.as_ref(), &universe, &data, ctx.as_of);
        let non_null = metrics.iter().filter(|m| !m.is_null()).count();

        for batch in metrics.chunks(ctx.batch_size) {
            write_with_retry(self.name(), || metric_repo.upsert_batch(batch)).await?;
        }

        info!(
            stage = self.name(),
            symbols = metrics.len(),
            non_null = non_null,
            "Factor metrics computed"
        );

        Ok(StageOutcome {
            processed: metrics.len(),
            skipped: Vec::new(),
            message: Some(format!("non_null={} of {}", non_null, metrics.len())),
        })
    }
}
