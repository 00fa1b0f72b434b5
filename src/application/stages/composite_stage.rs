use async_trait::async_trait;
use tracing::info;

use crate::application::run_report::SkippedSymbol;
use crate::application::stages::{
    write_with_retry, PipelineStage, StageContext, StageDependency, StageError, StageOutcome,
    FACTOR_STALENESS, STAGE_COMPOSITE,
};
use crate::domain::services::composite::CompositeEngine;
use crate::domain::value_objects::category::FactorCategory;
use crate::persistence::metric_repository::MetricRepository;
use crate::persistence::score_repository::ScoreRepository;
use crate::persistence::universe_repository::UniverseRepository;

/// Combines the day's factor metrics into composite scores and ranks.
/// Gated on every factor stage being fresh; never reads metrics from any
/// other date.
pub struct CompositeStage {
    engine: CompositeEngine,
}

impl CompositeStage {
    pub fn new(engine: CompositeEngine) -> Self {
        CompositeStage { engine }
    }
}

#[async_trait]
impl PipelineStage for CompositeStage {
    fn name(&self) -> &'static str {
        STAGE_COMPOSITE
    }

    fn dependencies(&self) -> Vec<StageDependency> {
        // Gate on every category the weight table actually uses.
        self.engine
            .weights()
            .iter()
            .map(|(category, _)| StageDependency {
                stage: category.stage_name(),
                max_staleness: FACTOR_STALENESS,
            })
            .collect()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let universe_repo = UniverseRepository::new(ctx.pool.clone());
        let metric_repo = MetricRepository::new(ctx.pool.clone());
        let score_repo = ScoreRepository::new(ctx.pool.clone());

        let universe = ctx.apply_filter(universe_repo.get_active().await?);
        let allowed: std::collections::HashSet<&str> =
            universe.iter().map(|s| s.ticker.as_str()).collect();
        let metrics: Vec<_> = metric_repo
            .get_for_date(ctx.as_of)
            .await?
            .into_iter()
            .filter(|m| allowed.contains(m.symbol.as_str()))
            .collect();

        let scores = self.engine.score_date(&universe, &metrics, ctx.as_of);

        let scored: std::collections::HashSet<&str> =
            scores.iter().map(|s| s.symbol.as_str()).collect();
        let skipped: Vec<SkippedSymbol> = universe
            .iter()
            .filter(|s| !scored.contains(s.ticker.as_str()))
            .map(|s| SkippedSymbol::new(s.ticker.clone(), "no factor metrics for date"))
            .collect();

        for batch in scores.chunks(ctx.batch_size) {
            write_with_retry(self.name(), || score_repo.upsert_batch(batch)).await?;
        }

        let suppressed = scores.iter().filter(|s| s.composite.is_none()).count();
        let coverage = metric_repo.coverage_for_date(ctx.as_of).await?;
        let coverage_summary: Vec<String> = FactorCategory::ALL
            .iter()
            .map(|category| {
                let (non_null, total) = coverage
                    .iter()
                    .find(|(c, _, _)| c == category)
                    .map(|(_, non_null, total)| (*non_null, *total))
                    .unwrap_or((0, 0));
                format!("{}={}/{}", category, non_null, total)
            })
            .collect();

        info!(
            stage = STAGE_COMPOSITE,
            scored = scores.len(),
            suppressed = suppressed,
            coverage = %coverage_summary.join(" "),
            "Composite scoring complete"
        );

        Ok(StageOutcome {
            processed: scores.len(),
            skipped,
            message: Some(format!(
                "scored={} suppressed={} coverage: {}",
                scores.len(),
                suppressed,
                coverage_summary.join(" ")
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::factor_metric::FactorMetric;
    use crate::domain::entities::symbol::{InstrumentType, Symbol};
    use crate::domain::value_objects::score::Score;
    use crate::domain::value_objects::weights::CompositeWeights;
    use crate::persistence::init_memory_database;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn two_category_engine(min_coverage: f64) -> CompositeEngine {
        let mut weights = BTreeMap::new();
        weights.insert(FactorCategory::Momentum, 0.5);
        weights.insert(FactorCategory::Value, 0.5);
        CompositeEngine::new(CompositeWeights::new(weights).unwrap(), min_coverage, 5).unwrap()
    }

    async fn ctx_with_universe(tickers: &[&str]) -> StageContext {
        let pool = init_memory_database().await.unwrap();
        let repo = UniverseRepository::new(pool.clone());
        for ticker in tickers {
            repo.upsert(&Symbol::new(*ticker, InstrumentType::Equity))
                .await
                .unwrap();
        }
        StageContext {
            pool,
            as_of: "2026-08-07".parse().unwrap(),
            batch_size: 500,
            symbol_filter: None,
        }
    }

    fn metric(symbol: &str, category: FactorCategory, score: Option<f64>) -> FactorMetric {
        FactorMetric::new(
            symbol,
            "2026-08-07".parse().unwrap(),
            category,
            score.map(|s| Score::new(s).unwrap()),
            json!({}),
        )
    }

    #[tokio::test]
    async fn test_composite_stage_scores_and_ranks() {
        let ctx = ctx_with_universe(&["AAA", "BBB"]).await;
        MetricRepository::new(ctx.pool.clone())
            .upsert_batch(&[
                metric("AAA", FactorCategory::Momentum, Some(80.0)),
                metric("AAA", FactorCategory::Value, Some(60.0)),
                metric("BBB", FactorCategory::Momentum, None),
                metric("BBB", FactorCategory::Value, Some(40.0)),
            ])
            .await
            .unwrap();

        let stage = CompositeStage::new(two_category_engine(0.0));
        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert!(outcome.skipped.is_empty());

        let scores = ScoreRepository::new(ctx.pool.clone())
            .get_by_date(ctx.as_of)
            .await
            .unwrap();
        assert_eq!(scores[0].symbol, "AAA");
        assert_eq!(scores[0].composite, Some(70.0));
        assert_eq!(scores[1].composite, Some(40.0));
        assert_eq!(scores[1].completeness, 0.5);
    }

    #[tokio::test]
    async fn test_symbols_without_metrics_reported_skipped() {
        let ctx = ctx_with_universe(&["AAA", "GHOST"]).await;
        MetricRepository::new(ctx.pool.clone())
            .upsert_batch(&[
                metric("AAA", FactorCategory::Momentum, Some(80.0)),
                metric("AAA", FactorCategory::Value, Some(60.0)),
            ])
            .await
            .unwrap();

        let stage = CompositeStage::new(two_category_engine(0.0));
        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].symbol, "GHOST");
    }

    #[tokio::test]
    async fn test_rescoring_is_idempotent() {
        let ctx = ctx_with_universe(&["AAA"]).await;
        MetricRepository::new(ctx.pool.clone())
            .upsert_batch(&[
                metric("AAA", FactorCategory::Momentum, Some(80.0)),
                metric("AAA", FactorCategory::Value, Some(60.0)),
            ])
            .await
            .unwrap();

        let stage = CompositeStage::new(two_category_engine(0.0));
        stage.execute(&ctx).await.unwrap();
        let first = ScoreRepository::new(ctx.pool.clone())
            .get_by_date(ctx.as_of)
            .await
            .unwrap();

        stage.execute(&ctx).await.unwrap();
        let second = ScoreRepository::new(ctx.pool.clone())
            .get_by_date(ctx.as_of)
            .await
            .unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].composite, second[0].composite);
        assert_eq!(first[0].percentile_rank, second[0].percentile_rank);
        assert_eq!(first[0].completeness, second[0].completeness);
    }

    #[tokio::test]
    async fn test_symbol_filter_scopes_scoring() {
        let ctx = StageContext {
            symbol_filter: Some(vec!["AAA".to_string()]),
            ..ctx_with_universe(&["AAA", "BBB"]).await
        };
        MetricRepository::new(ctx.pool.clone())
            .upsert_batch(&[
                metric("AAA", FactorCategory::Momentum, Some(80.0)),
                metric("BBB", FactorCategory::Momentum, Some(60.0)),
            ])
            .await
            .unwrap();

        let stage = CompositeStage::new(two_category_engine(0.0));
        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(outcome.processed, 1);

        let scores = ScoreRepository::new(ctx.pool.clone())
            .get_by_date(ctx.as_of)
            .await
            .unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].symbol, "AAA");
    }

    #[test]
    fn test_dependencies_follow_weight_table() {
        let stage = CompositeStage::new(two_category_engine(0.0));
        let deps: Vec<&str> = stage.dependencies().iter().map(|d| d.stage).collect();
        assert_eq!(deps, vec!["factor_momentum", "factor_value"]);
    }
}
