//! End-to-end pipeline tests over in-memory providers: universe sync,
//! ingestion, factor metrics, and composite scoring, plus the orchestration
//! guarantees (dependency gating, single-flight, idempotent re-runs).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

use mizani::application::orchestrator::{Orchestrator, OrchestratorSettings, RunParams};
use mizani::application::stages::composite_stage::CompositeStage;
use mizani::application::stages::factor_stage::FactorMetricStage;
use mizani::application::stages::ingest::ObservationIngestStage;
use mizani::application::stages::universe_sync::{GuardedRegistry, UniverseSyncStage};
use mizani::domain::entities::factor_metric::FactorMetric;
use mizani::domain::entities::pipeline_run::StageStatus;
use mizani::domain::entities::symbol::InstrumentType;
use mizani::domain::errors::ProviderError;
use mizani::domain::services::composite::CompositeEngine;
use mizani::domain::services::factors::{
    FactorCalculator, GrowthFactor, MomentumFactor, PositioningFactor, QualityFactor, RiskFactor,
    SentimentFactor, ValueFactor,
};
use mizani::domain::value_objects::category::{FactorCategory, SourceCategory};
use mizani::domain::value_objects::score::Score;
use mizani::domain::value_objects::weights::CompositeWeights;
use mizani::infrastructure::guard::{GuardConfig, ProviderAccessGuard};
use mizani::infrastructure::provider::{
    DateRange, Listing, ObservationProvider, ProviderRecord, SymbolRegistryProvider,
};
use mizani::persistence::init_memory_database;
use mizani::persistence::metric_repository::MetricRepository;
use mizani::persistence::score_repository::ScoreRepository;
use mizani::persistence::universe_repository::UniverseRepository;

const AS_OF: &str = "2026-08-07";

fn as_of() -> NaiveDate {
    AS_OF.parse().unwrap()
}

fn params() -> RunParams {
    RunParams::new(as_of())
}

fn guard(id: &str) -> Arc<ProviderAccessGuard> {
    Arc::new(ProviderAccessGuard::new(
        id,
        GuardConfig {
            requests_per_minute: 100_000,
            max_retries: 0,
            ..Default::default()
        },
    ))
}

struct StaticRegistry {
    listings: Vec<Listing>,
    delay: Duration,
}

#[async_trait]
impl SymbolRegistryProvider for StaticRegistry {
    fn provider_id(&self) -> &str {
        "registry"
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.listings.clone())
    }
}

struct CannedObservations {
    id: &'static str,
    records: Vec<ProviderRecord>,
}

#[async_trait]
impl ObservationProvider for CannedObservations {
    fn provider_id(&self) -> &str {
        self.id
    }

    async fn fetch(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<Vec<ProviderRecord>, ProviderError> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                symbols.contains(&r.symbol) && r.date >= range.start && r.date <= range.end
            })
            .cloned()
            .collect())
    }
}

fn listing(ticker: &str, sector: &str) -> Listing {
    Listing {
        ticker: ticker.to_string(),
        name: None,
        instrument_type: InstrumentType::Equity,
        sector: Some(sector.to_string()),
        industry: None,
    }
}

/// Daily closes ending the day before the scoring date.
fn price_series(symbol: &str, days: i64, start: f64, daily_growth: f64) -> Vec<ProviderRecord> {
    let end = as_of();
    (0..days)
        .map(|i| {
            let date = end - chrono::Duration::days(days - i);
            ProviderRecord {
                symbol: symbol.to_string(),
                date,
                fields: json!({
                    "close": start * (1.0 + daily_growth).powi(i as i32),
                    "volume": 1_000_000.0,
                }),
            }
        })
        .collect()
}

fn fundamentals(symbol: &str, eps: f64, revenue_growth: f64) -> ProviderRecord {
    ProviderRecord {
        symbol: symbol.to_string(),
        date: as_of() - chrono::Duration::days(7),
        fields: json!({
            "eps_ttm": eps,
            "eps_prior_ttm": eps * 0.8,
            "revenue_ttm": 100.0 * (1.0 + revenue_growth),
            "revenue_prior_ttm": 100.0,
            "book_value_per_share": 20.0,
            "operating_cash_flow_per_share": eps * 1.4,
            "net_income_ttm": eps * 10.0,
            "shareholder_equity": 80.0,
            "total_debt": 40.0,
            "gross_margin": 0.35,
        }),
    }
}

fn ownership(symbol: &str, upgrades: f64, downgrades: f64) -> ProviderRecord {
    ProviderRecord {
        symbol: symbol.to_string(),
        date: as_of() - chrono::Duration::days(3),
        fields: json!({
            "institutional_ownership_change": 0.02,
            "insider_net_shares": 5_000.0,
            "short_interest_pct": 0.04,
            "analyst_upgrades": upgrades,
            "analyst_downgrades": downgrades,
            "analyst_target_change_pct": 0.05,
        }),
    }
}

struct PipelineFixture {
    orchestrator: Orchestrator,
    pool: mizani::persistence::DbPool,
}

async fn build_pipeline(
    listings: Vec<Listing>,
    registry_delay: Duration,
    pricing: Vec<ProviderRecord>,
    fundamental_records: Vec<ProviderRecord>,
    ownership_records: Vec<ProviderRecord>,
) -> PipelineFixture {
    let pool = init_memory_database().await.unwrap();
    let mut orchestrator = Orchestrator::new(pool.clone(), OrchestratorSettings::default());

    orchestrator
        .register(Arc::new(UniverseSyncStage::new(vec![GuardedRegistry {
            provider: Arc::new(StaticRegistry {
                listings,
                delay: registry_delay,
            }),
            guard: guard("registry"),
        }])))
        .unwrap();

    for (source, id, records) in [
        (SourceCategory::Pricing, "pricing", pricing),
        (
            SourceCategory::Fundamentals,
            "fundamentals",
            fundamental_records,
        ),
        (SourceCategory::Ownership, "ownership", ownership_records),
    ] {
        orchestrator
            .register(Arc::new(ObservationIngestStage::new(
                source,
                Arc::new(CannedObservations { id, records }),
                guard(id),
                400,
            )))
            .unwrap();
    }

    let calculators: Vec<Arc<dyn FactorCalculator>> = vec![
        Arc::new(MomentumFactor::default()),
        Arc::new(ValueFactor),
        Arc::new(QualityFactor),
        Arc::new(GrowthFactor),
        Arc::new(PositioningFactor),
        Arc::new(RiskFactor::default()),
        Arc::new(SentimentFactor),
    ];
    for calculator in calculators {
        orchestrator
            .register(Arc::new(FactorMetricStage::new(calculator)))
            .unwrap();
    }

    let engine = CompositeEngine::new(CompositeWeights::standard(), 0.4, 2).unwrap();
    orchestrator
        .register(Arc::new(CompositeStage::new(engine)))
        .unwrap();

    PipelineFixture { orchestrator, pool }
}

fn standard_fixture_inputs() -> (
    Vec<Listing>,
    Vec<ProviderRecord>,
    Vec<ProviderRecord>,
    Vec<ProviderRecord>,
) {
    let listings = vec![
        listing("AAA", "Technology"),
        listing("BBB", "Technology"),
        listing("CCC", "Energy"),
    ];

    let mut pricing = Vec::new();
    pricing.extend(price_series("AAA", 300, 100.0, 0.002));
    pricing.extend(price_series("BBB", 300, 50.0, -0.001));
    // CCC: only 100 days, below the momentum history requirement.
    pricing.extend(price_series("CCC", 100, 30.0, 0.001));

    let fundamental_records = vec![
        fundamentals("AAA", 5.0, 0.25),
        fundamentals("BBB", 2.0, 0.02),
        fundamentals("CCC", 1.0, 0.10),
    ];
    let ownership_records = vec![
        ownership("AAA", 6.0, 1.0),
        ownership("BBB", 1.0, 4.0),
        ownership("CCC", 2.0, 2.0),
    ];

    (listings, pricing, fundamental_records, ownership_records)
}

async fn standard_fixture() -> PipelineFixture {
    let (listings, pricing, fundamental_records, ownership_records) = standard_fixture_inputs();
    build_pipeline(
        listings,
        Duration::ZERO,
        pricing,
        fundamental_records,
        ownership_records,
    )
    .await
}

#[tokio::test]
async fn test_full_cycle_produces_ranked_composites() {
    let fixture = standard_fixture().await;

    let reports = fixture.orchestrator.run_cycle(&params()).await.unwrap();
    assert_eq!(reports.len(), 12);
    for report in &reports {
        assert_eq!(
            report.status,
            StageStatus::Success,
            "stage {} was {:?}: {:?}",
            report.stage,
            report.status,
            report.message
        );
    }

    let scores = ScoreRepository::new(fixture.pool.clone())
        .get_by_date(as_of())
        .await
        .unwrap();
    assert_eq!(scores.len(), 3);

    for score in &scores {
        let composite = score.composite.expect("composite present");
        assert!((0.0..=100.0).contains(&composite));
        assert!((0.0..=1.0).contains(&score.completeness));
        assert!(score.percentile_rank.is_some());
    }

    // AAA dominates every factor input; it must outrank BBB.
    let rank = |t: &str| {
        scores
            .iter()
            .find(|s| s.symbol == t)
            .unwrap()
            .percentile_rank
            .unwrap()
    };
    assert!(rank("AAA") > rank("BBB"));

    // Technology has two scored peers (floor is 2): sector percentile set.
    // Energy has one: suppressed.
    let sector = |t: &str| {
        scores
            .iter()
            .find(|s| s.symbol == t)
            .unwrap()
            .sector_percentile
    };
    assert!(sector("AAA").is_some());
    assert!(sector("CCC").is_none());
}

#[tokio::test]
async fn test_short_history_nulls_momentum_only() {
    let fixture = standard_fixture().await;
    fixture.orchestrator.run_cycle(&params()).await.unwrap();

    let metrics = MetricRepository::new(fixture.pool.clone())
        .get_for_date(as_of())
        .await
        .unwrap();

    let ccc: Vec<&FactorMetric> = metrics.iter().filter(|m| m.symbol == "CCC").collect();
    assert_eq!(ccc.len(), 7);

    let by_category = |c: FactorCategory| ccc.iter().find(|m| m.category == c).unwrap();
    // 100 days < 252: momentum NULL, risk (63-day requirement) computed.
    assert!(by_category(FactorCategory::Momentum).is_null());
    assert!(!by_category(FactorCategory::Risk).is_null());
    assert!(!by_category(FactorCategory::Growth).is_null());
    assert!(!by_category(FactorCategory::Sentiment).is_null());

    // Composite still present: 80% of weight remains covered.
    let score = ScoreRepository::new(fixture.pool.clone())
        .get("CCC", as_of())
        .await
        .unwrap()
        .unwrap();
    assert!(score.composite.is_some());
    assert!((score.completeness - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_composite_blocked_without_upstream_success() {
    let fixture = standard_fixture().await;

    let report = fixture
        .orchestrator
        .run_stage("composite_scoring", &params())
        .await
        .unwrap();

    assert_eq!(report.status, StageStatus::Blocked);
    assert!(report.message.unwrap().contains("never succeeded"));

    // Zero writes performed.
    let scores = ScoreRepository::new(fixture.pool.clone())
        .get_by_date(as_of())
        .await
        .unwrap();
    assert!(scores.is_empty());
}

#[tokio::test]
async fn test_factor_stage_blocked_when_ingest_stale() {
    let fixture = standard_fixture().await;

    fixture
        .orchestrator
        .run_stage("universe_sync", &params())
        .await
        .unwrap();

    // Pricing never ran: momentum must block.
    let report = fixture
        .orchestrator
        .run_stage("factor_momentum", &params())
        .await
        .unwrap();
    assert_eq!(report.status, StageStatus::Blocked);

    let metrics = MetricRepository::new(fixture.pool.clone())
        .get_for_date(as_of())
        .await
        .unwrap();
    assert!(metrics.is_empty());
}

#[tokio::test]
async fn test_single_flight_rejects_concurrent_sync() {
    let (listings, pricing, fundamental_records, ownership_records) = standard_fixture_inputs();
    let fixture = build_pipeline(
        listings,
        Duration::from_millis(300),
        pricing,
        fundamental_records,
        ownership_records,
    )
    .await;
    let orchestrator = Arc::new(fixture.orchestrator);

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run_stage("universe_sync", &params())
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = orchestrator
        .run_stage("universe_sync", &params())
        .await
        .unwrap();
    let first = first.await.unwrap();

    let statuses = [first.status, second.status];
    assert!(statuses.contains(&StageStatus::Success));
    assert!(statuses.contains(&StageStatus::Blocked));
}

#[tokio::test]
async fn test_rescoring_cycle_is_idempotent() {
    let fixture = standard_fixture().await;

    fixture.orchestrator.run_cycle(&params()).await.unwrap();
    let first = ScoreRepository::new(fixture.pool.clone())
        .get_by_date(as_of())
        .await
        .unwrap();

    let mut forced = params();
    forced.force = true;
    fixture.orchestrator.run_cycle(&forced).await.unwrap();
    let second = ScoreRepository::new(fixture.pool.clone())
        .get_by_date(as_of())
        .await
        .unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.symbol, b.symbol);
        assert_eq!(a.composite, b.composite);
        assert_eq!(a.percentile_rank, b.percentile_rank);
        assert_eq!(a.sector_percentile, b.sector_percentile);
        assert_eq!(a.completeness, b.completeness);
        assert_eq!(a.contributions, b.contributions);
    }
}

#[tokio::test]
async fn test_universe_changes_survive_resync() {
    let fixture = standard_fixture().await;
    fixture
        .orchestrator
        .run_stage("universe_sync", &params())
        .await
        .unwrap();

    let repo = UniverseRepository::new(fixture.pool.clone());
    assert_eq!(repo.active_tickers().await.unwrap().len(), 3);

    // A second sync with the same listings changes nothing.
    let report = fixture
        .orchestrator
        .run_stage("universe_sync", &params())
        .await
        .unwrap();
    assert_eq!(report.status, StageStatus::Success);
    assert_eq!(repo.active_tickers().await.unwrap().len(), 3);
}

/// The worked two-category example: weights momentum=0.5/value=0.5,
/// AAA momentum=80 value=60, BBB momentum=NULL value=40.
#[tokio::test]
async fn test_two_category_worked_example() {
    let pool = init_memory_database().await.unwrap();
    let universe_repo = UniverseRepository::new(pool.clone());
    for ticker in ["AAA", "BBB"] {
        universe_repo
            .upsert(&mizani::domain::entities::symbol::Symbol::new(
                ticker,
                InstrumentType::Equity,
            ))
            .await
            .unwrap();
    }

    let metric = |symbol: &str, category: FactorCategory, value: Option<f64>| {
        FactorMetric::new(
            symbol,
            as_of(),
            category,
            value.map(|v| Score::new(v).unwrap()),
            json!({}),
        )
    };
    MetricRepository::new(pool.clone())
        .upsert_batch(&[
            metric("AAA", FactorCategory::Momentum, Some(80.0)),
            metric("AAA", FactorCategory::Value, Some(60.0)),
            metric("BBB", FactorCategory::Momentum, None),
            metric("BBB", FactorCategory::Value, Some(40.0)),
        ])
        .await
        .unwrap();

    let universe = universe_repo.get_active().await.unwrap();
    let metrics = MetricRepository::new(pool.clone())
        .get_for_date(as_of())
        .await
        .unwrap();

    let mut weights = BTreeMap::new();
    weights.insert(FactorCategory::Momentum, 0.5);
    weights.insert(FactorCategory::Value, 0.5);
    let engine = CompositeEngine::new(CompositeWeights::new(weights).unwrap(), 0.0, 5).unwrap();
    let scores = engine.score_date(&universe, &metrics, as_of());

    // Persist and read back through the serving-layer surface.
    let score_repo = ScoreRepository::new(pool.clone());
    score_repo.upsert_batch(&scores).await.unwrap();
    let stored = score_repo.get_by_date(as_of()).await.unwrap();

    let get = |t: &str| stored.iter().find(|s| s.symbol == t).unwrap();
    assert_eq!(get("AAA").composite, Some(70.0));
    assert_eq!(get("AAA").completeness, 1.0);
    assert_eq!(get("BBB").composite, Some(40.0));
    assert_eq!(get("BBB").completeness, 0.5);
}
