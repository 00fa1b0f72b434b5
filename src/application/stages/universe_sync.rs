use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::stages::{
    PipelineStage, StageContext, StageError, StageOutcome, STAGE_UNIVERSE_SYNC,
};
use crate::domain::entities::symbol::Symbol;
use crate::domain::errors::ProviderError;
use crate::infrastructure::guard::ProviderAccessGuard;
use crate::infrastructure::provider::{Listing, SymbolRegistryProvider};
use crate::persistence::universe_repository::UniverseRepository;

/// A registry source paired with its access guard.
pub struct GuardedRegistry {
    pub provider: Arc<dyn SymbolRegistryProvider>,
    pub guard: Arc<ProviderAccessGuard>,
}

/// Result counts of one universe sync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UniverseSyncCounts {
    pub added: usize,
    pub reactivated: usize,
    pub deactivated: usize,
}

/// Synchronizes the tradable universe against one or more external symbol
/// registries. Idempotent: safe to run any number of times. When every
/// source fails the existing symbol table is left untouched.
pub struct UniverseSyncStage {
    sources: Vec<GuardedRegistry>,
}

impl UniverseSyncStage {
    pub fn new(sources: Vec<GuardedRegistry>) -> Self {
        UniverseSyncStage { sources }
    }

    async fn fetch_all_listings(&self) -> Result<Vec<Listing>, StageError> {
        let mut listings = Vec::new();
        let mut fetched_any = false;
        let mut last_error: Option<ProviderError> = None;

        for source in &self.sources {
            match source.guard.call(|| source.provider.fetch_listings()).await {
                Ok(batch) => {
                    info!(
                        provider = source.provider.provider_id(),
                        listings = batch.len(),
                        "Fetched registry listings"
                    );
                    fetched_any = true;
                    listings.extend(batch);
                }
                Err(e) => {
                    let stats = source.guard.stats().await;
                    warn!(
                        provider = source.provider.provider_id(),
                        circuit_state = ?stats.circuit_state,
                        consecutive_failures = stats.consecutive_failures,
                        error = %e,
                        "Registry source failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if !fetched_any {
            // Fail-safe, not fail-destructive: no source reachable means no
            // universe mutation at all.
            return Err(last_error
                .unwrap_or_else(|| {
                    ProviderError::Unreachable("no registry sources configured".to_string())
                })
                .into());
        }

        Ok(listings)
    }
}

#[async_trait]
impl PipelineStage for UniverseSyncStage {
    fn name(&self) -> &'static str {
        STAGE_UNIVERSE_SYNC
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let repo = UniverseRepository::new(ctx.pool.clone());
        let listings = self.fetch_all_listings().await?;

        // Deduplicate across sources; the first source listing a ticker
        // wins.
        let mut canonical: HashMap<&str, &Listing> = HashMap::new();
        for listing in &listings {
            canonical.entry(listing.ticker.as_str()).or_insert(listing);
        }

        let previously_active = repo.active_tickers().await?;
        let mut counts = UniverseSyncCounts::default();

        for (ticker, listing) in &canonical {
            let existing = repo.get(ticker).await?;
            match &existing {
                None => counts.added += 1,
                Some(symbol) if !symbol.active => counts.reactivated += 1,
                Some(_) => {}
            }

            let mut symbol = Symbol::new(listing.ticker.clone(), listing.instrument_type);
            symbol.name = listing.name.clone();
            symbol.sector = listing.sector.clone();
            symbol.industry = listing.industry.clone();
            if let Some(existing) = existing {
                symbol.first_seen_at = existing.first_seen_at;
            }
            repo.upsert(&symbol).await?;
        }

        // Symbols absent from every source registry are flagged inactive,
        // never deleted.
        for ticker in &previously_active {
            if !canonical.contains_key(ticker.as_str()) {
                repo.set_active(ticker, false).await?;
                counts.deactivated += 1;
            }
        }

        info!(
            added = counts.added,
            reactivated = counts.reactivated,
            deactivated = counts.deactivated,
            universe = canonical.len(),
            "Universe sync complete"
        );

        Ok(StageOutcome {
            processed: canonical.len(),
            skipped: Vec::new(),
            message: Some(format!(
                "added={} reactivated={} deactivated={}",
                counts.added, counts.reactivated, counts.deactivated
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::symbol::InstrumentType;
    use crate::infrastructure::guard::GuardConfig;
    use crate::persistence::init_memory_database;
    use std::sync::Mutex;

    struct StaticRegistry {
        id: &'static str,
        listings: Mutex<Result<Vec<Listing>, ProviderError>>,
    }

    #[async_trait]
    impl SymbolRegistryProvider for StaticRegistry {
        fn provider_id(&self) -> &str {
            self.id
        }

        async fn fetch_listings(&self) -> Result<Vec<Listing>, ProviderError> {
            self.listings.lock().unwrap().clone()
        }
    }

    fn listing(ticker: &str, instrument_type: InstrumentType) -> Listing {
        Listing {
            ticker: ticker.to_string(),
            name: None,
            instrument_type,
            sector: Some("Technology".to_string()),
            industry: None,
        }
    }

    fn stage_with(listings: Result<Vec<Listing>, ProviderError>) -> UniverseSyncStage {
        UniverseSyncStage::new(vec![GuardedRegistry {
            provider: Arc::new(StaticRegistry {
                id: "registry",
                listings: Mutex::new(listings),
            }),
            guard: Arc::new(ProviderAccessGuard::new(
                "registry",
                GuardConfig {
                    requests_per_minute: 10_000,
                    max_retries: 0,
                    ..Default::default()
                },
            )),
        }])
    }

    async fn ctx() -> StageContext {
        StageContext {
            pool: init_memory_database().await.unwrap(),
            as_of: "2026-08-07".parse().unwrap(),
            batch_size: 500,
            symbol_filter: None,
        }
    }

    #[tokio::test]
    async fn test_sync_adds_new_symbols() {
        let ctx = ctx().await;
        let stage = stage_with(Ok(vec![
            listing("AAA", InstrumentType::Equity),
            listing("BBB", InstrumentType::Fund),
        ]));

        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(
            outcome.message.as_deref(),
            Some("added=2 reactivated=0 deactivated=0")
        );

        let repo = UniverseRepository::new(ctx.pool.clone());
        assert_eq!(repo.active_tickers().await.unwrap(), vec!["AAA", "BBB"]);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let ctx = ctx().await;
        let stage = stage_with(Ok(vec![listing("AAA", InstrumentType::Equity)]));

        stage.execute(&ctx).await.unwrap();
        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("added=0 reactivated=0 deactivated=0")
        );
    }

    #[tokio::test]
    async fn test_sync_deactivates_missing_and_reactivates() {
        let ctx = ctx().await;
        let stage = stage_with(Ok(vec![
            listing("AAA", InstrumentType::Equity),
            listing("BBB", InstrumentType::Equity),
        ]));
        stage.execute(&ctx).await.unwrap();

        // BBB drops out of the registry.
        let stage = stage_with(Ok(vec![listing("AAA", InstrumentType::Equity)]));
        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("added=0 reactivated=0 deactivated=1")
        );

        let repo = UniverseRepository::new(ctx.pool.clone());
        assert_eq!(repo.active_tickers().await.unwrap(), vec!["AAA"]);
        // Row is retained, only flagged.
        assert!(repo.get("BBB").await.unwrap().is_some());

        // BBB returns.
        let stage = stage_with(Ok(vec![
            listing("AAA", InstrumentType::Equity),
            listing("BBB", InstrumentType::Equity),
        ]));
        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("added=0 reactivated=1 deactivated=0")
        );
    }

    #[tokio::test]
    async fn test_all_sources_failing_leaves_table_untouched() {
        let ctx = ctx().await;
        let stage = stage_with(Ok(vec![listing("AAA", InstrumentType::Equity)]));
        stage.execute(&ctx).await.unwrap();

        let failing = stage_with(Err(ProviderError::Server { status: 503 }));
        let result = failing.execute(&ctx).await;
        assert!(matches!(result, Err(StageError::Provider(_))));

        let repo = UniverseRepository::new(ctx.pool.clone());
        assert_eq!(repo.active_tickers().await.unwrap(), vec!["AAA"]);
    }

    #[tokio::test]
    async fn test_duplicate_listings_deduplicated() {
        let ctx = ctx().await;
        let stage = stage_with(Ok(vec![
            listing("AAA", InstrumentType::Equity),
            listing("AAA", InstrumentType::Fund),
        ]));

        let outcome = stage.execute(&ctx).await.unwrap();
        assert_eq!(outcome.processed, 1);

        let repo = UniverseRepository::new(ctx.pool.clone());
        let symbol = repo.get("AAA").await.unwrap().unwrap();
        // First listing wins.
        assert_eq!(symbol.instrument_type, InstrumentType::Equity);
    }
}
