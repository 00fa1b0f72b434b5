use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mizani::application::orchestrator::{Orchestrator, OrchestratorSettings, RunParams};
use mizani::application::stages::composite_stage::CompositeStage;
use mizani::application::stages::factor_stage::FactorMetricStage;
use mizani::application::stages::ingest::ObservationIngestStage;
use mizani::application::stages::universe_sync::{GuardedRegistry, UniverseSyncStage};
use mizani::config::EngineConfig;
use mizani::domain::services::composite::CompositeEngine;
use mizani::domain::services::factors::{
    FactorCalculator, GrowthFactor, MomentumFactor, PositioningFactor, QualityFactor, RiskFactor,
    SentimentFactor, ValueFactor,
};
use mizani::domain::value_objects::category::SourceCategory;
use mizani::infrastructure::guard::ProviderAccessGuard;
use mizani::infrastructure::http_provider::{HttpDataProvider, HttpProviderConfig};
use mizani::persistence::{init_database_with, DatabaseConfig, DbPool};

#[derive(Parser)]
#[command(name = "mizani", about = "Multi-factor composite scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single pipeline stage and print its run report as JSON
    Run {
        /// Stage name (see `mizani stages`)
        stage: String,
        /// Scoring date, defaults to today (UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Symbols per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Comma-separated ticker filter
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
        /// Skip the dependency staleness gate
        #[arg(long)]
        force: bool,
    },
    /// Run every stage once in dependency order
    Cycle {
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        force: bool,
    },
    /// List registered stages and their dependency edges
    Stages,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mizani=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    let database = DatabaseConfig::from_env();
    let pool = init_database_with(&database.url, database.max_connections).await?;
    let orchestrator = build_pipeline(pool, &config)?;

    match cli.command {
        Command::Run {
            stage,
            as_of,
            batch_size,
            symbols,
            force,
        } => {
            let params = RunParams {
                as_of: as_of.unwrap_or_else(|| Utc::now().date_naive()),
                batch_size: batch_size.unwrap_or(config.batch_size),
                symbol_filter: symbols,
                force,
            };
            let report = orchestrator.run_stage(&stage, &params).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::from(report.exit_code() as u8))
        }
        Command::Cycle {
            as_of,
            batch_size,
            force,
        } => {
            let params = RunParams {
                as_of: as_of.unwrap_or_else(|| Utc::now().date_naive()),
                batch_size: batch_size.unwrap_or(config.batch_size),
                symbol_filter: None,
                force,
            };
            let reports = orchestrator.run_cycle(&params).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            let worst = reports.iter().map(|r| r.exit_code()).max().unwrap_or(0);
            Ok(ExitCode::from(worst as u8))
        }
        Command::Stages => {
            for stage in orchestrator.topological_order()? {
                let deps: Vec<&str> = stage.dependencies().iter().map(|d| d.stage).collect();
                if deps.is_empty() {
                    println!("{}", stage.name());
                } else {
                    println!("{} <- {}", stage.name(), deps.join(", "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Wire the full stage graph: universe sync, one ingestor per source, the
/// seven factor stages, and the composite engine, each provider behind its
/// own access guard.
fn build_pipeline(
    pool: DbPool,
    config: &EngineConfig,
) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let guard_config = config.guard_config();
    let http = |provider_id: &str,
                base_url: &str|
     -> Result<Arc<HttpDataProvider>, mizani::domain::errors::ProviderError> {
        HttpDataProvider::new(HttpProviderConfig {
            provider_id: provider_id.to_string(),
            base_url: base_url.to_string(),
            call_timeout: config.call_timeout(),
        })
        .map(Arc::new)
    };

    let registry = http("registry", &config.endpoints.registry_url)?;
    let pricing = http("pricing", &config.endpoints.pricing_url)?;
    let fundamentals = http("fundamentals", &config.endpoints.fundamentals_url)?;
    let ownership = http("ownership", &config.endpoints.ownership_url)?;

    let settings = OrchestratorSettings {
        min_success_fraction: config.min_success_fraction,
        stage_budget: std::time::Duration::from_secs(config.stage_budget_secs),
        lock_ttl: chrono::Duration::seconds(config.lock_ttl_secs),
        ..Default::default()
    };
    let mut orchestrator = Orchestrator::new(pool, settings);

    orchestrator.register(Arc::new(UniverseSyncStage::new(vec![GuardedRegistry {
        provider: registry,
        guard: Arc::new(ProviderAccessGuard::new("registry", guard_config.clone())),
    }])))?;

    for (source, provider) in [
        (SourceCategory::Pricing, pricing),
        (SourceCategory::Fundamentals, fundamentals),
        (SourceCategory::Ownership, ownership),
    ] {
        let guard = Arc::new(ProviderAccessGuard::new(
            source.stage_name().trim_start_matches("ingest_"),
            guard_config.clone(),
        ));
        orchestrator.register(Arc::new(
            ObservationIngestStage::new(source, provider, guard, config.observation_lookback_days)
                .with_retention(config.observation_retention_days),
        ))?;
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
        orchestrator.register(Arc::new(FactorMetricStage::new(calculator)))?;
    }

    let engine = CompositeEngine::new(
        config.weights.clone(),
        config.min_coverage,
        config.sector_rank_min_peers,
    )?;
    orchestrator.register(Arc::new(CompositeStage::new(engine)))?;

    orchestrator.validate()?;
    info!(
        stages = orchestrator.stage_names().len(),
        "Pipeline graph ready"
    );

    Ok(orchestrator)
}
