//! Persistence Layer
//!
//! SQLite storage for the five pipeline entities, with async access via
//! sqlx. Stages communicate exclusively through these tables; there is no
//! shared in-process state between them.
//!
//! # Tables
//! - `symbols`: the tradable universe; rows are deactivated, never deleted
//! - `raw_observations`: per-source time series, upserted by ingestors
//! - `factor_metrics`: one normalized category score per (symbol, date, category)
//! - `composite_scores`: weighted composite plus ranks per (symbol, date)
//! - `pipeline_runs`: per-stage freshness and single-flight bookkeeping

pub mod metric_repository;
pub mod observation_repository;
pub mod pipeline_repository;
pub mod score_repository;
pub mod universe_repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
///
/// # Arguments
/// - `database_url`: Path to SQLite database file (e.g., "sqlite://data/mizani.db")
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(database_url, DatabaseConfig::default().max_connections).await
}

/// Like [`init_database`] with an explicit pool bound.
pub async fn init_database_with(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");

    Ok(pool)
}

/// In-memory pool for tests. Bounded to a single connection so every query
/// sees the same in-memory database.
pub async fn init_memory_database() -> Result<DbPool, DatabaseError> {
    init_database_with("sqlite::memory:", 1).await
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS symbols (
            ticker TEXT PRIMARY KEY,
            name TEXT,
            instrument_type TEXT NOT NULL CHECK(instrument_type IN ('equity', 'fund')),
            sector TEXT,
            industry TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            first_seen_at DATETIME NOT NULL,
            deactivated_at DATETIME,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create symbols table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_observations (
            symbol TEXT NOT NULL,
            date DATE NOT NULL,
            source_category TEXT NOT NULL
                CHECK(source_category IN ('pricing', 'fundamentals', 'ownership')),
            payload TEXT NOT NULL,
            ingested_at DATETIME NOT NULL,
            PRIMARY KEY (symbol, date, source_category)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create raw_observations table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS factor_metrics (
            symbol TEXT NOT NULL,
            date DATE NOT NULL,
            category TEXT NOT NULL,
            score REAL,
            inputs TEXT NOT NULL,
            computed_at DATETIME NOT NULL,
            PRIMARY KEY (symbol, date, category)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create factor_metrics table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS composite_scores (
            symbol TEXT NOT NULL,
            date DATE NOT NULL,
            composite REAL,
            percentile_rank REAL,
            sector_percentile REAL,
            contributions TEXT NOT NULL,
            completeness REAL NOT NULL,
            computed_at DATETIME NOT NULL,
            PRIMARY KEY (symbol, date)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create composite_scores table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            stage TEXT PRIMARY KEY,
            depends_on TEXT NOT NULL DEFAULT '[]',
            last_success_at DATETIME,
            last_status TEXT,
            locked_by TEXT,
            locked_at DATETIME,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create pipeline_runs table: {}", e))
    })?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_symbols_active ON symbols(active)",
        "CREATE INDEX IF NOT EXISTS idx_observations_date ON raw_observations(date)",
        "CREATE INDEX IF NOT EXISTS idx_observations_symbol_source \
         ON raw_observations(symbol, source_category, date)",
        "CREATE INDEX IF NOT EXISTS idx_metrics_date ON factor_metrics(date, category)",
        "CREATE INDEX IF NOT EXISTS idx_scores_date ON composite_scores(date)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/mizani.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/mizani.db".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/mizani.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Self {
            url,
            max_connections,
        }
    }
}
