use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::entities::symbol::{InstrumentType, Symbol};
use crate::persistence::DatabaseError;

/// Repository for the tradable universe.
pub struct UniverseRepository {
    pool: SqlitePool,
}

impl UniverseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UniverseRepository { pool }
    }

    /// Upsert one symbol. Classification fields refresh on conflict;
    /// `first_seen_at` is preserved.
    pub async fn upsert(&self, symbol: &Symbol) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO symbols
                (ticker, name, instrument_type, sector, industry, active,
                 first_seen_at, deactivated_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                name = excluded.name,
                instrument_type = excluded.instrument_type,
                sector = excluded.sector,
                industry = excluded.industry,
                active = excluded.active,
                deactivated_at = excluded.deactivated_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&symbol.ticker)
        .bind(&symbol.name)
        .bind(symbol.instrument_type.as_str())
        .bind(&symbol.sector)
        .bind(&symbol.industry)
        .bind(symbol.active)
        .bind(symbol.first_seen_at)
        .bind(symbol.deactivated_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, ticker: &str) -> Result<Option<Symbol>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT ticker, name, instrument_type, sector, industry, active,
                   first_seen_at, deactivated_at
            FROM symbols
            WHERE ticker = ?
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_symbol).transpose()
    }

    /// All active symbols, ordered by ticker.
    pub async fn get_active(&self) -> Result<Vec<Symbol>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, name, instrument_type, sector, industry, active,
                   first_seen_at, deactivated_at
            FROM symbols
            WHERE active = 1
            ORDER BY ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_symbol).collect()
    }

    pub async fn active_tickers(&self) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query("SELECT ticker FROM symbols WHERE active = 1 ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("ticker"))
            .collect())
    }

    /// Flip the active flag. Deactivation stamps `deactivated_at`;
    /// reactivation clears it.
    pub async fn set_active(&self, ticker: &str, active: bool) -> Result<(), DatabaseError> {
        let deactivated_at: Option<DateTime<Utc>> = if active { None } else { Some(Utc::now()) };
        sqlx::query(
            r#"
            UPDATE symbols
            SET active = ?, deactivated_at = ?, updated_at = ?
            WHERE ticker = ?
            "#,
        )
        .bind(active)
        .bind(deactivated_at)
        .bind(Utc::now())
        .bind(ticker)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_symbol(row: sqlx::sqlite::SqliteRow) -> Result<Symbol, DatabaseError> {
    let instrument_raw = row.get::<String, _>("instrument_type");
    let instrument_type =
        InstrumentType::parse(&instrument_raw).map_err(DatabaseError::QueryError)?;

    Ok(Symbol {
        ticker: row.get("ticker"),
        name: row.get("name"),
        instrument_type,
        sector: row.get("sector"),
        industry: row.get("industry"),
        active: row.get("active"),
        first_seen_at: row.get("first_seen_at"),
        deactivated_at: row.get("deactivated_at"),
    })
}
