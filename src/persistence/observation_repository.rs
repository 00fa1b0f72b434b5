use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::domain::entities::raw_observation::{
    FundamentalFields, OwnershipFields, PricingFields, RawObservation,
};
use crate::domain::services::factors::{PricePoint, SymbolObservations};
use crate::domain::value_objects::category::SourceCategory;
use crate::persistence::DatabaseError;

/// Repository for raw per-source observations.
pub struct ObservationRepository {
    pool: SqlitePool,
}

impl ObservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ObservationRepository { pool }
    }

    /// Upsert a batch of observations inside one short transaction.
    /// Same-day re-ingestion replaces the payload rather than duplicating
    /// the row. Returns the number of rows written.
    pub async fn upsert_batch(
        &self,
        observations: &[RawObservation],
    ) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for observation in observations {
            let payload = serde_json::to_string(&observation.payload)
                .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO raw_observations (symbol, date, source_category, payload, ingested_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(symbol, date, source_category) DO UPDATE SET
                    payload = excluded.payload,
                    ingested_at = excluded.ingested_at
                "#,
            )
            .bind(&observation.symbol)
            .bind(observation.date)
            .bind(observation.source.as_str())
            .bind(payload)
            .bind(observation.ingested_at)
            .execute(&mut *tx)
            .await?;

            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Daily pricing points for one symbol up to and including `as_of`,
    /// oldest first, bounded to the most recent `max_days` rows. Rows
    /// without a usable close are dropped with a warning.
    pub async fn pricing_history(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        max_days: u32,
    ) -> Result<Vec<PricePoint>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT date, payload
            FROM raw_observations
            WHERE symbol = ? AND source_category = 'pricing' AND date <= ?
            ORDER BY date DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(as_of)
        .bind(max_days as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let date = row.get::<NaiveDate, _>("date");
            let payload = row.get::<String, _>("payload");
            match serde_json::from_str::<PricingFields>(&payload) {
                Ok(fields) => match fields.close {
                    Some(close) if close.is_finite() && close > 0.0 => points.push(PricePoint {
                        date,
                        close,
                        volume: fields.volume,
                    }),
                    _ => warn!(symbol = %symbol, date = %date, "Pricing row without usable close"),
                },
                Err(e) => {
                    warn!(symbol = %symbol, date = %date, error = %e, "Malformed pricing payload")
                }
            }
        }
        points.reverse();
        Ok(points)
    }

    /// Most recent fundamentals payload on or before `as_of`.
    pub async fn latest_fundamentals(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<Option<FundamentalFields>, DatabaseError> {
        self.latest_payload(symbol, SourceCategory::Fundamentals, as_of)
            .await
    }

    /// Most recent ownership payload on or before `as_of`.
    pub async fn latest_ownership(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<Option<OwnershipFields>, DatabaseError> {
        self.latest_payload(symbol, SourceCategory::Ownership, as_of)
            .await
    }

    async fn latest_payload<T: for<'de> serde::Deserialize<'de>>(
        &self,
        symbol: &str,
        source: SourceCategory,
        as_of: NaiveDate,
    ) -> Result<Option<T>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM raw_observations
            WHERE symbol = ? AND source_category = ? AND date <= ?
            ORDER BY date DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(source.as_str())
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload = row.get::<String, _>("payload");
                match serde_json::from_str(&payload) {
                    Ok(fields) => Ok(Some(fields)),
                    Err(e) => {
                        warn!(symbol = %symbol, source = %source, error = %e, "Malformed payload");
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    /// Everything a factor calculator needs for one symbol as of a date.
    pub async fn load_observations(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        history_days: u32,
    ) -> Result<SymbolObservations, DatabaseError> {
        let pricing = if history_days > 0 {
            self.pricing_history(symbol, as_of, history_days).await?
        } else {
            Vec::new()
        };

        Ok(SymbolObservations {
            pricing,
            fundamentals: self.latest_fundamentals(symbol, as_of).await?,
            ownership: self.latest_ownership(symbol, as_of).await?,
        })
    }

    /// Retention cleanup: drop observations older than `keep_days` before
    /// `as_of`. Returns the number of rows removed.
    pub async fn delete_older_than(
        &self,
        as_of: NaiveDate,
        keep_days: u32,
    ) -> Result<u64, DatabaseError> {
        let cutoff = as_of - chrono::Duration::days(keep_days as i64);
        let result = sqlx::query("DELETE FROM raw_observations WHERE date < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
