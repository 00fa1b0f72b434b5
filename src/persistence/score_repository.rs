use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::domain::entities::composite_score::CompositeScore;
use crate::domain::value_objects::category::FactorCategory;
use crate::persistence::DatabaseError;

/// Repository for composite scores. This and [`super::metric_repository`]
/// form the read surface consumed by the serving layer; the scoring core is
/// the only writer.
pub struct ScoreRepository {
    pool: SqlitePool,
}

impl ScoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ScoreRepository { pool }
    }

    /// Upsert a batch of composite rows inside one short transaction.
    pub async fn upsert_batch(&self, scores: &[CompositeScore]) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for score in scores {
            let contributions = serde_json::to_string(&score.contributions)
                .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO composite_scores
                    (symbol, date, composite, percentile_rank, sector_percentile,
                     contributions, completeness, computed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, date) DO UPDATE SET
                    composite = excluded.composite,
                    percentile_rank = excluded.percentile_rank,
                    sector_percentile = excluded.sector_percentile,
                    contributions = excluded.contributions,
                    completeness = excluded.completeness,
                    computed_at = excluded.computed_at
                "#,
            )
            .bind(&score.symbol)
            .bind(score.date)
            .bind(score.composite)
            .bind(score.percentile_rank)
            .bind(score.sector_percentile)
            .bind(contributions)
            .bind(score.completeness)
            .bind(score.computed_at)
            .execute(&mut *tx)
            .await?;

            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    pub async fn get(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<CompositeScore>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT symbol, date, composite, percentile_rank, sector_percentile,
                   contributions, completeness, computed_at
            FROM composite_scores
            WHERE symbol = ? AND date = ?
            "#,
        )
        .bind(symbol)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_score).transpose()
    }

    /// All composites for one date, highest first with NULLs last.
    pub async fn get_by_date(&self, date: NaiveDate) -> Result<Vec<CompositeScore>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, date, composite, percentile_rank, sector_percentile,
                   contributions, completeness, computed_at
            FROM composite_scores
            WHERE date = ?
            ORDER BY composite IS NULL, composite DESC, symbol
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_score).collect()
    }

    /// Composite history for one symbol over an inclusive date range.
    pub async fn get_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CompositeScore>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, date, composite, percentile_rank, sector_percentile,
                   contributions, completeness, computed_at
            FROM composite_scores
            WHERE symbol = ? AND date BETWEEN ? AND ?
            ORDER BY date
            "#,
        )
        .bind(symbol)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_score).collect()
    }
}

fn row_to_score(row: sqlx::sqlite::SqliteRow) -> Result<CompositeScore, DatabaseError> {
    let contributions: BTreeMap<FactorCategory, f64> =
        serde_json::from_str(&row.get::<String, _>("contributions"))
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

    Ok(CompositeScore {
        symbol: row.get("symbol"),
        date: row.get("date"),
        composite: row.get("composite"),
        percentile_rank: row.get("percentile_rank"),
        sector_percentile: row.get("sector_percentile"),
        contributions,
        completeness: row.get("completeness"),
        computed_at: row.get("computed_at"),
    })
}
