use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::domain::entities::factor_metric::FactorMetric;
use crate::domain::value_objects::category::FactorCategory;
use crate::persistence::DatabaseError;

/// Repository for normalized factor metrics.
pub struct MetricRepository {
    pool: SqlitePool,
}

impl MetricRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MetricRepository { pool }
    }

    /// Upsert a batch of metric rows inside one short transaction.
    pub async fn upsert_batch(&self, metrics: &[FactorMetric]) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for metric in metrics {
            let inputs = serde_json::to_string(&metric.inputs)
                .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO factor_metrics (symbol, date, category, score, inputs, computed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, date, category) DO UPDATE SET
                    score = excluded.score,
                    inputs = excluded.inputs,
                    computed_at = excluded.computed_at
                "#,
            )
            .bind(&metric.symbol)
            .bind(metric.date)
            .bind(metric.category.as_str())
            .bind(metric.score)
            .bind(inputs)
            .bind(metric.computed_at)
            .execute(&mut *tx)
            .await?;

            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Every metric row for one date, all categories.
    pub async fn get_for_date(&self, date: NaiveDate) -> Result<Vec<FactorMetric>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, date, category, score, inputs, computed_at
            FROM factor_metrics
            WHERE date = ?
            ORDER BY symbol, category
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_metric).collect()
    }

    /// Metric history for one symbol over an inclusive date range.
    pub async fn get_for_symbol(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<FactorMetric>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, date, category, score, inputs, computed_at
            FROM factor_metrics
            WHERE symbol = ? AND date BETWEEN ? AND ?
            ORDER BY date, category
            "#,
        )
        .bind(symbol)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_metric).collect()
    }

    /// Non-null and total row counts per category for one date.
    pub async fn coverage_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<(FactorCategory, i64, i64)>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT category, COUNT(score) AS non_null, COUNT(*) AS total
            FROM factor_metrics
            WHERE date = ?
            GROUP BY category
            ORDER BY category
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let category = FactorCategory::parse(&row.get::<String, _>("category"))
                    .map_err(DatabaseError::QueryError)?;
                Ok((
                    category,
                    row.get::<i64, _>("non_null"),
                    row.get::<i64, _>("total"),
                ))
            })
            .collect()
    }
}

fn row_to_metric(row: sqlx::sqlite::SqliteRow) -> Result<FactorMetric, DatabaseError> {
    let category = FactorCategory::parse(&row.get::<String, _>("category"))
        .map_err(DatabaseError::QueryError)?;
    let inputs = serde_json::from_str(&row.get::<String, _>("inputs"))
        .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

    Ok(FactorMetric {
        symbol: row.get("symbol"),
        date: row.get("date"),
        category,
        score: row.get("score"),
        inputs,
        computed_at: row.get("computed_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::score::Score;
    use crate::persistence::init_memory_database;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn metric(symbol: &str, d: &str, category: FactorCategory, score: Option<f64>) -> FactorMetric {
        FactorMetric::new(
            symbol,
            date(d),
            category,
            score.map(|s| Score::new(s).unwrap()),
            json!({"sub": score}),
        )
    }

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let pool = init_memory_database().await.unwrap();
        let repo = MetricRepository::new(pool);

        repo.upsert_batch(&[
            metric("AAA", "2026-08-05", FactorCategory::Momentum, Some(80.0)),
            metric("AAA", "2026-08-05", FactorCategory::Value, None),
        ])
        .await
        .unwrap();

        let metrics = repo.get_for_date(date("2026-08-05")).await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].category, FactorCategory::Momentum);
        assert_eq!(metrics[0].score, Some(80.0));
        assert!(metrics[1].score.is_none());
    }

    #[tokio::test]
    async fn test_rerun_upserts_without_duplicates() {
        let pool = init_memory_database().await.unwrap();
        let repo = MetricRepository::new(pool);

        let first = metric("AAA", "2026-08-05", FactorCategory::Momentum, Some(80.0));
        repo.upsert_batch(&[first]).await.unwrap();
        let second = metric("AAA", "2026-08-05", FactorCategory::Momentum, Some(75.0));
        repo.upsert_batch(&[second]).await.unwrap();

        let metrics = repo.get_for_date(date("2026-08-05")).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].score, Some(75.0));
    }

    #[tokio::test]
    async fn test_get_for_symbol_range() {
        let pool = init_memory_database().await.unwrap();
        let repo = MetricRepository::new(pool);

        repo.upsert_batch(&[
            metric("AAA", "2026-08-03", FactorCategory::Momentum, Some(70.0)),
            metric("AAA", "2026-08-05", FactorCategory::Momentum, Some(80.0)),
            metric("BBB", "2026-08-05", FactorCategory::Momentum, Some(60.0)),
        ])
        .await
        .unwrap();

        let metrics = repo
            .get_for_symbol("AAA", date("2026-08-04"), date("2026-08-05"))
            .await
            .unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].score, Some(80.0));
    }

    #[tokio::test]
    async fn test_coverage_counts_nulls() {
        let pool = init_memory_database().await.unwrap();
        let repo = MetricRepository::new(pool);

        repo.upsert_batch(&[
            metric("AAA", "2026-08-05", FactorCategory::Momentum, Some(80.0)),
            metric("BBB", "2026-08-05", FactorCategory::Momentum, None),
        ])
        .await
        .unwrap();

        let coverage = repo.coverage_for_date(date("2026-08-05")).await.unwrap();
        assert_eq!(coverage, vec![(FactorCategory::Momentum, 1, 2)]);
    }
}
