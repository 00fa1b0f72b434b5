use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::entities::pipeline_run::{PipelineRun, StageStatus};
use crate::persistence::DatabaseError;

/// Repository for per-stage pipeline state: freshness tracking and the
/// single-flight execution lock.
pub struct PipelineRepository {
    pool: SqlitePool,
}

impl PipelineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PipelineRepository { pool }
    }

    /// Ensure a state row exists for the stage and record its declared
    /// dependency names.
    pub async fn register(&self, stage: &str, depends_on: &[String]) -> Result<(), DatabaseError> {
        let deps = serde_json::to_string(depends_on)
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (stage, depends_on, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(stage) DO UPDATE SET
                depends_on = excluded.depends_on
            "#,
        )
        .bind(stage)
        .bind(deps)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, stage: &str) -> Result<Option<PipelineRun>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT stage, depends_on, last_success_at, last_status, locked_by, locked_at
            FROM pipeline_runs
            WHERE stage = ?
            "#,
        )
        .bind(stage)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_run).transpose()
    }

    pub async fn last_success_at(
        &self,
        stage: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.get(stage).await?.and_then(|run| run.last_success_at))
    }

    /// Claim the stage's single-flight lock by compare-and-swap.
    ///
    /// Succeeds only when no live lock is held; locks older than
    /// `lock_ttl` are treated as abandoned by a crashed runner and are
    /// reclaimable. SQLite serializes writers, so exactly one concurrent
    /// claimant observes `rows_affected == 1`.
    pub async fn try_claim(
        &self,
        stage: &str,
        runner_id: &str,
        lock_ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let expiry = now - lock_ttl;

        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET locked_by = ?, locked_at = ?, updated_at = ?
            WHERE stage = ?
              AND (locked_by IS NULL OR locked_at IS NULL OR locked_at < ?)
            "#,
        )
        .bind(runner_id)
        .bind(now)
        .bind(now)
        .bind(stage)
        .bind(expiry)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the lock and record the terminal status. `last_success_at`
    /// advances only when `advance_success_to` is supplied. The update is
    /// fenced on `locked_by` so a runner whose expired lock was reclaimed
    /// cannot clobber the new holder.
    pub async fn release(
        &self,
        stage: &str,
        runner_id: &str,
        status: StageStatus,
        advance_success_to: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET locked_by = NULL,
                locked_at = NULL,
                last_status = ?,
                last_success_at = COALESCE(?, last_success_at),
                updated_at = ?
            WHERE stage = ? AND locked_by = ?
            "#,
        )
        .bind(status.as_str())
        .bind(advance_success_to)
        .bind(Utc::now())
        .bind(stage)
        .bind(runner_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_run(row: sqlx::sqlite::SqliteRow) -> Result<PipelineRun, DatabaseError> {
    let depends_on: Vec<String> = serde_json::from_str(&row.get::<String, _>("depends_on"))
        .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
    let last_status = row
        .get::<Option<String>, _>("last_status")
        .map(|s| StageStatus::parse(&s).map_err(DatabaseError::QueryError))
        .transpose()?;

    Ok(PipelineRun {
        stage: row.get("stage"),
        depends_on,
        last_success_at: row.get("last_success_at"),
        last_status,
        locked_by: row.get("locked_by"),
        locked_at: row.get("locked_at"),
    })
}
