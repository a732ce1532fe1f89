use anyhow::{Context, Result};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::database::{with_busy_retry, RetryPolicy};
use crate::domain::{format_timestamp, PredictionRecord};

/// Replace-on-conflict write, usable inside a transaction.
pub(crate) async fn upsert_on<'c, E>(executor: E, record: &PredictionRecord) -> sqlx::Result<()>
where
    E: SqliteExecutor<'c>,
{
    sqlx::query(
        r#"
        INSERT INTO predictions (timestamp, predicted_power_w)
        VALUES (?, ?)
        ON CONFLICT(timestamp) DO UPDATE SET predicted_power_w = excluded.predicted_power_w
        "#,
    )
    .bind(format_timestamp(&record.timestamp))
    .bind(record.predicted_power_w)
    .execute(executor)
    .await?;
    Ok(())
}

pub struct PredictionRepository<'a> {
    pool: &'a SqlitePool,
    retry: &'a RetryPolicy,
}

impl<'a> PredictionRepository<'a> {
    pub fn new(pool: &'a SqlitePool, retry: &'a RetryPolicy) -> Self {
        Self { pool, retry }
    }

    pub async fn upsert(&self, record: &PredictionRecord) -> Result<()> {
        let pool = self.pool;
        with_busy_retry(self.retry, "predictions.upsert", || async move {
            upsert_on(pool, record).await
        })
        .await
        .context("failed to upsert prediction")
    }

    pub async fn count(&self) -> Result<u64> {
        let pool = self.pool;
        let (count,): (i64,) = with_busy_retry(self.retry, "predictions.count", || async move {
            sqlx::query_as("SELECT COUNT(*) FROM predictions")
                .fetch_one(pool)
                .await
        })
        .await
        .context("failed to count predictions")?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::domain::parse_timestamp;

    fn record(ts: &str, w: f64) -> PredictionRecord {
        PredictionRecord {
            timestamp: parse_timestamp(ts).unwrap(),
            predicted_power_w: w,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_on_conflict() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = PredictionRepository::new(db.pool(), db.retry_policy());

        repo.upsert(&record("2025-06-01 10:00:00", 3.0)).await.unwrap();
        repo.upsert(&record("2025-06-01 10:00:00", 4.5)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let (stored,): (f64,) =
            sqlx::query_as("SELECT predicted_power_w FROM predictions WHERE timestamp = ?")
                .bind("2025-06-01 10:00:00")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(stored, 4.5);
    }

    #[tokio::test]
    async fn empty_table_counts_zero() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = PredictionRepository::new(db.pool(), db.retry_policy());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
