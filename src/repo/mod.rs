use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::database::{with_busy_retry, Database};
use crate::domain::{EnergyLedgerEntry, PredictionRecord};

pub mod ledger;
pub mod predictions;
pub mod readings;

pub use ledger::LedgerRepository;
pub use predictions::PredictionRepository;
pub use readings::ReadingRepository;

/// Entry point to all store access; cheap to clone.
#[derive(Clone)]
pub struct Repositories {
    db: Database,
}

impl Repositories {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Get a readings repository
    pub fn readings(&self) -> ReadingRepository<'_> {
        ReadingRepository::new(self.db.pool(), self.db.retry_policy())
    }

    /// Get a predictions repository
    pub fn predictions(&self) -> PredictionRepository<'_> {
        PredictionRepository::new(self.db.pool(), self.db.retry_policy())
    }

    /// Get an energy ledger repository
    pub fn ledger(&self) -> LedgerRepository<'_> {
        LedgerRepository::new(self.db.pool(), self.db.retry_policy())
    }

    /// Persist one tick: the optional prediction and its ledger entry commit together or not at
    /// all. Returns the ledger row id.
    pub async fn record_tick(
        &self,
        prediction: Option<&PredictionRecord>,
        entry: &EnergyLedgerEntry,
    ) -> Result<i64> {
        let pool = self.db.pool();
        with_busy_retry(self.db.retry_policy(), "record_tick", || async move {
            let mut tx = pool.begin().await?;
            if let Some(record) = prediction {
                predictions::upsert_on(&mut *tx, record).await?;
            }
            let id = ledger::append_on(&mut *tx, entry).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(id)
        })
        .await
        .context("failed to record tick")
    }

    /// Count predictions newer than the last ledger entry and log them.
    ///
    /// `record_tick` never leaves such rows; they can only come from another writer. They are
    /// reported, never deleted. With an empty ledger every prediction predates this engine's
    /// accounting and nothing is reported.
    pub async fn check_orphans(&self) -> Result<u64> {
        let pool = self.db.pool();
        let (orphans,): (i64,) =
            with_busy_retry(self.db.retry_policy(), "check_orphans", || async move {
                sqlx::query_as(
                    r#"
                    SELECT COUNT(*) FROM predictions
                    WHERE timestamp > (SELECT MAX(timestamp) FROM energy_ledger)
                    "#,
                )
                .fetch_one(pool)
                .await
            })
            .await
            .context("failed to check for orphaned predictions")?;

        let orphans = orphans.max(0) as u64;
        if orphans > 0 {
            warn!(
                orphans,
                "predictions without a ledger entry found, left in place"
            );
        } else {
            info!("store consistent, no orphaned predictions");
        }
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{parse_timestamp, GeoLocation};

    fn prediction(ts: &str) -> PredictionRecord {
        PredictionRecord {
            timestamp: parse_timestamp(ts).unwrap(),
            predicted_power_w: 8.0,
        }
    }

    fn entry(ts: &str) -> EnergyLedgerEntry {
        EnergyLedgerEntry {
            timestamp: parse_timestamp(ts).unwrap(),
            location: GeoLocation {
                latitude: 2.3098,
                longitude: 111.8304,
            },
            irradiance_w_m2: None,
            temp_c: None,
            predicted_power_w: 8.0,
            cumulative_energy_wh: 1.0,
            daily_energy_wh: 1.0,
            solar_altitude_deg: None,
        }
    }

    async fn repos() -> Repositories {
        Repositories::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn record_tick_writes_both_rows() {
        let repos = repos().await;
        let ts = "2025-06-01 10:00:00";
        repos
            .record_tick(Some(&prediction(ts)), &entry(ts))
            .await
            .unwrap();

        assert_eq!(repos.predictions().count().await.unwrap(), 1);
        assert_eq!(repos.ledger().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn record_tick_without_prediction_writes_ledger_only() {
        let repos = repos().await;
        repos
            .record_tick(None, &entry("2025-06-01 10:00:00"))
            .await
            .unwrap();

        assert_eq!(repos.predictions().count().await.unwrap(), 0);
        assert_eq!(repos.ledger().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_tick_leaves_no_prediction() {
        let repos = repos().await;
        sqlx::query("DROP TABLE energy_ledger")
            .execute(repos.database().pool())
            .await
            .unwrap();

        let ts = "2025-06-01 10:00:00";
        assert!(repos
            .record_tick(Some(&prediction(ts)), &entry(ts))
            .await
            .is_err());
        assert_eq!(repos.predictions().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn orphan_check_counts_predictions_past_the_ledger_without_deleting() {
        let repos = repos().await;
        let t0 = "2025-06-01 10:00:00";
        repos
            .record_tick(Some(&prediction(t0)), &entry(t0))
            .await
            .unwrap();
        repos
            .predictions()
            .upsert(&prediction("2025-06-01 10:00:03"))
            .await
            .unwrap();

        assert_eq!(repos.check_orphans().await.unwrap(), 1);
        assert_eq!(repos.predictions().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn existing_predictions_survive_an_empty_ledger() {
        let repos = repos().await;
        for ts in [
            "2025-06-01 10:00:00",
            "2025-06-01 10:00:03",
            "2025-06-01 10:00:06",
        ] {
            repos.predictions().upsert(&prediction(ts)).await.unwrap();
        }

        assert_eq!(repos.check_orphans().await.unwrap(), 0);
        assert_eq!(repos.predictions().count().await.unwrap(), 3);
    }
}
