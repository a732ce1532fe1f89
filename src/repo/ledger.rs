//! Append-only energy ledger. The most recent row is the accounting state.

use anyhow::{Context, Result};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::database::{with_busy_retry, RetryPolicy};
use crate::domain::{format_timestamp, parse_timestamp, EnergyLedgerEntry, GeoLocation};

#[derive(Debug, Clone, sqlx::FromRow)]
struct LedgerRow {
    timestamp: String,
    lat: f64,
    lon: f64,
    irradiance: Option<f64>,
    temp_c: Option<f64>,
    predicted_power_w: f64,
    cumulative_energy_wh: f64,
    daily_energy_wh: f64,
    solar_altitude_deg: Option<f64>,
}

impl TryFrom<LedgerRow> for EnergyLedgerEntry {
    type Error = anyhow::Error;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(EnergyLedgerEntry {
            timestamp: parse_timestamp(&row.timestamp)?,
            location: GeoLocation {
                latitude: row.lat,
                longitude: row.lon,
            },
            irradiance_w_m2: row.irradiance,
            temp_c: row.temp_c,
            predicted_power_w: row.predicted_power_w,
            cumulative_energy_wh: row.cumulative_energy_wh,
            daily_energy_wh: row.daily_energy_wh,
            solar_altitude_deg: row.solar_altitude_deg,
        })
    }
}

/// Insert one entry, usable inside a transaction. Returns the row id.
pub(crate) async fn append_on<'c, E>(executor: E, entry: &EnergyLedgerEntry) -> sqlx::Result<i64>
where
    E: SqliteExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO energy_ledger
            (timestamp, lat, lon, irradiance, temp_c, predicted_power_w,
             cumulative_energy_wh, daily_energy_wh, solar_altitude_deg)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(format_timestamp(&entry.timestamp))
    .bind(entry.location.latitude)
    .bind(entry.location.longitude)
    .bind(entry.irradiance_w_m2)
    .bind(entry.temp_c)
    .bind(entry.predicted_power_w)
    .bind(entry.cumulative_energy_wh)
    .bind(entry.daily_energy_wh)
    .bind(entry.solar_altitude_deg)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

pub struct LedgerRepository<'a> {
    pool: &'a SqlitePool,
    retry: &'a RetryPolicy,
}

impl<'a> LedgerRepository<'a> {
    pub fn new(pool: &'a SqlitePool, retry: &'a RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Most recent entry by timestamp; ties go to the later insert.
    pub async fn latest(&self) -> Result<Option<EnergyLedgerEntry>> {
        let pool = self.pool;
        let row = with_busy_retry(self.retry, "energy_ledger.latest", || async move {
            sqlx::query_as::<_, LedgerRow>(
                r#"
                SELECT timestamp,
                       CAST(lat AS REAL) AS lat,
                       CAST(lon AS REAL) AS lon,
                       CAST(irradiance AS REAL) AS irradiance,
                       CAST(temp_c AS REAL) AS temp_c,
                       CAST(predicted_power_w AS REAL) AS predicted_power_w,
                       CAST(cumulative_energy_wh AS REAL) AS cumulative_energy_wh,
                       CAST(daily_energy_wh AS REAL) AS daily_energy_wh,
                       CAST(solar_altitude_deg AS REAL) AS solar_altitude_deg
                FROM energy_ledger
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
                "#,
            )
            .fetch_optional(pool)
            .await
        })
        .await
        .context("failed to fetch latest ledger entry")?;

        row.map(EnergyLedgerEntry::try_from).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let pool = self.pool;
        let (count,): (i64,) = with_busy_retry(self.retry, "energy_ledger.count", || async move {
            sqlx::query_as("SELECT COUNT(*) FROM energy_ledger")
                .fetch_one(pool)
                .await
        })
        .await
        .context("failed to count ledger entries")?;
        Ok(count.max(0) as u64)
    }
}
