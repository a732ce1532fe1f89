//! Raw readings written by the tracker logger.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::database::{with_busy_retry, RetryPolicy};
use crate::domain::{format_timestamp, parse_timestamp, LightSensors, Reading};
use crate::forecast::WeatherSample;

/// Columns are cast to REAL because the logger's INTEGER columns may hold either storage class.
const READING_COLUMNS: &str = r#"
    r.timestamp AS timestamp,
    CAST(r.lt AS REAL) AS lt,
    CAST(r.rt AS REAL) AS rt,
    CAST(r.ld AS REAL) AS ld,
    CAST(r.rd AS REAL) AS rd,
    CAST(r.h_angle AS REAL) AS h_angle,
    CAST(r.v_angle AS REAL) AS v_angle,
    CAST(r.v_panel AS REAL) AS v_panel,
    CAST(r.i_panel AS REAL) AS i_panel,
    CAST(r.p_panel AS REAL) AS p_panel
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingRow {
    pub timestamp: String,
    pub lt: Option<f64>,
    pub rt: Option<f64>,
    pub ld: Option<f64>,
    pub rd: Option<f64>,
    pub h_angle: Option<f64>,
    pub v_angle: Option<f64>,
    pub v_panel: Option<f64>,
    pub i_panel: Option<f64>,
    pub p_panel: Option<f64>,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = anyhow::Error;

    /// Absent sensor or angle values read as 0; electrical values stay optional.
    fn try_from(row: ReadingRow) -> Result<Self> {
        Ok(Reading {
            timestamp: parse_timestamp(&row.timestamp)?,
            light: LightSensors {
                lt: row.lt.unwrap_or(0.0),
                rt: row.rt.unwrap_or(0.0),
                ld: row.ld.unwrap_or(0.0),
                rd: row.rd.unwrap_or(0.0),
            },
            h_angle: row.h_angle.unwrap_or(0.0),
            v_angle: row.v_angle.unwrap_or(0.0),
            v_panel: row.v_panel,
            i_panel: row.i_panel,
            p_panel: row.p_panel,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TrainingRow {
    #[sqlx(flatten)]
    reading: ReadingRow,
    irradiance: Option<f64>,
    temp_c: Option<f64>,
}

pub struct ReadingRepository<'a> {
    pool: &'a SqlitePool,
    retry: &'a RetryPolicy,
}

impl<'a> ReadingRepository<'a> {
    pub fn new(pool: &'a SqlitePool, retry: &'a RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Most recent reading by timestamp, if any.
    pub async fn latest(&self) -> Result<Option<Reading>> {
        let pool = self.pool;
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings r ORDER BY r.timestamp DESC LIMIT 1"
        );
        let sql = sql.as_str();
        let row = with_busy_retry(self.retry, "readings.latest", || async move {
            sqlx::query_as::<_, ReadingRow>(sql)
                .fetch_optional(pool)
                .await
        })
        .await
        .context("failed to fetch latest reading")?;

        row.map(Reading::try_from).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let pool = self.pool;
        let (count,): (i64,) = with_busy_retry(self.retry, "readings.count", || async move {
            sqlx::query_as("SELECT COUNT(*) FROM readings")
                .fetch_one(pool)
                .await
        })
        .await
        .context("failed to count readings")?;

        Ok(count.max(0) as u64)
    }

    /// Append a reading. The production writer is the logger; this serves tests and backfills.
    pub async fn insert(&self, reading: &Reading) -> Result<()> {
        let pool = self.pool;
        let ts = format_timestamp(&reading.timestamp);
        let ts = ts.as_str();
        with_busy_retry(self.retry, "readings.insert", || async move {
            sqlx::query(
                r#"
                INSERT INTO readings
                    (timestamp, lt, rt, ld, rd, h_angle, v_angle, v_panel, i_panel, p_panel)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(ts)
            .bind(reading.light.lt)
            .bind(reading.light.rt)
            .bind(reading.light.ld)
            .bind(reading.light.rd)
            .bind(reading.h_angle)
            .bind(reading.v_angle)
            .bind(reading.v_panel)
            .bind(reading.i_panel)
            .bind(reading.p_panel)
            .execute(pool)
            .await
        })
        .await
        .with_context(|| format!("failed to insert reading {ts}"))?;

        Ok(())
    }

    /// Readings with measured power, paired with the weather logged for the same timestamp.
    pub async fn training_rows(&self) -> Result<Vec<(Reading, WeatherSample)>> {
        let pool = self.pool;
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS}, l.irradiance AS irradiance, l.temp_c AS temp_c
            FROM readings r
            LEFT JOIN (
                SELECT timestamp, irradiance, temp_c
                FROM energy_ledger
                WHERE id IN (SELECT MAX(id) FROM energy_ledger GROUP BY timestamp)
            ) l ON l.timestamp = r.timestamp
            WHERE r.p_panel IS NOT NULL
            ORDER BY r.timestamp ASC
            "#
        );
        let sql = sql.as_str();
        let rows = with_busy_retry(self.retry, "readings.training_rows", || async move {
            sqlx::query_as::<_, TrainingRow>(sql).fetch_all(pool).await
        })
        .await
        .context("failed to load training rows")?;

        rows.into_iter()
            .map(|row| {
                let weather = WeatherSample {
                    irradiance_w_m2: row.irradiance,
                    temp_c: row.temp_c,
                };
                Ok((Reading::try_from(row.reading)?, weather))
            })
            .collect()
    }
}
