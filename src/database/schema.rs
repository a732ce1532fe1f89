use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Idempotent DDL. `readings` is normally created by the logger; creating it here lets the engine
/// start before the logger has written anything.
const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS readings (
        timestamp TEXT PRIMARY KEY,
        lt INTEGER,
        rt INTEGER,
        ld INTEGER,
        rd INTEGER,
        h_angle INTEGER,
        v_angle INTEGER,
        v_panel REAL,
        i_panel REAL,
        p_panel REAL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS predictions (
        timestamp TEXT PRIMARY KEY,
        predicted_power_w REAL NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS energy_ledger (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        lat REAL NOT NULL,
        lon REAL NOT NULL,
        irradiance REAL,
        temp_c REAL,
        predicted_power_w REAL NOT NULL,
        cumulative_energy_wh REAL NOT NULL,
        daily_energy_wh REAL NOT NULL,
        solar_altitude_deg REAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_energy_ledger_timestamp ON energy_ledger (timestamp)",
];

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to apply store schema")?;
    }
    Ok(())
}
