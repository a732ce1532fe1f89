use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Geographic location of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Point prediction keyed by the triggering reading's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: NaiveDateTime,
    pub predicted_power_w: f64,
}

/// One row of the append-only energy ledger.
///
/// The most recent row is the accounting state; rows are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyLedgerEntry {
    pub timestamp: NaiveDateTime,
    pub location: GeoLocation,
    pub irradiance_w_m2: Option<f64>,
    pub temp_c: Option<f64>,
    pub predicted_power_w: f64,
    pub cumulative_energy_wh: f64,
    pub daily_energy_wh: f64,
    pub solar_altitude_deg: Option<f64>,
}
