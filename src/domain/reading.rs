use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage format shared with the serial logger (local civil time, second resolution).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

#[derive(Debug, Error)]
#[error("unrecognised timestamp '{0}'")]
pub struct TimestampError(pub String);

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    let trimmed = raw.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| TimestampError(raw.to_string()))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Four light-dependent resistors arranged as a 2x2 cross around the panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightSensors {
    /// left-top
    pub lt: f64,
    /// right-top
    pub rt: f64,
    /// left-down
    pub ld: f64,
    /// right-down
    pub rd: f64,
}

/// One sample written by the tracker logger. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub light: LightSensors,
    pub h_angle: f64,
    pub v_angle: f64,
    pub v_panel: Option<f64>,
    pub i_panel: Option<f64>,
    /// Measured panel power; the training target, never used for energy accounting.
    pub p_panel: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn parses_logger_format() {
        let ts = parse_timestamp("2025-03-14 09:26:53").unwrap();
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_opt(9, 26, 53)
                .unwrap()
        );
    }

    #[test]
    fn parses_fractional_and_iso_variants() {
        let frac = parse_timestamp("2025-03-14 09:26:53.250").unwrap();
        assert_eq!(frac.second(), 53);
        assert!(parse_timestamp("2025-03-14T09:26:53").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn formats_without_fraction() {
        let ts = parse_timestamp("2025-03-14 09:26:53.9").unwrap();
        assert_eq!(format_timestamp(&ts), "2025-03-14 09:26:53");
    }
}
