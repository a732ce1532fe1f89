//! Feature engineering for the power regression.
//!
//! Derivations mirror the tracker firmware: the sensor pairs that drive the two axes are averaged
//! and their differences are the balance errors the firmware steers on.

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::weather::WeatherSample;
use crate::domain::Reading;

/// Full-scale value of the 10-bit ADC reading the light sensors.
pub const SENSOR_FULL_SCALE: f64 = 1023.0;

pub const FEATURE_COUNT: usize = 10;

/// Column order used for training and inference; must never be reordered.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "avg_light",
    "err_lr",
    "err_tb",
    "err_total",
    "brightness_norm",
    "hour",
    "h_angle",
    "v_angle",
    "irradiance",
    "temp_air",
];

/// Index of the first weather-sourced feature; everything before it is always present.
pub const WEATHER_FEATURES_START: usize = 8;

/// Fixed-shape model input derived from one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub avg_light: f64,
    /// Horizontal error: left average minus right average
    pub err_lr: f64,
    /// Vertical error: top average minus bottom average
    pub err_tb: f64,
    pub err_total: f64,
    pub brightness_norm: f64,
    /// Fractional hour of day from the reading's own timestamp
    pub hour: f64,
    pub h_angle: f64,
    pub v_angle: f64,
    /// `None` when the weather sample failed
    pub irradiance: Option<f64>,
    /// `None` when the weather sample failed
    pub temp_air: Option<f64>,
}

impl FeatureVector {
    pub fn derive(reading: &Reading, weather: WeatherSample) -> Self {
        let s = &reading.light;
        let top = (s.lt + s.rt) / 2.0;
        let bottom = (s.ld + s.rd) / 2.0;
        let left = (s.lt + s.ld) / 2.0;
        let right = (s.rt + s.rd) / 2.0;

        let err_tb = top - bottom;
        let err_lr = left - right;
        let avg_light = (s.lt + s.rt + s.ld + s.rd) / 4.0;

        let ts = reading.timestamp;
        let hour = ts.hour() as f64 + ts.minute() as f64 / 60.0;

        Self {
            avg_light,
            err_lr,
            err_tb,
            err_total: err_lr.abs() + err_tb.abs(),
            brightness_norm: avg_light / SENSOR_FULL_SCALE,
            hour,
            h_angle: reading.h_angle,
            v_angle: reading.v_angle,
            irradiance: weather.irradiance_w_m2,
            temp_air: weather.temp_c,
        }
    }

    pub fn values(&self) -> [Option<f64>; FEATURE_COUNT] {
        [
            Some(self.avg_light),
            Some(self.err_lr),
            Some(self.err_tb),
            Some(self.err_total),
            Some(self.brightness_norm),
            Some(self.hour),
            Some(self.h_angle),
            Some(self.v_angle),
            self.irradiance,
            self.temp_air,
        ]
    }

    pub fn missing_count(&self) -> usize {
        self.values().iter().filter(|v| v.is_none()).count()
    }

    /// Dense row for a regressor, filling missing features from `fill` (one value per column).
    pub fn to_row(&self, fill: &[f64]) -> anyhow::Result<Vec<f64>> {
        if fill.len() != FEATURE_COUNT {
            anyhow::bail!(
                "imputation vector has {} values, expected {}",
                fill.len(),
                FEATURE_COUNT
            );
        }
        Ok(self
            .values()
            .iter()
            .zip(fill)
            .map(|(value, fallback)| value.unwrap_or(*fallback))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{parse_timestamp, LightSensors};

    fn reading(ts: &str, lt: f64, rt: f64, ld: f64, rd: f64) -> Reading {
        Reading {
            timestamp: parse_timestamp(ts).unwrap(),
            light: LightSensors { lt, rt, ld, rd },
            h_angle: 95.0,
            v_angle: 40.0,
            v_panel: Some(5.1),
            i_panel: Some(0.2),
            p_panel: Some(1.02),
        }
    }

    #[test]
    fn derives_balance_errors_and_brightness() {
        let r = reading("2025-06-01 10:30:00", 800.0, 600.0, 400.0, 200.0);
        let fv = FeatureVector::derive(&r, WeatherSample::UNKNOWN);

        // top = 700, bottom = 300, left = 600, right = 400
        assert_eq!(fv.err_tb, 400.0);
        assert_eq!(fv.err_lr, 200.0);
        assert_eq!(fv.err_total, 600.0);
        assert_eq!(fv.avg_light, 500.0);
        assert!((fv.brightness_norm - 500.0 / 1023.0).abs() < 1e-12);
        assert_eq!(fv.hour, 10.5);
        assert_eq!(fv.h_angle, 95.0);
        assert_eq!(fv.v_angle, 40.0);
    }

    #[test]
    fn combined_error_uses_absolute_values() {
        let r = reading("2025-06-01 07:15:00", 100.0, 300.0, 200.0, 600.0);
        let fv = FeatureVector::derive(&r, WeatherSample::UNKNOWN);

        // top = 200, bottom = 400, left = 150, right = 450
        assert_eq!(fv.err_tb, -200.0);
        assert_eq!(fv.err_lr, -300.0);
        assert_eq!(fv.err_total, 500.0);
        assert_eq!(fv.hour, 7.25);
    }

    #[test]
    fn missing_weather_is_observable() {
        let r = reading("2025-06-01 12:00:00", 1.0, 1.0, 1.0, 1.0);
        let fv = FeatureVector::derive(&r, WeatherSample::UNKNOWN);
        assert_eq!(fv.irradiance, None);
        assert_eq!(fv.temp_air, None);
        assert_eq!(fv.missing_count(), 2);

        let sampled = FeatureVector::derive(
            &r,
            WeatherSample {
                irradiance_w_m2: Some(640.0),
                temp_c: Some(31.5),
            },
        );
        assert_eq!(sampled.missing_count(), 0);
        assert_eq!(sampled.irradiance, Some(640.0));
    }

    #[test]
    fn derivation_is_pure() {
        let r = reading("2025-06-01 15:45:00", 512.0, 498.0, 470.0, 455.0);
        let w = WeatherSample {
            irradiance_w_m2: Some(250.0),
            temp_c: Some(27.0),
        };
        assert_eq!(FeatureVector::derive(&r, w), FeatureVector::derive(&r, w));
    }

    #[test]
    fn to_row_imputes_only_missing_columns() {
        let r = reading("2025-06-01 12:00:00", 4.0, 4.0, 4.0, 4.0);
        let fv = FeatureVector::derive(
            &r,
            WeatherSample {
                irradiance_w_m2: None,
                temp_c: Some(30.0),
            },
        );
        let fill = [-1.0; FEATURE_COUNT];
        let row = fv.to_row(&fill).unwrap();
        assert_eq!(row.len(), FEATURE_COUNT);
        assert_eq!(row[0], 4.0);
        assert_eq!(row[WEATHER_FEATURES_START], -1.0);
        assert_eq!(row[WEATHER_FEATURES_START + 1], 30.0);

        assert!(fv.to_row(&[0.0; 3]).is_err());
    }
}
