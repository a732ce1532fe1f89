//! Sun position for the site, used to annotate ledger rows.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::f64::consts::PI;

use crate::domain::GeoLocation;

/// Interpret a logger timestamp (local civil time at the site) as an instant.
///
/// Returns `None` for local times skipped by a DST transition. Ambiguous times resolve to the
/// earlier instant.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Equation of time in minutes (Spencer's approximation).
fn equation_of_time_min(day_of_year: f64) -> f64 {
    let b = 2.0 * PI * (day_of_year - 81.0) / 364.0;
    9.87 * (2.0 * b).sin() - 7.53 * b.cos() - 1.5 * b.sin()
}

/// Solar altitude above the horizon in degrees (negative below the horizon).
///
/// Accuracy is within about a degree, enough for diagnostic annotation.
pub fn solar_altitude_deg(location: GeoLocation, at: DateTime<Utc>) -> f64 {
    let day_of_year = at.ordinal() as f64;
    let utc_hour = at.hour() as f64 + at.minute() as f64 / 60.0 + at.second() as f64 / 3600.0;

    // Declination swings between -23.45° and +23.45° over the year
    let declination_rad = (23.45 * (360.0 / 365.0 * (day_of_year + 284.0) * PI / 180.0).sin())
        .to_radians();
    let latitude_rad = location.latitude.to_radians();

    let solar_time =
        utc_hour + location.longitude / 15.0 + equation_of_time_min(day_of_year) / 60.0;
    let hour_angle_rad = (15.0 * (solar_time - 12.0)).to_radians();

    let sin_altitude = latitude_rad.sin() * declination_rad.sin()
        + latitude_rad.cos() * declination_rad.cos() * hour_angle_rad.cos();

    sin_altitude.clamp(-1.0, 1.0).asin().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_timestamp;

    const SIBU: GeoLocation = GeoLocation {
        latitude: 2.3098,
        longitude: 111.8304,
    };

    #[test]
    fn kuching_is_utc_plus_eight() {
        let local = parse_timestamp("2025-03-20 12:00:00").unwrap();
        let utc = local_to_utc(local, chrono_tz::Asia::Kuching).unwrap();
        assert_eq!(utc.hour(), 4);
    }

    #[test]
    fn skipped_local_time_has_no_instant() {
        // 02:30 does not exist on the spring-forward day in New York
        let local = parse_timestamp("2025-03-09 02:30:00").unwrap();
        assert!(local_to_utc(local, chrono_tz::America::New_York).is_none());
    }

    #[test]
    fn near_zenith_at_equatorial_noon() {
        let local = parse_timestamp("2025-03-20 12:00:00").unwrap();
        let utc = local_to_utc(local, chrono_tz::Asia::Kuching).unwrap();
        let altitude = solar_altitude_deg(SIBU, utc);
        assert!(altitude > 75.0, "altitude {altitude}");
    }

    #[test]
    fn below_horizon_at_local_midnight() {
        let local = parse_timestamp("2025-06-01 00:00:00").unwrap();
        let utc = local_to_utc(local, chrono_tz::Asia::Kuching).unwrap();
        assert!(solar_altitude_deg(SIBU, utc) < -45.0);
    }

    #[test]
    fn morning_is_lower_than_noon() {
        let tz = chrono_tz::Asia::Kuching;
        let morning = local_to_utc(parse_timestamp("2025-06-01 08:00:00").unwrap(), tz).unwrap();
        let noon = local_to_utc(parse_timestamp("2025-06-01 12:30:00").unwrap(), tz).unwrap();
        let a_morning = solar_altitude_deg(SIBU, morning);
        let a_noon = solar_altitude_deg(SIBU, noon);
        assert!(a_morning > 0.0);
        assert!(a_morning < a_noon);
    }
}
