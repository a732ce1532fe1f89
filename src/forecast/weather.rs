//! Current-conditions sampling (OpenWeatherMap)
//!
//! Supplies the two weather features of the power model. The sampler never fails: any network,
//! HTTP or decoding problem, or a response missing either field, degrades to "unknown" for both
//! and the poll loop's own cadence provides the retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WeatherConfig;
use crate::domain::GeoLocation;

/// Clear-sky irradiance assumed at zero cloud cover (W/m²).
pub const CLEAR_SKY_IRRADIANCE_W_M2: f64 = 1000.0;

/// Coarse weather sample; `None` when it could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherSample {
    pub irradiance_w_m2: Option<f64>,
    pub temp_c: Option<f64>,
}

impl WeatherSample {
    pub const UNKNOWN: Self = Self {
        irradiance_w_m2: None,
        temp_c: None,
    };
}

/// Irradiance proxy from cloud fraction: `max(0, 1000 * (1 - clouds / 100))`.
///
/// This is a clear-sky scaling, not a calibrated irradiance; it ignores sun position entirely and
/// only serves as a relative brightness feature.
pub fn irradiance_from_clouds(cloud_percent: f64) -> f64 {
    (CLEAR_SKY_IRRADIANCE_W_M2 * (1.0 - cloud_percent / 100.0)).max(0.0)
}

#[async_trait]
pub trait WeatherSampler: Send + Sync {
    /// One best-effort sample. Must not fail; problems are reported as unknown fields.
    async fn sample(&self, location: GeoLocation) -> WeatherSample;
}

/// OpenWeatherMap "current weather" client
pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(cfg: &WeatherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("solar-yield-engine/", env!("CARGO_PKG_VERSION"))),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build weather HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Fetch and decode the current conditions. A response without cloud cover or temperature
    /// is an error. Errors never carry the request URL, which holds the API key.
    pub async fn fetch(&self, location: GeoLocation) -> Result<WeatherSample> {
        debug!(
            base_url = %self.base_url,
            lat = location.latitude,
            lon = location.longitude,
            "fetching current weather"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("lat", format!("{:.4}", location.latitude)),
                ("lon", format!("{:.4}", location.longitude)),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("weather GET failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("weather API error: HTTP {status}");
        }

        let body: CurrentConditions = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("weather JSON parse failed")?;

        body.into_sample()
            .context("weather response missing clouds.all or main.temp")
    }
}

#[async_trait]
impl WeatherSampler for OpenWeatherClient {
    async fn sample(&self, location: GeoLocation) -> WeatherSample {
        if !self.has_credentials() {
            debug!("no weather API key configured, weather features unknown");
            return WeatherSample::UNKNOWN;
        }

        match self.fetch(location).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "weather fetch failed");
                WeatherSample::UNKNOWN
            }
        }
    }
}

// OpenWeatherMap response structures; only the fields we use.
#[derive(Debug, Deserialize)]
struct CurrentConditions {
    clouds: Option<Clouds>,
    main: Option<MainReadings>,
}

#[derive(Debug, Deserialize)]
struct Clouds {
    all: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: Option<f64>,
}

impl CurrentConditions {
    /// Both fields or nothing; a half-filled response is treated like a failed one.
    fn into_sample(self) -> Option<WeatherSample> {
        let clouds = self.clouds.and_then(|c| c.all).filter(|v| v.is_finite())?;
        let temp = self.main.and_then(|m| m.temp).filter(|v| v.is_finite())?;
        Some(WeatherSample {
            irradiance_w_m2: Some(irradiance_from_clouds(clouds)),
            temp_c: Some(temp),
        })
    }
}
