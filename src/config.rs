use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::domain::GeoLocation;
use crate::ml::ModelType;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const CONFIG_PATH_ENV: &str = "SOLAR_CONFIG";
pub const ENV_PREFIX: &str = "SOLAR__";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub site: SiteConfig,
    #[validate(nested)]
    pub store: StoreConfig,
    #[validate(nested)]
    pub model: ModelConfig,
    #[validate(nested)]
    pub engine: EngineConfig,
    #[validate(nested)]
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SiteConfig {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    /// IANA zone of the logger's local civil timestamps
    pub timezone: String,
}

impl SiteConfig {
    pub fn location(&self) -> GeoLocation {
        GeoLocation {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("invalid site.timezone '{}': {}", self.timezone, e))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub busy_retries: u32,
    pub busy_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub connect_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModelConfig {
    pub artifact_path: PathBuf,
    pub kind: ModelType,
    #[validate(range(min = 1))]
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
    #[validate(range(min = 2))]
    pub min_training_samples: usize,
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f64,
    #[validate(range(min = 1))]
    pub max_iterations: usize,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EngineConfig {
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,
    #[validate(range(min = 1))]
    pub idle_poll_interval_secs: u64,
    #[validate(range(min = 1))]
    pub retrain_interval_rows: u64,
    #[validate(range(min = 1))]
    pub max_elapsed_secs: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_interval_secs)
    }

    pub fn max_elapsed(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_elapsed_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WeatherConfig {
    #[validate(url)]
    pub base_url: String,
    /// Empty disables the weather call; irradiance and temperature are then reported missing.
    #[serde(default)]
    pub api_key: String,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl Config {
    /// Load from `$SOLAR_CONFIG` (or `config/default.toml`) layered under `SOLAR__*` env vars.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let cfg: Config = figment
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        cfg.validate().context("configuration is invalid")?;
        cfg.site.tz()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [site]
        latitude = 2.3098
        longitude = 111.8304
        timezone = "Asia/Kuching"

        [store]
        path = "data/solar_tracker.db"
        max_connections = 4
        busy_timeout_ms = 5000
        busy_retries = 5
        busy_backoff_ms = 50
        connect_attempts = 5

        [model]
        artifact_path = "models/solar_power_model.bin"
        kind = "random_forest"
        n_trees = 100
        max_depth = 12
        min_samples_split = 5
        min_training_samples = 50
        learning_rate = 0.1
        max_iterations = 2000

        [engine]
        poll_interval_secs = 3
        idle_poll_interval_secs = 1
        retrain_interval_rows = 500
        max_elapsed_secs = 600

        [weather]
        base_url = "https://api.openweathermap.org/data/2.5/weather"
        timeout_secs = 5
    "#;

    #[test]
    fn loads_sample_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("solar.toml", SAMPLE)?;
            let cfg = Config::load_from("solar.toml").map_err(|e| e.to_string())?;
            assert_eq!(cfg.engine.retrain_interval_rows, 500);
            assert_eq!(cfg.engine.poll_interval(), Duration::from_secs(3));
            assert_eq!(cfg.model.kind, ModelType::RandomForest);
            assert!(cfg.weather.api_key.is_empty());
            assert_eq!(cfg.site.tz().map_err(|e| e.to_string())?, chrono_tz::Asia::Kuching);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("solar.toml", SAMPLE)?;
            jail.set_env("SOLAR__WEATHER__API_KEY", "secret");
            jail.set_env("SOLAR__ENGINE__RETRAIN_INTERVAL_ROWS", "250");
            let cfg = Config::load_from("solar.toml").map_err(|e| e.to_string())?;
            assert_eq!(cfg.weather.api_key, "secret");
            assert_eq!(cfg.engine.retrain_interval_rows, 250);
            Ok(())
        });
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("solar.toml", SAMPLE)?;
            jail.set_env("SOLAR__SITE__LATITUDE", "123.0");
            assert!(Config::load_from("solar.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn rejects_zero_retrain_interval() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("solar.toml", SAMPLE)?;
            jail.set_env("SOLAR__ENGINE__RETRAIN_INTERVAL_ROWS", "0");
            assert!(Config::load_from("solar.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_timezone() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("solar.toml", SAMPLE)?;
            jail.set_env("SOLAR__SITE__TIMEZONE", "Mars/Olympus_Mons");
            assert!(Config::load_from("solar.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn shipped_default_config_is_valid() {
        figment::Jail::expect_with(|_jail| {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
            let cfg = Config::load_from(path).map_err(|e| e.to_string())?;
            assert_eq!(cfg.engine.poll_interval_secs, 3);
            assert_eq!(cfg.engine.retrain_interval_rows, 500);
            Ok(())
        });
    }
}
