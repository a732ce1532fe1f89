//! Model inputs: feature derivation, current weather and sun position.

pub mod features;
pub mod solar;
pub mod weather;

pub use features::{
    FeatureVector, FEATURE_COUNT, FEATURE_NAMES, SENSOR_FULL_SCALE, WEATHER_FEATURES_START,
};
pub use solar::{local_to_utc, solar_altitude_deg};
pub use weather::{irradiance_from_clouds, OpenWeatherClient, WeatherSample, WeatherSampler};
