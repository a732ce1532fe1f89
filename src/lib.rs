//! Continuous power inference and energy accounting for a sun-tracking solar panel.
//!
//! The tracker logger appends readings to a shared SQLite file; this crate polls that file,
//! predicts instantaneous panel power, integrates it into cumulative and daily energy, and
//! retrains the model as readings accumulate.

pub mod config;
pub mod controller;
pub mod database;
pub mod domain;
pub mod forecast;
pub mod ml;
pub mod repo;
pub mod telemetry;
