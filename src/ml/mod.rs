//! Power regression
//!
//! - `models`: the [`PowerModel`] capability and the linear regressor
//! - `smartcore`: random forest regressor
//! - `training`: dataset assembly, fitting and metrics
//! - `artifact`: on-disk model envelope
//! - `inference`: the swappable prediction engine used by the poll loop

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub mod artifact;
pub mod inference;
pub mod models;
pub mod smartcore;
pub mod training;

pub use artifact::{ArtifactError, StoredModel};
pub use inference::{Estimate, PredictionEngine};
pub use models::{LinearRegressionModel, PowerModel};
pub use self::smartcore::SmartcoreRandomForest;
pub use training::{ModelTrainer, TrainingConfig, TrainingDataset, TrainingError};

/// ML Model Type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelType {
    RandomForest,
    LinearRegression,
}

/// ML Model Metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_type: ModelType,
    /// Version of the engine that trained the model
    pub version: String,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    pub validation_metrics: ValidationMetrics,
    pub feature_names: Vec<String>,
    /// Training column means, used to fill features that are missing at prediction time
    pub feature_means: Vec<f64>,
}

impl ModelMetadata {
    pub fn new(
        model_type: ModelType,
        training_samples: usize,
        validation_metrics: ValidationMetrics,
        feature_means: Vec<f64>,
    ) -> Self {
        Self {
            model_id: format!("{}_{}", model_type, uuid::Uuid::new_v4()),
            model_type,
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Utc::now(),
            training_samples,
            validation_metrics,
            feature_names: crate::forecast::FEATURE_NAMES
                .iter()
                .map(|n| n.to_string())
                .collect(),
            feature_means,
        }
    }
}

/// Validation Metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub mae: f64,  // Mean Absolute Error
    pub rmse: f64, // Root Mean Square Error
    pub mape: f64, // Mean Absolute Percentage Error
    pub r2: f64,   // R-squared
}

impl ValidationMetrics {
    pub fn new(mae: f64, rmse: f64, mape: f64, r2: f64) -> Self {
        Self {
            mae,
            rmse,
            mape,
            r2,
        }
    }
}

/// One model output for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Raw regressor output, may be negative
    pub raw_w: f64,
    /// Output clamped at zero; this is what gets integrated
    pub power_w: f64,
    /// Number of features filled from training means
    pub imputed_features: usize,
}

impl Prediction {
    pub fn new(raw_w: f64, imputed_features: usize) -> Self {
        Self {
            raw_w,
            power_w: raw_w.max(0.0),
            imputed_features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn model_type_names_are_snake_case() {
        assert_eq!(ModelType::RandomForest.to_string(), "random_forest");
        assert_eq!(
            ModelType::from_str("linear_regression").unwrap(),
            ModelType::LinearRegression
        );
        let json = serde_json::to_string(&ModelType::RandomForest).unwrap();
        assert_eq!(json, "\"random_forest\"");
    }

    #[test]
    fn prediction_clamps_negative_output() {
        let p = Prediction::new(-3.5, 0);
        assert_eq!(p.raw_w, -3.5);
        assert_eq!(p.power_w, 0.0);

        let p = Prediction::new(12.0, 2);
        assert_eq!(p.power_w, 12.0);
        assert_eq!(p.imputed_features, 2);
    }
}
