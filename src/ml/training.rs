//! ML Model Training Pipeline
//!
//! Fits a fresh power model from readings that carry measured panel power. Runs on a blocking
//! thread; nothing here touches the store or the network.

use thiserror::Error;
use tracing::{debug, info};

use super::artifact::StoredModel;
use super::models::LinearRegressionModel;
use super::smartcore::SmartcoreRandomForest;
use super::{ModelMetadata, ModelType, ValidationMetrics};
use crate::config::ModelConfig;
use crate::domain::Reading;
use crate::forecast::{FeatureVector, WeatherSample, FEATURE_COUNT};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient training data: {have} usable rows, need at least {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("model fit failed: {0}")]
    Fit(String),
    #[error("invalid training input: {0}")]
    InvalidInput(String),
}

/// Training Dataset
#[derive(Debug, Clone, Default)]
pub struct TrainingDataset {
    pub features: Vec<FeatureVector>,
    pub targets: Vec<f64>,
}

impl TrainingDataset {
    /// Build from stored readings; rows without a finite measured power are skipped.
    pub fn from_readings<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Reading, WeatherSample)>,
    {
        let mut dataset = Self::default();
        for (reading, weather) in rows {
            let Some(target) = reading.p_panel.filter(|p| p.is_finite()) else {
                continue;
            };
            dataset
                .features
                .push(FeatureVector::derive(&reading, weather));
            dataset.targets.push(target);
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Mean of each column over the rows where it was observed (0.0 if never observed).
    pub fn column_means(&self) -> Vec<f64> {
        let mut sums = [0.0; FEATURE_COUNT];
        let mut counts = [0usize; FEATURE_COUNT];
        for fv in &self.features {
            for (i, value) in fv.values().iter().enumerate() {
                if let Some(v) = value.filter(|v| v.is_finite()) {
                    sums[i] += v;
                    counts[i] += 1;
                }
            }
        }
        sums.iter()
            .zip(counts)
            .map(|(s, c)| if c == 0 { 0.0 } else { s / c as f64 })
            .collect()
    }

    /// Dense rows with missing values filled from `fill`.
    fn dense_rows(&self, fill: &[f64]) -> Result<Vec<Vec<f64>>, TrainingError> {
        self.features
            .iter()
            .map(|fv| {
                fv.to_row(fill)
                    .map_err(|e| TrainingError::InvalidInput(e.to_string()))
            })
            .collect()
    }
}

/// Training Configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub model_type: ModelType,
    pub min_training_samples: usize,
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub learning_rate: f64,
    pub max_iterations: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::RandomForest,
            min_training_samples: 50,
            n_trees: 100,
            max_depth: Some(12),
            min_samples_split: 5,
            learning_rate: 0.1,
            max_iterations: 2000,
        }
    }
}

impl From<&ModelConfig> for TrainingConfig {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            model_type: cfg.kind,
            min_training_samples: cfg.min_training_samples,
            n_trees: cfg.n_trees,
            max_depth: cfg.max_depth,
            min_samples_split: cfg.min_samples_split,
            learning_rate: cfg.learning_rate,
            max_iterations: cfg.max_iterations,
        }
    }
}

/// Model Trainer
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Fit the configured model kind and report in-sample metrics.
    pub fn train(&self, dataset: &TrainingDataset) -> Result<StoredModel, TrainingError> {
        let need = self.config.min_training_samples.max(2);
        if dataset.len() < need {
            return Err(TrainingError::InsufficientData {
                have: dataset.len(),
                need,
            });
        }

        let means = dataset.column_means();
        let x = dataset.dense_rows(&means)?;
        let y = &dataset.targets;

        debug!(
            rows = x.len(),
            model_type = %self.config.model_type,
            "fitting power model"
        );

        let model = match self.config.model_type {
            ModelType::LinearRegression => {
                StoredModel::LinearRegression(self.train_linear_regression(&x, y, means)?)
            }
            ModelType::RandomForest => {
                let params = SmartcoreRandomForest::custom_parameters(
                    self.config.n_trees,
                    self.config.max_depth,
                    self.config.min_samples_split,
                );
                let (forest, predictions) = SmartcoreRandomForest::fit(&x, y, params)?;
                let metrics = Self::calculate_metrics(&predictions, y)?;
                let metadata =
                    ModelMetadata::new(ModelType::RandomForest, x.len(), metrics, means);
                StoredModel::RandomForest(forest.with_metadata(metadata))
            }
        };

        let metrics = model.metadata().validation_metrics;
        info!(
            model_type = %self.config.model_type,
            samples = dataset.len(),
            r2 = metrics.r2,
            rmse = metrics.rmse,
            mae = metrics.mae,
            "model trained"
        );

        Ok(model)
    }

    /// Calculate validation metrics
    pub fn calculate_metrics(
        predictions: &[f64],
        targets: &[f64],
    ) -> Result<ValidationMetrics, TrainingError> {
        if predictions.len() != targets.len() {
            return Err(TrainingError::InvalidInput(
                "prediction and target count mismatch".into(),
            ));
        }

        if predictions.is_empty() {
            return Err(TrainingError::InvalidInput(
                "no predictions to evaluate".into(),
            ));
        }

        let n = predictions.len() as f64;
        let pairs = || predictions.iter().zip(targets.iter());

        // Mean Absolute Error
        let mae: f64 = pairs().map(|(p, t)| (p - t).abs()).sum::<f64>() / n;

        // Root Mean Square Error
        let mse: f64 = pairs().map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n;
        let rmse = mse.sqrt();

        // Mean Absolute Percentage Error over non-zero targets (night rows are zero)
        let nonzero: Vec<(f64, f64)> = pairs()
            .filter(|(_, t)| t.abs() > 1e-10)
            .map(|(p, t)| (*p, *t))
            .collect();
        let mape = if nonzero.is_empty() {
            0.0
        } else {
            nonzero
                .iter()
                .map(|(p, t)| ((p - t) / t).abs() * 100.0)
                .sum::<f64>()
                / nonzero.len() as f64
        };

        // R-squared
        let mean_target: f64 = targets.iter().sum::<f64>() / n;
        let ss_tot: f64 = targets.iter().map(|t| (t - mean_target).powi(2)).sum();
        let ss_res: f64 = pairs().map(|(p, t)| (t - p).powi(2)).sum();

        let r2 = if ss_tot.abs() < 1e-10 {
            0.0
        } else {
            1.0 - (ss_res / ss_tot)
        };

        Ok(ValidationMetrics::new(mae, rmse, mape, r2))
    }

    /// Batch gradient descent on z-scored features
    fn train_linear_regression(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        feature_means: Vec<f64>,
    ) -> Result<LinearRegressionModel, TrainingError> {
        let n = x.len() as f64;
        let n_features = FEATURE_COUNT;

        let mut means = vec![0.0; n_features];
        let mut stds = vec![0.0; n_features];
        for j in 0..n_features {
            means[j] = x.iter().map(|row| row[j]).sum::<f64>() / n;
            let var = x.iter().map(|row| (row[j] - means[j]).powi(2)).sum::<f64>() / n;
            stds[j] = var.sqrt();
        }

        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| LinearRegressionModel::standardize(*v, means[j], stds[j]))
                    .collect()
            })
            .collect();

        let mut coefficients = vec![0.0; n_features];
        let mut intercept = y.iter().sum::<f64>() / n;

        for _iter in 0..self.config.max_iterations {
            let mut coef_gradients = vec![0.0; n_features];
            let mut intercept_gradient = 0.0;

            for (row, target) in z.iter().zip(y) {
                let prediction: f64 = row
                    .iter()
                    .zip(&coefficients)
                    .map(|(f, c)| f * c)
                    .sum::<f64>()
                    + intercept;
                let error = prediction - target;

                for (g, f) in coef_gradients.iter_mut().zip(row) {
                    *g += error * f / n;
                }
                intercept_gradient += error / n;
            }

            for (c, g) in coefficients.iter_mut().zip(&coef_gradients) {
                *c -= self.config.learning_rate * g;
            }
            intercept -= self.config.learning_rate * intercept_gradient;
        }

        if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(TrainingError::Fit(
                "gradient descent diverged; lower model.learning_rate".into(),
            ));
        }

        let predictions: Vec<f64> = z
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&coefficients)
                    .map(|(f, c)| f * c)
                    .sum::<f64>()
                    + intercept
            })
            .collect();
        let metrics = Self::calculate_metrics(&predictions, y)?;
        let metadata =
            ModelMetadata::new(ModelType::LinearRegression, x.len(), metrics, feature_means);

        LinearRegressionModel::new(coefficients, intercept, means, stds, metadata)
            .map_err(|e| TrainingError::Fit(e.to_string()))
    }
}
