//! Model capability and the linear regressor.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{ModelMetadata, Prediction};
use crate::forecast::{FeatureVector, FEATURE_COUNT};

/// Anything that can turn a feature vector into instantaneous panel power (W).
pub trait PowerModel: Send + Sync {
    /// Predict from a dense row in feature-name order.
    fn predict_row(&self, row: &[f64]) -> Result<f64>;

    fn metadata(&self) -> &ModelMetadata;

    /// Predict from a feature vector, imputing missing features from training means.
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let row = features.to_row(&self.metadata().feature_means)?;
        let raw = self.predict_row(&row)?;
        if !raw.is_finite() {
            anyhow::bail!("model produced a non-finite prediction ({raw})");
        }
        Ok(Prediction::new(raw, features.missing_count()))
    }
}

/// Linear regression over z-scored features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionModel {
    pub metadata: ModelMetadata,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl LinearRegressionModel {
    pub fn new(
        coefficients: Vec<f64>,
        intercept: f64,
        means: Vec<f64>,
        stds: Vec<f64>,
        metadata: ModelMetadata,
    ) -> Result<Self> {
        if coefficients.len() != FEATURE_COUNT
            || means.len() != FEATURE_COUNT
            || stds.len() != FEATURE_COUNT
        {
            anyhow::bail!(
                "linear model expects {} coefficients, means and stds (got {}, {}, {})",
                FEATURE_COUNT,
                coefficients.len(),
                means.len(),
                stds.len()
            );
        }
        Ok(Self {
            metadata,
            coefficients,
            intercept,
            means,
            stds,
        })
    }

    /// z-score one value; constant columns collapse to 0
    pub(crate) fn standardize(value: f64, mean: f64, std: f64) -> f64 {
        if std.abs() < 1e-10 {
            0.0
        } else {
            (value - mean) / std
        }
    }
}

impl PowerModel for LinearRegressionModel {
    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.coefficients.len() {
            anyhow::bail!(
                "Feature count mismatch: expected {}, got {}",
                self.coefficients.len(),
                row.len()
            );
        }

        let prediction = row
            .iter()
            .zip(&self.coefficients)
            .zip(self.means.iter().zip(&self.stds))
            .map(|((x, c), (m, s))| Self::standardize(*x, *m, *s) * c)
            .sum::<f64>()
            + self.intercept;

        Ok(prediction)
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
