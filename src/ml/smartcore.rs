//! SmartCore random forest regressor
//!
//! Tuned for a Raspberry Pi class host: bounded depth, a moderate tree count and no retained
//! bootstrap samples.

use ::smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use ::smartcore::linalg::basic::matrix::DenseMatrix;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::models::PowerModel;
use super::training::TrainingError;
use super::ModelMetadata;

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Fixed seed so retraining on the same rows yields the same forest.
const SEED: u64 = 42;

#[derive(Debug, Serialize, Deserialize)]
pub struct SmartcoreRandomForest {
    pub metadata: ModelMetadata,
    model: Forest,
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
}

impl SmartcoreRandomForest {
    pub fn custom_parameters(
        n_trees: usize,
        max_depth: Option<u16>,
        min_samples_split: usize,
    ) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth,
            min_samples_leaf: 2,
            min_samples_split,
            n_trees,
            m: None, // sqrt(n_features)
            keep_samples: false,
            seed: SEED,
        }
    }

    /// Fit on dense rows; returns the fitted forest and its in-sample predictions.
    pub(crate) fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: RandomForestRegressorParameters,
    ) -> Result<(FittedForest, Vec<f64>), TrainingError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(TrainingError::InvalidInput(format!(
                "{} rows but {} targets",
                x.len(),
                y.len()
            )));
        }

        let n_samples = x.len();
        let n_features = x[0].len();
        let mut flat = Vec::with_capacity(n_samples * n_features);
        for row in x {
            if row.len() != n_features {
                return Err(TrainingError::InvalidInput(
                    "all feature rows must have the same length".into(),
                ));
            }
            flat.extend_from_slice(row);
        }

        let n_trees = params.n_trees;
        let max_depth = params.max_depth;
        let min_samples_split = params.min_samples_split;

        let x_matrix = DenseMatrix::new(n_samples, n_features, flat, false);
        let y_vec = y.to_vec();

        let model = Forest::fit(&x_matrix, &y_vec, params)
            .map_err(|e| TrainingError::Fit(format!("random forest: {e:?}")))?;
        let predictions = model
            .predict(&x_matrix)
            .map_err(|e| TrainingError::Fit(format!("random forest in-sample predict: {e:?}")))?;

        Ok((
            FittedForest {
                model,
                n_trees,
                max_depth,
                min_samples_split,
            },
            predictions,
        ))
    }
}

/// A trained forest waiting for its metadata.
pub(crate) struct FittedForest {
    model: Forest,
    n_trees: usize,
    max_depth: Option<u16>,
    min_samples_split: usize,
}

impl FittedForest {
    pub(crate) fn with_metadata(self, metadata: ModelMetadata) -> SmartcoreRandomForest {
        SmartcoreRandomForest {
            metadata,
            model: self.model,
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
        }
    }
}

impl PowerModel for SmartcoreRandomForest {
    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let x = DenseMatrix::new(1, row.len(), row.to_vec(), false);
        let predictions = self
            .model
            .predict(&x)
            .map_err(|e| anyhow::anyhow!("random forest prediction failed: {e:?}"))?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("random forest returned no prediction"))
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ModelType, ValidationMetrics};

    #[test]
    fn custom_parameters_are_applied() {
        let params = SmartcoreRandomForest::custom_parameters(100, Some(15), 10);
        assert_eq!(params.n_trees, 100);
        assert_eq!(params.max_depth, Some(15));
        assert_eq!(params.min_samples_split, 10);
        assert!(!params.keep_samples);
    }

    #[test]
    fn fits_and_predicts_in_range() {
        // y = 2 * x1 + 3 * x2
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![(i % 5) as f64, (i % 4) as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 * r[0] + 3.0 * r[1]).collect();

        let params = SmartcoreRandomForest::custom_parameters(10, Some(5), 2);
        let (fitted, in_sample) = SmartcoreRandomForest::fit(&x, &y, params).unwrap();
        assert_eq!(in_sample.len(), 40);

        let metadata = ModelMetadata::new(
            ModelType::RandomForest,
            40,
            ValidationMetrics::new(0.0, 0.0, 0.0, 1.0),
            vec![0.0; 2],
        );
        let forest = fitted.with_metadata(metadata);
        assert_eq!(forest.n_trees, 10);

        let value = forest.predict_row(&[2.0, 2.0]).unwrap();
        assert!(value > 5.0 && value < 15.0, "prediction {value}");
    }

    #[test]
    fn rejects_ragged_rows() {
        let x = vec![vec![1.0, 2.0], vec![1.0]];
        let params = SmartcoreRandomForest::custom_parameters(2, Some(2), 2);
        assert!(SmartcoreRandomForest::fit(&x, &[1.0, 2.0], params).is_err());
    }
}
