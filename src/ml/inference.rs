//! Prediction engine
//!
//! Owns the active model handle. The poll loop holds the engine by value and swaps the handle
//! between ticks, so a tick always sees exactly one model.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::models::PowerModel;
use super::{ModelMetadata, Prediction};
use crate::forecast::FeatureVector;

/// Power to integrate for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Non-negative power (W) fed to the accountant
    pub power_w: f64,
    /// `None` when no model is loaded or the model failed on this input
    pub prediction: Option<Prediction>,
}

impl Estimate {
    pub fn suppressed() -> Self {
        Self {
            power_w: 0.0,
            prediction: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.prediction.is_some()
    }
}

#[derive(Default)]
pub struct PredictionEngine {
    model: Option<Arc<dyn PowerModel>>,
}

impl PredictionEngine {
    pub fn new(model: Option<Arc<dyn PowerModel>>) -> Self {
        if model.is_none() {
            warn!("no model loaded, predictions suppressed until a retrain succeeds");
        }
        Self { model }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.model.as_deref().map(|m| m.metadata())
    }

    /// Never fails: no model or a model error both yield zero power.
    pub fn estimate(&self, features: &FeatureVector) -> Estimate {
        let Some(model) = self.model.as_deref() else {
            return Estimate::suppressed();
        };

        match model.predict(features) {
            Ok(prediction) => {
                if prediction.imputed_features > 0 {
                    debug!(
                        imputed = prediction.imputed_features,
                        "missing features filled from training means"
                    );
                }
                if prediction.raw_w < 0.0 {
                    debug!(raw_w = prediction.raw_w, "negative model output clamped to 0");
                }
                Estimate {
                    power_w: prediction.power_w,
                    prediction: Some(prediction),
                }
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "prediction failed, integrating zero power");
                Estimate::suppressed()
            }
        }
    }

    /// Replace the active model, returning the previous one.
    pub fn swap(&mut self, model: Arc<dyn PowerModel>) -> Option<Arc<dyn PowerModel>> {
        let meta = model.metadata();
        info!(
            model_id = %meta.model_id,
            model_type = %meta.model_type,
            samples = meta.training_samples,
            "model swapped in"
        );
        self.model.replace(model)
    }
}
