//! On-disk model artifact.
//!
//! Layout: 4 magic bytes, little-endian `u16` format version, then the bincode-encoded
//! [`StoredModel`]. Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-save never leaves a truncated artifact behind.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::models::{LinearRegressionModel, PowerModel};
use super::smartcore::SmartcoreRandomForest;
use super::ModelMetadata;
use crate::forecast::FEATURE_NAMES;

pub const MAGIC: [u8; 4] = *b"SPWR";
pub const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("model artifact I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model artifact is corrupt: {0}")]
    Decode(#[source] bincode::Error),
    #[error("failed to encode model artifact: {0}")]
    Encode(#[source] bincode::Error),
    #[error("not a model artifact (bad magic bytes)")]
    BadMagic,
    #[error("unsupported artifact format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("artifact features {found:?} do not match engine features")]
    FeatureMismatch { found: Vec<String> },
}

/// A trained model in its concrete, serialisable form.
#[derive(Debug, Serialize, Deserialize)]
pub enum StoredModel {
    LinearRegression(LinearRegressionModel),
    RandomForest(SmartcoreRandomForest),
}

impl StoredModel {
    pub fn metadata(&self) -> &ModelMetadata {
        match self {
            StoredModel::LinearRegression(m) => &m.metadata,
            StoredModel::RandomForest(m) => &m.metadata,
        }
    }

    pub fn into_shared(self) -> Arc<dyn PowerModel> {
        match self {
            StoredModel::LinearRegression(m) => Arc::new(m),
            StoredModel::RandomForest(m) => Arc::new(m),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let body = bincode::serialize(self).map_err(ArtifactError::Encode)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArtifactError> {
        if bytes.len() < HEADER_LEN || bytes[..MAGIC.len()] != MAGIC {
            return Err(ArtifactError::BadMagic);
        }
        let found = u16::from_le_bytes([bytes[4], bytes[5]]);
        if found != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found,
                supported: FORMAT_VERSION,
            });
        }
        let model: StoredModel =
            bincode::deserialize(&bytes[HEADER_LEN..]).map_err(ArtifactError::Decode)?;

        let metadata = model.metadata();
        let names_match = metadata.feature_names.len() == FEATURE_NAMES.len()
            && metadata
                .feature_names
                .iter()
                .zip(FEATURE_NAMES)
                .all(|(a, b)| a == b);
        if !names_match || metadata.feature_means.len() != FEATURE_NAMES.len() {
            return Err(ArtifactError::FeatureMismatch {
                found: metadata.feature_names.clone(),
            });
        }
        Ok(model)
    }

    /// Load from `path`. A missing file is `Ok(None)`; anything unreadable is an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ArtifactError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let model = Self::decode(&bytes)?;
        info!(
            path = %path.display(),
            model_id = %model.metadata().model_id,
            model_type = %model.metadata().model_type,
            "model artifact loaded"
        );
        Ok(Some(model))
    }

    /// Atomically replace the artifact at `path`.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_err = |source: std::io::Error| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        let bytes = self.encode()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        std::fs::rename(&tmp, path).map_err(io_err)?;

        info!(
            path = %path.display(),
            bytes = bytes.len(),
            model_id = %self.metadata().model_id,
            "model artifact saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::FEATURE_COUNT;
    use crate::ml::{ModelType, ValidationMetrics};

    fn linear() -> StoredModel {
        let metadata = ModelMetadata::new(
            ModelType::LinearRegression,
            10,
            ValidationMetrics::new(0.1, 0.2, 3.0, 0.9),
            vec![1.0; FEATURE_COUNT],
        );
        StoredModel::LinearRegression(
            LinearRegressionModel::new(
                vec![0.5; FEATURE_COUNT],
                2.0,
                vec![0.0; FEATURE_COUNT],
                vec![1.0; FEATURE_COUNT],
                metadata,
            )
            .unwrap(),
        )
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("solar-artifact-{}", uuid::Uuid::new_v4()))
            .join("model.bin")
    }

    #[test]
    fn missing_artifact_is_not_an_error() {
        assert!(StoredModel::load(&temp_path()).unwrap().is_none());
    }

    #[test]
    fn save_then_load_preserves_predictions() {
        let path = temp_path();
        let model = linear();
        let row = [3.0; FEATURE_COUNT];
        let expected = model.into_shared().predict_row(&row).unwrap();

        linear().save(&path).unwrap();
        assert!(!path.with_extension("bin.tmp").exists());

        let loaded = StoredModel::load(&path).unwrap().unwrap();
        assert_eq!(loaded.metadata().model_type, ModelType::LinearRegression);
        assert_eq!(loaded.into_shared().predict_row(&row).unwrap(), expected);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn rejects_foreign_bytes() {
        assert!(matches!(
            StoredModel::decode(b"PK\x03\x04 definitely a zip"),
            Err(ArtifactError::BadMagic)
        ));
        assert!(matches!(
            StoredModel::decode(b"SP"),
            Err(ArtifactError::BadMagic)
        ));
    }

    #[test]
    fn rejects_future_format_version() {
        let mut bytes = linear().encode().unwrap();
        bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            StoredModel::decode(&bytes),
            Err(ArtifactError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let bytes = linear().encode().unwrap();
        assert!(matches!(
            StoredModel::decode(&bytes[..bytes.len() / 2]),
            Err(ArtifactError::Decode(_))
        ));
    }

    #[test]
    fn rejects_feature_layout_change() {
        let mut model = linear();
        if let StoredModel::LinearRegression(m) = &mut model {
            m.metadata.feature_names.swap(0, 1);
        }
        let bytes = model.encode().unwrap();
        assert!(matches!(
            StoredModel::decode(&bytes),
            Err(ArtifactError::FeatureMismatch { .. })
        ));
    }
}
