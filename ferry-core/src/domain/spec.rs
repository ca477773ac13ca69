//! Per-run pipeline parameters

use serde::{Deserialize, Serialize};

use crate::domain::error::{ErrorKind, RunError};

/// Tuning hyperparameters forwarded to the training service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub epoch_count: u32,
    pub learning_rate_multiplier: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            epoch_count: 3,
            learning_rate_multiplier: 1.0,
        }
    }
}

/// Everything one promotion run needs to know about its model
///
/// Persisted with the run so a resumed run uses its original parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub base_model: String,
    pub dataset_uri: String,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    /// Display name for the tuned model, when the backend supports one
    #[serde(default)]
    pub tuned_model_name: Option<String>,
    /// Destination scope of the promotion (project/account boundary)
    pub dest_scope: String,
    /// Name of the promoted artifact in the destination scope
    pub dest_name: String,
    /// Promote an already tuned artifact instead of training a new one
    #[serde(default)]
    pub source_artifact: Option<String>,
}

impl PipelineSpec {
    /// Rejects malformed specs before any external call is made
    pub fn validate(&self) -> Result<(), RunError> {
        if self.source_artifact.is_none() {
            if self.base_model.trim().is_empty() {
                return Err(invalid("base_model cannot be empty"));
            }
            if self.dataset_uri.trim().is_empty() {
                return Err(invalid("dataset_uri cannot be empty"));
            }
            if !self.dataset_uri.contains("://") {
                return Err(invalid(format!(
                    "dataset_uri '{}' is not a URI",
                    self.dataset_uri
                )));
            }
            if self.hyperparameters.epoch_count == 0 {
                return Err(invalid("epoch_count must be greater than 0"));
            }
            let lr = self.hyperparameters.learning_rate_multiplier;
            if !lr.is_finite() || lr <= 0.0 {
                return Err(invalid("learning_rate_multiplier must be a positive number"));
            }
        } else if self
            .source_artifact
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(invalid("source_artifact cannot be empty"));
        }

        if self.dest_scope.trim().is_empty() {
            return Err(invalid("dest_scope cannot be empty"));
        }
        if self.dest_name.trim().is_empty() {
            return Err(invalid("dest_name cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> RunError {
    RunError::new(ErrorKind::InvalidArgument, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PipelineSpec {
        PipelineSpec {
            base_model: "gemini-1.5-flash-002".to_string(),
            dataset_uri: "gs://tuning-bucket/train_data.jsonl".to_string(),
            hyperparameters: Hyperparameters::default(),
            tuned_model_name: None,
            dest_scope: "projects/target/locations/us-central1".to_string(),
            dest_name: "target-model".to_string(),
            source_artifact: None,
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        let mut s = spec();
        s.hyperparameters.epoch_count = 0;
        assert_eq!(s.validate().unwrap_err().kind, ErrorKind::InvalidArgument);

        let mut s = spec();
        s.hyperparameters.learning_rate_multiplier = f64::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_dataset() {
        let mut s = spec();
        s.dataset_uri = "train_data.jsonl".to_string();
        let err = s.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(!err.retriable);
    }

    #[test]
    fn test_source_artifact_skips_training_fields() {
        let mut s = spec();
        s.base_model = String::new();
        s.dataset_uri = String::new();
        s.source_artifact = Some("projects/source/models/7704127342733426688".to_string());
        assert!(s.validate().is_ok());
    }
}
