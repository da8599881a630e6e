//! Baseline model -- per-feature statistics trained from baseline runs.

pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};

/// Bumped whenever the feature order or semantics change; a persisted model
/// with a different version is refused at load.
pub const MODEL_VERSION: u32 = 1;

/// Floor applied to every trained standard deviation. A constant feature
/// would otherwise produce unbounded z-scores on the slightest change.
pub const STD_DEV_FLOOR: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("at least {needed} baseline runs required, got {got}")]
    NotEnoughRuns { needed: usize, got: usize },

    #[error("model file version {found} does not match supported version {expected}; retrain required")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("model is missing feature '{0}'")]
    MissingFeature(String),

    #[error("model carries unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("feature '{0}' has negative standard deviation")]
    NegativeStdDev(String),

    #[error("no trained model at {path}; train a baseline first")]
    NotFound { path: String },

    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Statistics for one feature across the baseline runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStats {
    pub mean: f64,
    /// Population standard deviation, floored at [`STD_DEV_FLOOR`]. The floor
    /// is persisted as-is so observers can see when it was applied.
    pub std_dev: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

/// The trained baseline: self-describing per-feature statistics keyed by the
/// frozen feature names, plus training metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineModel {
    pub version: u32,
    pub pipeline_name: String,
    pub trained_at: DateTime<Utc>,
    pub baseline_run_count: u64,
    pub features: BTreeMap<String, FeatureStats>,
}

impl BaselineModel {
    /// Train a fresh model from baseline feature vectors. The HTTP layer
    /// gates on two runs; a single run is accepted here for offline use and
    /// gets floored deviations throughout.
    pub fn train(vectors: &[FeatureVector], pipeline_name: &str) -> Result<Self, ModelError> {
        if vectors.is_empty() {
            return Err(ModelError::NotEnoughRuns { needed: 1, got: 0 });
        }

        let flats: Vec<Vec<f64>> = vectors.iter().map(FeatureVector::to_vec).collect();
        let n = flats.len() as f64;

        let mut features = BTreeMap::new();
        for (index, name) in FEATURE_NAMES.iter().enumerate() {
            let column: Vec<f64> = flats.iter().map(|v| v[index]).collect();
            let mean = column.iter().sum::<f64>() / n;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std_dev = variance.sqrt().max(STD_DEV_FLOOR);
            let min = column.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = column.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

            features.insert(
                name.to_string(),
                FeatureStats {
                    mean,
                    std_dev,
                    count: flats.len() as u64,
                    min,
                    max,
                },
            );
        }

        Ok(Self {
            version: MODEL_VERSION,
            pipeline_name: pipeline_name.to_string(),
            trained_at: Utc::now(),
            baseline_run_count: flats.len() as u64,
            features,
        })
    }

    /// Merge new baseline vectors into an existing model.
    ///
    /// The combined standard deviation is the pooled approximation
    /// `sqrt((s_old^2 * n_old + s_new^2 * n_new) / n)` -- raw samples are not
    /// retained, so between-batch variance is under-weighted. Acceptable for
    /// drift thresholds.
    pub fn merge(&self, vectors: &[FeatureVector], pipeline_name: &str) -> Result<Self, ModelError> {
        let fresh = Self::train(vectors, pipeline_name)?;

        let mut features = BTreeMap::new();
        for name in FEATURE_NAMES {
            let new = fresh.features[name];
            let merged = match self.features.get(name) {
                Some(old) => {
                    let n_old = old.count as f64;
                    let n_new = new.count as f64;
                    let n = n_old + n_new;
                    let mean = (old.mean * n_old + new.mean * n_new) / n;
                    let pooled =
                        ((old.std_dev.powi(2) * n_old + new.std_dev.powi(2) * n_new) / n).sqrt();
                    FeatureStats {
                        mean,
                        std_dev: pooled.max(STD_DEV_FLOOR),
                        count: old.count + new.count,
                        min: old.min.min(new.min),
                        max: old.max.max(new.max),
                    }
                }
                // A feature absent from the old model is initialized from the
                // new data alone.
                None => new,
            };
            features.insert(name.to_string(), merged);
        }

        Ok(Self {
            version: MODEL_VERSION,
            pipeline_name: pipeline_name.to_string(),
            trained_at: Utc::now(),
            baseline_run_count: self.baseline_run_count + fresh.baseline_run_count,
            features,
        })
    }

    /// Reject models whose feature-name set is not exactly the frozen 17, or
    /// whose deviations are negative, or whose version does not match.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.version != MODEL_VERSION {
            return Err(ModelError::VersionMismatch {
                expected: MODEL_VERSION,
                found: self.version,
            });
        }
        for name in FEATURE_NAMES {
            let stats = self
                .features
                .get(name)
                .ok_or_else(|| ModelError::MissingFeature(name.to_string()))?;
            if stats.std_dev < 0.0 {
                return Err(ModelError::NegativeStdDev(name.to_string()));
            }
        }
        if self.features.len() != FEATURE_COUNT {
            let unknown = self
                .features
                .keys()
                .find(|k| !FEATURE_NAMES.contains(&k.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(ModelError::UnknownFeature(unknown));
        }
        Ok(())
    }

    /// Stats for a frozen feature name. Valid models contain all 17.
    pub fn stats(&self, name: &str) -> Option<&FeatureStats> {
        self.features.get(name)
    }

    /// The model's mean vector in frozen index order.
    pub fn mean_vector(&self) -> Vec<f64> {
        FEATURE_NAMES
            .iter()
            .map(|name| self.features.get(*name).map_or(0.0, |s| s.mean))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;

    fn vector_with(scan: f64, admin: f64) -> FeatureVector {
        FeatureVector {
            security_scan_count: scan,
            admin_permission_count: admin,
            total_step_count: 5.0,
            ..FeatureVector::default()
        }
    }

    #[test]
    fn test_train_computes_mean_and_floored_std() {
        let model = BaselineModel::train(
            &[vector_with(3.0, 1.0), vector_with(3.0, 1.0), vector_with(3.0, 1.0)],
            "ci",
        )
        .unwrap();

        let scan = model.stats("securityScanCount").unwrap();
        assert_eq!(scan.mean, 3.0);
        // Zero variance floors to 0.1.
        assert_eq!(scan.std_dev, STD_DEV_FLOOR);
        assert_eq!(scan.count, 3);
        assert_eq!(scan.min, 3.0);
        assert_eq!(scan.max, 3.0);
        assert_eq!(model.baseline_run_count, 3);
        assert_eq!(model.features.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_train_population_std_dev() {
        let model =
            BaselineModel::train(&[vector_with(2.0, 0.0), vector_with(4.0, 0.0)], "ci").unwrap();
        let scan = model.stats("securityScanCount").unwrap();
        assert_eq!(scan.mean, 3.0);
        // Population sigma of {2, 4} is 1.0.
        assert!((scan.std_dev - 1.0).abs() < 1e-12);
        assert_eq!(scan.min, 2.0);
        assert_eq!(scan.max, 4.0);
    }

    #[test]
    fn test_train_rejects_empty() {
        assert!(matches!(
            BaselineModel::train(&[], "ci"),
            Err(ModelError::NotEnoughRuns { got: 0, .. })
        ));
    }

    #[test]
    fn test_merge_weighted_mean_and_counts() {
        let old = BaselineModel::train(&[vector_with(2.0, 0.0), vector_with(2.0, 0.0)], "ci").unwrap();
        let merged = old
            .merge(&[vector_with(5.0, 0.0), vector_with(5.0, 0.0)], "ci")
            .unwrap();

        let scan = merged.stats("securityScanCount").unwrap();
        assert_eq!(scan.count, 4);
        assert!((scan.mean - 3.5).abs() < 1e-12);
        assert_eq!(scan.min, 2.0);
        assert_eq!(scan.max, 5.0);
        assert_eq!(merged.baseline_run_count, 4);
    }

    #[test]
    fn test_merge_pooled_std_dev() {
        let old = BaselineModel::train(&[vector_with(2.0, 0.0), vector_with(4.0, 0.0)], "ci").unwrap();
        let merged = old
            .merge(&[vector_with(2.0, 0.0), vector_with(4.0, 0.0)], "ci")
            .unwrap();
        let scan = merged.stats("securityScanCount").unwrap();
        // Both batches have sigma 1.0; the pooled value stays 1.0.
        assert!((scan.std_dev - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_missing_feature() {
        let mut model = BaselineModel::train(&[vector_with(1.0, 0.0)], "ci").unwrap();
        model.features.remove("securityScanCount");
        assert!(matches!(
            model.validate(),
            Err(ModelError::MissingFeature(name)) if name == "securityScanCount"
        ));
    }

    #[test]
    fn test_validate_rejects_version_mismatch() {
        let mut model = BaselineModel::train(&[vector_with(1.0, 0.0)], "ci").unwrap();
        model.version = MODEL_VERSION + 1;
        assert!(matches!(
            model.validate(),
            Err(ModelError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_std_dev() {
        let mut model = BaselineModel::train(&[vector_with(1.0, 0.0)], "ci").unwrap();
        model.features.get_mut("securityScanCount").unwrap().std_dev = -0.5;
        assert!(matches!(
            model.validate(),
            Err(ModelError::NegativeStdDev(_))
        ));
    }

    #[test]
    fn test_validate_rejects_extra_feature() {
        let mut model = BaselineModel::train(&[vector_with(1.0, 0.0)], "ci").unwrap();
        model.features.insert(
            "bogusFeature".to_string(),
            FeatureStats {
                mean: 0.0,
                std_dev: 0.1,
                count: 1,
                min: 0.0,
                max: 0.0,
            },
        );
        assert!(matches!(
            model.validate(),
            Err(ModelError::UnknownFeature(name)) if name == "bogusFeature"
        ));
    }
}
