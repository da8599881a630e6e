//! The drift-scoring seam: statistical z-scoring or an external ML service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ScorerConfig;
use crate::features::FeatureVector;
use crate::model::BaselineModel;

use super::remote::RemoteScorer;
use super::{aggregate_score, deviations, DetectError, RiskLevel};

/// Normalized scorer output, identical across both strategies.
#[derive(Debug, Clone, Copy)]
pub struct ScoreOutcome {
    pub drift_score: f64,
    pub risk_level: RiskLevel,
    pub anomaly_score: Option<f64>,
    pub is_anomaly: Option<bool>,
}

/// A drift-scoring strategy. Issue emission is a separate concern layered on
/// top of whichever scorer is active.
#[async_trait]
pub trait DriftScorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        vector: &FeatureVector,
        model: &BaselineModel,
    ) -> Result<ScoreOutcome, DetectError>;
}

/// The default strategy: explainable weighted z-scores over the trained
/// per-feature statistics.
pub struct StatScorer;

#[async_trait]
impl DriftScorer for StatScorer {
    fn name(&self) -> &'static str {
        "zscore"
    }

    async fn score(
        &self,
        vector: &FeatureVector,
        model: &BaselineModel,
    ) -> Result<ScoreOutcome, DetectError> {
        vector.validate()?;
        model.validate()?;
        let drift_score = aggregate_score(&deviations(vector, model));
        Ok(ScoreOutcome {
            drift_score,
            risk_level: RiskLevel::from_score(drift_score),
            anomaly_score: None,
            is_anomaly: None,
        })
    }
}

/// Pick the scorer once at startup: an external scorer URL selects the remote
/// variant, otherwise statistical z-scoring. There is no runtime fallback
/// between the two.
pub fn build(config: Option<&ScorerConfig>) -> Arc<dyn DriftScorer> {
    match config {
        Some(cfg) => {
            tracing::info!(url = %cfg.url, "using external drift scorer");
            Arc::new(RemoteScorer::new(cfg))
        }
        None => Arc::new(StatScorer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> BaselineModel {
        let v = FeatureVector {
            security_scan_count: 3.0,
            security_step_count: 3.0,
            total_step_count: 8.0,
            ..FeatureVector::default()
        };
        BaselineModel::train(&[v.clone(), v.clone(), v], "ci").unwrap()
    }

    #[tokio::test]
    async fn test_stat_scorer_zero_on_mean() {
        let model = baseline();
        let v = FeatureVector {
            security_scan_count: 3.0,
            security_step_count: 3.0,
            total_step_count: 8.0,
            ..FeatureVector::default()
        };
        let outcome = StatScorer.score(&v, &model).await.unwrap();
        assert_eq!(outcome.drift_score, 0.0);
        assert_eq!(outcome.risk_level, RiskLevel::Low);
        assert!(outcome.anomaly_score.is_none());
    }

    #[tokio::test]
    async fn test_stat_scorer_flags_drift() {
        let model = baseline();
        let v = FeatureVector {
            security_scan_count: 0.0,
            security_step_count: 0.0,
            total_step_count: 8.0,
            ..FeatureVector::default()
        };
        let outcome = StatScorer.score(&v, &model).await.unwrap();
        assert!(outcome.drift_score > 30.0, "score {}", outcome.drift_score);
    }

    #[test]
    fn test_build_defaults_to_stat() {
        let scorer = build(None);
        assert_eq!(scorer.name(), "zscore");
    }
}
