//! External ML scorer client (isolation-forest service or compatible).
//!
//! Speaks the sidecar contract: `POST /predict` with the flat feature vector,
//! `POST /train` with baseline vectors, `GET /health`. Unreachability is
//! surfaced after bounded retries -- never silently degraded to the
//! statistical scorer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ScorerConfig;
use crate::features::FeatureVector;
use crate::model::BaselineModel;

use super::scorer::{DriftScorer, ScoreOutcome};
use super::{round2, DetectError, RiskLevel};

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    features: &'a [f64],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    drift_score: f64,
    risk_level: String,
    anomaly_score: f64,
    is_anomaly: bool,
}

#[derive(Debug, Serialize)]
struct TrainRequest<'a> {
    feature_vectors: &'a [Vec<f64>],
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct RemoteTrainResponse {
    pub status: String,
    pub trained_at: String,
    pub baseline_run_count: u64,
    pub model_version: String,
}

pub struct RemoteScorer {
    client: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl RemoteScorer {
    pub fn new(config: &ScorerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            retries: config.retries,
        }
    }

    /// Push baseline vectors to the remote service so its model stays in
    /// lockstep with the local statistics.
    pub async fn train(&self, vectors: &[FeatureVector]) -> Result<RemoteTrainResponse, DetectError> {
        let flats: Vec<Vec<f64>> = vectors.iter().map(FeatureVector::to_vec).collect();
        let url = format!("{}/train", self.base_url);
        let body = TrainRequest {
            feature_vectors: &flats,
        };

        let response = self
            .with_retries(|| self.client.post(&url).json(&body).send())
            .await?;
        response
            .json()
            .await
            .map_err(|e| DetectError::ScorerResponse(e.to_string()))
    }

    /// Bounded retry with doubling backoff; non-2xx statuses also retry.
    async fn with_retries<F, Fut>(&self, request: F) -> Result<reqwest::Response, DetectError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let attempts = self.retries.max(1);
        let mut delay = Duration::from_millis(250);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match request().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    last_error = format!("status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                warn!(attempt, error = %last_error, "external scorer request failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(DetectError::ScorerUnreachable {
            attempts,
            message: last_error,
        })
    }
}

#[async_trait]
impl DriftScorer for RemoteScorer {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn score(
        &self,
        vector: &FeatureVector,
        _model: &BaselineModel,
    ) -> Result<ScoreOutcome, DetectError> {
        vector.validate()?;
        let flat = vector.to_vec();
        let url = format!("{}/predict", self.base_url);
        let body = PredictRequest { features: &flat };

        let response = self
            .with_retries(|| self.client.post(&url).json(&body).send())
            .await?;
        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| DetectError::ScorerResponse(e.to_string()))?;

        if !parsed.drift_score.is_finite() || !(0.0..=100.0).contains(&parsed.drift_score) {
            return Err(DetectError::ScorerResponse(format!(
                "drift_score {} outside [0, 100]",
                parsed.drift_score
            )));
        }

        let drift_score = round2(parsed.drift_score);
        // The wire carries the remote's own tier; recompute locally so the
        // score-to-tier invariant holds regardless of remote rounding.
        let risk_level = RiskLevel::from_score(drift_score);
        if parsed.risk_level != risk_level.as_str() {
            warn!(
                remote = %parsed.risk_level,
                local = %risk_level.as_str(),
                "remote risk tier disagrees with score-derived tier"
            );
        }

        Ok(ScoreOutcome {
            drift_score,
            risk_level,
            anomaly_score: Some(parsed.anomaly_score),
            is_anomaly: Some(parsed.is_anomaly),
        })
    }
}
