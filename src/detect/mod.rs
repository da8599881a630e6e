//! Drift detection -- weighted z-score aggregation, risk tiers, issues.

pub mod issues;
pub mod remote;
pub mod scorer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::features::{FeatureError, FeatureVector, FEATURE_NAMES};
use crate::model::{BaselineModel, ModelError, STD_DEV_FLOOR};
use crate::normalize::Step;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("external scorer unreachable after {attempts} attempts: {message}")]
    ScorerUnreachable { attempts: u32, message: String },

    #[error("external scorer returned an invalid response: {0}")]
    ScorerResponse(String),
}

/// Risk tier, a pure function of the drift score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// `[0,30]` low, `(30,50]` medium, `(50,70]` high, `(70,100]` critical.
    pub fn from_score(score: f64) -> Self {
        if score <= 30.0 {
            RiskLevel::Low
        } else if score <= 50.0 {
            RiskLevel::Medium
        } else if score <= 70.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Z-score magnitude tiers used for severity assignment and explanation
/// phrasing. Anything below 1.5 is not significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magnitude {
    Insignificant,
    Minor,
    Moderate,
    Major,
    Dramatic,
}

impl Magnitude {
    pub fn from_z(z: f64) -> Self {
        let z = z.abs();
        if z < 1.5 {
            Magnitude::Insignificant
        } else if z < 2.5 {
            Magnitude::Minor
        } else if z < 3.5 {
            Magnitude::Moderate
        } else if z < 4.5 {
            Magnitude::Major
        } else {
            Magnitude::Dramatic
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Magnitude::Insignificant => None,
            Magnitude::Minor => Some(Severity::Low),
            Magnitude::Moderate => Some(Severity::Medium),
            Magnitude::Major => Some(Severity::High),
            Magnitude::Dramatic => Some(Severity::Critical),
        }
    }

    pub fn adverb(&self) -> &'static str {
        match self {
            Magnitude::Insignificant => "marginally",
            Magnitude::Minor => "slightly",
            Magnitude::Moderate => "moderately",
            Magnitude::Major => "significantly",
            Magnitude::Dramatic => "dramatically",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SecurityScanRemoved,
    PermissionEscalation,
    SecretsExposure,
    ApprovalBypassed,
    ExecutionOrderChanged,
}

/// A concrete security finding tied to one deviating feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// One scored pipeline run. Created once, stored once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: Uuid,
    pub pipeline_name: String,
    pub drift_score: f64,
    pub risk_level: RiskLevel,
    pub timestamp: DateTime<Utc>,
    pub issues: Vec<Issue>,
    pub explanations: Vec<String>,
    pub feature_vector: FeatureVector,
    pub parsed_steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_anomaly: Option<bool>,
}

/// One feature's deviation from the baseline.
#[derive(Debug, Clone, Copy)]
pub struct Deviation {
    pub name: &'static str,
    pub value: f64,
    pub mean: f64,
    pub z: f64,
}

impl Deviation {
    pub fn magnitude(&self) -> Magnitude {
        Magnitude::from_z(self.z)
    }

    pub fn is_significant(&self) -> bool {
        self.z.abs() >= 1.5
    }
}

/// Fixed semantic importance per feature.
pub const WEIGHTS: [(&str, f64); 17] = [
    ("permissionEscalation", 2.5),
    ("secretsWithWriteCount", 2.2),
    ("adminPermissionCount", 2.0),
    ("stepsWithAdminCount", 2.0),
    ("secretsUsageCount", 1.8),
    ("securityBeforeDeploy", 1.7),
    ("securityStepRatio", 1.6),
    ("securityScanCount", 1.5),
    ("securityStepCount", 1.4),
    ("approvalStepCount", 1.3),
    ("writePermissionCount", 1.2),
    ("normalizedFirstSecurityStep", 1.1),
    ("normalizedLastSecurityStep", 1.1),
    ("avgSecurityStepOrder", 1.0),
    ("normalizedAvgStepOrder", 0.9),
    ("readPermissionCount", 0.8),
    ("totalStepCount", 0.5),
];

pub fn weight_of(name: &str) -> f64 {
    WEIGHTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, w)| *w)
        .unwrap_or(1.0)
}

/// Per-feature z-score with the training-time sigma floor. A feature whose
/// sigma sits at the floor and whose value is within 0.01 of the mean is
/// treated as unchanged.
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    let sigma = std_dev.max(STD_DEV_FLOOR);
    if std_dev <= STD_DEV_FLOOR && (value - mean).abs() < 0.01 {
        return 0.0;
    }
    (value - mean) / sigma
}

/// Compute every feature's deviation against the model.
pub fn deviations(vector: &FeatureVector, model: &BaselineModel) -> Vec<Deviation> {
    let flat = vector.to_vec();
    FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let value = flat[i];
            let stats = model
                .stats(name)
                .copied()
                .unwrap_or(crate::model::FeatureStats {
                    mean: 0.0,
                    std_dev: STD_DEV_FLOOR,
                    count: 0,
                    min: 0.0,
                    max: 0.0,
                });
            Deviation {
                name,
                value,
                mean: stats.mean,
                z: z_score(value, stats.mean, stats.std_dev),
            }
        })
        .collect()
}

/// Aggregate weighted drift score, clipped to `[0, 100]`, 2 decimals.
pub fn aggregate_score(deviations: &[Deviation]) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for dev in deviations {
        let w = weight_of(dev.name);
        weighted += dev.z.abs() * w;
        total_weight += w;
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    let score = (20.0 * weighted / total_weight).clamp(0.0, 100.0);
    round2(score)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Statistical drift detection: score a vector against a trained model.
/// Deterministic apart from the freshly generated `id` and `timestamp`.
pub fn detect(
    vector: &FeatureVector,
    model: &BaselineModel,
    pipeline_name: &str,
) -> Result<Analysis, DetectError> {
    vector.validate()?;
    model.validate()?;

    let devs = deviations(vector, model);
    let drift_score = aggregate_score(&devs);
    let risk_level = RiskLevel::from_score(drift_score);
    let found = issues::from_deviations(&devs);
    let explanations = issues::explanations(&devs);

    Ok(Analysis {
        id: Uuid::new_v4(),
        pipeline_name: pipeline_name.to_string(),
        drift_score,
        risk_level,
        timestamp: Utc::now(),
        issues: found,
        explanations,
        feature_vector: vector.clone(),
        parsed_steps: Vec::new(),
        anomaly_score: None,
        is_anomaly: None,
    })
}
