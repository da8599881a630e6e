//! Feature extraction -- canonical run to the frozen 17-feature vector.
//!
//! The index-to-semantic mapping is part of the persisted model's
//! compatibility contract. Changing the order or meaning of any entry is a
//! breaking model-format bump and requires retraining.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{CanonicalRun, Step, StepType};

pub const FEATURE_COUNT: usize = 17;

/// Feature names, in frozen index order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "securityScanCount",
    "securityStepCount",
    "readPermissionCount",
    "writePermissionCount",
    "adminPermissionCount",
    "secretsUsageCount",
    "approvalStepCount",
    "avgSecurityStepOrder",
    "permissionEscalation",
    "totalStepCount",
    "securityStepRatio",
    "normalizedFirstSecurityStep",
    "normalizedLastSecurityStep",
    "secretsWithWriteCount",
    "stepsWithAdminCount",
    "securityBeforeDeploy",
    "normalizedAvgStepOrder",
];

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("expected {FEATURE_COUNT} features, got {0}")]
    WrongLength(usize),

    #[error("feature {index} ({name}) is not finite: {value}")]
    NotFinite {
        index: usize,
        name: &'static str,
        value: f64,
    },
}

/// The 17 pipeline-security features, named. `to_vec` flattens in the frozen
/// index order of [`FEATURE_NAMES`].
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub security_scan_count: f64,
    pub security_step_count: f64,
    pub read_permission_count: f64,
    pub write_permission_count: f64,
    pub admin_permission_count: f64,
    pub secrets_usage_count: f64,
    pub approval_step_count: f64,
    pub avg_security_step_order: f64,
    pub permission_escalation: f64,
    pub total_step_count: f64,
    pub security_step_ratio: f64,
    pub normalized_first_security_step: f64,
    pub normalized_last_security_step: f64,
    pub secrets_with_write_count: f64,
    pub steps_with_admin_count: f64,
    pub security_before_deploy: f64,
    pub normalized_avg_step_order: f64,
}

impl FeatureVector {
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.security_scan_count,
            self.security_step_count,
            self.read_permission_count,
            self.write_permission_count,
            self.admin_permission_count,
            self.secrets_usage_count,
            self.approval_step_count,
            self.avg_security_step_order,
            self.permission_escalation,
            self.total_step_count,
            self.security_step_ratio,
            self.normalized_first_security_step,
            self.normalized_last_security_step,
            self.secrets_with_write_count,
            self.steps_with_admin_count,
            self.security_before_deploy,
            self.normalized_avg_step_order,
        ]
    }

    /// Rebuild from a flat slice in frozen index order.
    pub fn from_slice(values: &[f64]) -> Result<Self, FeatureError> {
        if values.len() != FEATURE_COUNT {
            return Err(FeatureError::WrongLength(values.len()));
        }
        let v = Self {
            security_scan_count: values[0],
            security_step_count: values[1],
            read_permission_count: values[2],
            write_permission_count: values[3],
            admin_permission_count: values[4],
            secrets_usage_count: values[5],
            approval_step_count: values[6],
            avg_security_step_order: values[7],
            permission_escalation: values[8],
            total_step_count: values[9],
            security_step_ratio: values[10],
            normalized_first_security_step: values[11],
            normalized_last_security_step: values[12],
            secrets_with_write_count: values[13],
            steps_with_admin_count: values[14],
            security_before_deploy: values[15],
            normalized_avg_step_order: values[16],
        };
        v.validate()?;
        Ok(v)
    }

    /// Reject NaN and infinite entries.
    pub fn validate(&self) -> Result<(), FeatureError> {
        for (index, value) in self.to_vec().into_iter().enumerate() {
            if !value.is_finite() {
                return Err(FeatureError::NotFinite {
                    index,
                    name: FEATURE_NAMES[index],
                    value,
                });
            }
        }
        Ok(())
    }

    /// Value of the feature with the given frozen name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let index = FEATURE_NAMES.iter().position(|n| *n == name)?;
        Some(self.to_vec()[index])
    }
}

/// Extract the feature vector from a canonical run. An empty run produces all
/// zeros; every entry is guaranteed finite.
pub fn extract(run: &CanonicalRun) -> Result<FeatureVector, FeatureError> {
    let steps = &run.steps;
    let total = steps.len() as f64;

    let security_steps: Vec<&Step> = steps.iter().filter(|s| s.security).collect();

    let security_scan_count = security_steps
        .iter()
        .filter(|s| {
            let lower = s.name.to_lowercase();
            lower.contains("scan") || lower.contains("check")
        })
        .count() as f64;

    let security_step_count = security_steps.len() as f64;

    let has_perm = |step: &Step, perm: &str| step.permissions.iter().any(|p| p == perm);
    let read_permission_count = steps.iter().filter(|s| has_perm(s, "read")).count() as f64;
    let write_permission_count = steps.iter().filter(|s| has_perm(s, "write")).count() as f64;
    let admin_permission_count = steps.iter().filter(|s| has_perm(s, "admin")).count() as f64;

    let secrets_usage_count = steps.iter().filter(|s| s.secrets).count() as f64;
    let approval_step_count = steps.iter().filter(|s| s.approval).count() as f64;

    let avg_security_step_order = if security_steps.is_empty() {
        0.0
    } else {
        security_steps
            .iter()
            .map(|s| s.execution_order as f64)
            .sum::<f64>()
            / security_steps.len() as f64
    };

    let permission_escalation = if escalates(steps) { 1.0 } else { 0.0 };

    let security_step_ratio = if steps.is_empty() {
        0.0
    } else {
        security_step_count / total
    };

    let first_security_order = security_steps
        .iter()
        .map(|s| s.execution_order)
        .min()
        .unwrap_or(0) as f64;
    let last_security_order = security_steps
        .iter()
        .map(|s| s.execution_order)
        .max()
        .unwrap_or(0) as f64;
    let normalized_first_security_step = if steps.is_empty() {
        0.0
    } else {
        first_security_order / total
    };
    let normalized_last_security_step = if steps.is_empty() {
        0.0
    } else {
        last_security_order / total
    };

    let secrets_with_write_count = steps
        .iter()
        .filter(|s| s.secrets && has_perm(s, "write"))
        .count() as f64;

    let first_deploy_order = steps
        .iter()
        .filter(|s| s.step_type == StepType::Deploy)
        .map(|s| s.execution_order)
        .min();
    let security_before_deploy = match first_deploy_order {
        Some(deploy_order) => security_steps
            .iter()
            .filter(|s| s.execution_order < deploy_order)
            .count() as f64,
        None => security_step_count,
    };

    let normalized_avg_step_order = if steps.is_empty() {
        0.0
    } else {
        let avg = steps.iter().map(|s| s.execution_order as f64).sum::<f64>() / total;
        avg / total
    };

    let vector = FeatureVector {
        security_scan_count,
        security_step_count,
        read_permission_count,
        write_permission_count,
        admin_permission_count,
        secrets_usage_count,
        approval_step_count,
        avg_security_step_order,
        permission_escalation,
        total_step_count: total,
        security_step_ratio,
        normalized_first_security_step,
        normalized_last_security_step,
        secrets_with_write_count,
        steps_with_admin_count: admin_permission_count,
        security_before_deploy,
        normalized_avg_step_order,
    };
    vector.validate()?;
    Ok(vector)
}

/// Permission level per step: none 0, read 1, write 2, admin 3. Escalation is
/// any strict increase between adjacent steps.
fn escalates(steps: &[Step]) -> bool {
    let level = |step: &Step| -> u8 {
        if step.permissions.iter().any(|p| p == "admin") {
            3
        } else if step.permissions.iter().any(|p| p == "write") {
            2
        } else if step.permissions.iter().any(|p| p == "read") {
            1
        } else {
            0
        }
    };
    steps.windows(2).any(|w| level(&w[1]) > level(&w[0]))
}
