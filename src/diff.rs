//! Pipeline diff -- step-set comparison between two canonical runs.

use serde::{Deserialize, Serialize};

use crate::normalize::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// One step's diff entry on either side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStep {
    pub name: String,
    pub status: DiffStatus,
    pub security: bool,
}

/// Both sides of a baseline-vs-current comparison, each sorted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDiff {
    pub baseline: Vec<DiffStep>,
    pub current: Vec<DiffStep>,
}

/// Compare two step lists keyed by step name.
///
/// Baseline-only steps show as `removed` on the baseline side; current-only
/// steps as `added` on the current side. A step present in both is `modified`
/// on the current side when its permission set or any security boolean
/// differs -- the baseline side stays `unchanged` either way, matching the
/// observed upstream behavior.
pub fn diff(baseline: &[Step], current: &[Step]) -> PipelineDiff {
    let mut baseline_out = Vec::with_capacity(baseline.len());
    for step in baseline {
        let status = if current.iter().any(|c| c.name == step.name) {
            DiffStatus::Unchanged
        } else {
            DiffStatus::Removed
        };
        baseline_out.push(DiffStep {
            name: step.name.clone(),
            status,
            security: step.security,
        });
    }

    let mut current_out = Vec::with_capacity(current.len());
    for step in current {
        let status = match baseline.iter().find(|b| b.name == step.name) {
            None => DiffStatus::Added,
            Some(counterpart) if step_changed(counterpart, step) => DiffStatus::Modified,
            Some(_) => DiffStatus::Unchanged,
        };
        current_out.push(DiffStep {
            name: step.name.clone(),
            status,
            security: step.security,
        });
    }

    baseline_out.sort_by(|a, b| a.name.cmp(&b.name));
    current_out.sort_by(|a, b| a.name.cmp(&b.name));

    PipelineDiff {
        baseline: baseline_out,
        current: current_out,
    }
}

/// Canonical steps store permissions sorted and deduplicated, so slice
/// equality is already set equality.
fn step_changed(baseline: &Step, current: &Step) -> bool {
    baseline.permissions != current.permissions
        || baseline.security != current.security
        || baseline.secrets != current.secrets
        || baseline.approval != current.approval
}
