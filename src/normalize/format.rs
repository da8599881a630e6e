//! Heuristic CI-vendor format detection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Detected source format of a pipeline log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    GithubActions,
    GitlabCi,
    Jenkins,
    AzureDevops,
    CircleCi,
    Standard,
    Generic,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::GithubActions => "github-actions",
            LogFormat::GitlabCi => "gitlab-ci",
            LogFormat::Jenkins => "jenkins",
            LogFormat::AzureDevops => "azure-devops",
            LogFormat::CircleCi => "circleci",
            LogFormat::Standard => "standard",
            LogFormat::Generic => "generic",
        }
    }
}

/// Detect the source format, first match wins.
///
/// Jenkins and Azure DevOps are probed before GitLab: all three can carry a
/// top-level `stages` array, but the former two are recognizable from the
/// shape of the first stage, while the GitLab check accepts bare `stages`
/// presence and would shadow them.
pub fn detect(value: &Value) -> LogFormat {
    if value.get("workflow").is_some()
        || value.get("workflow_run").is_some()
        || value.get("jobs").map_or(false, Value::is_array)
    {
        return LogFormat::GithubActions;
    }

    if let Some(first) = value.get("stages").and_then(Value::as_array).and_then(|s| s.first()) {
        if first.get("steps").is_some() {
            return LogFormat::Jenkins;
        }
        if first.get("jobs").is_some() || first.get("phases").is_some() {
            return LogFormat::AzureDevops;
        }
    }

    if value.get("stages").is_some()
        || value.get("before_script").is_some()
        || value.get("after_script").is_some()
        || value.get("image").is_some()
        || value.get("services").is_some()
    {
        return LogFormat::GitlabCi;
    }

    if value.get("jobs").map_or(false, Value::is_object) {
        return LogFormat::CircleCi;
    }

    if value.get("steps").map_or(false, Value::is_array) {
        return LogFormat::Standard;
    }

    LogFormat::Generic
}
