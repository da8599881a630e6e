//! Universal pipeline-log normalizer -- format autodetect and canonical steps.
//!
//! Accepts any JSON document (or a JSON string wrapping one), detects which
//! CI vendor produced it, and lowers it into a [`CanonicalRun`]. Downstream
//! components never see raw vendor JSON.

pub mod format;
mod steps;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use format::LogFormat;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("input is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("top-level JSON must be an object or array, got {kind}")]
    UnsupportedShape { kind: &'static str },
}

/// Step categories inferred from explicit fields or name keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Security,
    Build,
    Test,
    Deploy,
    Approval,
    Other,
}

/// A single normalized pipeline step.
///
/// `permissions` is stored deduplicated and sorted so that set comparisons
/// downstream (the pipeline diff) are canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub execution_order: u32,
    pub status: String,
    pub permissions: Vec<String>,
    pub security: bool,
    pub secrets: bool,
    pub approval: bool,
}

/// Normalizer output: one observed pipeline run in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRun {
    pub pipeline: String,
    pub timestamp: DateTime<Utc>,
    pub format: LogFormat,
    pub steps: Vec<Step>,
}

/// Normalize a raw JSON document given as text.
pub fn normalize(input: &str) -> Result<CanonicalRun, NormalizeError> {
    let value: Value = serde_json::from_str(input)?;
    normalize_value(&value)
}

/// Normalize an already-parsed JSON value.
///
/// A string value is unwrapped once (logs are frequently double-encoded by
/// webhook relays). Anything that is not an object or array is rejected;
/// missing fields inside an accepted document never fail -- they are
/// synthesized.
pub fn normalize_value(value: &Value) -> Result<CanonicalRun, NormalizeError> {
    if let Value::String(inner) = value {
        let parsed: Value = serde_json::from_str(inner)?;
        return normalize_value(&parsed);
    }

    if !value.is_object() && !value.is_array() {
        return Err(NormalizeError::UnsupportedShape {
            kind: json_kind(value),
        });
    }

    let format = format::detect(value);
    let pipeline = extract_pipeline_name(value, format);
    let timestamp = extract_timestamp(value);
    let raw_steps = steps::extract(value, format);
    let steps = raw_steps
        .iter()
        .enumerate()
        .map(|(i, raw)| steps::normalize_step(raw, i))
        .collect();

    Ok(CanonicalRun {
        pipeline,
        timestamp,
        format,
        steps,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Candidate keys for the pipeline name, most specific first.
const NAME_KEYS: &[&str] = &[
    "pipeline",
    "pipelineName",
    "name",
    "workflow",
    "workflow_name",
    "job.name",
    "definition.name",
    "repository.name",
    "project.name",
    "pipeline_name",
];

fn extract_pipeline_name(value: &Value, format: LogFormat) -> String {
    for key in NAME_KEYS {
        if let Some(name) = lookup_string(value, key) {
            return name;
        }
    }

    // Vendor-specific fallbacks before giving up.
    let vendor_key = match format {
        LogFormat::GithubActions => Some("repository.full_name"),
        LogFormat::GitlabCi => Some("project.name"),
        _ => None,
    };
    if let Some(key) = vendor_key {
        if let Some(name) = lookup_string(value, key) {
            return name;
        }
    }

    format!("pipeline-{}", Utc::now().timestamp_millis())
}

/// Candidate keys for the run timestamp, in priority order.
const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "created_at",
    "time",
    "started_at",
    "finished_at",
    "date",
    "run_date",
    "created",
    "start_time",
    "end_time",
];

fn extract_timestamp(value: &Value) -> DateTime<Utc> {
    for key in TIMESTAMP_KEYS {
        if let Some(raw) = lookup_string(value, key) {
            if let Some(ts) = parse_timestamp(&raw) {
                return ts;
            }
        }
    }
    Utc::now()
}

/// Best-effort RFC3339-ish parsing. Unparseable values fall through to "now".
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Look up a possibly-dotted key path, returning a non-empty string value.
fn lookup_string(value: &Value, key: &str) -> Option<String> {
    let mut current = value;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    match current {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}
