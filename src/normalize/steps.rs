//! Step extraction and per-step normalization rules.

use serde_json::{Map, Value};

use super::{LogFormat, Step, StepType};

/// Keywords that mark a step as security-related.
pub const SECURITY_KEYWORDS: &[&str] = &[
    "security",
    "scan",
    "audit",
    "test",
    "check",
    "verify",
    "validate",
    "dependency-check",
    "sast",
    "dast",
    "secrets",
    "token",
    "key",
    "vulnerability",
    "compliance",
    "policy",
];

/// Substrings that flag an env key as credential-bearing.
const SECRET_ENV_KEYWORDS: &[&str] = &["secret", "token", "key", "password"];

/// Substrings that flag names, ids, inputs, and script bodies.
///
/// Intentionally aggressive: a step merely named "key" will be flagged.
/// Tune the list, not the matching shape.
const SECRET_KEYWORDS: &[&str] = &["secret", "token", "key"];

const APPROVAL_KEYWORDS: &[&str] = &["approval", "manual", "gate", "review"];

/// Fields whose presence makes an object look like a pipeline step.
const STEP_LIKE_KEYS: &[&str] = &["name", "id", "step", "action", "script", "task", "label"];

const MAX_GENERIC_DEPTH: usize = 5;

/// Extract raw step objects from a detected format, falling back to a
/// recursive search and finally to wrapping the whole document.
pub(super) fn extract(value: &Value, format: LogFormat) -> Vec<Value> {
    let collected = match format {
        LogFormat::GithubActions => extract_github(value),
        LogFormat::GitlabCi => extract_gitlab(value),
        LogFormat::Jenkins => extract_jenkins(value),
        LogFormat::AzureDevops => extract_azure(value),
        LogFormat::CircleCi => extract_circleci(value),
        LogFormat::Standard => {
            // An explicit (possibly empty) steps array is taken at face value.
            return value
                .get("steps")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
        }
        LogFormat::Generic => Vec::new(),
    };
    if !collected.is_empty() {
        return collected;
    }

    let generic = extract_generic(value);
    if !generic.is_empty() {
        return generic;
    }

    vec![value.clone()]
}

fn extract_github(value: &Value) -> Vec<Value> {
    let mut steps = Vec::new();
    if let Some(jobs) = value.get("jobs").and_then(Value::as_array) {
        for job in jobs {
            match job.get("steps").and_then(Value::as_array) {
                Some(inner) if !inner.is_empty() => steps.extend(inner.iter().cloned()),
                _ => steps.push(job.clone()),
            }
        }
    }
    if steps.is_empty() {
        if let Some(root) = value.get("steps").and_then(Value::as_array) {
            steps.extend(root.iter().cloned());
        }
    }
    steps
}

/// GitLab job definitions are top-level mappings carrying `script` or `stage`;
/// reserved keys (`stages`, `image`, ...) are not jobs.
fn extract_gitlab(value: &Value) -> Vec<Value> {
    const RESERVED: &[&str] = &[
        "stages",
        "before_script",
        "after_script",
        "image",
        "services",
        "variables",
        "workflow",
        "default",
        "include",
    ];

    let Some(map) = value.as_object() else {
        return Vec::new();
    };
    let mut steps = Vec::new();
    for (key, entry) in map {
        if RESERVED.contains(&key.as_str()) {
            continue;
        }
        if let Some(obj) = entry.as_object() {
            if obj.contains_key("script") || obj.contains_key("stage") {
                steps.push(with_name(obj, key));
            }
        }
    }
    steps
}

fn extract_jenkins(value: &Value) -> Vec<Value> {
    let mut steps = Vec::new();
    if let Some(stages) = value.get("stages").and_then(Value::as_array) {
        for stage in stages {
            match stage.get("steps").and_then(Value::as_array) {
                Some(inner) if inner.iter().all(Value::is_object) && !inner.is_empty() => {
                    steps.extend(inner.iter().cloned())
                }
                _ => steps.push(stage.clone()),
            }
        }
    }
    steps
}

fn extract_azure(value: &Value) -> Vec<Value> {
    let mut steps = Vec::new();
    if let Some(stages) = value.get("stages").and_then(Value::as_array) {
        for stage in stages {
            let jobs = stage
                .get("jobs")
                .or_else(|| stage.get("phases"))
                .and_then(Value::as_array);
            let Some(jobs) = jobs else {
                steps.push(stage.clone());
                continue;
            };
            for job in jobs {
                match job.get("steps").and_then(Value::as_array) {
                    Some(inner) if !inner.is_empty() => steps.extend(inner.iter().cloned()),
                    _ => steps.push(job.clone()),
                }
            }
        }
    }
    steps
}

fn extract_circleci(value: &Value) -> Vec<Value> {
    let Some(jobs) = value.get("jobs").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut steps = Vec::new();
    for (job_name, job) in jobs {
        match job.get("steps").and_then(Value::as_array) {
            Some(inner) if !inner.is_empty() => {
                for step in inner {
                    match step {
                        // CircleCI allows bare-string steps like "checkout".
                        Value::String(s) => {
                            let mut obj = Map::new();
                            obj.insert("name".to_string(), Value::String(s.clone()));
                            steps.push(Value::Object(obj));
                        }
                        other => steps.push(other.clone()),
                    }
                }
            }
            _ => {
                if let Some(obj) = job.as_object() {
                    steps.push(with_name(obj, job_name));
                }
            }
        }
    }
    steps
}

/// Recursive fallback: descend up to [`MAX_GENERIC_DEPTH`] levels and collect
/// every array whose elements are objects carrying at least one step-like
/// field; the largest such array wins.
fn extract_generic(value: &Value) -> Vec<Value> {
    let mut best: Vec<Value> = Vec::new();
    collect_candidates(value, 0, &mut best);
    best
}

fn collect_candidates(value: &Value, depth: usize, best: &mut Vec<Value>) {
    if depth > MAX_GENERIC_DEPTH {
        return;
    }
    match value {
        Value::Array(items) => {
            let all_objects = !items.is_empty() && items.iter().all(Value::is_object);
            let step_like = items.iter().any(|item| {
                item.as_object()
                    .map_or(false, |obj| STEP_LIKE_KEYS.iter().any(|k| obj.contains_key(*k)))
            });
            if all_objects && step_like && items.len() > best.len() {
                *best = items.clone();
            }
            for item in items {
                collect_candidates(item, depth + 1, best);
            }
        }
        Value::Object(map) => {
            for entry in map.values() {
                collect_candidates(entry, depth + 1, best);
            }
        }
        _ => {}
    }
}

fn with_name(obj: &Map<String, Value>, name: &str) -> Value {
    let mut cloned = obj.clone();
    cloned
        .entry("name".to_string())
        .or_insert_with(|| Value::String(name.to_string()));
    Value::Object(cloned)
}

// ---------------------------------------------------------------------------
// Per-step normalization
// ---------------------------------------------------------------------------

/// Lower one raw step value into a canonical [`Step`]. `index` is 0-based.
pub(super) fn normalize_step(raw: &Value, index: usize) -> Step {
    let obj = raw.as_object();

    let name = step_name(raw, index);
    let name_lower = name.to_lowercase();

    let explicit_type = obj.and_then(|o| {
        ["type", "category", "kind"]
            .iter()
            .find_map(|k| o.get(*k).and_then(Value::as_str))
    });
    let step_type = explicit_type
        .and_then(parse_step_type)
        .unwrap_or_else(|| classify_by_name(&name_lower));

    let execution_order = obj
        .and_then(|o| {
            ["executionOrder", "order", "index", "run_number"]
                .iter()
                .find_map(|k| o.get(*k).and_then(Value::as_u64))
        })
        .map(|n| (n.max(1)).min(u32::MAX as u64) as u32)
        .unwrap_or(index as u32 + 1);

    let status = obj
        .and_then(|o| o.get("status").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();

    let permissions = collect_permissions(obj);

    let security = obj
        .and_then(|o| o.get("security").and_then(Value::as_bool))
        .unwrap_or_else(|| contains_any(&name_lower, SECURITY_KEYWORDS));

    let secrets = detect_secrets(obj, &name_lower);
    let approval = detect_approval(obj, &name_lower, explicit_type);

    Step {
        name,
        step_type,
        execution_order,
        status,
        permissions,
        security,
        secrets,
        approval,
    }
}

fn step_name(raw: &Value, index: usize) -> String {
    if let Value::String(s) = raw {
        if !s.trim().is_empty() {
            return s.clone();
        }
    }
    if let Some(obj) = raw.as_object() {
        for key in ["name", "id", "step", "action", "task", "label", "job"] {
            match obj.get(key) {
                Some(Value::String(s)) if !s.trim().is_empty() => return s.clone(),
                Some(Value::Number(n)) if key == "id" => return n.to_string(),
                _ => {}
            }
        }
    }
    format!("step-{}", index + 1)
}

fn parse_step_type(raw: &str) -> Option<StepType> {
    match raw.to_lowercase().as_str() {
        "security" => Some(StepType::Security),
        "build" => Some(StepType::Build),
        "test" => Some(StepType::Test),
        "deploy" | "deployment" => Some(StepType::Deploy),
        "approval" => Some(StepType::Approval),
        "other" => Some(StepType::Other),
        _ => None,
    }
}

/// Keyword classification, most specific category first.
fn classify_by_name(name_lower: &str) -> StepType {
    if contains_any(name_lower, APPROVAL_KEYWORDS) {
        return StepType::Approval;
    }
    if contains_any(name_lower, &["deploy", "release", "publish", "rollout"]) {
        return StepType::Deploy;
    }
    if contains_any(
        name_lower,
        &[
            "security",
            "scan",
            "audit",
            "sast",
            "dast",
            "vulnerability",
            "compliance",
            "secrets",
        ],
    ) {
        return StepType::Security;
    }
    if contains_any(name_lower, &["build", "compile", "package", "docker"]) {
        return StepType::Build;
    }
    if contains_any(name_lower, &["test", "verify", "validate", "check", "lint"]) {
        return StepType::Test;
    }
    StepType::Other
}

/// Union of every permission source the vendors use, deduplicated and sorted.
fn collect_permissions(obj: Option<&Map<String, Value>>) -> Vec<String> {
    let mut perms: Vec<String> = Vec::new();
    let Some(obj) = obj else {
        return perms;
    };

    match obj.get("permissions") {
        Some(Value::Array(items)) => {
            perms.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
        }
        // GitHub style: {"contents": "read"} or {"write": true}.
        Some(Value::Object(map)) => {
            for (key, entry) in map {
                match entry {
                    Value::Bool(true) => perms.push(key.clone()),
                    Value::String(s) => perms.push(s.clone()),
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) => perms.push(s.clone()),
        _ => {}
    }

    for source in ["scopes", "access"] {
        if let Some(items) = obj.get(source).and_then(Value::as_array) {
            perms.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }

    if let Some(env) = obj.get("env").and_then(Value::as_object) {
        for entry in env.values() {
            if let Some(text) = entry.as_str() {
                let lower = text.to_lowercase();
                for token in ["read", "write", "admin"] {
                    if lower.contains(token) {
                        perms.push(token.to_string());
                    }
                }
            }
        }
    }

    perms.sort();
    perms.dedup();
    perms
}

fn detect_secrets(obj: Option<&Map<String, Value>>, name_lower: &str) -> bool {
    if contains_any(name_lower, SECRET_KEYWORDS) {
        return true;
    }
    let Some(obj) = obj else {
        return false;
    };

    if let Some(env) = obj.get("env").and_then(Value::as_object) {
        if env
            .keys()
            .any(|k| contains_any(&k.to_lowercase(), SECRET_ENV_KEYWORDS))
        {
            return true;
        }
    }

    if let Some(inputs) = obj.get("inputs").and_then(Value::as_object) {
        if inputs
            .keys()
            .any(|k| contains_any(&k.to_lowercase(), SECRET_KEYWORDS))
        {
            return true;
        }
    }

    for key in ["description", "id"] {
        if let Some(text) = obj.get(key).and_then(Value::as_str) {
            if contains_any(&text.to_lowercase(), SECRET_KEYWORDS) {
                return true;
            }
        }
    }

    for key in ["script", "run", "command"] {
        if let Some(entry) = obj.get(key) {
            if body_mentions_secret(entry) {
                return true;
            }
        }
    }

    false
}

/// Script bodies come as strings, arrays of lines, or `{command: ...}` maps.
fn body_mentions_secret(entry: &Value) -> bool {
    match entry {
        Value::String(s) => contains_any(&s.to_lowercase(), SECRET_KEYWORDS),
        Value::Array(items) => items.iter().any(body_mentions_secret),
        Value::Object(map) => map.values().any(body_mentions_secret),
        _ => false,
    }
}

fn detect_approval(
    obj: Option<&Map<String, Value>>,
    name_lower: &str,
    explicit_type: Option<&str>,
) -> bool {
    if let Some(kind) = explicit_type {
        if kind.eq_ignore_ascii_case("approval") {
            return true;
        }
        if contains_any(&kind.to_lowercase(), APPROVAL_KEYWORDS) {
            return true;
        }
    }
    if contains_any(name_lower, APPROVAL_KEYWORDS) {
        return true;
    }
    let Some(obj) = obj else {
        return false;
    };
    for key in ["description", "id"] {
        if let Some(text) = obj.get(key).and_then(Value::as_str) {
            if contains_any(&text.to_lowercase(), APPROVAL_KEYWORDS) {
                return true;
            }
        }
    }
    false
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
