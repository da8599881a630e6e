//! API route handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::is_test_data_name;
use crate::detect::{deviations, issues, Analysis};
use crate::features::{self, FEATURE_COUNT};
use crate::model::BaselineModel;
use crate::normalize;
use crate::report::{self, Trend};
use crate::storage::{analyses::MAX_QUERY_LIMIT, QueryFilter};
use crate::{diff, logs};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

// ---------------------------------------------------------------------------
// /health and /model/info
// ---------------------------------------------------------------------------

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "driftguard",
        "version": env!("CARGO_PKG_VERSION"),
        "scorer": state.scorer.name(),
        "modelLoaded": state.models.exists(None),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn model_info(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let model = match state.models.load(None) {
        Ok(model) => model,
        Err(crate::model::ModelError::NotFound { .. }) => {
            return Err(ApiError::not_found(
                "No trained model found. Train a baseline first via POST /train.",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(json!({
        "version": model.version,
        "pipelineName": model.pipeline_name,
        "trainedAt": model.trained_at.to_rfc3339(),
        "baselineRunCount": model.baseline_run_count,
        "featureCount": FEATURE_COUNT,
        "algorithm": state.scorer.name(),
    })))
}

// ---------------------------------------------------------------------------
// POST /analyze
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub pipeline: Option<String>,
    pub log: Option<Value>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub analysis: Analysis,
    pub trend: Option<Trend>,
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let Some(log) = request.log else {
        return Err(ApiError::bad_request(
            "invalid_input",
            "request body must include a 'log' field",
        ));
    };

    let response = run_analysis(
        &state,
        &log,
        request.pipeline.as_deref(),
        request.timestamp.as_deref(),
    )
    .await?;
    Ok(Json(response))
}

/// The full analyze flow, shared with `/pipeline-logs/:filename/process`:
/// normalize, extract, score, map issues, persist (best-effort), add trend.
async fn run_analysis(
    state: &AppState,
    log: &Value,
    pipeline_override: Option<&str>,
    timestamp_override: Option<&str>,
) -> ApiResult<AnalyzeResponse> {
    let mut run = normalize::normalize_value(log)?;
    if let Some(pipeline) = pipeline_override {
        if !pipeline.trim().is_empty() {
            run.pipeline = pipeline.to_string();
        }
    }

    if state.config.is_production() && is_test_data_name(&run.pipeline) {
        return Err(ApiError::bad_request(
            "production_guard",
            format!(
                "pipeline name '{}' matches a test-data pattern and is rejected in production",
                run.pipeline
            ),
        ));
    }

    let vector = features::extract(&run)?;
    let model = state.models.load(None)?;
    let outcome = state.scorer.score(&vector, &model).await?;

    // Issue emission applies in both scorer modes: against the locally
    // trained baseline statistics.
    let devs = deviations(&vector, &model);
    let found_issues = issues::from_deviations(&devs);
    let explanations = issues::explanations(&devs);

    let timestamp = timestamp_override
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let analysis = Analysis {
        id: uuid::Uuid::new_v4(),
        pipeline_name: run.pipeline.clone(),
        drift_score: outcome.drift_score,
        risk_level: outcome.risk_level,
        timestamp,
        issues: found_issues,
        explanations,
        feature_vector: vector,
        parsed_steps: run.steps,
        anomaly_score: outcome.anomaly_score,
        is_anomaly: outcome.is_anomaly,
    };

    // Durability is best-effort: a storage failure is logged and the caller
    // still receives the computed analysis.
    if let Err(e) = state.store.upsert(&analysis) {
        warn!(pipeline = %analysis.pipeline_name, error = %format!("{e:#}"), "failed to persist analysis");
    }

    let trend = state
        .store
        .previous_for_pipeline(&analysis.pipeline_name, &analysis.timestamp, analysis.id)
        .ok()
        .flatten()
        .and_then(|previous| report::trend(&analysis, Some(&previous)));

    Ok(AnalyzeResponse { analysis, trend })
}

// ---------------------------------------------------------------------------
// GET /history
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub pipeline: Option<String>,
    pub limit: Option<String>,
    pub since: Option<String>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Value>> {
    let limit = match params.limit.as_deref() {
        None => None,
        Some(raw) => {
            let parsed: usize = raw.parse().map_err(|_| {
                ApiError::bad_request("invalid_input", format!("invalid limit '{raw}'"))
            })?;
            if parsed < 1 || parsed > MAX_QUERY_LIMIT {
                return Err(ApiError::bad_request(
                    "invalid_input",
                    format!("limit must be between 1 and {MAX_QUERY_LIMIT}"),
                ));
            }
            Some(parsed)
        }
    };

    let since = match params.since.as_deref() {
        None => None,
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| {
                    ApiError::bad_request(
                        "invalid_input",
                        format!("invalid since timestamp '{raw}'"),
                    )
                })?,
        ),
    };

    let history = state.store.query(&QueryFilter {
        pipeline: params.pipeline,
        limit,
        since,
    })?;
    let timeline = report::timeline(&history);

    let stats = state.store.stats(state.config.is_production())?;
    let recent = state.store.query(&QueryFilter {
        limit: Some(20),
        ..Default::default()
    })?;
    let tiles = report::quick_stats(&stats, &recent, Utc::now());

    Ok(Json(json!({
        "history": history,
        "timeline": timeline,
        "stats": tiles,
    })))
}

// ---------------------------------------------------------------------------
// POST /train
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    #[serde(default)]
    pub baseline_logs: Vec<Value>,
    pub model_name: Option<String>,
    /// Merge into an existing model instead of overwriting it.
    #[serde(default)]
    pub retrain: bool,
}

pub async fn train(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> ApiResult<Json<Value>> {
    let mut vectors = Vec::new();
    let mut errors: Vec<Value> = Vec::new();
    let mut pipeline_name = request.model_name.clone();

    for (index, log) in request.baseline_logs.iter().enumerate() {
        match normalize::normalize_value(log).map_err(ApiError::from).and_then(|run| {
            let vector = features::extract(&run)?;
            Ok((run, vector))
        }) {
            Ok((run, vector)) => {
                if pipeline_name.is_none() && !run.pipeline.starts_with("pipeline-") {
                    pipeline_name = Some(run.pipeline);
                }
                vectors.push(vector);
            }
            Err(e) => errors.push(json!({"index": index, "error": e.message})),
        }
    }

    if vectors.len() < 2 {
        return Err(ApiError::bad_request(
            "training_failed",
            format!(
                "at least 2 valid baseline logs are required, got {}",
                vectors.len()
            ),
        )
        .with_details(json!(errors)));
    }

    let name = pipeline_name.as_deref().unwrap_or("default");
    let model_name = request.model_name.as_deref();

    // The existing model is untouched until the replacement is complete.
    let model = if request.retrain && state.models.exists(model_name) {
        let existing = state.models.load(model_name)?;
        existing.merge(&vectors, name)?
    } else {
        BaselineModel::train(&vectors, name)?
    };

    // In the external-scorer configuration the remote model trains from the
    // same vectors; a remote failure aborts before the local swap.
    if let Some(remote) = &state.remote {
        remote.train(&vectors).await?;
    }

    state.models.save(&model, model_name)?;

    let mut response = json!({
        "status": "success",
        "modelName": model_name.unwrap_or(crate::model::store::DEFAULT_MODEL_FILE),
        "trainedAt": model.trained_at.to_rfc3339(),
        "baselineRunCount": model.baseline_run_count,
        "features": FEATURE_COUNT,
        "processedLogs": request.baseline_logs.len(),
    });
    if !errors.is_empty() {
        response["errors"] = json!(errors);
    }
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// GET /pipelines/:name
// ---------------------------------------------------------------------------

pub async fn pipeline_diff(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let newest = state
        .store
        .newest_for_pipeline(&name)?
        .ok_or_else(|| ApiError::not_found(format!("no analyses for pipeline '{name}'")))?;
    let oldest = state
        .store
        .oldest_for_pipeline(&name)?
        .ok_or_else(|| ApiError::not_found(format!("no analyses for pipeline '{name}'")))?;

    let result = diff::diff(&oldest.parsed_steps, &newest.parsed_steps);

    Ok(Json(json!({
        "pipelineName": name,
        "baseline": result.baseline,
        "current": result.current,
        "baselineTimestamp": oldest.timestamp.to_rfc3339(),
        "currentTimestamp": newest.timestamp.to_rfc3339(),
    })))
}

// ---------------------------------------------------------------------------
// /pipeline-logs
// ---------------------------------------------------------------------------

pub async fn list_logs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let files = logs::list_log_files(&state.config.logs_dir)?;
    Ok(Json(json!({
        "count": files.len(),
        "logs": files,
    })))
}

fn validated_log_path(state: &AppState, filename: &str) -> ApiResult<std::path::PathBuf> {
    if !logs::is_valid_log_filename(filename) {
        return Err(ApiError::bad_request(
            "invalid_input",
            format!("invalid log filename '{filename}': expected pipeline-log-*.json"),
        ));
    }
    let path = state.config.logs_dir.join(filename);
    if !path.exists() {
        return Err(ApiError::not_found(format!("log file '{filename}' not found")));
    }
    Ok(path)
}

pub async fn get_log(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    validated_log_path(&state, &filename)?;
    let data = logs::read_log_file(&state.config.logs_dir, &filename)
        .map_err(|e| ApiError::internal("storage_error", format!("{e:#}")))?;
    Ok(Json(json!({
        "filename": filename,
        "data": data,
    })))
}

pub async fn process_log(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    validated_log_path(&state, &filename)?;
    let log = logs::read_log_file(&state.config.logs_dir, &filename)
        .map_err(|e| ApiError::internal("storage_error", format!("{e:#}")))?;

    let response = run_analysis(&state, &log, None, None).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("re-analyzed {filename}"),
        "analysis": response.analysis,
        "trend": response.trend,
    })))
}
