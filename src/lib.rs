//! Driftguard -- security drift detection for CI/CD pipelines.
//!
//! This crate provides the core library for pipeline-log normalization,
//! feature extraction, baseline training, drift scoring, and the HTTP API
//! serving analyses and reports.

pub mod api;
pub mod config;
pub mod detect;
pub mod diff;
pub mod features;
pub mod logs;
pub mod model;
pub mod normalize;
pub mod report;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::api::AppState;
use crate::config::Config;
use crate::detect::remote::RemoteScorer;
use crate::detect::scorer::{DriftScorer, StatScorer};
use crate::model::store::ModelStore;
use crate::storage::AnalysisStore;

/// Start the driftguard daemon: storage, scorer, and API server.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    tracing::info!(db_path = %config.database_path, "Initializing database");
    let pool = storage::open_pool(&config.database_path)?;

    // 2. Wire up the drift scorer
    let remote = config.scorer.as_ref().map(|cfg| {
        tracing::info!(url = %cfg.url, "Using external drift scorer");
        Arc::new(RemoteScorer::new(cfg))
    });
    let scorer: Arc<dyn DriftScorer> = match &remote {
        Some(remote) => remote.clone(),
        None => Arc::new(StatScorer),
    };

    let state = AppState {
        store: AnalysisStore::new(pool),
        models: ModelStore::new(config.model_dir.clone()),
        scorer,
        remote,
        config: Arc::new(config.clone()),
    };

    // 3. Start API Server
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = api::router(state);

    tracing::info!(%addr, "Driftguard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
