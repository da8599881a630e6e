use std::sync::Arc;

use crate::config::Config;
use crate::detect::remote::RemoteScorer;
use crate::detect::scorer::DriftScorer;
use crate::model::store::ModelStore;
use crate::storage::AnalysisStore;

#[derive(Clone)]
pub struct AppState {
    pub store: AnalysisStore,
    pub models: ModelStore,
    pub scorer: Arc<dyn DriftScorer>,
    /// Present only in the external-scorer configuration; used by `/train`
    /// to keep the remote model in lockstep.
    pub remote: Option<Arc<RemoteScorer>>,
    pub config: Arc<Config>,
}
