//! Model persistence -- one JSON file per named model, replaced atomically.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{BaselineModel, ModelError};

/// Default model file name when no model name is given.
pub const DEFAULT_MODEL_FILE: &str = "baseline-model.json";

/// Directory-backed model storage.
///
/// Replacement is a temp-file write followed by a rename on the same
/// filesystem, so concurrent readers observe either the old model or the new
/// one, never a partial file.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve a model name to its on-disk path. Names are restricted to a
    /// conservative character set; anything else falls back to the default
    /// file rather than touching arbitrary paths.
    pub fn path_for(&self, name: Option<&str>) -> PathBuf {
        match name {
            Some(n) if is_safe_name(n) => self.dir.join(format!("{n}.json")),
            _ => self.dir.join(DEFAULT_MODEL_FILE),
        }
    }

    pub fn exists(&self, name: Option<&str>) -> bool {
        self.path_for(name).exists()
    }

    /// Load and validate a persisted model.
    pub fn load(&self, name: Option<&str>) -> Result<BaselineModel, ModelError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(ModelError::NotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read_to_string(&path)?;
        let model: BaselineModel = serde_json::from_str(&content)?;
        model.validate()?;
        Ok(model)
    }

    /// Persist a model, atomically replacing any previous file.
    pub fn save(&self, model: &BaselineModel, name: Option<&str>) -> Result<PathBuf, ModelError> {
        model.validate()?;
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(name);
        // Unique temp name so concurrent trainers cannot clobber each
        // other's half-written file; the rename itself is atomic.
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let content = serde_json::to_string_pretty(model)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        info!(path = %path.display(), runs = model.baseline_run_count, "baseline model saved");
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
