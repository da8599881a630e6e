//! On-disk pipeline-log files: listing, validation, reading.
//!
//! The process only reads `pipeline-log-*.json` files from the configured
//! directory; anything else is rejected before touching the filesystem.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileInfo {
    pub filename: String,
    pub size_bytes: u64,
}

/// Strict allowlist: `pipeline-log-<suffix>.json` where the suffix is plain
/// ASCII word characters. Blocks traversal without having to canonicalize.
pub fn is_valid_log_filename(name: &str) -> bool {
    let Some(stem) = name.strip_prefix("pipeline-log-") else {
        return false;
    };
    let Some(suffix) = stem.strip_suffix(".json") else {
        return false;
    };
    suffix.chars().next().map_or(false, |c| c.is_ascii_alphanumeric())
        && suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !suffix.contains("..")
}

/// List matching log files, sorted by filename.
pub fn list_log_files(dir: &Path) -> Result<Vec<LogFileInfo>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // A missing directory is an empty listing, not an error.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e).context("failed to read logs directory"),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_valid_log_filename(&name) {
            continue;
        }
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(LogFileInfo {
            filename: name,
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Read and parse one validated log file.
pub fn read_log_file(dir: &Path, filename: &str) -> Result<Value> {
    let path = dir.join(filename);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{filename} is not valid JSON"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filename_validation() {
        assert!(is_valid_log_filename("pipeline-log-2025-01-01.json"));
        assert!(is_valid_log_filename("pipeline-log-run_42.json"));
        assert!(!is_valid_log_filename("pipeline-log-.json"));
        assert!(!is_valid_log_filename("other.json"));
        assert!(!is_valid_log_filename("pipeline-log-x.txt"));
        assert!(!is_valid_log_filename("pipeline-log-../../etc/passwd.json"));
        assert!(!is_valid_log_filename("pipeline-log-a/b.json"));
        assert!(!is_valid_log_filename("pipeline-log-..json"));
    }

    #[test]
    fn test_list_skips_non_matching_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("pipeline-log-a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("pipeline-log-b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = list_log_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["pipeline-log-a.json", "pipeline-log-b.json"]);
    }

    #[test]
    fn test_missing_directory_is_empty_listing() {
        let files = list_log_files(Path::new("/nonexistent/driftguard-logs")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_read_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let payload = json!({"pipeline": "ci", "steps": []});
        std::fs::write(
            dir.path().join("pipeline-log-1.json"),
            payload.to_string(),
        )
        .unwrap();

        let value = read_log_file(dir.path(), "pipeline-log-1.json").unwrap();
        assert_eq!(value, payload);

        assert!(read_log_file(dir.path(), "pipeline-log-missing.json").is_err());
    }
}
