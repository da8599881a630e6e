//! Environment-driven configuration with compiled-in defaults.
//!
//! Every knob is optional; an empty environment yields a runnable
//! development setup.

use std::path::PathBuf;

/// Runtime environment, gating production safety checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn from_str(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("production") {
            AppEnv::Production
        } else {
            AppEnv::Development
        }
    }
}

/// External drift-scorer settings; present only when `SCORER_URL` is set.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// CORS allowlist origin (`FRONTEND_URL`); unset allows any origin.
    pub frontend_url: Option<String>,
    /// `APP_ENV`: `production` enables the test-data analyze guard.
    pub app_env: AppEnv,
    /// Default tracing filter (`LOG_LEVEL`: debug, info, warn, error).
    pub log_level: String,
    /// SQLite database file (`DATABASE_PATH`).
    pub database_path: String,
    /// Directory holding persisted baseline models (`MODEL_DIR`).
    pub model_dir: PathBuf,
    /// Directory scanned for `pipeline-log-*.json` files (`LOGS_DIR`).
    pub logs_dir: PathBuf,
    /// External scorer, if configured (`SCORER_URL`, `SCORER_TIMEOUT_MS`,
    /// `SCORER_RETRIES`).
    pub scorer: Option<ScorerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            frontend_url: None,
            app_env: AppEnv::Development,
            log_level: "info".to_string(),
            database_path: "data/driftguard.db".to_string(),
            model_dir: PathBuf::from("data/models"),
            logs_dir: PathBuf::from("data/pipeline-logs"),
            scorer: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_var("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let frontend_url = env_var("FRONTEND_URL");
        let app_env = env_var("APP_ENV")
            .map(|v| AppEnv::from_str(&v))
            .unwrap_or(defaults.app_env);
        let log_level = env_var("LOG_LEVEL")
            .map(|v| v.to_lowercase())
            .unwrap_or(defaults.log_level);
        let database_path = env_var("DATABASE_PATH").unwrap_or(defaults.database_path);
        let model_dir = env_var("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);
        let logs_dir = env_var("LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.logs_dir);

        let scorer = env_var("SCORER_URL").map(|url| ScorerConfig {
            url,
            timeout_ms: env_var("SCORER_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            retries: env_var("SCORER_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        });

        Self {
            port,
            frontend_url,
            app_env,
            log_level,
            database_path,
            model_dir,
            logs_dir,
            scorer,
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Pipeline names matching these markers are considered test data: rejected
/// by `/analyze` in production and excluded from rolling statistics.
pub const TEST_DATA_MARKERS: &[&str] = &["test", "sample", "mock", "dummy"];

pub fn is_test_data_name(pipeline_name: &str) -> bool {
    let lower = pipeline_name.to_lowercase();
    TEST_DATA_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.frontend_url.is_none());
        assert_eq!(cfg.app_env, AppEnv::Development);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.database_path, "data/driftguard.db");
        assert_eq!(cfg.model_dir, PathBuf::from("data/models"));
        assert_eq!(cfg.logs_dir, PathBuf::from("data/pipeline-logs"));
        assert!(cfg.scorer.is_none());
    }

    #[test]
    fn test_app_env_parsing() {
        assert_eq!(AppEnv::from_str("production"), AppEnv::Production);
        assert_eq!(AppEnv::from_str("PRODUCTION"), AppEnv::Production);
        assert_eq!(AppEnv::from_str("development"), AppEnv::Development);
        assert_eq!(AppEnv::from_str("staging"), AppEnv::Development);
    }

    #[test]
    fn test_test_data_detection() {
        assert!(is_test_data_name("sample-prod"));
        assert!(is_test_data_name("MY-TEST-PIPELINE"));
        assert!(is_test_data_name("mockingbird"));
        assert!(is_test_data_name("dummy"));
        assert!(!is_test_data_name("payments-deploy"));
    }
}
