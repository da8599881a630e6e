//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            pipeline_name TEXT NOT NULL,
            drift_score REAL NOT NULL,
            risk_level TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            issues_json TEXT NOT NULL,
            explanations_json TEXT NOT NULL,
            feature_vector_json TEXT NOT NULL,
            parsed_steps_json TEXT NOT NULL,
            anomaly_score REAL,
            is_anomaly INTEGER,
            severe_issue_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_analyses_timestamp
            ON analyses(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_analyses_pipeline
            ON analyses(pipeline_name);
        CREATE INDEX IF NOT EXISTS idx_analyses_pipeline_ts
            ON analyses(pipeline_name, timestamp DESC);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_indexes_exist() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'analyses'")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        for expected in [
            "idx_analyses_timestamp",
            "idx_analyses_pipeline",
            "idx_analyses_pipeline_ts",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
