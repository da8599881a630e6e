//! Analysis persistence and queries.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::detect::{Analysis, RiskLevel, Severity};

use super::Pool;

/// Listing caps: `limit` is clamped into this range.
pub const MAX_QUERY_LIMIT: usize = 1000;
pub const DEFAULT_QUERY_LIMIT: usize = 50;

#[derive(Debug, Default, Clone)]
pub struct QueryFilter {
    pub pipeline: Option<String>,
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

/// Rolling statistics across stored analyses.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_analyses: u64,
    pub average_score: f64,
    pub critical_issues: u64,
    pub last_analysis: Option<DateTime<Utc>>,
}

/// SQL fragment excluding test-data pipeline names, kept in lockstep with
/// [`crate::config::TEST_DATA_MARKERS`].
const EXCLUDE_TEST_DATA_SQL: &str = "LOWER(pipeline_name) NOT LIKE '%test%'
     AND LOWER(pipeline_name) NOT LIKE '%sample%'
     AND LOWER(pipeline_name) NOT LIKE '%mock%'
     AND LOWER(pipeline_name) NOT LIKE '%dummy%'";

const SELECT_COLUMNS: &str = "id, pipeline_name, drift_score, risk_level, timestamp,
     issues_json, explanations_json, feature_vector_json, parsed_steps_json,
     anomaly_score, is_anomaly";

#[derive(Clone)]
pub struct AnalysisStore {
    pool: Pool,
}

impl AnalysisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert or replace by `id`. The write is a single statement, so readers
    /// see the analysis in full or not at all.
    pub fn upsert(&self, analysis: &Analysis) -> Result<()> {
        let conn = self.pool.get()?;

        let severe = analysis
            .issues
            .iter()
            .filter(|i| matches!(i.severity, Severity::High | Severity::Critical))
            .count() as i64;

        conn.execute(
            "INSERT OR REPLACE INTO analyses (
                id, pipeline_name, drift_score, risk_level, timestamp,
                issues_json, explanations_json, feature_vector_json,
                parsed_steps_json, anomaly_score, is_anomaly, severe_issue_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                analysis.id.to_string(),
                analysis.pipeline_name,
                analysis.drift_score,
                analysis.risk_level.as_str(),
                store_timestamp(&analysis.timestamp),
                serde_json::to_string(&analysis.issues)?,
                serde_json::to_string(&analysis.explanations)?,
                serde_json::to_string(&analysis.feature_vector)?,
                serde_json::to_string(&analysis.parsed_steps)?,
                analysis.anomaly_score,
                analysis.is_anomaly,
                severe,
            ],
        )
        .context("failed to persist analysis")?;

        Ok(())
    }

    /// List analyses newest-first with optional pipeline/time filters.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<Analysis>> {
        let conn = self.pool.get()?;
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT);

        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM analyses WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(pipeline) = &filter.pipeline {
            sql.push_str(" AND pipeline_name = ?");
            args.push(Box::new(pipeline.clone()));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(store_timestamp(since)));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_analysis)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Analysis>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM analyses WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], row_to_analysis)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_by_pipeline(&self, pipeline: &str, limit: usize) -> Result<Vec<Analysis>> {
        self.query(&QueryFilter {
            pipeline: Some(pipeline.to_string()),
            limit: Some(limit),
            since: None,
        })
    }

    pub fn newest_for_pipeline(&self, pipeline: &str) -> Result<Option<Analysis>> {
        Ok(self.get_by_pipeline(pipeline, 1)?.into_iter().next())
    }

    pub fn oldest_for_pipeline(&self, pipeline: &str) -> Result<Option<Analysis>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM analyses
             WHERE pipeline_name = ?1 ORDER BY timestamp ASC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![pipeline], row_to_analysis)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// The most recent analysis for `pipeline` strictly older than `before`,
    /// excluding `exclude_id` (the analysis being reported on).
    pub fn previous_for_pipeline(
        &self,
        pipeline: &str,
        before: &DateTime<Utc>,
        exclude_id: Uuid,
    ) -> Result<Option<Analysis>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM analyses
             WHERE pipeline_name = ?1 AND timestamp <= ?2 AND id != ?3
             ORDER BY timestamp DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(
            params![pipeline, store_timestamp(before), exclude_id.to_string()],
            row_to_analysis,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Rolling statistics, filtered in SQL rather than in memory.
    pub fn stats(&self, exclude_test_data: bool) -> Result<StoreStats> {
        let conn = self.pool.get()?;
        let where_clause = if exclude_test_data {
            format!("WHERE {EXCLUDE_TEST_DATA_SQL}")
        } else {
            String::new()
        };

        let sql = format!(
            "SELECT COUNT(*), AVG(drift_score), SUM(severe_issue_count), MAX(timestamp)
             FROM analyses {where_clause}"
        );

        let (total, avg, severe, last): (i64, Option<f64>, Option<i64>, Option<String>) = conn
            .query_row(&sql, [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;

        Ok(StoreStats {
            total_analyses: total as u64,
            average_score: crate::detect::round2(avg.unwrap_or(0.0)),
            critical_issues: severe.unwrap_or(0) as u64,
            last_analysis: last.and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc))
            }),
        })
    }
}

/// Timestamps are stored in a fixed-width RFC3339 form so lexicographic
/// ordering in SQL matches chronological ordering.
fn store_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_analysis(row: &Row<'_>) -> rusqlite::Result<Analysis> {
    let id_str: String = row.get(0)?;
    let risk_str: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let issues_json: String = row.get(5)?;
    let explanations_json: String = row.get(6)?;
    let vector_json: String = row.get(7)?;
    let steps_json: String = row.get(8)?;

    let risk_level = match risk_str.as_str() {
        "medium" => RiskLevel::Medium,
        "high" => RiskLevel::High,
        "critical" => RiskLevel::Critical,
        _ => RiskLevel::Low,
    };

    Ok(Analysis {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        pipeline_name: row.get(1)?,
        drift_score: row.get(2)?,
        risk_level,
        timestamp: DateTime::parse_from_rfc3339(&ts_str)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_default(),
        issues: serde_json::from_str(&issues_json).unwrap_or_default(),
        explanations: serde_json::from_str(&explanations_json).unwrap_or_default(),
        feature_vector: serde_json::from_str(&vector_json).unwrap_or_default(),
        parsed_steps: serde_json::from_str(&steps_json).unwrap_or_default(),
        anomaly_score: row.get(9)?,
        is_anomaly: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Issue, IssueKind};
    use crate::features::FeatureVector;
    use crate::storage::open_test_pool;
    use chrono::Duration;

    fn analysis(pipeline: &str, score: f64, ts: DateTime<Utc>) -> Analysis {
        Analysis {
            id: Uuid::new_v4(),
            pipeline_name: pipeline.to_string(),
            drift_score: score,
            risk_level: RiskLevel::from_score(score),
            timestamp: ts,
            issues: Vec::new(),
            explanations: Vec::new(),
            feature_vector: FeatureVector::default(),
            parsed_steps: Vec::new(),
            anomaly_score: None,
            is_anomaly: None,
        }
    }

    #[test]
    fn test_upsert_and_get_roundtrip() {
        let store = AnalysisStore::new(open_test_pool());
        let mut a = analysis("payments", 42.5, Utc::now());
        a.explanations = vec!["Security scan count decreased significantly".to_string()];
        a.issues = vec![Issue {
            id: Uuid::new_v4(),
            kind: IssueKind::SecurityScanRemoved,
            severity: Severity::High,
            description: "scans dropped".to_string(),
            step: None,
        }];

        store.upsert(&a).unwrap();
        let loaded = store.get_by_id(a.id).unwrap().unwrap();

        assert_eq!(loaded.id, a.id);
        assert_eq!(loaded.pipeline_name, a.pipeline_name);
        assert_eq!(loaded.drift_score, a.drift_score);
        assert_eq!(loaded.risk_level, a.risk_level);
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].kind, IssueKind::SecurityScanRemoved);
        assert_eq!(loaded.explanations, a.explanations);
    }

    #[test]
    fn test_upsert_is_idempotent_by_id() {
        let store = AnalysisStore::new(open_test_pool());
        let a = analysis("ci", 10.0, Utc::now());
        store.upsert(&a).unwrap();
        store.upsert(&a).unwrap();
        assert_eq!(store.stats(false).unwrap().total_analyses, 1);
    }

    #[test]
    fn test_query_newest_first() {
        let store = AnalysisStore::new(open_test_pool());
        let base = Utc::now();
        let old = analysis("ci", 10.0, base - Duration::hours(2));
        let mid = analysis("ci", 20.0, base - Duration::hours(1));
        let new = analysis("ci", 30.0, base);
        store.upsert(&old).unwrap();
        store.upsert(&new).unwrap();
        store.upsert(&mid).unwrap();

        let listed = store.query(&QueryFilter::default()).unwrap();
        let scores: Vec<f64> = listed.iter().map(|a| a.drift_score).collect();
        assert_eq!(scores, vec![30.0, 20.0, 10.0]);

        // The newest upsert sits at the head of its pipeline's history.
        let head = store.newest_for_pipeline("ci").unwrap().unwrap();
        assert_eq!(head.id, new.id);
    }

    #[test]
    fn test_query_filters_by_pipeline_and_since() {
        let store = AnalysisStore::new(open_test_pool());
        let base = Utc::now();
        store.upsert(&analysis("a", 1.0, base - Duration::hours(3))).unwrap();
        store.upsert(&analysis("a", 2.0, base)).unwrap();
        store.upsert(&analysis("b", 3.0, base)).unwrap();

        let only_a = store
            .query(&QueryFilter {
                pipeline: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_a.len(), 2);

        let recent = store
            .query(&QueryFilter {
                since: Some(base - Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_limit_clamped() {
        let store = AnalysisStore::new(open_test_pool());
        let base = Utc::now();
        for i in 0..5 {
            store
                .upsert(&analysis("ci", i as f64, base - Duration::minutes(i)))
                .unwrap();
        }
        let listed = store
            .query(&QueryFilter {
                limit: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed.len(), 1);

        let listed = store
            .query(&QueryFilter {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn test_stats_average_and_severe_counts() {
        let store = AnalysisStore::new(open_test_pool());
        let base = Utc::now();

        let mut a = analysis("prod", 10.0, base - Duration::minutes(2));
        a.issues = vec![
            Issue {
                id: Uuid::new_v4(),
                kind: IssueKind::PermissionEscalation,
                severity: Severity::High,
                description: String::new(),
                step: None,
            },
            Issue {
                id: Uuid::new_v4(),
                kind: IssueKind::SecretsExposure,
                severity: Severity::Low,
                description: String::new(),
                step: None,
            },
        ];
        let b = analysis("prod", 20.0, base);
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let stats = store.stats(false).unwrap();
        assert_eq!(stats.total_analyses, 2);
        assert!((stats.average_score - 15.0).abs() < 0.01);
        assert_eq!(stats.critical_issues, 1);
        assert!(stats.last_analysis.is_some());
    }

    #[test]
    fn test_stats_excludes_test_data() {
        let store = AnalysisStore::new(open_test_pool());
        let now = Utc::now();
        store.upsert(&analysis("prod", 10.0, now)).unwrap();
        store.upsert(&analysis("sample-run", 90.0, now)).unwrap();
        store.upsert(&analysis("MOCK-deploy", 90.0, now)).unwrap();

        let all = store.stats(false).unwrap();
        assert_eq!(all.total_analyses, 3);

        let filtered = store.stats(true).unwrap();
        assert_eq!(filtered.total_analyses, 1);
        assert!((filtered.average_score - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_previous_for_pipeline() {
        let store = AnalysisStore::new(open_test_pool());
        let base = Utc::now();
        let older = analysis("ci", 10.0, base - Duration::hours(1));
        let current = analysis("ci", 40.0, base);
        store.upsert(&older).unwrap();
        store.upsert(&current).unwrap();

        let previous = store
            .previous_for_pipeline("ci", &current.timestamp, current.id)
            .unwrap()
            .unwrap();
        assert_eq!(previous.id, older.id);

        // No predecessor for the oldest entry.
        assert!(store
            .previous_for_pipeline("ci", &older.timestamp, older.id)
            .unwrap()
            .is_none());
    }
}
