//! Report assembly -- timeline points, trend, and quick-stat tiles.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::{round2, Analysis, Severity};
use crate::storage::StoreStats;

/// Rolling-average window for the score-change indicator.
const ROLLING_WINDOW: usize = 10;
/// Minimum average-score delta before the tile shows a direction.
const CHANGE_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub date: DateTime<Utc>,
    pub score: f64,
    pub event: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub change: f64,
    pub change_percent: f64,
    pub direction: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickStat {
    pub label: &'static str,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<&'static str>,
}

/// Chronological timeline with notable events flagged.
pub fn timeline(analyses: &[Analysis]) -> Vec<TimelinePoint> {
    let mut points: Vec<TimelinePoint> = analyses
        .iter()
        .map(|a| TimelinePoint {
            date: a.timestamp,
            score: a.drift_score,
            event: event_for(a),
        })
        .collect();
    points.sort_by_key(|p| p.date);
    points
}

fn event_for(analysis: &Analysis) -> Option<&'static str> {
    if analysis.drift_score >= 70.0 {
        return Some("Critical drift detected");
    }
    if analysis.drift_score >= 50.0 {
        return Some("High drift detected");
    }
    let severe = analysis
        .issues
        .iter()
        .any(|i| matches!(i.severity, Severity::High | Severity::Critical));
    if severe {
        return Some("Security issue detected");
    }
    None
}

/// Score movement relative to the previous analysis of the same pipeline.
/// `None` when there is no predecessor.
pub fn trend(current: &Analysis, previous: Option<&Analysis>) -> Option<Trend> {
    let previous = previous?;
    let change = round2(current.drift_score - previous.drift_score);
    let change_percent = if previous.drift_score.abs() < f64::EPSILON {
        if change.abs() < f64::EPSILON {
            0.0
        } else {
            100.0
        }
    } else {
        round2(change / previous.drift_score * 100.0)
    };
    let direction = if change > 0.0 {
        "up"
    } else if change < 0.0 {
        "down"
    } else {
        "neutral"
    };
    Some(Trend {
        change,
        change_percent,
        direction,
    })
}

/// The four dashboard tiles. `recent` is the newest-first analysis list used
/// for the rolling average-score change indicator.
pub fn quick_stats(stats: &StoreStats, recent: &[Analysis], now: DateTime<Utc>) -> Vec<QuickStat> {
    vec![
        QuickStat {
            label: "Total Analyses",
            value: stats.total_analyses.to_string(),
            change: None,
        },
        QuickStat {
            label: "Average Score",
            value: format!("{:.2}", stats.average_score),
            change: rolling_change(recent),
        },
        QuickStat {
            label: "Critical Issues",
            value: stats.critical_issues.to_string(),
            change: None,
        },
        QuickStat {
            label: "Last Analysis",
            value: stats
                .last_analysis
                .map(|ts| humanize_since(ts, now))
                .unwrap_or_else(|| "never".to_string()),
            change: None,
        },
    ]
}

/// Compare the mean score of the last [`ROLLING_WINDOW`] analyses with the
/// preceding window; only a delta beyond the threshold shows a direction.
fn rolling_change(recent: &[Analysis]) -> Option<&'static str> {
    if recent.len() < ROLLING_WINDOW * 2 {
        return None;
    }
    let mean = |slice: &[Analysis]| {
        slice.iter().map(|a| a.drift_score).sum::<f64>() / slice.len() as f64
    };
    let latest = mean(&recent[..ROLLING_WINDOW]);
    let preceding = mean(&recent[ROLLING_WINDOW..ROLLING_WINDOW * 2]);
    let delta = latest - preceding;
    if delta > CHANGE_THRESHOLD {
        Some("up")
    } else if delta < -CHANGE_THRESHOLD {
        Some("down")
    } else {
        None
    }
}

fn humanize_since(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(ts);
    let seconds = elapsed.num_seconds().max(0);
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(hours / 24, "day")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Issue, IssueKind, RiskLevel};
    use crate::features::FeatureVector;
    use chrono::Duration;
    use uuid::Uuid;

    fn analysis(score: f64, ts: DateTime<Utc>) -> Analysis {
        Analysis {
            id: Uuid::new_v4(),
            pipeline_name: "ci".to_string(),
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
    fn test_timeline_sorted_ascending_with_events() {
        let now = Utc::now();
        let mut with_issue = analysis(10.0, now - Duration::hours(1));
        with_issue.issues.push(Issue {
            id: Uuid::new_v4(),
            kind: IssueKind::SecretsExposure,
            severity: Severity::Critical,
            description: String::new(),
            step: None,
        });
        let analyses = vec![analysis(80.0, now), with_issue, analysis(55.0, now - Duration::hours(2))];

        let points = timeline(&analyses);
        assert!(points.windows(2).all(|w| w[0].date <= w[1].date));
        assert_eq!(points[0].event, Some("High drift detected"));
        assert_eq!(points[1].event, Some("Security issue detected"));
        assert_eq!(points[2].event, Some("Critical drift detected"));
    }

    #[test]
    fn test_quiet_analysis_has_no_event() {
        let points = timeline(&[analysis(12.0, Utc::now())]);
        assert_eq!(points[0].event, None);
    }

    #[test]
    fn test_trend_directions() {
        let now = Utc::now();
        let previous = analysis(40.0, now - Duration::hours(1));

        let t = trend(&analysis(50.0, now), Some(&previous)).unwrap();
        assert_eq!(t.change, 10.0);
        assert_eq!(t.change_percent, 25.0);
        assert_eq!(t.direction, "up");

        let t = trend(&analysis(30.0, now), Some(&previous)).unwrap();
        assert_eq!(t.direction, "down");

        let t = trend(&analysis(40.0, now), Some(&previous)).unwrap();
        assert_eq!(t.direction, "neutral");

        assert!(trend(&analysis(40.0, now), None).is_none());
    }

    #[test]
    fn test_trend_from_zero_baseline() {
        let now = Utc::now();
        let previous = analysis(0.0, now - Duration::hours(1));
        let t = trend(&analysis(20.0, now), Some(&previous)).unwrap();
        assert_eq!(t.change_percent, 100.0);
    }

    #[test]
    fn test_quick_stats_tiles() {
        let now = Utc::now();
        let stats = StoreStats {
            total_analyses: 7,
            average_score: 13.37,
            critical_issues: 2,
            last_analysis: Some(now - Duration::minutes(5)),
        };
        let tiles = quick_stats(&stats, &[], now);
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[0].label, "Total Analyses");
        assert_eq!(tiles[0].value, "7");
        assert_eq!(tiles[1].value, "13.37");
        assert_eq!(tiles[2].value, "2");
        assert_eq!(tiles[3].value, "5 minutes ago");
    }

    #[test]
    fn test_quick_stats_without_history() {
        let tiles = quick_stats(
            &StoreStats {
                total_analyses: 0,
                average_score: 0.0,
                critical_issues: 0,
                last_analysis: None,
            },
            &[],
            Utc::now(),
        );
        assert_eq!(tiles[3].value, "never");
        assert!(tiles[1].change.is_none());
    }

    #[test]
    fn test_rolling_change_indicator() {
        let now = Utc::now();
        // Newest-first: ten high scores, then ten low scores.
        let mut recent = Vec::new();
        for i in 0..10 {
            recent.push(analysis(60.0, now - Duration::minutes(i)));
        }
        for i in 10..20 {
            recent.push(analysis(10.0, now - Duration::minutes(i)));
        }
        assert_eq!(rolling_change(&recent), Some("up"));

        recent.reverse();
        // Reversed list is oldest-first, so the "latest" window is now low.
        assert_eq!(rolling_change(&recent), Some("down"));

        assert_eq!(rolling_change(&recent[..5]), None);
    }

    #[test]
    fn test_humanize_since() {
        let now = Utc::now();
        assert_eq!(humanize_since(now - Duration::seconds(30), now), "just now");
        assert_eq!(humanize_since(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(humanize_since(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(humanize_since(now - Duration::days(2), now), "2 days ago");
    }
}
