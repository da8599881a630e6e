//! Issue mapping and human-readable explanations for feature deviations.

use uuid::Uuid;

use super::{Deviation, Issue, IssueKind, Severity};

/// Which direction of movement triggers an issue for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Increase,
    Decrease,
    Any,
}

/// Feature-to-issue mapping. Features not listed never emit issues (they
/// still contribute to the drift score and explanations).
const ISSUE_RULES: &[(&str, Trigger, IssueKind)] = &[
    ("securityScanCount", Trigger::Decrease, IssueKind::SecurityScanRemoved),
    ("securityStepCount", Trigger::Decrease, IssueKind::SecurityScanRemoved),
    ("securityStepRatio", Trigger::Decrease, IssueKind::SecurityScanRemoved),
    ("adminPermissionCount", Trigger::Increase, IssueKind::PermissionEscalation),
    ("permissionEscalation", Trigger::Increase, IssueKind::PermissionEscalation),
    ("secretsUsageCount", Trigger::Any, IssueKind::SecretsExposure),
    ("secretsWithWriteCount", Trigger::Increase, IssueKind::SecretsExposure),
    ("approvalStepCount", Trigger::Decrease, IssueKind::ApprovalBypassed),
    ("securityBeforeDeploy", Trigger::Decrease, IssueKind::ExecutionOrderChanged),
    ("normalizedFirstSecurityStep", Trigger::Increase, IssueKind::ExecutionOrderChanged),
];

/// Curated descriptor per feature, used in explanations and issue text.
fn describe(name: &str) -> &'static str {
    match name {
        "securityScanCount" => "Security scan count",
        "securityStepCount" => "Security step count",
        "readPermissionCount" => "Read permission usage",
        "writePermissionCount" => "Write permission usage",
        "adminPermissionCount" => "Admin permission usage",
        "secretsUsageCount" => "Secrets usage",
        "approvalStepCount" => "Manual approval gates",
        "avgSecurityStepOrder" => "Average security step position",
        "permissionEscalation" => "Permission escalation pattern",
        "totalStepCount" => "Total step count",
        "securityStepRatio" => "Security step ratio",
        "normalizedFirstSecurityStep" => "First security step position",
        "normalizedLastSecurityStep" => "Last security step position",
        "secretsWithWriteCount" => "Secrets used with write access",
        "stepsWithAdminCount" => "Steps holding admin permissions",
        "securityBeforeDeploy" => "Security steps before deployment",
        "normalizedAvgStepOrder" => "Average step position",
        _ => "Feature",
    }
}

/// Map significant deviations to issues, one per triggering feature.
pub fn from_deviations(deviations: &[Deviation]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for dev in deviations {
        let Some(severity) = dev.magnitude().severity() else {
            continue;
        };
        for (feature, trigger, kind) in ISSUE_RULES {
            if *feature != dev.name {
                continue;
            }
            let fired = match trigger {
                Trigger::Increase => dev.z > 0.0,
                Trigger::Decrease => dev.z < 0.0,
                Trigger::Any => true,
            };
            if !fired {
                continue;
            }
            // An observed escalation pattern is always a high-severity
            // finding regardless of its z magnitude.
            let severity = if dev.name == "permissionEscalation" {
                Severity::High
            } else {
                severity
            };
            issues.push(Issue {
                id: Uuid::new_v4(),
                kind: *kind,
                severity,
                description: issue_description(*kind, dev),
                step: None,
            });
        }
    }
    issues
}

fn issue_description(kind: IssueKind, dev: &Deviation) -> String {
    let detail = format!(
        "{} moved from a baseline of {:.2} to {:.2}",
        describe(dev.name),
        dev.mean,
        dev.value
    );
    match kind {
        IssueKind::SecurityScanRemoved => {
            format!("Security scanning coverage dropped: {detail}")
        }
        IssueKind::PermissionEscalation => {
            format!("Pipeline permissions escalated: {detail}")
        }
        IssueKind::SecretsExposure => {
            format!("Credential exposure surface changed: {detail}")
        }
        IssueKind::ApprovalBypassed => {
            format!("Manual approval gating weakened: {detail}")
        }
        IssueKind::ExecutionOrderChanged => {
            format!("Security step ordering shifted: {detail}")
        }
    }
}

/// One line per significant deviation:
/// `<descriptor> <direction> <adverb> (<value> vs baseline <mean>, change: <delta>)`.
pub fn explanations(deviations: &[Deviation]) -> Vec<String> {
    deviations
        .iter()
        .filter(|d| d.is_significant())
        .map(|d| {
            let direction = if d.z > 0.0 { "increased" } else { "decreased" };
            format!(
                "{} {} {} ({:.2} vs baseline {:.2}, change: {:.2})",
                describe(d.name),
                direction,
                d.magnitude().adverb(),
                d.value,
                d.mean,
                (d.value - d.mean).abs()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(name: &'static str, value: f64, mean: f64, z: f64) -> Deviation {
        Deviation {
            name,
            value,
            mean,
            z,
        }
    }

    #[test]
    fn test_scan_removal_fires_on_decrease_only() {
        let issues = from_deviations(&[dev("securityScanCount", 0.0, 3.0, -30.0)]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::SecurityScanRemoved);
        assert_eq!(issues[0].severity, Severity::Critical);

        let issues = from_deviations(&[dev("securityScanCount", 6.0, 3.0, 30.0)]);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_secrets_usage_fires_both_directions() {
        assert_eq!(
            from_deviations(&[dev("secretsUsageCount", 3.0, 1.0, 20.0)]).len(),
            1
        );
        assert_eq!(
            from_deviations(&[dev("secretsUsageCount", 0.0, 1.0, -10.0)]).len(),
            1
        );
    }

    #[test]
    fn test_escalation_severity_is_pinned_high() {
        let issues = from_deviations(&[dev("permissionEscalation", 1.0, 0.0, 100.0)]);
        assert_eq!(issues[0].severity, Severity::High);

        // Even for a barely-significant z.
        let issues = from_deviations(&[dev("permissionEscalation", 1.0, 0.8, 1.6)]);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn test_insignificant_deviations_are_silent() {
        let issues = from_deviations(&[dev("approvalStepCount", 1.9, 2.0, -1.0)]);
        assert!(issues.is_empty());
        assert!(explanations(&[dev("approvalStepCount", 1.9, 2.0, -1.0)]).is_empty());
    }

    #[test]
    fn test_unmapped_feature_never_issues() {
        let issues = from_deviations(&[dev("totalStepCount", 50.0, 5.0, 45.0)]);
        assert!(issues.is_empty());
        // But it still explains.
        assert_eq!(explanations(&[dev("totalStepCount", 50.0, 5.0, 45.0)]).len(), 1);
    }

    #[test]
    fn test_explanation_wording() {
        let lines = explanations(&[dev("securityScanCount", 0.0, 3.0, -4.0)]);
        assert_eq!(
            lines[0],
            "Security scan count decreased significantly (0.00 vs baseline 3.00, change: 3.00)"
        );
    }

    #[test]
    fn test_severity_scales_with_magnitude() {
        let minor = from_deviations(&[dev("approvalStepCount", 1.8, 2.0, -2.0)]);
        assert_eq!(minor[0].severity, Severity::Low);
        let moderate = from_deviations(&[dev("approvalStepCount", 1.7, 2.0, -3.0)]);
        assert_eq!(moderate[0].severity, Severity::Medium);
        let major = from_deviations(&[dev("approvalStepCount", 1.6, 2.0, -4.0)]);
        assert_eq!(major[0].severity, Severity::High);
        let dramatic = from_deviations(&[dev("approvalStepCount", 0.0, 2.0, -20.0)]);
        assert_eq!(dramatic[0].severity, Severity::Critical);
    }

    #[test]
    fn test_multiple_issues_from_one_analysis() {
        let issues = from_deviations(&[
            dev("securityScanCount", 0.0, 3.0, -30.0),
            dev("adminPermissionCount", 2.0, 0.0, 20.0),
            dev("approvalStepCount", 0.0, 2.0, -20.0),
        ]);
        assert_eq!(issues.len(), 3);
    }
}
