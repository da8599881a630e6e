//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("driftguard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Security drift detection for CI/CD pipelines",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("driftguard")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("driftguard"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("driftguard")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_train_subcommand_exists() {
    Command::cargo_bin("driftguard")
        .unwrap()
        .args(["train", "--help"])
        .assert()
        .success();
}

#[test]
fn test_analyze_subcommand_exists() {
    Command::cargo_bin("driftguard")
        .unwrap()
        .args(["analyze", "--help"])
        .assert()
        .success();
}

#[test]
fn test_train_then_analyze_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let log = serde_json::json!({
        "pipeline": "smoke",
        "steps": [
            {"name": "checkout", "permissions": ["read"]},
            {"name": "sast scan"},
            {"name": "deploy", "type": "deploy"}
        ]
    });
    let log_a = dir.path().join("pipeline-log-a.json");
    let log_b = dir.path().join("pipeline-log-b.json");
    std::fs::write(&log_a, log.to_string()).unwrap();
    std::fs::write(&log_b, log.to_string()).unwrap();

    Command::cargo_bin("driftguard")
        .unwrap()
        .env("MODEL_DIR", dir.path().join("models"))
        .args(["train"])
        .arg(&log_a)
        .arg(&log_b)
        .assert()
        .success()
        .stdout(predicates::str::contains("Trained baseline from 2 runs"));

    Command::cargo_bin("driftguard")
        .unwrap()
        .env("MODEL_DIR", dir.path().join("models"))
        .arg("analyze")
        .arg(&log_a)
        .assert()
        .success()
        .stdout(predicates::str::contains("\"driftScore\": 0.0"))
        .stdout(predicates::str::contains("\"riskLevel\": \"low\""));
}
