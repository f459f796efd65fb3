//! Black-box tests of the `convoy` binary surface.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::TestDeployment;

fn convoy() -> Command {
    Command::cargo_bin("convoy").unwrap()
}

const VALID_CONFIG: &str = r#"
[deployment]
name = "telemetry"

[process.databroker]
command = "sleep 30"
port = 55555

[process.exporter]
command = "sleep 30"
depends_on = ["databroker"]
required = false
"#;

#[test]
fn validate_accepts_a_good_config() {
    let deployment = TestDeployment::new(VALID_CONFIG);
    convoy()
        .arg("validate")
        .arg("-f")
        .arg(&deployment.config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration OK"))
        .stdout(predicate::str::contains("2 services"));
}

#[test]
fn validate_rejects_unknown_dependency() {
    let deployment = TestDeployment::new(
        r#"
[deployment]
name = "telemetry"

[process.exporter]
command = "sleep 30"
depends_on = ["borker"]
"#,
    );
    convoy()
        .arg("validate")
        .arg("-f")
        .arg(&deployment.config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("borker"));
}

#[test]
fn validate_rejects_dependency_cycle() {
    let deployment = TestDeployment::new(
        r#"
[deployment]
name = "telemetry"

[process.a]
command = "sleep 30"
depends_on = ["b"]

[process.b]
command = "sleep 30"
depends_on = ["a"]
"#,
    );
    convoy()
        .arg("validate")
        .arg("-f")
        .arg(&deployment.config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn graph_prints_dependency_order() {
    let deployment = TestDeployment::new(VALID_CONFIG);
    let assert = convoy()
        .arg("graph")
        .arg("-f")
        .arg(&deployment.config_path)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let databroker_pos = stdout.find("databroker").expect("databroker in output");
    let exporter_pos = stdout.find("exporter").expect("exporter in output");
    assert!(
        databroker_pos < exporter_pos,
        "dependency must precede dependent:\n{stdout}"
    );
}

#[test]
fn graph_json_is_machine_readable() {
    let deployment = TestDeployment::new(VALID_CONFIG);
    let assert = convoy()
        .arg("graph")
        .arg("--format")
        .arg("json")
        .arg("-f")
        .arg(&deployment.config_path)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let entries: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], "databroker");
    assert_eq!(entries[0]["ports"][0], 55555);
    assert_eq!(entries[1]["id"], "exporter");
    assert_eq!(entries[1]["required"], false);
}

#[test]
fn missing_config_is_a_clear_error() {
    convoy()
        .arg("validate")
        .arg("-f")
        .arg("/nonexistent/convoy.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn init_writes_a_starter_config_once() {
    let dir = tempfile::tempdir().unwrap();
    convoy()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    assert!(dir.path().join("convoy.toml").exists());

    convoy()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to overwrite"));
}

#[test]
fn up_with_unknown_service_filter_fails() {
    let deployment = TestDeployment::new(VALID_CONFIG);
    convoy()
        .arg("up")
        .arg("nonexistent")
        .arg("-f")
        .arg(&deployment.config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown service"));
}

#[test]
fn up_fails_fast_when_a_required_process_cannot_spawn() {
    let deployment = TestDeployment::new(
        r#"
[deployment]
name = "telemetry"

[process.ghost]
command = "sleep 30"
path = "does-not-exist"
"#,
    );
    convoy()
        .arg("up")
        .arg("-f")
        .arg(&deployment.config_path)
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("required services failed"));
}

#[cfg(unix)]
#[test]
fn sigterm_triggers_clean_shutdown_and_exit_zero() {
    use std::time::{Duration, Instant};

    let deployment = TestDeployment::new(
        r#"
[deployment]
name = "telemetry"

[run]
grace_period_secs = 5

[process.svc]
command = "sleep 60"
"#,
    );

    let bin = assert_cmd::cargo::cargo_bin("convoy");
    let mut child = std::process::Command::new(bin)
        .arg("up")
        .arg("-f")
        .arg(&deployment.config_path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    // Let startup settle, then deliver the signal the launch scripts trap.
    std::thread::sleep(Duration::from_secs(2));
    let _ = std::process::Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("convoy did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    // Every required service started, so the exit code is 0 regardless of
    // how the run was ended.
    assert!(status.success(), "expected exit 0, got {status}");
}
