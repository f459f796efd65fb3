//! Container runs against a real Docker daemon (cargo test --features integration).

use std::time::{Duration, Instant};

use crate::common::{docker_cleanup, TestDeployment};

fn slug_for(deployment: &TestDeployment, name: &str) -> String {
    let canonical = deployment.config_path.canonicalize().unwrap();
    format!(
        "{name}-{}",
        convoy::identity::compute_deployment_id(&canonical)
    )
}

fn containers_with_label(slug: &str) -> Vec<String> {
    let output = std::process::Command::new("docker")
        .args([
            "ps",
            "-a",
            "--filter",
            &format!("label=convoy.deployment={}", slug),
            "--format",
            "{{.Names}}",
        ])
        .output()
        .expect("docker CLI available");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[test]
fn container_is_started_and_removed_on_shutdown() {
    let deployment = TestDeployment::new(
        r#"
[deployment]
name = "ctest"

[run]
grace_period_secs = 5

[container.napper]
image = "alpine:3.20"
command = ["sleep", "600"]
ready = { type = "uptime", min_ms = 500 }
"#,
    );
    let slug = slug_for(&deployment, "ctest");
    scopeguard::defer! { docker_cleanup(&slug); }

    let bin = assert_cmd::cargo::cargo_bin("convoy");
    let mut child = std::process::Command::new(bin)
        .arg("up")
        .arg("-f")
        .arg(&deployment.config_path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    // Wait for the container to appear (image pull can take a while).
    let deadline = Instant::now() + Duration::from_secs(120);
    loop {
        if !containers_with_label(&slug).is_empty() {
            break;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("container never appeared");
        }
        std::thread::sleep(Duration::from_millis(250));
    }

    let _ = std::process::Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
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
    assert!(status.success(), "expected exit 0, got {status}");

    // Teardown escalation ends in a forced remove, so nothing lingers.
    assert!(
        containers_with_label(&slug).is_empty(),
        "container leaked past teardown"
    );
}

#[test]
fn immediately_crashing_container_is_a_startup_failure() {
    let deployment = TestDeployment::new(
        r#"
[deployment]
name = "crashtest"

[container.flash]
image = "alpine:3.20"
command = ["false"]
"#,
    );
    let slug = slug_for(&deployment, "crashtest");
    scopeguard::defer! { docker_cleanup(&slug); }

    let output = std::process::Command::new(assert_cmd::cargo::cargo_bin("convoy"))
        .arg("up")
        .arg("-f")
        .arg(&deployment.config_path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("exited immediately"),
        "stderr was: {stderr}"
    );
}
