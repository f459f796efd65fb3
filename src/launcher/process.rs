use std::collections::BTreeMap;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::platform;
use crate::ui::logs::LogLine;

/// Spawn one native process in its own process group and wire its output
/// into the log channel. The pid is captured immediately; waiting for the
/// service's own notion of readiness is the probe's job, layered on top.
pub fn spawn_process(
    service: &str,
    command: &str,
    working_dir: Option<&Path>,
    env: &BTreeMap<String, String>,
    log_tx: &mpsc::Sender<LogLine>,
    tracker: &TaskTracker,
) -> Result<(u32, Child), OrchestratorError> {
    let mut cmd = platform::shell_command(command);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);
    platform::configure_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| OrchestratorError::StartupFailure {
        service: service.to_string(),
        reason: format!("failed to spawn: {e}"),
        diagnostics: None,
    })?;

    let pid = child.id().ok_or_else(|| OrchestratorError::StartupFailure {
        service: service.to_string(),
        reason: "spawned process has no pid".to_string(),
        diagnostics: None,
    })?;

    debug!(service, pid, "child spawned");

    if let Some(stdout) = child.stdout.take() {
        tracker.spawn(pipe_output(stdout, service.to_string(), false, log_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tracker.spawn(pipe_output(stderr, service.to_string(), true, log_tx.clone()));
    }

    Ok((pid, child))
}

/// Forward one output stream line-by-line into the log channel until EOF.
async fn pipe_output<R>(stream: R, service: String, is_stderr: bool, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let text = line.trim_end_matches('\n').to_string();
                if tx.send(LogLine::new(&service, text, is_stderr)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(service = %service, error = %e, "output read error");
                break;
            }
        }
    }
}
