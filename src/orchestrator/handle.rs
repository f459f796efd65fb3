use std::sync::Mutex;
use std::time::Duration;

use bollard::Docker;
use chrono::{DateTime, Utc};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::launcher::container;
use crate::orchestrator::spec::ServiceKind;
use crate::platform;

/// Observed lifecycle of a launched service.
///
/// Transitions are monotonic along Starting -> Ready -> Stopping -> Stopped;
/// `Failed` is terminal and reachable only from `Starting` (a unit that never
/// finished coming up). A handle never re-enters `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceState {
    fn rank(self) -> u8 {
        match self {
            ServiceState::Starting => 0,
            ServiceState::Ready => 1,
            ServiceState::Stopping => 2,
            ServiceState::Stopped => 3,
            // Failed is outside the ordinary ladder.
            ServiceState::Failed => u8::MAX,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Starting => "starting",
            ServiceState::Ready => "ready",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Live reference to the underlying OS unit.
pub enum RuntimeRef {
    Process {
        pid: u32,
        /// Held for waiting/reaping; `None` once the child has been reaped.
        child: tokio::sync::Mutex<Option<Child>>,
    },
    Container {
        id: String,
        name: String,
        docker: Docker,
    },
}

impl std::fmt::Debug for RuntimeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeRef::Process { pid, .. } => write!(f, "pid {pid}"),
            RuntimeRef::Container { id, .. } => {
                write!(f, "container {}", &id[..id.len().min(12)])
            }
        }
    }
}

/// One successfully launched service. Created by the launcher, mutated only
/// by the supervisor and the shutdown coordinator.
#[derive(Debug)]
pub struct ServiceHandle {
    spec_id: String,
    kind: ServiceKind,
    required: bool,
    runtime: RuntimeRef,
    state: Mutex<ServiceState>,
    started_at: DateTime<Utc>,
}

impl ServiceHandle {
    pub fn new_process(spec_id: &str, required: bool, pid: u32, child: Child) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            kind: ServiceKind::Process,
            required,
            runtime: RuntimeRef::Process {
                pid,
                child: tokio::sync::Mutex::new(Some(child)),
            },
            state: Mutex::new(ServiceState::Starting),
            started_at: Utc::now(),
        }
    }

    pub fn new_container(
        spec_id: &str,
        required: bool,
        id: String,
        name: String,
        docker: Docker,
    ) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            kind: ServiceKind::Container,
            required,
            runtime: RuntimeRef::Container { id, name, docker },
            state: Mutex::new(ServiceState::Starting),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec_id
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn runtime_desc(&self) -> String {
        format!("{:?}", self.runtime)
    }

    /// Apply a forward state transition. Returns false (and leaves the state
    /// untouched) when the transition would move backwards, re-enter
    /// `Starting`, leave a terminal state, or reach `Failed` from anywhere
    /// but `Starting`.
    pub fn advance(&self, next: ServiceState) -> bool {
        let mut state = self.state.lock().expect("state lock poisoned");
        let current = *state;
        let allowed = match next {
            ServiceState::Failed => current == ServiceState::Starting,
            _ => !matches!(current, ServiceState::Failed) && next.rank() > current.rank(),
        };
        if allowed {
            debug!(service = %self.spec_id, from = %current, to = %next, "state transition");
            *state = next;
        }
        allowed
    }

    /// Is the underlying process/container still running?
    pub async fn is_alive(&self) -> bool {
        match &self.runtime {
            RuntimeRef::Process { pid, child } => {
                let mut guard = child.lock().await;
                match guard.as_mut() {
                    Some(proc) => match proc.try_wait() {
                        Ok(None) => true,
                        Ok(Some(_)) => {
                            // Reap so the pid cannot be confused with a zombie.
                            *guard = None;
                            false
                        }
                        Err(_) => platform::is_process_alive(*pid),
                    },
                    None => false,
                }
            }
            RuntimeRef::Container { id, docker, .. } => {
                container::container_running(docker, id).await
            }
        }
    }

    /// Send a cooperative stop request without waiting for the unit to exit.
    pub async fn request_stop(&self) {
        match &self.runtime {
            RuntimeRef::Process { pid, .. } => platform::request_terminate(*pid),
            RuntimeRef::Container { id, name, docker } => {
                if let Err(e) = container::signal_container(docker, id, "SIGTERM").await {
                    debug!(container = %name, error = %e, "stop signal not delivered");
                }
            }
        }
    }

    /// Wait up to `grace` for the unit to stop after a stop request.
    /// Returns true once it is confirmed gone.
    pub async fn wait_stopped(&self, grace: Duration) -> bool {
        if self.state() == ServiceState::Stopped {
            return true;
        }
        match &self.runtime {
            RuntimeRef::Process { child, .. } => {
                let mut guard = child.lock().await;
                match guard.as_mut() {
                    Some(proc) => match tokio::time::timeout(grace, proc.wait()).await {
                        Ok(_) => {
                            *guard = None;
                            true
                        }
                        Err(_) => false,
                    },
                    None => true,
                }
            }
            RuntimeRef::Container { id, docker, .. } => {
                container::wait_container_stopped(docker, id, grace).await
            }
        }
    }

    /// Unconditional termination for a unit that ignored its grace period.
    /// Returns true when the unit is confirmed stopped afterwards.
    pub async fn force_stop(&self) -> bool {
        match &self.runtime {
            RuntimeRef::Process { pid, child } => {
                platform::force_kill(*pid);
                let mut guard = child.lock().await;
                if let Some(proc) = guard.as_mut() {
                    let _ = proc.kill().await;
                    let _ = proc.wait().await;
                    *guard = None;
                }
                !platform::is_process_alive(*pid)
            }
            RuntimeRef::Container { id, name, docker } => {
                if let Err(e) = container::remove_container(docker, id, true).await {
                    warn!(container = %name, error = %e, "forced remove failed");
                }
                !container::container_running(docker, id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_sleeper(secs: u32) -> ServiceHandle {
        let mut cmd = platform::shell_command(&format!("sleep {secs}"));
        platform::configure_process_group(&mut cmd);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());
        cmd.kill_on_drop(true);
        let child = cmd.spawn().expect("spawn sleeper");
        let pid = child.id().expect("pid");
        ServiceHandle::new_process("sleeper", true, pid, child)
    }

    #[test]
    fn transitions_follow_the_ladder() {
        let state = ServiceState::Starting;
        assert!(ServiceState::Ready.rank() > state.rank());
        assert!(ServiceState::Stopping.rank() > ServiceState::Ready.rank());
        assert!(ServiceState::Stopped.rank() > ServiceState::Stopping.rank());
    }

    #[tokio::test]
    async fn advance_enforces_monotonicity() {
        let handle = spawn_sleeper(30).await;
        assert_eq!(handle.state(), ServiceState::Starting);

        assert!(handle.advance(ServiceState::Ready));
        assert!(!handle.advance(ServiceState::Starting), "cannot re-enter Starting");
        assert!(!handle.advance(ServiceState::Failed), "Failed only from Starting");
        assert!(handle.advance(ServiceState::Stopping));
        assert!(!handle.advance(ServiceState::Ready), "no backwards transition");
        assert!(handle.advance(ServiceState::Stopped));
        assert!(!handle.advance(ServiceState::Stopping));
        assert_eq!(handle.state(), ServiceState::Stopped);

        handle.force_stop().await;
    }

    #[tokio::test]
    async fn failed_is_terminal_and_only_from_starting() {
        let handle = spawn_sleeper(30).await;
        assert!(handle.advance(ServiceState::Failed));
        assert!(!handle.advance(ServiceState::Ready));
        assert!(!handle.advance(ServiceState::Stopped));
        assert_eq!(handle.state(), ServiceState::Failed);

        handle.force_stop().await;
    }

    #[tokio::test]
    async fn ready_handle_can_jump_to_stopped_on_observed_death() {
        let handle = spawn_sleeper(30).await;
        assert!(handle.advance(ServiceState::Ready));
        assert!(handle.advance(ServiceState::Stopped));

        handle.force_stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn liveness_reflects_process_exit() {
        let handle = spawn_sleeper(30).await;
        assert!(handle.is_alive().await);

        assert!(handle.force_stop().await);
        assert!(!handle.is_alive().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn graceful_stop_is_confirmed_within_grace() {
        let handle = spawn_sleeper(30).await;
        handle.request_stop().await;
        assert!(handle.wait_stopped(Duration::from_secs(5)).await);
        assert!(!handle.is_alive().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wait_stopped_times_out_when_ignored() {
        // `sleep` does not trap SIGTERM, so skip the request entirely and
        // verify the bounded wait expires on a healthy process.
        let handle = spawn_sleeper(30).await;
        assert!(!handle.wait_stopped(Duration::from_millis(200)).await);
        assert!(handle.force_stop().await);
    }
}
