pub mod container;
pub mod process;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::error::OrchestratorError;
use crate::identity::DeploymentIdentity;
use crate::orchestrator::handle::ServiceHandle;
use crate::orchestrator::spec::{ServiceSpec, StartAction};
use crate::ui::logs::LogLine;

use container::ContainerRuntime;

/// Executes one spec's start action and produces a live handle. On failure a
/// typed error is reported and no handle exists -- nothing to clean up.
pub struct Launcher {
    identity: DeploymentIdentity,
    log_tx: mpsc::Sender<LogLine>,
    tracker: TaskTracker,
    /// Connected lazily when the first container spec is launched, so
    /// process-only deployments never touch the Docker socket.
    containers: Option<ContainerRuntime>,
}

impl Launcher {
    pub fn new(
        identity: DeploymentIdentity,
        log_tx: mpsc::Sender<LogLine>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            identity,
            log_tx,
            tracker,
            containers: None,
        }
    }

    async fn container_runtime(
        &mut self,
        service: &str,
    ) -> Result<&ContainerRuntime, OrchestratorError> {
        if self.containers.is_none() {
            let runtime = ContainerRuntime::connect(self.identity.clone())
                .await
                .map_err(|e| OrchestratorError::StartupFailure {
                    service: service.to_string(),
                    reason: format!("{e:#}"),
                    diagnostics: None,
                })?;
            self.containers = Some(runtime);
        }
        Ok(self.containers.as_ref().expect("runtime just initialized"))
    }

    /// Start one service. For processes the pid is captured immediately; for
    /// containers a short liveness check distinguishes "started" from
    /// "crashed immediately".
    pub async fn start(&mut self, spec: &ServiceSpec) -> Result<ServiceHandle, OrchestratorError> {
        match &spec.action {
            StartAction::Process {
                command,
                working_dir,
                env,
            } => {
                let (pid, child) = process::spawn_process(
                    &spec.id,
                    command,
                    working_dir.as_deref(),
                    env,
                    &self.log_tx,
                    &self.tracker,
                )?;
                debug!(service = %spec.id, pid, "process handle created");
                Ok(ServiceHandle::new_process(&spec.id, spec.required, pid, child))
            }
            StartAction::Container { .. } => {
                let required = spec.required;
                let runtime = self.container_runtime(&spec.id).await?;
                let (id, name) = runtime.start_container(&spec.id, &spec.action).await?;
                let docker = runtime.docker().clone();
                debug!(service = %spec.id, container = %name, "container handle created");
                Ok(ServiceHandle::new_container(&spec.id, required, id, name, docker))
            }
        }
    }

    /// Remove the deployment network once teardown has confirmed every
    /// container stopped. No-op when no container was ever started.
    pub async fn release_runtime(&self) {
        if let Some(runtime) = &self.containers {
            runtime.remove_network().await;
        }
    }
}
