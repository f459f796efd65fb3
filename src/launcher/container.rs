use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bollard::models::{ContainerCreateBody, HostConfig, NetworkCreateRequest, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, InspectNetworkOptions,
    KillContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::error::OrchestratorError;
use crate::identity::DeploymentIdentity;
use crate::orchestrator::spec::StartAction;

/// Labels applied to every resource so stale leftovers from a crashed run
/// can be found and removed by hand (`docker ps --filter label=...`).
pub fn resource_labels(slug: &str, service: &str) -> HashMap<String, String> {
    HashMap::from([
        ("convoy.deployment".to_string(), slug.to_string()),
        ("convoy.service".to_string(), service.to_string()),
    ])
}

/// Parse an image reference into (name, tag). "mosquitto" -> ("mosquitto", "latest").
pub fn parse_image_ref(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() => (name, tag),
        _ => (image, "latest"),
    }
}

pub async fn check_image_exists(docker: &Docker, image: &str) -> bool {
    docker.inspect_image(image).await.is_ok()
}

/// Pull an image, surfacing per-layer errors from the pull stream.
pub async fn pull_image(docker: &Docker, image: &str) -> Result<()> {
    let (name, tag) = parse_image_ref(image);
    debug!(image = %image, "pulling image");

    let options = CreateImageOptions {
        from_image: Some(name.to_string()),
        tag: Some(tag.to_string()),
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        let layer = result.context("pulling image")?;
        if let Some(err) = &layer.error_detail {
            bail!("image pull failed for {}: {:?}", image, err);
        }
    }

    debug!(image = %image, "image pulled successfully");
    Ok(())
}

pub async fn signal_container(docker: &Docker, container_id: &str, signal: &str) -> Result<()> {
    let options = KillContainerOptions {
        signal: signal.to_string(),
        ..Default::default()
    };
    match docker.kill_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        // Already stopped or already gone: the desired outcome.
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404 | 409, ..
        }) => Ok(()),
        Err(e) => Err(e).context("signalling container"),
    }
}

pub async fn remove_container(docker: &Docker, container_id: &str, force: bool) -> Result<()> {
    let options = RemoveContainerOptions {
        force,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e).context("removing container"),
    }
}

pub async fn container_running(docker: &Docker, container_id: &str) -> bool {
    match docker
        .inspect_container(container_id, None::<InspectContainerOptions>)
        .await
    {
        Ok(inspect) => inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Poll until the container is no longer running, bounded by `grace`.
pub async fn wait_container_stopped(docker: &Docker, container_id: &str, grace: Duration) -> bool {
    let poll = Duration::from_millis(250);
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if !container_running(docker, container_id).await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Fetch the tail of a container's log output for crash diagnostics.
pub async fn fetch_recent_logs(docker: &Docker, container_id: &str, tail: usize) -> String {
    let options = LogsOptions {
        follow: false,
        stdout: true,
        stderr: true,
        tail: tail.to_string(),
        ..Default::default()
    };
    let mut stream = docker.logs(container_id, Some(options));
    let mut output = String::new();
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(log) => output.push_str(&log.to_string()),
            Err(_) => break,
        }
    }
    output
}

/// Container runtime for one deployment: a Docker connection plus the
/// deployment-scoped network all containers attach to.
pub struct ContainerRuntime {
    docker: Docker,
    identity: DeploymentIdentity,
}

impl ContainerRuntime {
    /// Connect to the Docker daemon and ensure the deployment network exists.
    pub async fn connect(identity: DeploymentIdentity) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("connecting to Docker daemon")?;
        docker
            .ping()
            .await
            .context("Cannot connect to Docker daemon. Is Docker running?")?;
        let runtime = Self { docker, identity };
        runtime.ensure_network().await?;
        Ok(runtime)
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    async fn ensure_network(&self) -> Result<()> {
        let name = self.identity.network_name();
        if self
            .docker
            .inspect_network(&name, None::<InspectNetworkOptions>)
            .await
            .is_ok()
        {
            return Ok(());
        }
        let request = NetworkCreateRequest {
            name: name.clone(),
            labels: Some(resource_labels(&self.identity.slug, "network")),
            ..Default::default()
        };
        self.docker
            .create_network(request)
            .await
            .with_context(|| format!("creating network {name}"))?;
        info!(network = %name, "deployment network created");
        Ok(())
    }

    /// Best-effort removal of the deployment network once every container is
    /// confirmed stopped.
    pub async fn remove_network(&self) {
        let name = self.identity.network_name();
        if let Err(e) = self.docker.remove_network(&name).await {
            debug!(network = %name, error = %e, "network not removed");
        }
    }

    /// Create and start one container, then confirm it did not crash
    /// immediately. On an immediate crash the recent log tail is captured
    /// into the returned `StartupFailure`.
    pub async fn start_container(
        &self,
        service: &str,
        action: &StartAction,
    ) -> Result<(String, String), OrchestratorError> {
        let StartAction::Container {
            image,
            env,
            publish,
            volumes,
            cmd,
            entrypoint,
        } = action
        else {
            unreachable!("container runtime invoked for a process action");
        };

        let startup_failure = |reason: String, diagnostics: Option<String>| {
            OrchestratorError::StartupFailure {
                service: service.to_string(),
                reason,
                diagnostics,
            }
        };

        if !check_image_exists(&self.docker, image).await {
            pull_image(&self.docker, image)
                .await
                .map_err(|e| startup_failure(format!("{e:#}"), None))?;
        }

        let container_name = self.identity.container_name(service);
        let labels = resource_labels(&self.identity.slug, service);

        let env_list: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: Vec<String> = Vec::new();
        for (host_port, container_port) in publish {
            let container_port_key = format!("{}/tcp", container_port);
            port_bindings.insert(
                container_port_key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
            exposed_ports.push(container_port_key);
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(volumes.clone()),
            network_mode: Some(self.identity.network_name()),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(image.clone()),
            env: Some(env_list),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(labels),
            cmd: cmd.clone(),
            entrypoint: entrypoint.clone(),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(container_name.clone()),
            ..Default::default()
        };

        // A stale container with the same name is a leftover from a crashed
        // run; replace it.
        let _ = remove_container(&self.docker, &container_name, true).await;

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| startup_failure(format!("creating container: {e}"), None))?;
        let container_id = response.id;

        debug!(container = %container_name, id = %container_id, "container created");

        self.docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| startup_failure(format!("starting container: {e}"), None))?;

        // Distinguish "started" from "crashed immediately".
        tokio::time::sleep(Duration::from_millis(400)).await;
        if !container_running(&self.docker, &container_id).await {
            let logs = fetch_recent_logs(&self.docker, &container_id, 20).await;
            let diagnostics = if logs.trim().is_empty() {
                None
            } else {
                Some(logs)
            };
            let _ = remove_container(&self.docker, &container_id, true).await;
            return Err(startup_failure(
                "container exited immediately after start".to_string(),
                diagnostics,
            ));
        }

        info!(container = %container_name, "container started");
        Ok((container_id, container_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_image_with_tag() {
        assert_eq!(parse_image_ref("eclipse-mosquitto:2"), ("eclipse-mosquitto", "2"));
    }

    #[test]
    fn parse_image_without_tag() {
        assert_eq!(parse_image_ref("mosquitto"), ("mosquitto", "latest"));
    }

    #[test]
    fn parse_image_with_registry_and_tag() {
        assert_eq!(
            parse_image_ref("ghcr.io/eclipse/kuksa.val/databroker:0.4"),
            ("ghcr.io/eclipse/kuksa.val/databroker", "0.4")
        );
    }

    #[test]
    fn labels_carry_deployment_and_service() {
        let labels = resource_labels("telemetry-abc123", "broker");
        assert_eq!(labels["convoy.deployment"], "telemetry-abc123");
        assert_eq!(labels["convoy.service"], "broker");
    }
}
