use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::model::{parse_publish_spec, ConvoyConfig, ReadyCheck, RunConfig};
use crate::discovery::build_service_env;
use crate::probe::ProbeTiming;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Process,
    Container,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Process => write!(f, "process"),
            ServiceKind::Container => write!(f, "container"),
        }
    }
}

/// Opaque invocation descriptor. The supervisor never interprets its
/// contents beyond handing it to the launcher.
#[derive(Debug, Clone)]
pub enum StartAction {
    Process {
        command: String,
        working_dir: Option<PathBuf>,
        env: BTreeMap<String, String>,
    },
    Container {
        image: String,
        env: BTreeMap<String, String>,
        /// (host, container) port bindings.
        publish: Vec<(u16, u16)>,
        volumes: Vec<String>,
        cmd: Option<Vec<String>>,
        entrypoint: Option<Vec<String>>,
    },
}

/// What "ready" means for one service.
#[derive(Debug, Clone)]
pub enum CheckSpec {
    Tcp { host: String, port: u16 },
    Http { url: String },
    /// The unit has stayed alive this long since it was started.
    Uptime { min: Duration },
}

#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub check: CheckSpec,
    pub timing: ProbeTiming,
}

/// Immutable description of one service, built once from configuration.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub id: String,
    pub action: StartAction,
    pub depends_on: Vec<String>,
    /// Failure of a required service aborts the whole run; an optional
    /// service's failure is recorded and the run proceeds without it.
    pub required: bool,
    /// Host ports this service claims, gated by the pre-flight port guard.
    pub ports: Vec<u16>,
    pub probe: Option<ProbeSpec>,
}

impl ServiceSpec {
    pub fn kind(&self) -> ServiceKind {
        match self.action {
            StartAction::Process { .. } => ServiceKind::Process,
            StartAction::Container { .. } => ServiceKind::Container,
        }
    }
}

fn probe_spec(ready: &ReadyCheck, run: &RunConfig) -> ProbeSpec {
    let defaults = ProbeTiming {
        timeout: Duration::from_secs(run.readiness_timeout_secs),
        interval: Duration::from_millis(run.readiness_interval_ms),
    };
    match ready {
        ReadyCheck::Tcp {
            host,
            port,
            timeout_secs,
            interval_ms,
        } => ProbeSpec {
            check: CheckSpec::Tcp {
                host: host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
                port: *port,
            },
            timing: ProbeTiming {
                timeout: timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
                interval: interval_ms.map(Duration::from_millis).unwrap_or(defaults.interval),
            },
        },
        ReadyCheck::Http {
            url,
            timeout_secs,
            interval_ms,
        } => ProbeSpec {
            check: CheckSpec::Http { url: url.clone() },
            timing: ProbeTiming {
                timeout: timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
                interval: interval_ms.map(Duration::from_millis).unwrap_or(defaults.interval),
            },
        },
        ReadyCheck::Uptime { min_ms } => {
            let min = Duration::from_millis(*min_ms);
            ProbeSpec {
                check: CheckSpec::Uptime { min },
                // The liveness window itself must fit inside the probe budget.
                timing: ProbeTiming {
                    timeout: min + defaults.timeout,
                    interval: defaults.interval,
                },
            }
        }
    }
}

/// Build the full spec list from a parsed config. The result is in table
/// order; the service graph re-orders it topologically.
pub fn specs_from_config(config: &ConvoyConfig, config_dir: &Path) -> Vec<ServiceSpec> {
    let mut specs = Vec::with_capacity(config.process.len() + config.container.len());

    for (name, p) in &config.process {
        specs.push(ServiceSpec {
            id: name.clone(),
            action: StartAction::Process {
                command: p.command.clone(),
                working_dir: p.path.as_ref().map(|rel| config_dir.join(rel)),
                env: build_service_env(name, config),
            },
            depends_on: p.depends_on.clone(),
            required: p.required,
            ports: p.port.into_iter().collect(),
            probe: p.ready.as_ref().map(|r| probe_spec(r, &config.run)),
        });
    }

    for (name, c) in &config.container {
        let mut publish: Vec<(u16, u16)> = c.port.map(|p| (p, p)).into_iter().collect();
        publish.extend(c.publish.iter().filter_map(|s| parse_publish_spec(s)));
        let ports = publish.iter().map(|(host, _)| *host).collect();

        specs.push(ServiceSpec {
            id: name.clone(),
            action: StartAction::Container {
                image: c.image.clone(),
                env: c.env.clone(),
                publish,
                volumes: c.volumes.clone(),
                cmd: c.command.clone(),
                entrypoint: c.entrypoint.clone(),
            },
            depends_on: c.depends_on.clone(),
            required: c.required,
            ports,
            probe: c.ready.as_ref().map(|r| probe_spec(r, &config.run)),
        });
    }

    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConvoyConfig {
        toml::from_str(
            r#"
[deployment]
name = "telemetry"

[run]
readiness_timeout_secs = 12
readiness_interval_ms = 100

[process.databroker]
command = "kuksa-databroker"
port = 55555
ready = { type = "tcp", port = 55555 }

[container.broker]
image = "eclipse-mosquitto:2"
port = 1883
publish = ["8883:8884"]
required = false
"#,
        )
        .unwrap()
    }

    #[test]
    fn builds_specs_for_both_kinds() {
        let specs = specs_from_config(&sample(), Path::new("/deploy"));
        assert_eq!(specs.len(), 2);

        let databroker = specs.iter().find(|s| s.id == "databroker").unwrap();
        assert_eq!(databroker.kind(), ServiceKind::Process);
        assert!(databroker.required);
        assert_eq!(databroker.ports, vec![55555]);

        let broker = specs.iter().find(|s| s.id == "broker").unwrap();
        assert_eq!(broker.kind(), ServiceKind::Container);
        assert!(!broker.required);
        assert_eq!(broker.ports, vec![1883, 8883]);
        match &broker.action {
            StartAction::Container { publish, .. } => {
                assert_eq!(publish, &vec![(1883, 1883), (8883, 8884)]);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn probe_timing_falls_back_to_run_defaults() {
        let specs = specs_from_config(&sample(), Path::new("/deploy"));
        let databroker = specs.iter().find(|s| s.id == "databroker").unwrap();
        let probe = databroker.probe.as_ref().unwrap();
        assert_eq!(probe.timing.timeout, Duration::from_secs(12));
        assert_eq!(probe.timing.interval, Duration::from_millis(100));
        match &probe.check {
            CheckSpec::Tcp { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(*port, 55555);
            }
            other => panic!("unexpected check: {other:?}"),
        }
    }

    #[test]
    fn process_env_carries_discovery_vars() {
        let specs = specs_from_config(&sample(), Path::new("/deploy"));
        let databroker = specs.iter().find(|s| s.id == "databroker").unwrap();
        match &databroker.action {
            StartAction::Process { env, .. } => {
                assert_eq!(env["CONVOY_BROKER_PORT"], "1883");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
