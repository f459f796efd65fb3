use serde::Deserialize;
use std::collections::BTreeMap;

/// Root of a `convoy.toml` file.
#[derive(Debug, Deserialize)]
pub struct ConvoyConfig {
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub process: BTreeMap<String, ProcessConfig>,
    #[serde(default)]
    pub container: BTreeMap<String, ContainerConfig>,
    /// Deployment-wide environment, applied to every native process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_readiness_timeout_secs() -> u64 {
    30
}

fn default_readiness_interval_ms() -> u64 {
    500
}

fn default_port_wait_attempts() -> u32 {
    20
}

fn default_port_wait_interval_ms() -> u64 {
    250
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

/// Run-wide timing knobs. Every field has a sensible default so the whole
/// table can be omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Window a service gets to stop voluntarily before it is force-killed.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    #[serde(default = "default_port_wait_attempts")]
    pub port_wait_attempts: u32,
    #[serde(default = "default_port_wait_interval_ms")]
    pub port_wait_interval_ms: u64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            readiness_interval_ms: default_readiness_interval_ms(),
            port_wait_attempts: default_port_wait_attempts(),
            port_wait_interval_ms: default_port_wait_interval_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

fn default_required() -> bool {
    true
}

/// One native process to supervise.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProcessConfig {
    pub command: String,
    /// Working directory, relative to the config file.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Port this process claims; gated by the pre-flight port guard and
    /// advertised to other services as CONVOY_<ID>_PORT.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub ready: Option<ReadyCheck>,
}

/// One container instance to supervise.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Primary published port (host and container side are the same).
    #[serde(default)]
    pub port: Option<u16>,
    /// Additional "host:container" mappings.
    #[serde(default)]
    pub publish: Vec<String>,
    /// Volume binds passed through to the runtime verbatim.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub ready: Option<ReadyCheck>,
}

/// Service-specific readiness condition, distinct from "the process or
/// container has started". Timeout and interval fall back to the `[run]`
/// defaults when omitted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReadyCheck {
    Tcp {
        #[serde(default)]
        host: Option<String>,
        port: u16,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    Http {
        url: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    /// The unit has stayed alive for at least this long after starting.
    Uptime {
        min_ms: u64,
    },
}

/// Parse a "host:container" publish spec. A bare port maps to itself.
pub fn parse_publish_spec(spec: &str) -> Option<(u16, u16)> {
    match spec.split_once(':') {
        Some((host, container)) => {
            let host = host.trim().parse().ok()?;
            let container = container.trim().parse().ok()?;
            Some((host, container))
        }
        None => {
            let port = spec.trim().parse().ok()?;
            Some((port, port))
        }
    }
}
