//! Environment injection for native processes.
//!
//! Every service with a declared port is advertised to every process as
//! `CONVOY_<ID>_HOST` / `CONVOY_<ID>_PORT` / `CONVOY_<ID>_URL`, so launch
//! commands can reference their collaborators without hardcoding ports.

use std::collections::BTreeMap;

use crate::config::model::ConvoyConfig;

fn env_key(service: &str, suffix: &str) -> String {
    let upper: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CONVOY_{}_{}", upper, suffix)
}

/// Build the full environment for a native process: deployment-wide `[env]`,
/// discovery variables for every port-bearing service, then the service's
/// own `env` overrides, in increasing precedence.
pub fn build_service_env(
    service: &str,
    config: &ConvoyConfig,
) -> BTreeMap<String, String> {
    let mut env = config.env.clone();

    let ports = config
        .process
        .iter()
        .filter_map(|(name, p)| p.port.map(|port| (name.clone(), port)))
        .chain(
            config
                .container
                .iter()
                .filter_map(|(name, c)| c.port.map(|port| (name.clone(), port))),
        );

    for (name, port) in ports {
        env.insert(env_key(&name, "HOST"), "127.0.0.1".to_string());
        env.insert(env_key(&name, "PORT"), port.to_string());
        env.insert(
            env_key(&name, "URL"),
            format!("http://127.0.0.1:{}", port),
        );
    }

    if let Some(own) = config.process.get(service) {
        for (k, v) in &own.env {
            env.insert(k.clone(), v.clone());
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConvoyConfig {
        toml::from_str(
            r#"
[deployment]
name = "telemetry"

[env]
RUST_LOG = "info"

[container.broker]
image = "eclipse-mosquitto:2"
port = 1883

[process.databroker]
command = "kuksa-databroker"
port = 55555

[process.exporter]
command = "mqtt-exporter"
env = { RUST_LOG = "debug", EXPORT_QOS = "1" }
"#,
        )
        .unwrap()
    }

    #[test]
    fn discovery_vars_cover_all_port_bearing_services() {
        let env = build_service_env("exporter", &config());
        assert_eq!(env["CONVOY_BROKER_HOST"], "127.0.0.1");
        assert_eq!(env["CONVOY_BROKER_PORT"], "1883");
        assert_eq!(env["CONVOY_BROKER_URL"], "http://127.0.0.1:1883");
        assert_eq!(env["CONVOY_DATABROKER_PORT"], "55555");
    }

    #[test]
    fn service_env_overrides_global_env() {
        let env = build_service_env("exporter", &config());
        assert_eq!(env["RUST_LOG"], "debug");
        assert_eq!(env["EXPORT_QOS"], "1");
    }

    #[test]
    fn global_env_applies_when_not_overridden() {
        let env = build_service_env("databroker", &config());
        assert_eq!(env["RUST_LOG"], "info");
    }

    #[test]
    fn non_alphanumerics_map_to_underscores() {
        assert_eq!(env_key("rt-bridge", "PORT"), "CONVOY_RT_BRIDGE_PORT");
    }
}
