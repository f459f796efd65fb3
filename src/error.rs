use std::time::Duration;

use thiserror::Error;

fn fmt_owner(owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!(" by {owner}"),
        None => String::new(),
    }
}

/// Typed failures surfaced by the orchestration core.
///
/// `Configuration` and `PortConflict` are reported before anything starts.
/// `StartupFailure` and `ReadinessTimeout` abort the run when the service is
/// required and are recorded otherwise. `TeardownIncomplete` is only ever a
/// warning -- it never blocks process exit.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid service graph: {reason}")]
    Configuration { reason: String },

    #[error("port {port} required by '{service}' is still in use{}", fmt_owner(.owner))]
    PortConflict {
        service: String,
        port: u16,
        owner: Option<String>,
    },

    #[error("failed to start '{service}': {reason}")]
    StartupFailure {
        service: String,
        reason: String,
        /// Recent output captured from the service, when any was produced
        /// before it died.
        diagnostics: Option<String>,
    },

    #[error("'{service}' did not become ready within {:?}", .timeout)]
    ReadinessTimeout { service: String, timeout: Duration },

    #[error("'{service}' was still running after forced termination")]
    TeardownIncomplete { service: String },
}

impl OrchestratorError {
    /// The service this error is about, where there is one.
    pub fn service(&self) -> Option<&str> {
        match self {
            OrchestratorError::Configuration { .. } => None,
            OrchestratorError::PortConflict { service, .. }
            | OrchestratorError::StartupFailure { service, .. }
            | OrchestratorError::ReadinessTimeout { service, .. }
            | OrchestratorError::TeardownIncomplete { service } => Some(service),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_conflict_names_owner_when_known() {
        let err = OrchestratorError::PortConflict {
            service: "broker".into(),
            port: 1883,
            owner: Some("mosquitto (PID 4242)".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("1883"));
        assert!(msg.contains("broker"));
        assert!(msg.contains("mosquitto (PID 4242)"));
    }

    #[test]
    fn port_conflict_without_owner() {
        let err = OrchestratorError::PortConflict {
            service: "broker".into(),
            port: 1883,
            owner: None,
        };
        assert_eq!(
            err.to_string(),
            "port 1883 required by 'broker' is still in use"
        );
    }

    #[test]
    fn startup_failure_display() {
        let err = OrchestratorError::StartupFailure {
            service: "databroker".into(),
            reason: "image not found".into(),
            diagnostics: None,
        };
        assert_eq!(
            err.to_string(),
            "failed to start 'databroker': image not found"
        );
    }
}
