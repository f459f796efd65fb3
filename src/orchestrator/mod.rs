pub mod graph;
pub mod handle;
pub mod shutdown;
pub mod signal;
pub mod spec;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::model::RunConfig;
use crate::error::OrchestratorError;
use crate::identity::DeploymentIdentity;
use crate::launcher::Launcher;
use crate::probe::{self, PortGuard, ProbeError};
use crate::ui::logs::{LogLine, LogWriter};
use crate::ui::summary::{print_startup_summary, ServiceRow};

use graph::ServiceGraph;
use handle::{ServiceHandle, ServiceState};
use shutdown::{ShutdownCoordinator, TeardownReport};
use signal::SignalBridge;
use spec::{CheckSpec, ProbeSpec, ServiceSpec};

// ---------------------------------------------------------------------------
// Run parameters and result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    /// Window a service gets to stop voluntarily before it is force-killed.
    pub grace_period: Duration,
    pub port_guard: PortGuard,
    pub monitor_interval: Duration,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            port_guard: PortGuard::default(),
            monitor_interval: Duration::from_secs(1),
        }
    }
}

impl RunParams {
    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            grace_period: Duration::from_secs(run.grace_period_secs),
            port_guard: PortGuard {
                max_attempts: run.port_wait_attempts,
                interval: Duration::from_millis(run.port_wait_interval_ms),
            },
            monitor_interval: Duration::from_millis(run.monitor_interval_ms),
        }
    }
}

/// How far one service got during startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Started and (where a probe was declared) confirmed ready.
    Ready,
    /// Start was attempted and did not complete.
    Failed { reason: String },
    /// Never attempted: a dependency was unavailable, a pre-flight gate
    /// failed, or the run was already winding down.
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub id: String,
    pub required: bool,
    pub outcome: ServiceOutcome,
}

/// Summary of one orchestrated run.
#[derive(Debug)]
pub struct RunResult {
    /// Per-service startup outcome, in startup order.
    pub services: Vec<ServiceReport>,
    /// The error that aborted the run, when one did.
    pub fatal: Option<String>,
    pub teardown: TeardownReport,
}

impl RunResult {
    /// True when every required service started successfully. Deliberately
    /// independent of whether teardown itself completed within its grace
    /// period.
    pub fn success(&self) -> bool {
        self.fatal.is_none()
            && self
                .services
                .iter()
                .all(|s| !s.required || s.outcome == ServiceOutcome::Ready)
    }
}

// ---------------------------------------------------------------------------
// LifecycleSupervisor
// ---------------------------------------------------------------------------

/// Drives one orchestrated run: pre-flight port gates, dependency-ordered
/// startup with readiness waits, liveness monitoring, and exactly-once
/// escalating teardown on whatever ends the run.
pub struct LifecycleSupervisor {
    identity: DeploymentIdentity,
    params: RunParams,
    cancel: CancellationToken,
    coordinator: Arc<ShutdownCoordinator>,
}

impl LifecycleSupervisor {
    pub fn new(identity: DeploymentIdentity, params: RunParams) -> Self {
        Self {
            identity,
            params,
            cancel: CancellationToken::new(),
            coordinator: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Token every trigger path sets to end the run; exposed so callers and
    /// tests can request shutdown the same way a signal does.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self, graph: ServiceGraph) -> RunResult {
        // The bridge goes in before the first spec starts, so a signal
        // arriving mid-startup still tears down whatever is registered.
        SignalBridge::install(self.cancel.clone());

        let tracker = TaskTracker::new();
        let (log_tx, log_rx) = mpsc::channel::<LogLine>(1024);
        let max_name_len = graph
            .start_order()
            .iter()
            .map(|s| s.id.len())
            .max()
            .unwrap_or(0);
        tracker.spawn(LogWriter::new(log_rx, max_name_len).run());

        let mut launcher = Launcher::new(self.identity.clone(), log_tx, tracker.clone());

        let mut reports: BTreeMap<String, ServiceReport> = BTreeMap::new();
        let mut unavailable: HashSet<String> = HashSet::new();
        let mut fatal: Option<String> = None;

        // ================================================================
        // Pre-flight: every claimed port must be free before anything starts
        // ================================================================
        'preflight: for spec in graph.start_order() {
            for port in &spec.ports {
                if self.cancel.is_cancelled() {
                    break 'preflight;
                }
                match self.params.port_guard.wait_free(&spec.id, *port).await {
                    Ok(()) => {}
                    Err(err) => {
                        if spec.required {
                            error!("{err}");
                            fatal = Some(err.to_string());
                            break 'preflight;
                        }
                        warn!("{err}, skipping optional service");
                        unavailable.insert(spec.id.clone());
                        reports.insert(
                            spec.id.clone(),
                            ServiceReport {
                                id: spec.id.clone(),
                                required: spec.required,
                                outcome: ServiceOutcome::Skipped {
                                    reason: err.to_string(),
                                },
                            },
                        );
                        continue 'preflight;
                    }
                }
            }
        }

        // ================================================================
        // Startup: launch, register, wait for readiness, in graph order
        // ================================================================
        if fatal.is_none() {
            for spec in graph.start_order() {
                if reports.contains_key(&spec.id) {
                    continue; // skipped during pre-flight
                }
                if self.cancel.is_cancelled() {
                    reports.insert(
                        spec.id.clone(),
                        self.report(spec, ServiceOutcome::Skipped {
                            reason: "shutdown requested".to_string(),
                        }),
                    );
                    continue;
                }

                if let Some(dep) = spec.depends_on.iter().find(|d| unavailable.contains(*d)) {
                    let reason = format!("dependency '{dep}' unavailable");
                    if spec.required {
                        error!(service = %spec.id, "{reason}, aborting run");
                        fatal = Some(format!("'{}' cannot start: {reason}", spec.id));
                        reports.insert(
                            spec.id.clone(),
                            self.report(spec, ServiceOutcome::Failed { reason }),
                        );
                        break;
                    }
                    warn!(service = %spec.id, "{reason}, skipping");
                    unavailable.insert(spec.id.clone());
                    reports.insert(
                        spec.id.clone(),
                        self.report(spec, ServiceOutcome::Skipped { reason }),
                    );
                    continue;
                }

                info!(service = %spec.id, kind = %spec.kind(), "starting");
                let handle = match launcher.start(spec).await {
                    Ok(handle) => Arc::new(handle),
                    Err(err) => {
                        if let OrchestratorError::StartupFailure {
                            diagnostics: Some(output),
                            ..
                        } = &err
                        {
                            for line in output.lines() {
                                warn!(service = %spec.id, "{line}");
                            }
                        }
                        let outcome = ServiceOutcome::Failed {
                            reason: err.to_string(),
                        };
                        if spec.required {
                            error!("{err}, aborting run");
                            fatal = Some(err.to_string());
                            reports.insert(spec.id.clone(), self.report(spec, outcome));
                            break;
                        }
                        warn!("{err}, continuing without it");
                        unavailable.insert(spec.id.clone());
                        reports.insert(spec.id.clone(), self.report(spec, outcome));
                        continue;
                    }
                };

                // Registration comes before the readiness wait: even if the
                // probe fails or shutdown interrupts it, the unit is tracked.
                self.coordinator.register(Arc::clone(&handle));

                let outcome = match &spec.probe {
                    None => {
                        handle.advance(ServiceState::Ready);
                        info!(service = %spec.id, "started");
                        ServiceOutcome::Ready
                    }
                    Some(probe) => {
                        info!(service = %spec.id, "waiting for readiness");
                        match self.run_probe(&handle, probe).await {
                            Ok(()) => {
                                handle.advance(ServiceState::Ready);
                                info!(service = %spec.id, "ready");
                                ServiceOutcome::Ready
                            }
                            Err(ProbeError::Cancelled) => {
                                warn!(service = %spec.id, "readiness wait abandoned");
                                ServiceOutcome::Failed {
                                    reason: "startup interrupted by shutdown".to_string(),
                                }
                            }
                            Err(ProbeError::TimedOut(_)) => {
                                handle.advance(ServiceState::Failed);
                                let err = OrchestratorError::ReadinessTimeout {
                                    service: spec.id.clone(),
                                    timeout: probe.timing.timeout,
                                };
                                if spec.required {
                                    error!("{err}, aborting run");
                                    fatal = Some(err.to_string());
                                    reports.insert(
                                        spec.id.clone(),
                                        self.report(spec, ServiceOutcome::Failed {
                                            reason: err.to_string(),
                                        }),
                                    );
                                    break;
                                }
                                warn!("{err}, continuing without it");
                                unavailable.insert(spec.id.clone());
                                ServiceOutcome::Failed {
                                    reason: err.to_string(),
                                }
                            }
                        }
                    }
                };
                reports.insert(spec.id.clone(), self.report(spec, outcome));
            }
        }

        // ================================================================
        // Steady state: monitor liveness until something ends the run
        // ================================================================
        if fatal.is_none() && !self.cancel.is_cancelled() {
            self.print_summary(&graph, &reports);
            self.monitor().await;
        }

        // ================================================================
        // Teardown: exactly once, whatever got us here
        // ================================================================
        self.cancel.cancel();
        let teardown = self.coordinator.shutdown(self.params.grace_period).await;

        launcher.release_runtime().await;
        // Dropping the launcher releases its log sender so the writer task
        // can observe end-of-stream and drain.
        drop(launcher);
        tracker.close();
        if tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .is_err()
        {
            warn!("log forwarding tasks did not drain in time");
        }

        let services = graph
            .start_order()
            .iter()
            .map(|spec| {
                reports.remove(&spec.id).unwrap_or_else(|| {
                    self.report(spec, ServiceOutcome::Skipped {
                        reason: "startup aborted".to_string(),
                    })
                })
            })
            .collect();

        RunResult {
            services,
            fatal,
            teardown,
        }
    }

    fn report(&self, spec: &ServiceSpec, outcome: ServiceOutcome) -> ServiceReport {
        ServiceReport {
            id: spec.id.clone(),
            required: spec.required,
            outcome,
        }
    }

    /// Evaluate one spec's readiness probe against its live handle.
    async fn run_probe(
        &self,
        handle: &Arc<ServiceHandle>,
        probe: &ProbeSpec,
    ) -> Result<(), ProbeError> {
        match &probe.check {
            CheckSpec::Tcp { host, port } => {
                probe::wait_ready(
                    || probe::tcp_check(host, *port),
                    probe.timing,
                    &self.cancel,
                )
                .await
            }
            CheckSpec::Http { url } => {
                probe::wait_ready(|| probe::http_check(url), probe.timing, &self.cancel).await
            }
            CheckSpec::Uptime { min } => {
                probe::wait_ready(
                    || async {
                        if !handle.is_alive().await {
                            anyhow::bail!("exited during liveness window");
                        }
                        let elapsed = (chrono::Utc::now() - handle.started_at())
                            .to_std()
                            .unwrap_or_default();
                        if elapsed < *min {
                            anyhow::bail!("alive for {:?} of {:?}", elapsed, min);
                        }
                        Ok(())
                    },
                    probe.timing,
                    &self.cancel,
                )
                .await
            }
        }
    }

    /// Periodically confirm each started unit still exists. A required
    /// service disappearing is treated exactly like a termination signal.
    async fn monitor(&self) {
        let mut ticker = tokio::time::interval(self.params.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    for handle in self.coordinator.tracked() {
                        if handle.state() != ServiceState::Ready {
                            continue;
                        }
                        if handle.is_alive().await {
                            continue;
                        }
                        handle.advance(ServiceState::Stopped);
                        if handle.required() {
                            error!(
                                service = %handle.id(),
                                "required service exited unexpectedly, shutting down"
                            );
                            self.cancel.cancel();
                            return;
                        }
                        warn!(service = %handle.id(), "optional service exited");
                    }
                }
            }
        }
    }

    fn print_summary(&self, graph: &ServiceGraph, reports: &BTreeMap<String, ServiceReport>) {
        let rows: Vec<ServiceRow> = graph
            .start_order()
            .iter()
            .map(|spec| {
                let status = match reports.get(&spec.id).map(|r| &r.outcome) {
                    Some(ServiceOutcome::Ready) => "ready",
                    Some(ServiceOutcome::Failed { .. }) => "failed",
                    Some(ServiceOutcome::Skipped { .. }) => "skipped",
                    None => "unknown",
                };
                ServiceRow {
                    name: spec.id.clone(),
                    kind: spec.kind().to_string(),
                    port: spec.ports.first().copied(),
                    status: status.to_string(),
                }
            })
            .collect();
        print_startup_summary(&self.identity, &rows);
    }
}
