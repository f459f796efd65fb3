use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::orchestrator::handle::{ServiceHandle, ServiceState};

/// What one teardown pass did.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// False when this call lost the one-shot race and did nothing.
    pub performed: bool,
    /// Services a stop was issued to, in the order stops went out
    /// (reverse registration order).
    pub stop_order: Vec<String>,
    /// Handles that survived even forced termination; leaked units the
    /// operator must clean up by hand.
    pub warnings: Vec<String>,
    /// Wall-clock time the teardown pass took.
    pub duration: Duration,
}

/// Owns the authoritative set of handles that must eventually be stopped and
/// the guarantee that the teardown body runs at most once.
///
/// The registry is append-only until the single teardown pass drains it, and
/// registration happens-before a concurrently-running `shutdown` observes the
/// handle: there is no window in which a running service is untracked.
#[derive(Default)]
pub struct ShutdownCoordinator {
    handles: Mutex<Vec<Arc<ServiceHandle>>>,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle. Must be called before anything else happens to a
    /// freshly launched service.
    pub fn register(&self, handle: Arc<ServiceHandle>) {
        debug!(service = %handle.id(), runtime = %handle.runtime_desc(), "handle registered");
        self.handles
            .lock()
            .expect("handle registry lock poisoned")
            .push(handle);
    }

    /// Snapshot of every handle registered so far, in registration order.
    pub fn tracked(&self) -> Vec<Arc<ServiceHandle>> {
        self.handles
            .lock()
            .expect("handle registry lock poisoned")
            .clone()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Idempotent, escalating teardown of every tracked handle.
    ///
    /// Safe to call from any number of trigger paths concurrently: an atomic
    /// check-and-set lets exactly one caller run the body, every other call
    /// returns immediately with `performed: false`. Handles are stopped in
    /// reverse registration order (dependents before dependencies) and
    /// regardless of their recorded state -- a handle that never reached
    /// `Ready` still gets stopped.
    pub async fn shutdown(&self, grace_period: Duration) -> TeardownReport {
        if self.fired.swap(true, Ordering::SeqCst) {
            return TeardownReport::default();
        }

        let began = std::time::Instant::now();
        let mut handles = self.tracked();
        handles.reverse();

        let mut report = TeardownReport {
            performed: true,
            ..Default::default()
        };

        if handles.is_empty() {
            return report;
        }

        info!(count = handles.len(), "stopping services");

        // Phase 1: cooperative stop requests, in reverse start order,
        // without waiting on any individual unit.
        let mut stopping: Vec<Arc<ServiceHandle>> = Vec::new();
        for handle in &handles {
            if handle.state() == ServiceState::Stopped {
                debug!(service = %handle.id(), "already stopped");
                continue;
            }
            info!(service = %handle.id(), "requesting graceful stop");
            handle.advance(ServiceState::Stopping);
            handle.request_stop().await;
            report.stop_order.push(handle.id().to_string());
            stopping.push(Arc::clone(handle));
        }

        // Phase 2: one shared grace window for everything still winding down.
        let waits = stopping
            .iter()
            .map(|handle| async move { handle.wait_stopped(grace_period).await });
        let outcomes = join_all(waits).await;

        // Phase 3: escalate on whatever ignored the request.
        for (handle, stopped) in stopping.iter().zip(outcomes) {
            if stopped {
                handle.advance(ServiceState::Stopped);
                debug!(service = %handle.id(), "stopped within grace period");
                continue;
            }
            warn!(
                service = %handle.id(),
                grace = ?grace_period,
                "did not stop within grace period, force-terminating"
            );
            if handle.force_stop().await {
                handle.advance(ServiceState::Stopped);
            } else {
                let err = OrchestratorError::TeardownIncomplete {
                    service: handle.id().to_string(),
                };
                warn!("{err}");
                report.warnings.push(err.to_string());
            }
        }

        report.duration = began.elapsed();
        let rounded = Duration::from_millis(report.duration.as_millis() as u64);
        info!(duration = %humantime::format_duration(rounded), "teardown complete");
        report
    }
}
