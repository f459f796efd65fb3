//! Bounded readiness and port polling.
//!
//! Both abstractions replace fixed sleep loops with an explicit
//! attempts-times-interval budget: a probe either observes success within its
//! window or reports a typed timeout, never waits indefinitely.

use std::future::Future;
use std::net::TcpListener;
use std::time::Duration;

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;
use crate::platform;

/// How long a probe keeps polling and how long it sleeps between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTiming {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ProbeTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
    #[error("probe abandoned: shutdown in progress")]
    Cancelled,
}

/// Repeatedly evaluate `check` until it succeeds, sleeping `timing.interval`
/// between attempts, bounded by `timing.timeout`. The wait is abandoned as
/// soon as `cancel` fires, so a readiness wait never delays teardown.
pub async fn wait_ready<C, F>(
    check: C,
    timing: ProbeTiming,
    cancel: &CancellationToken,
) -> Result<(), ProbeError>
where
    C: Fn() -> F,
    F: Future<Output = anyhow::Result<()>>,
{
    let interval = timing.interval.max(Duration::from_millis(1));
    let attempts = (timing.timeout.as_millis() / interval.as_millis()) as usize + 1;

    let polling = (|| async { check().await })
        .retry(
            ConstantBuilder::default()
                .with_delay(interval)
                .with_max_times(attempts),
        )
        .notify(|err: &anyhow::Error, dur: Duration| {
            tracing::debug!("readiness check failed: {}, retrying in {:?}", err, dur);
        });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        result = tokio::time::timeout(timing.timeout, polling) => match result {
            Ok(Ok(())) => Ok(()),
            // The retry budget ran dry just before the deadline did.
            Ok(Err(_)) | Err(_) => Err(ProbeError::TimedOut(timing.timeout)),
        },
    }
}

/// Single TCP connect attempt with a short per-attempt deadline.
pub async fn tcp_check(host: &str, port: u16) -> anyhow::Result<()> {
    tokio::time::timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect((host, port)),
    )
    .await
    .context("TCP connect timed out")?
    .context("TCP connect failed")?;
    Ok(())
}

/// Single HTTP GET attempt; any 2xx response counts as ready.
pub async fn http_check(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .context("building HTTP client")?;
    let response = client.get(url).send().await.context("HTTP readiness check")?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP readiness check returned status {}", response.status());
    }
    Ok(())
}

/// True when nothing is currently bound to `port` on the loopback interface.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Pre-flight gate for ports a service is about to claim.
///
/// A bound port usually means a stale instance from a previous run is still
/// winding down, so the guard waits a bounded number of attempts for it to
/// free up before declaring a conflict.
#[derive(Debug, Clone, Copy)]
pub struct PortGuard {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PortGuard {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval: Duration::from_millis(250),
        }
    }
}

impl PortGuard {
    /// Wait for `port` to become free, failing with `PortConflict` (naming
    /// the owning process where the platform can tell) if it is still bound
    /// after the final attempt.
    pub async fn wait_free(&self, service: &str, port: u16) -> Result<(), OrchestratorError> {
        for attempt in 1..=self.max_attempts.max(1) {
            if port_is_free(port) {
                return Ok(());
            }
            if attempt < self.max_attempts {
                tracing::debug!(
                    service,
                    port,
                    attempt,
                    "port still bound, waiting for it to free up"
                );
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(OrchestratorError::PortConflict {
            service: service.to_string(),
            port,
            owner: platform::identify_port_owner(port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn fast_timing() -> ProbeTiming {
        ProbeTiming {
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn succeeds_after_a_few_attempts() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let result = wait_ready(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not yet");
                }
                Ok(())
            },
            fast_timing(),
            &cancel,
        )
        .await;
        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_succeeding_check_times_out_within_bound() {
        let cancel = CancellationToken::new();
        let timing = fast_timing();
        let start = Instant::now();
        let result = wait_ready(|| async { anyhow::bail!("down") }, timing, &cancel).await;
        assert_eq!(result, Err(ProbeError::TimedOut(timing.timeout)));
        // Bounded: timeout plus one poll interval of slack, with scheduler headroom.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_abandons_the_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = wait_ready(|| async { anyhow::bail!("down") }, fast_timing(), &cancel).await;
        assert_eq!(result, Err(ProbeError::Cancelled));
    }

    #[tokio::test]
    async fn tcp_check_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(tcp_check("127.0.0.1", port).await.is_ok());
    }

    #[tokio::test]
    async fn tcp_check_fails_on_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(tcp_check("127.0.0.1", port).await.is_err());
    }

    #[tokio::test]
    async fn guard_passes_on_free_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let guard = PortGuard {
            max_attempts: 3,
            interval: Duration::from_millis(10),
        };
        assert!(guard.wait_free("svc", port).await.is_ok());
    }

    #[tokio::test]
    async fn guard_reports_conflict_on_held_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let guard = PortGuard {
            max_attempts: 3,
            interval: Duration::from_millis(10),
        };
        match guard.wait_free("broker", port).await {
            Err(OrchestratorError::PortConflict {
                service,
                port: conflicting,
                ..
            }) => {
                assert_eq!(service, "broker");
                assert_eq!(conflicting, port);
            }
            other => panic!("expected PortConflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn guard_recovers_when_port_frees_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let guard = PortGuard {
            max_attempts: 50,
            interval: Duration::from_millis(20),
        };
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(listener);
        });
        assert!(guard.wait_free("svc", port).await.is_ok());
        release.await.unwrap();
    }
}
