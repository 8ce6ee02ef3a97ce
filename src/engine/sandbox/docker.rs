// ── Sandbox: Docker Connection Manager ─────────────────────────────────────
// Single shared handle to the container runtime. The daemon socket is a
// shared, potentially slow resource: every acquisition probes it, and
// consecutive failures arm an exponential backoff gate (capped at 10 s)
// with throttled logging so a dead daemon cannot flood the log.

use crate::atoms::constants::{DOCKER_BACKOFF_MAX_MS, DOCKER_LOG_COOLDOWN_MS};
use crate::atoms::error::{EngineError, EngineResult};
use bollard::Docker;
use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

const BACKOFF_BASE_MS: u64 = 500;
const PING_TIMEOUT: Duration = Duration::from_secs(5);

const GUIDANCE: &str = "container runtime unreachable — verify the Docker daemon is running \
and the socket (DOCKER_HOST or /var/run/docker.sock) is accessible";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerStatus {
    pub available: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub backoff_active: bool,
}

#[derive(Debug)]
struct ProbeState {
    available: bool,
    consecutive_failures: u32,
    last_checked: Option<DateTime<Utc>>,
    backoff_until: Option<Instant>,
    last_error_log: Option<Instant>,
}

pub struct DockerManager {
    client: Mutex<Option<Docker>>,
    state: Mutex<ProbeState>,
}

impl DockerManager {
    pub fn new() -> Self {
        DockerManager {
            client: Mutex::new(None),
            state: Mutex::new(ProbeState {
                available: false,
                consecutive_failures: 0,
                last_checked: None,
                backoff_until: None,
                last_error_log: None,
            }),
        }
    }

    /// Probe the daemon and hand out a client. Fails fast while the backoff
    /// gate is armed.
    pub async fn acquire(&self) -> EngineResult<Docker> {
        {
            let state = self.state.lock();
            if let Some(until) = state.backoff_until {
                if Instant::now() < until {
                    return Err(EngineError::RuntimeUnavailable(GUIDANCE.into()));
                }
            }
        }

        let docker = {
            let mut client = self.client.lock();
            match client.as_ref() {
                Some(docker) => docker.clone(),
                None => match Docker::connect_with_local_defaults() {
                    Ok(docker) => {
                        *client = Some(docker.clone());
                        docker
                    }
                    Err(e) => {
                        drop(client);
                        self.record_failure(&e.to_string());
                        return Err(EngineError::RuntimeUnavailable(GUIDANCE.into()));
                    }
                },
            }
        };

        match tokio::time::timeout(PING_TIMEOUT, docker.ping()).await {
            Ok(Ok(_)) => {
                self.record_success();
                Ok(docker)
            }
            Ok(Err(e)) => {
                self.record_failure(&e.to_string());
                Err(EngineError::RuntimeUnavailable(GUIDANCE.into()))
            }
            Err(_) => {
                self.record_failure("ping timed out");
                Err(EngineError::RuntimeUnavailable(GUIDANCE.into()))
            }
        }
    }

    /// Reachability check for `/health`. Never errors.
    pub async fn probe(&self) -> bool {
        self.acquire().await.is_ok()
    }

    pub fn status(&self) -> DockerStatus {
        let state = self.state.lock();
        DockerStatus {
            available: state.available,
            last_checked: state.last_checked,
            consecutive_failures: state.consecutive_failures,
            backoff_active: state.backoff_until.is_some_and(|u| Instant::now() < u),
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        if !state.available && state.consecutive_failures > 0 {
            info!("[docker] daemon reachable again after {} failures", state.consecutive_failures);
        }
        state.available = true;
        state.consecutive_failures = 0;
        state.backoff_until = None;
        state.last_checked = Some(Utc::now());
    }

    fn record_failure(&self, detail: &str) {
        let mut state = self.state.lock();
        state.available = false;
        state.consecutive_failures += 1;
        state.last_checked = Some(Utc::now());

        let backoff_ms = DOCKER_BACKOFF_MAX_MS
            .min(BACKOFF_BASE_MS.saturating_mul(1u64 << state.consecutive_failures.min(16)));
        state.backoff_until = Some(Instant::now() + Duration::from_millis(backoff_ms));

        let should_log = state
            .last_error_log
            .map(|t| t.elapsed() >= Duration::from_millis(DOCKER_LOG_COOLDOWN_MS))
            .unwrap_or(true);
        if should_log {
            state.last_error_log = Some(Instant::now());
            warn!(
                "[docker] daemon unreachable ({} consecutive failures, backing off {}ms): {}",
                state.consecutive_failures, backoff_ms, detail
            );
        }
    }
}

impl Default for DockerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_arm_exponential_backoff() {
        let m = DockerManager::new();
        m.record_failure("nope");
        let s1 = m.status();
        assert!(!s1.available);
        assert_eq!(s1.consecutive_failures, 1);
        assert!(s1.backoff_active);

        m.record_failure("still no");
        assert_eq!(m.status().consecutive_failures, 2);
    }

    #[test]
    fn success_clears_backoff() {
        let m = DockerManager::new();
        m.record_failure("x");
        m.record_success();
        let s = m.status();
        assert!(s.available);
        assert_eq!(s.consecutive_failures, 0);
        assert!(!s.backoff_active);
    }

    #[tokio::test]
    async fn acquire_fails_fast_while_backing_off() {
        let m = DockerManager::new();
        // Arm a long backoff directly, then acquire must not touch the socket.
        for _ in 0..8 {
            m.record_failure("x");
        }
        let started = Instant::now();
        let err = m.acquire().await.unwrap_err();
        assert!(matches!(err, EngineError::RuntimeUnavailable(_)));
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
