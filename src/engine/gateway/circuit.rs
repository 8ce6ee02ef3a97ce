// ── Gateway: Circuit Breaker ───────────────────────────────────────────────
// Guards a single downstream capability (one AI provider each).
//
// States:
//   Closed   — normal operation; trips when the windowed error rate crosses
//              the threshold
//   Open     — rejecting requests until the reset timeout elapses
//   HalfOpen — probe traffic allowed; one failure re-opens, a run of
//              successes closes
//
// Every call is wrapped in an independent timeout so a hung provider cannot
// wedge the breaker in a half-counted state.

use super::events::{EventBus, GatewayEvent};
use crate::atoms::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Independent timeout applied to every guarded call.
    pub call_timeout: Duration,
    /// Windowed error percentage that trips Closed → Open.
    pub error_threshold_pct: u64,
    /// Time spent rejecting before the first probe is allowed.
    pub reset_timeout: Duration,
    /// Consecutive HalfOpen successes required to close.
    pub min_successes_to_close: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            error_threshold_pct: 50,
            reset_timeout: Duration::from_secs(60),
            min_successes_to_close: 3,
        }
    }
}

#[derive(Debug)]
struct Window {
    state: CircuitState,
    failures: u64,
    successes: u64,
    requests: u64,
    /// Set when entering Open.
    next_attempt: Option<Instant>,
    // Lifetime stats, never reset.
    total_requests: u64,
    total_failures: u64,
    times_opened: u64,
}

/// Read-only view rendered by `/ai/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failures: u64,
    pub successes: u64,
    pub requests: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub times_opened: u64,
    /// Seconds until the next probe is allowed, when Open.
    pub retry_after_secs: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    window: Mutex<Window>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, events: EventBus) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            window: Mutex::new(Window {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                requests: 0,
                next_attempt: None,
                total_requests: 0,
                total_failures: 0,
                times_opened: 0,
            }),
            events,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.window.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let w = self.window.lock();
        CircuitSnapshot {
            state: w.state,
            failures: w.failures,
            successes: w.successes,
            requests: w.requests,
            total_requests: w.total_requests,
            total_failures: w.total_failures,
            times_opened: w.times_opened,
            retry_after_secs: w
                .next_attempt
                .filter(|_| w.state == CircuitState::Open)
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs()),
        }
    }

    /// Operator control: trip the breaker regardless of counters.
    pub fn force_open(&self) {
        let mut w = self.window.lock();
        let from = w.state;
        self.open_locked(&mut w, from);
    }

    /// Operator control: close and reset the window.
    pub fn force_close(&self) {
        let mut w = self.window.lock();
        let from = w.state;
        self.close_locked(&mut w, from);
    }

    /// Wrap `f` with the breaker and its call timeout.
    ///
    /// While Open and before `next_attempt`, fails fast with `CircuitOpen`
    /// without invoking `f` at all. The first call at or after `next_attempt`
    /// moves to HalfOpen and is executed as the probe.
    pub async fn execute<T, F, Fut>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.admit()?;

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure();
                Err(err)
            }
            Err(_) => {
                self.on_failure();
                Err(EngineError::Timeout(format!(
                    "{} call exceeded {}s",
                    self.name,
                    self.config.call_timeout.as_secs()
                )))
            }
        }
    }

    // ── State machine ──────────────────────────────────────────────────────

    fn admit(&self) -> EngineResult<()> {
        let mut w = self.window.lock();
        match w.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let next = w.next_attempt.unwrap_or_else(Instant::now);
                let now = Instant::now();
                if now < next {
                    let retry_after_secs = (next - now).as_secs().max(1);
                    return Err(EngineError::CircuitOpen { retry_after_secs });
                }
                // Cooldown elapsed — this call becomes the HalfOpen probe.
                w.state = CircuitState::HalfOpen;
                w.successes = 0;
                self.events.emit(GatewayEvent::CircuitTransition {
                    provider: self.name.clone(),
                    from: CircuitState::Open.as_str(),
                    to: CircuitState::HalfOpen.as_str(),
                });
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let mut w = self.window.lock();
        w.total_requests += 1;
        match w.state {
            CircuitState::Closed => {
                w.requests += 1;
                w.successes += 1;
            }
            CircuitState::HalfOpen => {
                w.successes += 1;
                if w.successes >= self.config.min_successes_to_close {
                    let from = w.state;
                    self.close_locked(&mut w, from);
                }
            }
            CircuitState::Open => {} // force_open raced the call; ignore
        }
    }

    fn on_failure(&self) {
        let mut w = self.window.lock();
        w.total_requests += 1;
        w.total_failures += 1;
        match w.state {
            CircuitState::Closed => {
                w.requests += 1;
                w.failures += 1;
                if w.requests > 0 && w.failures * 100 / w.requests >= self.config.error_threshold_pct {
                    let from = w.state;
                    self.open_locked(&mut w, from);
                }
            }
            CircuitState::HalfOpen => {
                let from = w.state;
                self.open_locked(&mut w, from);
            }
            CircuitState::Open => {}
        }
    }

    fn open_locked(&self, w: &mut Window, from: CircuitState) {
        w.state = CircuitState::Open;
        w.next_attempt = Some(Instant::now() + self.config.reset_timeout);
        w.times_opened += 1;
        if from != CircuitState::Open {
            log::warn!(
                "[circuit] {} {} -> OPEN ({}/{} failed), cooling down {}s",
                self.name,
                from.as_str(),
                w.failures,
                w.requests,
                self.config.reset_timeout.as_secs()
            );
            self.events.emit(GatewayEvent::CircuitTransition {
                provider: self.name.clone(),
                from: from.as_str(),
                to: CircuitState::Open.as_str(),
            });
        }
    }

    fn close_locked(&self, w: &mut Window, from: CircuitState) {
        w.state = CircuitState::Closed;
        w.failures = 0;
        w.successes = 0;
        w.requests = 0;
        w.next_attempt = None;
        if from != CircuitState::Closed {
            log::info!("[circuit] {} {} -> CLOSED", self.name, from.as_str());
            self.events.emit(GatewayEvent::CircuitTransition {
                provider: self.name.clone(),
                from: from.as_str(),
                to: CircuitState::Closed.as_str(),
            });
        }
    }
}
