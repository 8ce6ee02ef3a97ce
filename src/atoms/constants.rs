// ── Atoms: Constants ───────────────────────────────────────────────────────
// All named limits and intervals for the crate live here.
// Rationale: collecting constants in one place eliminates magic numbers,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Submission limits ──────────────────────────────────────────────────────
// Byte caps applied by the input normalizer before anything touches Docker.

/// Maximum source size accepted by `/api/execute` (overridable via env).
pub const MAX_CODE_SIZE_BYTES: usize = 1024 * 1024; // 1 MiB

/// Maximum source size in test mode. Keeps CI containers small.
pub const MAX_CODE_SIZE_BYTES_TEST: usize = 25 * 1024;

/// Maximum stdin size accepted by `/api/execute`.
pub const MAX_STDIN_SIZE_BYTES: usize = 10 * 1024;

// ── One-shot execution ─────────────────────────────────────────────────────

/// Bounds for the per-request timeout override, milliseconds.
pub const EXEC_TIMEOUT_MIN_MS: u64 = 1_000;
pub const EXEC_TIMEOUT_MAX_MS: u64 = 30_000;

/// Exit code reported when the wall clock wins the race against the container.
pub const EXIT_CODE_TIMEOUT: i64 = 124;

/// Captured stdout/stderr are each truncated to this many bytes.
pub const OUTPUT_TRUNCATE_BYTES: usize = 10_000;

// ── Docker connection backoff ──────────────────────────────────────────────
// The daemon socket is a shared, potentially slow resource. After consecutive
// probe failures we back off exponentially and throttle the error logging so
// a dead daemon does not flood the log.

pub const DOCKER_BACKOFF_MAX_MS: u64 = 10_000;
pub const DOCKER_LOG_COOLDOWN_MS: u64 = 15_000;

// ── Interactive terminals ──────────────────────────────────────────────────

/// Sessions idle longer than this are reaped.
pub const TERMINAL_IDLE_THRESHOLD_MS: i64 = 30 * 60 * 1000;

/// Idle-reaper scan interval.
pub const TERMINAL_REAP_INTERVAL_SECS: u64 = 60;

/// Language used when a `terminal:start` names an unsupported one.
pub const TERMINAL_DEFAULT_LANGUAGE: &str = "python";

// ── AI gateway ─────────────────────────────────────────────────────────────

/// Maximum chat message length (characters) accepted by `/ai/chat`.
pub const CHAT_MESSAGE_MAX_CHARS: usize = 8_000;

/// Deferred-request queue scan interval.
pub const QUEUE_TICK_SECS: u64 = 30;

/// Retries a queued request gets before it is dropped with a warning.
pub const QUEUE_MAX_RETRIES: u32 = 5;

/// Queued-retry backoff: min(QUEUE_BACKOFF_CAP, QUEUE_BACKOFF_BASE * 2^n).
pub const QUEUE_BACKOFF_BASE_MS: u64 = 10_000;
pub const QUEUE_BACKOFF_CAP_MS: u64 = 5 * 60 * 1000;

/// Response cache defaults.
pub const CACHE_SIZE: usize = 1_000;
pub const CACHE_TTL_SECS: u64 = 3_600;

/// Health monitor probe interval and metric retention.
pub const HEALTH_PROBE_INTERVAL_SECS: u64 = 60;
pub const HEALTH_METRIC_RETENTION_SECS: i64 = 24 * 60 * 60;

// ── Rate limiting ──────────────────────────────────────────────────────────
// The execute endpoint carries its own fixed policy; everything else uses
// the general limiter configured through the environment.

pub const EXECUTE_RATE_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const EXECUTE_RATE_MAX_REQUESTS: u32 = 20;
