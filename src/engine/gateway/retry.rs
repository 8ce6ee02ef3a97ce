// ── Gateway: Retry Policy ──────────────────────────────────────────────────
// Classified retries with exponential backoff and jitter.
//
//   • Backoff: min(max_delay, base_delay · multiplier^attempt)
//   • Jitter: uniform factor in [0.5, 1.5] when enabled
//   • Classifier: case-insensitive token list matched against the error
//     message and machine code

use crate::atoms::error::{EngineError, EngineResult};
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Error-message tokens treated as transient by default.
pub const DEFAULT_RETRYABLE_TOKENS: &[&str] = &[
    "503",
    "service unavailable",
    "overloaded",
    "429",
    "rate limit",
    "quota",
    "timeout",
    "connection",
    "network",
    "econnreset",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    /// Lowercase tokens; matching is substring over lowercased message+code.
    pub retryable_tokens: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable_tokens: DEFAULT_RETRYABLE_TOKENS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, err: &EngineError) -> bool {
        let haystack = format!("{} {}", err, err.code()).to_lowercase();
        self.retryable_tokens.iter().any(|t| haystack.contains(t.as_str()))
    }

    /// Backoff for a 0-based attempt index, before jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis((ms as u64).min(self.max_delay.as_millis() as u64))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if !self.jitter {
            return base;
        }
        let factor = 0.5 + rand_unit(); // uniform in [0.5, 1.5)
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }

    /// Call `f`, retrying on classified-retryable failures up to
    /// `max_retries` additional attempts. Non-retryable errors and
    /// exhaustion propagate the last error.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries || !self.is_retryable(&err) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "[retry] attempt {}/{} failed ({}), retrying in {}ms",
                        attempt + 1,
                        self.max_retries,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Variant that also retries *successful* results the caller rejects,
    /// e.g. an empty completion from an otherwise healthy provider.
    pub async fn execute_with_condition<T, F, Fut, P>(&self, mut f: F, mut should_retry: P) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
        P: FnMut(&T) -> bool,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) if attempt < self.max_retries && should_retry(&value) => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries || !self.is_retryable(&err) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ── Jitter source ──────────────────────────────────────────────────────────

/// Uniform-ish value in [0,1) from the system clock nanos. Good enough for
/// jitter, weighted selection, and canned-message choice; not for security.
pub(crate) fn rand_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 10_000) as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
            ..Default::default()
        }
    }

    #[test]
    fn classifier_matches_message_and_code() {
        let p = RetryPolicy::default();
        assert!(p.is_retryable(&EngineError::provider("x", "API error 503: upstream down")));
        assert!(p.is_retryable(&EngineError::provider("x", "model is OVERLOADED")));
        assert!(p.is_retryable(&EngineError::Timeout("gemini call exceeded 30s".into())));
        assert!(p.is_retryable(&EngineError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: 1
        }));
        assert!(!p.is_retryable(&EngineError::Auth("bad key".into())));
        assert!(!p.is_retryable(&EngineError::validation("bad_input", "nope")));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let p = RetryPolicy {
            jitter: false,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(16));
        assert_eq!(p.delay_for(10), Duration::from_secs(30)); // capped
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let p = RetryPolicy::default();
        for attempt in 0..4 {
            let base = p.backoff(attempt).as_millis() as f64;
            for _ in 0..50 {
                let d = p.delay_for(attempt).as_millis() as f64;
                assert!(d >= base * 0.5 - 1.0 && d <= base * 1.5 + 1.0, "delay {d} out of range for base {base}");
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let result = quick_policy(3)
            .execute(move || {
                let a = a.clone();
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::provider("x", "503 unavailable"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let err = quick_policy(3)
            .execute(move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(EngineError::Auth("invalid key".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_propagates_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let err = quick_policy(2)
            .execute(move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(EngineError::provider("x", "429 rate limit"))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn condition_variant_retries_rejected_results() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let value = quick_policy(3)
            .execute_with_condition(
                move || {
                    let a = a.clone();
                    async move { Ok(a.fetch_add(1, Ordering::SeqCst)) }
                },
                |v| *v < 2, // reject the first two results
            )
            .await
            .unwrap();
        assert_eq!(value, 2);
    }
}
