// ── API: Rate Limiting ─────────────────────────────────────────────────────
// Fixed-window counters keyed by caller identity (API key, else peer IP).
// Two instances exist: the general limiter (window/max from the
// environment) and the stricter execute limiter (20 requests / 5 min).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    counters: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        RateLimiter { window, max_requests, counters: Mutex::new(HashMap::new()) }
    }

    /// Admit or reject one request. On rejection returns the seconds until
    /// the window resets (for `Retry-After`).
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut counters = self.counters.lock();

        // Opportunistic prune so abandoned keys do not accumulate.
        if counters.len() > 4096 {
            let window = self.window;
            counters.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = counters.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.0));
            return Err(retry_after.as_secs().max(1));
        }
        entry.1 += 1;
        Ok(())
    }
}
