// ── Gateway: Deferred Request Queue ────────────────────────────────────────
// Chat requests that failed with a queueable error (overload, rate limit,
// transient network) wait here for the periodic processor. FIFO at each
// tick; per-entry exponential backoff capped at five minutes; entries that
// exhaust their retries are dropped with an observable warning.

use super::events::{EventBus, GatewayEvent};
use crate::atoms::constants::{QUEUE_BACKOFF_BASE_MS, QUEUE_BACKOFF_CAP_MS, QUEUE_MAX_RETRIES};
use crate::atoms::error::EngineError;
use crate::atoms::types::{ChatContext, ChatOptions};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Failure tokens worth deferring: retrying later has a material chance of
/// success. Matched case-insensitively against message and code.
const QUEUEABLE_TOKENS: &[&str] = &["overloaded", "503", "rate limit", "429", "timeout"];

pub fn is_queueable(err: &EngineError) -> bool {
    let haystack = format!("{} {}", err, err.code()).to_lowercase();
    QUEUEABLE_TOKENS.iter().any(|t| haystack.contains(t))
}

#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: String,
    pub message: String,
    pub context: Option<ChatContext>,
    pub options: ChatOptions,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
}

pub struct RequestQueue {
    entries: Mutex<VecDeque<QueuedRequest>>,
    events: EventBus,
}

impl RequestQueue {
    pub fn new(events: EventBus) -> Self {
        RequestQueue { entries: Mutex::new(VecDeque::new()), events }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// min(5 min, 10 s · 2ⁿ) for the n-th retry.
    fn backoff_ms(retry_count: u32) -> u64 {
        QUEUE_BACKOFF_CAP_MS.min(QUEUE_BACKOFF_BASE_MS.saturating_mul(1u64 << retry_count.min(16)))
    }

    pub fn enqueue(&self, message: String, context: Option<ChatContext>, options: ChatOptions) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let request = QueuedRequest {
            id: id.clone(),
            message,
            context,
            options,
            retry_count: 0,
            max_retries: QUEUE_MAX_RETRIES,
            created_at: now,
            next_attempt_at: now + ChronoDuration::milliseconds(Self::backoff_ms(0) as i64),
        };
        log::info!("[queue] deferred request {} until {}", id, request.next_attempt_at);
        self.entries.lock().push_back(request);
        self.events.emit(GatewayEvent::RequestQueued { id: id.clone(), retry_count: 0 });
        id
    }

    /// Remove and return every entry due at `now`, preserving FIFO order.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<QueuedRequest> {
        let mut entries = self.entries.lock();
        let mut due = Vec::new();
        let mut keep = VecDeque::with_capacity(entries.len());
        while let Some(entry) = entries.pop_front() {
            if entry.next_attempt_at <= now {
                due.push(entry);
            } else {
                keep.push_back(entry);
            }
        }
        *entries = keep;
        due
    }

    /// Put a failed entry back with its backoff advanced, or drop it when
    /// retries are exhausted.
    pub fn requeue(&self, mut request: QueuedRequest) {
        request.retry_count += 1;
        if request.retry_count > request.max_retries {
            log::warn!(
                "[queue] dropping request {} after {} retries",
                request.id,
                request.retry_count - 1
            );
            self.events.emit(GatewayEvent::QueueDropped {
                id: request.id,
                retries: request.retry_count - 1,
            });
            return;
        }
        request.next_attempt_at =
            Utc::now() + ChronoDuration::milliseconds(Self::backoff_ms(request.retry_count) as i64);
        self.entries.lock().push_back(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RequestQueue {
        RequestQueue::new(EventBus::default())
    }

    #[test]
    fn queueable_classifier() {
        assert!(is_queueable(&EngineError::provider("x", "model overloaded")));
        assert!(is_queueable(&EngineError::provider("x", "API error 503: down")));
        assert!(is_queueable(&EngineError::Timeout("call exceeded 30s".into())));
        assert!(is_queueable(&EngineError::RateLimited { message: "x".into(), retry_after_secs: 1 }));
        assert!(!is_queueable(&EngineError::Auth("bad key".into())));
        assert!(!is_queueable(&EngineError::validation("bad_input", "nope")));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(RequestQueue::backoff_ms(0), 10_000);
        assert_eq!(RequestQueue::backoff_ms(1), 20_000);
        assert_eq!(RequestQueue::backoff_ms(4), 160_000);
        assert_eq!(RequestQueue::backoff_ms(5), 300_000); // capped at 5 min
        assert_eq!(RequestQueue::backoff_ms(12), 300_000);
    }

    #[test]
    fn take_due_preserves_fifo_and_leaves_future_entries() {
        let q = queue();
        q.enqueue("first".into(), None, ChatOptions::default());
        q.enqueue("second".into(), None, ChatOptions::default());
        assert_eq!(q.len(), 2);

        // Nothing is due immediately (first attempt waits 10s).
        assert!(q.take_due(Utc::now()).is_empty());
        assert_eq!(q.len(), 2);

        let later = Utc::now() + ChronoDuration::seconds(11);
        let due = q.take_due(later);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].message, "first");
        assert_eq!(due[1].message, "second");
        assert!(q.is_empty());
    }

    #[test]
    fn requeue_drops_after_max_retries() {
        let q = queue();
        let mut rx = q.events.subscribe();
        q.enqueue("m".into(), None, ChatOptions::default());
        let mut entry = q.take_due(Utc::now() + ChronoDuration::seconds(11)).pop().unwrap();
        entry.retry_count = entry.max_retries;
        q.requeue(entry);
        assert!(q.is_empty());
        // queued + dropped events observed
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(format!("{ev:?}"));
        }
        assert!(kinds.iter().any(|k| k.contains("QueueDropped")));
    }
}
