// ── Gateway: Response Cache ────────────────────────────────────────────────
// Bounded LRU of AI responses with a TTL. The key is a deterministic hash of
// the normalized message and the canonicalized context, so identical requests
// hit regardless of key ordering or incidental whitespace in the context.

use crate::atoms::constants::{CACHE_SIZE, CACHE_TTL_SECS};
use crate::atoms::types::{AiResponse, ChatContext};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Entry {
    response: AiResponse,
    expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        ResponseCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Deterministic cache key: SHA-256 over the lowercased, trimmed message
    /// and the canonicalized context (sorted keys, collapsed whitespace).
    pub fn key(message: &str, context: Option<&ChatContext>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(collapse_whitespace(&message.trim().to_lowercase()).as_bytes());
        hasher.update(b"\x1f");
        if let Some(ctx) = context {
            hasher.update(canonicalize(ctx).as_bytes());
        }
        hex(&hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<AiResponse> {
        let mut entries = self.entries.lock();
        let live = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => None, // expired, pruned below
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match live {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(response)
            }
            None => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: String, response: AiResponse) {
        let entry = Entry { response, expires_at: Instant::now() + self.ttl };
        let mut entries = self.entries.lock();
        let at_capacity = entries.len() == usize::from(entries.cap());
        let evicting = at_capacity && !entries.contains(&key);
        entries.push(key, entry);
        if evicting {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: entries.len(),
            capacity: usize::from(entries.cap()),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CACHE_SIZE, Duration::from_secs(CACHE_TTL_SECS))
    }
}

// ── Canonicalization ───────────────────────────────────────────────────────

/// Stable textual form of a JSON context: object keys sorted recursively,
/// string whitespace collapsed. Arrays keep their order (it is meaningful
/// for conversation history).
fn canonicalize(value: &ChatContext) -> String {
    use serde_json::Value;
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", collapse_whitespace(s)),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> =
                keys.into_iter().map(|k| format!("\"{}\":{}", k, canonicalize(&map[k]))).collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
