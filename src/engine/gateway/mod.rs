// ── AI Gateway ─────────────────────────────────────────────────────────────
// End-to-end chat request orchestration:
//
//   validate → cache → select providers → (per provider: circuit + retry)
//   → health feedback → on exhaustion: defer queueable failures, then
//   degrade gracefully via the fallback generator.
//
// The gateway owns the breaker map and the background loops (queue
// processor, health probes). All feedback between parts travels over the
// event bus; no component points back at the gateway.

pub mod cache;
pub mod circuit;
pub mod events;
pub mod fallback;
pub mod health;
pub mod queue;
pub mod registry;
pub mod retry;

use crate::atoms::constants::{CHAT_MESSAGE_MAX_CHARS, HEALTH_PROBE_INTERVAL_SECS, QUEUE_TICK_SECS};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{AiResponse, ChatContext, ChatOptions, SelectionStrategy};
use crate::engine::store::MetadataStore;
use cache::ResponseCache;
use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
use events::{EventBus, GatewayEvent};
use fallback::FallbackGenerator;
use health::{HealthMonitor, HealthMonitorConfig};
use log::{info, warn};
use parking_lot::Mutex;
use queue::{is_queueable, RequestQueue};
use registry::ProviderRegistry;
use retry::RetryPolicy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

// ── Config ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AiGatewayConfig {
    pub strategy: SelectionStrategy,
    pub cache_enabled: bool,
    pub fallback_enabled: bool,
    pub queue_enabled: bool,
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
}

impl Default for AiGatewayConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Priority,
            cache_enabled: true,
            fallback_enabled: true,
            queue_enabled: true,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMetrics {
    pub total_requests: u64,
    pub provider_calls: u64,
    pub provider_successes: u64,
    pub fallbacks_served: u64,
    pub cache: cache::CacheStats,
    pub queue_depth: usize,
}

// ── Gateway ────────────────────────────────────────────────────────────────

pub struct AiGateway {
    config: AiGatewayConfig,
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthMonitor>,
    cache: Arc<ResponseCache>,
    queue: Arc<RequestQueue>,
    fallback: FallbackGenerator,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    store: Option<Arc<MetadataStore>>,
    events: EventBus,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    background: Mutex<Vec<JoinHandle<()>>>,
    total_requests: AtomicU64,
    provider_calls: AtomicU64,
    provider_successes: AtomicU64,
    fallbacks_served: AtomicU64,
}

impl AiGateway {
    pub fn new(
        config: AiGatewayConfig,
        registry: Arc<ProviderRegistry>,
        store: Option<Arc<MetadataStore>>,
        events: EventBus,
    ) -> Arc<Self> {
        registry.set_strategy(config.strategy);
        let cache = Arc::new(ResponseCache::default());
        Arc::new(AiGateway {
            fallback: FallbackGenerator::new(Some(cache.clone())),
            health: Arc::new(HealthMonitor::new(HealthMonitorConfig::default(), events.clone())),
            queue: Arc::new(RequestQueue::new(events.clone())),
            cache,
            registry,
            store,
            events,
            config,
            breakers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            background: Mutex::new(Vec::new()),
            total_requests: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
            provider_successes: AtomicU64::new(0),
            fallbacks_served: AtomicU64::new(0),
        })
    }

    // ── Accessors for the api layer and tests ──────────────────────────────

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn provider_call_count(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn circuit_snapshots(&self) -> HashMap<String, CircuitSnapshot> {
        self.breakers.lock().iter().map(|(name, b)| (name.clone(), b.snapshot())).collect()
    }

    /// Operator control: force one provider's breaker open or closed.
    pub fn force_circuit(&self, provider: &str, open: bool) {
        let breaker = self.breaker_for(provider);
        if open {
            breaker.force_open();
        } else {
            breaker.force_close();
        }
    }

    pub fn metrics(&self) -> GatewayMetrics {
        GatewayMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_successes: self.provider_successes.load(Ordering::Relaxed),
            fallbacks_served: self.fallbacks_served.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            queue_depth: self.queue.len(),
        }
    }

    pub fn reset_metrics(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.provider_calls.store(0, Ordering::Relaxed);
        self.provider_successes.store(0, Ordering::Relaxed);
        self.fallbacks_served.store(0, Ordering::Relaxed);
        self.health.reset_metrics();
    }

    fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.config.circuit.clone(), self.events.clone()))
            })
            .clone()
    }

    // ── Chat ───────────────────────────────────────────────────────────────

    pub async fn chat(
        &self,
        message: &str,
        context: Option<ChatContext>,
        options: ChatOptions,
    ) -> EngineResult<AiResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Internal("gateway is shutting down".into()));
        }
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(EngineError::validation("empty_message", "message must not be empty"));
        }
        if message.chars().count() > CHAT_MESSAGE_MAX_CHARS {
            return Err(EngineError::validation(
                "message_too_long",
                format!("message exceeds {CHAT_MESSAGE_MAX_CHARS} characters"),
            ));
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let _guard = InFlightGuard::enter(self);
        let request_id = uuid::Uuid::new_v4().to_string();
        let key = ResponseCache::key(message, context.as_ref());

        if self.config.cache_enabled && !options.bypass_cache {
            if let Some(mut hit) = self.cache.get(&key) {
                hit.is_cached = true;
                hit.request_id = request_id;
                return Ok(hit);
            }
        }

        match self.try_providers(message, context.as_ref(), &request_id).await {
            Ok(response) => {
                if self.config.cache_enabled {
                    self.cache.set(key, response.clone());
                }
                self.persist(&options, message, &response);
                Ok(response)
            }
            Err(last_error) => {
                if self.config.queue_enabled && is_queueable(&last_error) {
                    self.queue.enqueue(message.to_string(), context.clone(), options);
                }
                self.fallbacks_served.fetch_add(1, Ordering::Relaxed);
                warn!("[gateway] all providers failed ({last_error}), serving fallback");
                Ok(self.degraded_response(message, context.as_ref(), &request_id))
            }
        }
    }

    fn degraded_response(
        &self,
        message: &str,
        context: Option<&ChatContext>,
        request_id: &str,
    ) -> AiResponse {
        if self.config.fallback_enabled {
            self.fallback.generate(message, context, request_id)
        } else {
            // Fallback generator disabled: canned-only responder.
            let minimal = FallbackGenerator::new(None);
            minimal.generate("", None, request_id)
        }
    }

    /// Steps 3–4 of the request flow: ranked candidates, breaker-gated and
    /// retry-wrapped calls, health feedback on each outcome.
    async fn try_providers(
        &self,
        message: &str,
        context: Option<&ChatContext>,
        request_id: &str,
    ) -> EngineResult<AiResponse> {
        let candidates = self.registry.select(&self.health);
        if candidates.is_empty() {
            return Err(EngineError::provider("gateway", "no eligible providers"));
        }

        let mut last_error = EngineError::provider("gateway", "no provider attempted");
        for rp in candidates {
            let name = rp.descriptor.name.clone();
            let breaker = self.breaker_for(&name);
            if breaker.state() == CircuitState::Open {
                last_error = EngineError::CircuitOpen {
                    retry_after_secs: breaker.snapshot().retry_after_secs.unwrap_or(1),
                };
                continue;
            }

            let started = Instant::now();
            let msg = message.to_string();
            let ctx = context.cloned();
            let calls = &self.provider_calls;
            // The breaker can trip mid-retry; remember the underlying
            // failure so classification (queueable or not) is not done
            // against a CircuitOpen shell.
            let seen_failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
            let result = self
                .config
                .retry
                .execute(|| {
                    let provider = rp.provider.clone();
                    let breaker = breaker.clone();
                    let msg = msg.clone();
                    let ctx = ctx.clone();
                    let seen = seen_failure.clone();
                    async move {
                        let result = breaker
                            .execute(move || async move {
                                calls.fetch_add(1, Ordering::Relaxed);
                                provider.chat(&msg, ctx.as_ref()).await
                            })
                            .await;
                        if let Err(err) = &result {
                            if !matches!(err, EngineError::CircuitOpen { .. }) {
                                let message = match err {
                                    EngineError::Provider { message, .. } => message.clone(),
                                    other => other.to_string(),
                                };
                                *seen.lock() = Some(message);
                            }
                        }
                        result
                    }
                })
                .await;
            let result = match result {
                Err(EngineError::CircuitOpen { retry_after_secs }) => {
                    match seen_failure.lock().take() {
                        Some(message) => Err(EngineError::provider(name.clone(), message)),
                        None => Err(EngineError::CircuitOpen { retry_after_secs }),
                    }
                }
                other => other,
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(reply) => {
                    self.health.record_success(&name, Some(latency_ms));
                    self.provider_successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(AiResponse {
                        content: reply.content,
                        provider: name,
                        model: reply.model,
                        tokens_used: reply.tokens_used,
                        cost: reply.tokens_used as f64 * rp.descriptor.cost_per_token,
                        latency_ms,
                        request_id: request_id.to_string(),
                        is_cached: false,
                        is_fallback: false,
                        fallback_type: None,
                        confidence: 1.0,
                    });
                }
                Err(err) => {
                    self.health.record_failure(&name, &err.to_string(), err.code(), Some(latency_ms));
                    warn!("[gateway] provider '{}' failed: {}", name, err);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn persist(&self, options: &ChatOptions, message: &str, response: &AiResponse) {
        let Some(store) = &self.store else { return };
        let project_id = options.project_id.as_deref().unwrap_or("default");
        let user_id = options.user_id.as_deref().unwrap_or("anonymous");
        if let Err(e) = store.record_exchange(project_id, user_id, message, response) {
            warn!("[gateway] failed to persist exchange: {e}");
        }
    }

    // ── Background loops ───────────────────────────────────────────────────

    /// Spawn the queue processor and the health probe loop. Idempotent-ish:
    /// call once from the composition root.
    pub fn start_background(self: &Arc<Self>) {
        let gw = self.clone();
        let queue_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(QUEUE_TICK_SECS));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                gw.process_queue().await;
            }
        });

        let gw = self.clone();
        let probe_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(HEALTH_PROBE_INTERVAL_SECS));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                gw.probe_providers().await;
            }
        });

        self.background.lock().extend([queue_task, probe_task]);
    }

    /// One queue pass: retry everything due, requeue failures with advanced
    /// backoff.
    pub async fn process_queue(&self) {
        self.process_queue_at(chrono::Utc::now()).await;
    }

    /// Queue pass against an explicit clock, so a pass can be forced for
    /// entries whose backoff has not wall-clock-elapsed yet.
    pub async fn process_queue_at(&self, now: chrono::DateTime<chrono::Utc>) {
        let due = self.queue.take_due(now);
        for request in due {
            let request_id = uuid::Uuid::new_v4().to_string();
            match self.try_providers(&request.message, request.context.as_ref(), &request_id).await {
                Ok(response) => {
                    info!("[gateway] queued request {} succeeded on retry", request.id);
                    if self.config.cache_enabled {
                        let key = ResponseCache::key(&request.message, request.context.as_ref());
                        self.cache.set(key, response.clone());
                    }
                    self.persist(&request.options, &request.message, &response);
                    self.events.emit(GatewayEvent::QueueRetried { id: request.id, success: true });
                }
                Err(err) => {
                    warn!("[gateway] queued request {} failed again: {}", request.id, err);
                    self.events
                        .emit(GatewayEvent::QueueRetried { id: request.id.clone(), success: false });
                    self.queue.requeue(request);
                }
            }
        }
    }

    /// One probe round over every registered provider.
    pub async fn probe_providers(&self) {
        for rp in self.registry.all() {
            let name = rp.descriptor.name.clone();
            let started = Instant::now();
            match rp.provider.health_check().await {
                Ok(()) => {
                    self.health.record_success(&name, Some(started.elapsed().as_millis() as u64))
                }
                Err(err) => {
                    self.health.record_failure(&name, &err.to_string(), "probe_failed", None)
                }
            }
        }
    }

    /// Ordered shutdown: stop intake, stop the timers, drain in-flight chats.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
        info!("[gateway] shutdown complete");
    }
}

// ── In-flight accounting ───────────────────────────────────────────────────

struct InFlightGuard<'a> {
    gateway: &'a AiGateway,
}

impl<'a> InFlightGuard<'a> {
    fn enter(gateway: &'a AiGateway) -> Self {
        gateway.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { gateway }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.gateway.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.gateway.drained.notify_waiters();
        }
    }
}
