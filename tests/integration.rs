// Integration tests: the gateway end-to-end with scripted fake providers,
// and the HTTP surface via tower::oneshot. Nothing here needs Docker — the
// execute paths under test fail at validation, before any container work.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use codejoin_server::api::{build_router, AppState};
use codejoin_server::atoms::error::{EngineError, EngineResult};
use codejoin_server::atoms::types::{
    ChatContext, ChatOptions, ProviderDescriptor, SelectionStrategy,
};
use codejoin_server::engine::config::{AppConfig, AppMode};
use codejoin_server::engine::gateway::circuit::CircuitBreakerConfig;
use codejoin_server::engine::gateway::events::{EventBus, GatewayEvent};
use codejoin_server::engine::gateway::registry::ProviderRegistry;
use codejoin_server::engine::gateway::retry::RetryPolicy;
use codejoin_server::engine::gateway::{AiGateway, AiGatewayConfig};
use codejoin_server::engine::providers::{AiProvider, ProviderReply};
use codejoin_server::engine::sandbox::docker::DockerManager;
use codejoin_server::engine::sandbox::languages::LanguageCatalog;
use codejoin_server::engine::sandbox::runner::SandboxRunner;
use codejoin_server::engine::sandbox::terminal::TerminalManager;
use codejoin_server::engine::store::MetadataStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ── Scripted provider ──────────────────────────────────────────────────────

struct ScriptedProvider {
    name: &'static str,
    calls: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
    failure_message: &'static str,
}

impl ScriptedProvider {
    fn new(name: &'static str) -> (Arc<Self>, Arc<AtomicU64>, Arc<AtomicBool>) {
        let calls = Arc::new(AtomicU64::new(0));
        let failing = Arc::new(AtomicBool::new(false));
        let provider = Arc::new(ScriptedProvider {
            name,
            calls: calls.clone(),
            failing: failing.clone(),
            failure_message: "API error 503: Service Unavailable",
        });
        (provider, calls, failing)
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }
    fn model(&self) -> &str {
        "scripted-1"
    }
    async fn chat(&self, message: &str, _c: Option<&ChatContext>) -> EngineResult<ProviderReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::provider(self.name, self.failure_message));
        }
        Ok(ProviderReply {
            content: format!("echo: {message}"),
            model: "scripted-1".into(),
            tokens_used: 10,
        })
    }
    async fn health_check(&self) -> EngineResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(EngineError::provider(self.name, self.failure_message))
        } else {
            Ok(())
        }
    }
}

fn descriptor(name: &str, priority: u32) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.into(),
        priority,
        weight: 1,
        cost_per_token: 0.000_001,
        quality: 0.8,
        expected_latency_ms: 100,
        max_error_rate_pct: 50.0,
    }
}

/// Fast-failing gateway config so retries/breakers resolve in milliseconds.
fn fast_config() -> AiGatewayConfig {
    AiGatewayConfig {
        strategy: SelectionStrategy::Priority,
        cache_enabled: true,
        fallback_enabled: true,
        queue_enabled: true,
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..Default::default()
        },
        circuit: CircuitBreakerConfig {
            call_timeout: Duration::from_secs(2),
            // Long enough that an open breaker stays open for the whole
            // test; tests that need recovery call force_circuit.
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        },
    }
}

struct Harness {
    gateway: Arc<AiGateway>,
    store: Arc<MetadataStore>,
}

fn gateway_with(providers: Vec<(Arc<ScriptedProvider>, u32)>) -> Harness {
    let registry = Arc::new(ProviderRegistry::new(SelectionStrategy::Priority));
    for (provider, priority) in providers {
        let desc = descriptor(provider.name, priority);
        registry.register(provider, desc);
    }
    let store = Arc::new(MetadataStore::open(":memory:").unwrap());
    let gateway = AiGateway::new(fast_config(), registry, Some(store.clone()), EventBus::default());
    Harness { gateway, store }
}

// ── Gateway scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn identical_requests_hit_the_cache_after_one_provider_call() {
    let (provider, calls, _) = ScriptedProvider::new("alpha");
    let h = gateway_with(vec![(provider, 1)]);

    let first = h
        .gateway
        .chat("what is rust", Some(json!({"project": "x"})), ChatOptions::default())
        .await
        .unwrap();
    assert!(!first.is_cached);
    assert_eq!(first.provider, "alpha");

    let second = h
        .gateway
        .chat("what is rust", Some(json!({"project": "x"})), ChatOptions::default())
        .await
        .unwrap();
    let third = h
        .gateway
        .chat("What Is Rust", Some(json!({"project": "x"})), ChatOptions::default())
        .await
        .unwrap();
    assert!(second.is_cached);
    assert!(third.is_cached, "cache key must normalize case");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Only the real provider exchange was persisted.
    assert_eq!(h.store.message_count().unwrap(), 2);
}

#[tokio::test]
async fn total_failure_serves_fallback_and_queues_then_retry_succeeds() {
    let (provider, calls, failing) = ScriptedProvider::new("alpha");
    failing.store(true, Ordering::SeqCst);
    let h = gateway_with(vec![(provider, 1)]);
    let mut events = h.gateway.events().subscribe();

    let response = h.gateway.chat("please summarize this file", None, ChatOptions::default()).await.unwrap();
    assert!(response.is_fallback);
    assert!(response.fallback_type.is_some());
    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.gateway.queue().len(), 1);

    let mut queued_seen = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, GatewayEvent::RequestQueued { .. }) {
            queued_seen = true;
        }
    }
    assert!(queued_seen);

    // Provider recovers; force a queue pass past the entry's backoff.
    failing.store(false, Ordering::SeqCst);
    h.gateway.force_circuit("alpha", false);
    h.gateway.process_queue_at(chrono::Utc::now() + chrono::Duration::seconds(11)).await;
    assert_eq!(h.gateway.queue().len(), 0);

    let mut retried_ok = false;
    while let Ok(event) = events.try_recv() {
        if let GatewayEvent::QueueRetried { success: true, .. } = event {
            retried_ok = true;
        }
    }
    assert!(retried_ok);
    // The queued exchange was persisted once it finally succeeded.
    assert_eq!(h.store.message_count().unwrap(), 2);
}

#[tokio::test]
async fn failover_moves_to_the_next_provider() {
    let (bad, bad_calls, bad_failing) = ScriptedProvider::new("alpha");
    let (good, good_calls, _) = ScriptedProvider::new("beta");
    bad_failing.store(true, Ordering::SeqCst);
    let h = gateway_with(vec![(bad, 1), (good, 2)]);

    let response = h.gateway.chat("hello there friend", None, ChatOptions::default()).await.unwrap();
    assert!(!response.is_fallback);
    assert_eq!(response.provider, "beta");
    assert!(bad_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(good_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn open_circuit_skips_the_provider_entirely() {
    let (bad, bad_calls, bad_failing) = ScriptedProvider::new("alpha");
    let (good, _, _) = ScriptedProvider::new("beta");
    bad_failing.store(true, Ordering::SeqCst);
    let h = gateway_with(vec![(bad, 1), (good, 2)]);

    // First request trips alpha's breaker (100% error rate).
    h.gateway.chat("first request goes through retries", None, ChatOptions::default()).await.unwrap();
    let after_first = bad_calls.load(Ordering::SeqCst);
    assert!(after_first >= 1);

    // Second request must not touch alpha at all.
    let response = h
        .gateway
        .chat("second request should skip alpha", None, ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(response.provider, "beta");
    assert_eq!(bad_calls.load(Ordering::SeqCst), after_first);
}

#[tokio::test]
async fn validation_rejects_empty_and_oversized_messages() {
    let (provider, _, _) = ScriptedProvider::new("alpha");
    let h = gateway_with(vec![(provider, 1)]);

    let err = h.gateway.chat("   ", None, ChatOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), "empty_message");

    let huge = "x".repeat(10_000);
    let err = h.gateway.chat(&huge, None, ChatOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), "message_too_long");
}

#[tokio::test]
async fn shutdown_stops_intake() {
    let (provider, _, _) = ScriptedProvider::new("alpha");
    let h = gateway_with(vec![(provider, 1)]);
    h.gateway.shutdown().await;
    assert!(h.gateway.chat("too late", None, ChatOptions::default()).await.is_err());
}

// ── HTTP surface ───────────────────────────────────────────────────────────

fn test_app_config(api_key: &str) -> AppConfig {
    AppConfig {
        port: 0,
        mode: AppMode::Test,
        cors_origin: "*".into(),
        api_key: api_key.into(),
        admin_key: String::new(),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max_requests: 1000,
        max_code_size_bytes: 25 * 1024,
        max_stdin_size_bytes: 10 * 1024,
        db_path: ":memory:".into(),
        gemini_api_key: None,
        openai_api_key: None,
        anthropic_api_key: None,
        glm_api_key: None,
    }
}

fn router_with(api_key: &str, providers: Vec<(Arc<ScriptedProvider>, u32)>) -> axum::Router {
    let config = Arc::new(test_app_config(api_key));
    let registry = Arc::new(ProviderRegistry::new(SelectionStrategy::Priority));
    for (provider, priority) in providers {
        let desc = descriptor(provider.name, priority);
        registry.register(provider, desc);
    }
    let gateway = AiGateway::new(fast_config(), registry, None, EventBus::default());
    let catalog = Arc::new(LanguageCatalog::new());
    let docker = Arc::new(DockerManager::new());
    let runner = Arc::new(SandboxRunner::new(docker.clone(), catalog.clone()));
    let terminals = TerminalManager::new(docker.clone(), catalog.clone());
    build_router(AppState::new(config, gateway, runner, catalog, terminals, docker))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn languages_endpoint_lists_catalog() {
    let router = router_with("", vec![]);
    let response =
        router.oneshot(Request::builder().uri("/api/languages").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(body["count"].as_u64().unwrap() >= 9);
    let ids: Vec<&str> =
        body["languages"].as_array().unwrap().iter().map(|l| l["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"python"));
    assert!(ids.contains(&"javascript"));
}

#[tokio::test]
async fn execute_rejects_dangerous_code_with_400() {
    let router = router_with("", vec![]);
    let request = post_json(
        "/api/execute",
        json!({"language": "python", "code": "import os\nos.system(\"rm -rf /\")"}),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "dangerous_code");
    assert!(body["error"]["message"].as_str().unwrap().contains("dangerous patterns"));
    assert!(body["error"]["requestId"].as_str().is_some());
}

#[tokio::test]
async fn execute_rejects_unsupported_language() {
    let router = router_with("", vec![]);
    let request = post_json("/api/execute", json!({"language": "cobol", "code": "DISPLAY 'HI'."}));
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unsupported_language");
}

#[tokio::test]
async fn execute_requires_api_key_when_configured() {
    let router = router_with("sekrit", vec![]);
    let request = post_json("/api/execute", json!({"language": "python", "code": "print(1)"}));
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn chat_endpoint_returns_metadata_envelope() {
    let (provider, _, _) = ScriptedProvider::new("alpha");
    let router = router_with("", vec![(provider, 1)]);
    let response =
        router.oneshot(post_json("/ai/chat", json!({"message": "hello world"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["response"], "echo: hello world");
    assert_eq!(body["metadata"]["provider"], "alpha");
    assert_eq!(body["metadata"]["isCached"], false);
    assert_eq!(body["metadata"]["isFallback"], false);
    assert!(body["metadata"]["requestId"].as_str().is_some());
}

#[tokio::test]
async fn chat_with_failing_providers_degrades_to_fallback_success() {
    let (provider, _, failing) = ScriptedProvider::new("alpha");
    failing.store(true, Ordering::SeqCst);
    let router = router_with("", vec![(provider, 1)]);
    let response = router
        .oneshot(post_json("/ai/chat", json!({"message": "explain this traceback to me"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["isFallback"], true);
}

#[tokio::test]
async fn ai_status_reports_strategy_and_queue() {
    let (provider, _, _) = ScriptedProvider::new("alpha");
    let router = router_with("", vec![(provider, 1)]);
    let response =
        router.oneshot(Request::builder().uri("/ai/status").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["strategy"], "priority");
    assert_eq!(body["queueDepth"], 0);
    assert_eq!(body["providers"][0]["descriptor"]["name"], "alpha");
}

#[tokio::test]
async fn health_endpoint_reports_docker_state() {
    let router = router_with("", vec![]);
    let response =
        router.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["status"].as_str().is_some());
    assert!(body["docker"]["available"].as_bool().is_some());
    assert!(body["docker"]["consecutiveFailures"].as_u64().is_some());
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn rate_limited_requests_carry_retry_after() {
    let config = Arc::new(AppConfig {
        rate_limit_max_requests: 1,
        ..test_app_config("")
    });
    let registry = Arc::new(ProviderRegistry::new(SelectionStrategy::Priority));
    let (provider, _, _) = ScriptedProvider::new("alpha");
    registry.register(provider, descriptor("alpha", 1));
    let gateway = AiGateway::new(fast_config(), registry, None, EventBus::default());
    let catalog = Arc::new(LanguageCatalog::new());
    let docker = Arc::new(DockerManager::new());
    let runner = Arc::new(SandboxRunner::new(docker.clone(), catalog.clone()));
    let terminals = TerminalManager::new(docker.clone(), catalog.clone());
    let router = build_router(AppState::new(config, gateway, runner, catalog, terminals, docker));

    let ok = router
        .clone()
        .oneshot(post_json("/ai/chat", json!({"message": "first"})))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let limited = router.oneshot(post_json("/ai/chat", json!({"message": "second"}))).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().get("retry-after").is_some());
    let body = body_json(limited).await;
    assert_eq!(body["error"]["code"], "rate_limited");
}
