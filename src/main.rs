// codejoin-server — composition root.
// Builds every singleton once, wires them together explicitly, serves HTTP
// + WebSocket on one listener, and shuts down in order: stop accepting →
// stop background timers → drain in-flight chats → remove live terminal
// containers.

use codejoin_server::api::{build_router, AppState};
use codejoin_server::atoms::error::EngineResult;
use codejoin_server::atoms::types::{ProviderDescriptor, SelectionStrategy};
use codejoin_server::engine::config::AppConfig;
use codejoin_server::engine::gateway::events::EventBus;
use codejoin_server::engine::gateway::registry::ProviderRegistry;
use codejoin_server::engine::gateway::{AiGateway, AiGatewayConfig};
use codejoin_server::engine::providers::{AnthropicProvider, GeminiProvider, OpenAiProvider};
use codejoin_server::engine::sandbox::docker::DockerManager;
use codejoin_server::engine::sandbox::languages::LanguageCatalog;
use codejoin_server::engine::sandbox::runner::SandboxRunner;
use codejoin_server::engine::sandbox::terminal::TerminalManager;
use codejoin_server::engine::store::MetadataStore;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> EngineResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Arc::new(AppConfig::from_env());
    info!("[main] starting codejoin-server v{} on port {}", env!("CARGO_PKG_VERSION"), config.port);

    // ── Sandbox side ───────────────────────────────────────────────────────
    let catalog = Arc::new(LanguageCatalog::new());
    let docker = Arc::new(DockerManager::new());
    let runner = Arc::new(SandboxRunner::new(docker.clone(), catalog.clone()));
    let terminals = TerminalManager::new(docker.clone(), catalog.clone());
    if docker.probe().await {
        info!("[main] Docker daemon reachable, {} languages available", catalog.len());
    } else {
        warn!("[main] Docker daemon unreachable — execution requests will fail until it is up");
    }

    // ── AI side ────────────────────────────────────────────────────────────
    let store = match MetadataStore::open(&config.db_path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("[main] metadata store unavailable ({e}), chat persistence disabled");
            None
        }
    };
    let events = EventBus::default();
    let registry = Arc::new(ProviderRegistry::new(SelectionStrategy::Priority));
    register_providers(&config, &registry);
    if registry.is_empty() {
        warn!("[main] no provider API keys configured — every chat will be served by the fallback");
    }
    let gateway = AiGateway::new(AiGatewayConfig::default(), registry, store, events.clone());
    gateway.start_background();
    let reaper = terminals.start_reaper();

    // Event feed → log. Keeps the bus drained even with no other subscriber.
    let mut bus_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            log::debug!("[events] {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    // ── HTTP + WebSocket ───────────────────────────────────────────────────
    let state = AppState::new(
        config.clone(),
        gateway.clone(),
        runner,
        catalog,
        terminals.clone(),
        docker,
    );
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[main] listening on http://{addr}");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("[main] shutting down");
    gateway.shutdown().await;
    reaper.abort();
    terminals.shutdown().await;
    Ok(())
}

fn register_providers(config: &AppConfig, registry: &ProviderRegistry) {
    if let Some(key) = &config.gemini_api_key {
        registry.register(
            Arc::new(GeminiProvider::new(key.clone())),
            descriptor("gemini", 1, 4, 0.000_000_15, 0.85, 800),
        );
    }
    if let Some(key) = &config.openai_api_key {
        registry.register(
            Arc::new(OpenAiProvider::openai(key.clone())),
            descriptor("openai", 2, 3, 0.000_000_6, 0.9, 1200),
        );
    }
    if let Some(key) = &config.anthropic_api_key {
        registry.register(
            Arc::new(AnthropicProvider::new(key.clone())),
            descriptor("anthropic", 3, 2, 0.000_001_0, 0.9, 1500),
        );
    }
    if let Some(key) = &config.glm_api_key {
        registry.register(
            Arc::new(OpenAiProvider::glm(key.clone())),
            descriptor("glm", 4, 1, 0.000_000_1, 0.7, 2000),
        );
    }
}

fn descriptor(
    name: &str,
    priority: u32,
    weight: u32,
    cost_per_token: f64,
    quality: f64,
    expected_latency_ms: u64,
) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.into(),
        priority,
        weight,
        cost_per_token,
        quality,
        expected_latency_ms,
        max_error_rate_pct: 50.0,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[main] failed to install ctrl-c handler: {e}");
        std::future::pending::<()>().await;
    }
}
