// ── Gateway: Provider Registry ─────────────────────────────────────────────
// Holds the registered providers and ranks them into a try-order for each
// request. Health gating: unhealthy providers are excluded entirely,
// degraded ones are appended after the healthy candidates. Circuit state is
// the gateway's concern, not the registry's.

use super::health::HealthMonitor;
use super::retry::rand_unit;
use crate::engine::providers::AiProvider;
use crate::atoms::types::{HealthStatus, ProviderDescriptor, SelectionStrategy};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct RegisteredProvider {
    pub provider: Arc<dyn AiProvider>,
    pub descriptor: ProviderDescriptor,
}

pub struct ProviderRegistry {
    providers: Mutex<Vec<RegisteredProvider>>,
    strategy: Mutex<SelectionStrategy>,
    rr_cursor: AtomicUsize,
}

impl ProviderRegistry {
    pub fn new(strategy: SelectionStrategy) -> Self {
        ProviderRegistry {
            providers: Mutex::new(Vec::new()),
            strategy: Mutex::new(strategy),
            rr_cursor: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, provider: Arc<dyn AiProvider>, descriptor: ProviderDescriptor) {
        log::info!(
            "[registry] registered provider '{}' (priority {}, weight {})",
            descriptor.name,
            descriptor.priority,
            descriptor.weight
        );
        self.providers.lock().push(RegisteredProvider { provider, descriptor });
    }

    pub fn is_empty(&self) -> bool {
        self.providers.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.lock().len()
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.lock().iter().map(|p| p.descriptor.clone()).collect()
    }

    pub fn all(&self) -> Vec<RegisteredProvider> {
        self.providers.lock().clone()
    }

    pub fn strategy(&self) -> SelectionStrategy {
        *self.strategy.lock()
    }

    pub fn set_strategy(&self, strategy: SelectionStrategy) {
        *self.strategy.lock() = strategy;
    }

    /// Ordered candidate list for one request. Deterministic for the
    /// `priority` strategy given an identical health snapshot.
    pub fn select(&self, health: &HealthMonitor) -> Vec<RegisteredProvider> {
        let strategy = self.strategy();
        let mut primary = Vec::new();
        let mut degraded = Vec::new();
        for rp in self.providers.lock().iter() {
            match health.status_of(&rp.descriptor.name) {
                HealthStatus::Unhealthy => {}
                HealthStatus::Degraded => degraded.push(rp.clone()),
                // Unknown providers have never been tried — rank them with
                // the healthy ones so they get traffic.
                HealthStatus::Healthy | HealthStatus::Unknown => primary.push(rp.clone()),
            }
        }
        self.order(&mut primary, strategy);
        self.order(&mut degraded, strategy);
        primary.extend(degraded);
        primary
    }

    fn order(&self, candidates: &mut Vec<RegisteredProvider>, strategy: SelectionStrategy) {
        match strategy {
            SelectionStrategy::Priority => {
                candidates.sort_by_key(|p| p.descriptor.priority);
            }
            SelectionStrategy::Cost => {
                candidates.sort_by(|a, b| {
                    a.descriptor
                        .cost_per_token
                        .partial_cmp(&b.descriptor.cost_per_token)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SelectionStrategy::Quality => {
                candidates.sort_by(|a, b| {
                    b.descriptor
                        .quality
                        .partial_cmp(&a.descriptor.quality)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SelectionStrategy::RoundRobin => {
                candidates.sort_by_key(|p| p.descriptor.priority);
                if !candidates.is_empty() {
                    let shift = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                    candidates.rotate_left(shift);
                }
            }
            SelectionStrategy::Weighted => weighted_shuffle(candidates),
        }
    }
}

/// Weighted sampling without replacement: heavier providers tend to come
/// first, but every healthy candidate stays in the list.
fn weighted_shuffle(candidates: &mut Vec<RegisteredProvider>) {
    let mut pool = std::mem::take(candidates);
    while !pool.is_empty() {
        let total: u64 = pool.iter().map(|p| u64::from(p.descriptor.weight.max(1))).sum();
        let mut ticket = (rand_unit() * total as f64) as u64;
        let mut chosen = 0;
        for (i, p) in pool.iter().enumerate() {
            let w = u64::from(p.descriptor.weight.max(1));
            if ticket < w {
                chosen = i;
                break;
            }
            ticket -= w;
        }
        candidates.push(pool.remove(chosen));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gateway::events::EventBus;
    use crate::engine::gateway::health::HealthMonitorConfig;
    use crate::engine::providers::ProviderReply;
    use crate::atoms::error::EngineResult;
    use crate::atoms::types::ChatContext;
    use async_trait::async_trait;

    struct FakeProvider(&'static str);

    #[async_trait]
    impl AiProvider for FakeProvider {
        fn name(&self) -> &str {
            self.0
        }
        fn model(&self) -> &str {
            "fake-1"
        }
        async fn chat(&self, _m: &str, _c: Option<&ChatContext>) -> EngineResult<ProviderReply> {
            Ok(ProviderReply { content: "ok".into(), model: "fake-1".into(), tokens_used: 1 })
        }
        async fn health_check(&self) -> EngineResult<()> {
            Ok(())
        }
    }

    fn descriptor(name: &str, priority: u32, cost: f64, quality: f64) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.into(),
            priority,
            weight: 1,
            cost_per_token: cost,
            quality,
            expected_latency_ms: 500,
            max_error_rate_pct: 50.0,
        }
    }

    fn registry_with(names: &[(&'static str, u32, f64, f64)]) -> ProviderRegistry {
        let registry = ProviderRegistry::new(SelectionStrategy::Priority);
        for (name, prio, cost, quality) in names {
            registry.register(
                Arc::new(FakeProvider(name)),
                descriptor(name, *prio, *cost, *quality),
            );
        }
        registry
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(HealthMonitorConfig::default(), EventBus::default())
    }

    fn names(selected: &[RegisteredProvider]) -> Vec<&str> {
        selected.iter().map(|p| p.descriptor.name.as_str()).collect()
    }

    #[test]
    fn priority_orders_low_first() {
        let r = registry_with(&[("b", 2, 0.0, 0.5), ("a", 1, 0.0, 0.5), ("c", 3, 0.0, 0.5)]);
        let selected = r.select(&monitor());
        assert_eq!(names(&selected), vec!["a", "b", "c"]);
    }

    #[test]
    fn unhealthy_excluded_degraded_last() {
        let r = registry_with(&[("a", 1, 0.0, 0.5), ("b", 2, 0.0, 0.5), ("c", 3, 0.0, 0.5)]);
        let m = monitor();
        m.record_failure("a", "x", "provider_error", None); // degraded
        for _ in 0..5 {
            m.record_failure("c", "x", "provider_error", None); // unhealthy
        }
        m.record_success("b", None);
        let selected = r.select(&m);
        assert_eq!(names(&selected), vec!["b", "a"]);
    }

    #[test]
    fn cost_and_quality_orderings() {
        let r = registry_with(&[("pricey", 1, 0.9, 0.9), ("cheap", 2, 0.1, 0.3)]);
        r.set_strategy(SelectionStrategy::Cost);
        let selected = r.select(&monitor());
        assert_eq!(names(&selected), vec!["cheap", "pricey"]);
        r.set_strategy(SelectionStrategy::Quality);
        let selected = r.select(&monitor());
        assert_eq!(names(&selected), vec!["pricey", "cheap"]);
    }

    #[test]
    fn round_robin_rotates() {
        let r = registry_with(&[("a", 1, 0.0, 0.5), ("b", 2, 0.0, 0.5)]);
        r.set_strategy(SelectionStrategy::RoundRobin);
        let m = monitor();
        let sel1 = r.select(&m);
        let first = names(&sel1);
        let sel2 = r.select(&m);
        let second = names(&sel2);
        assert_ne!(first, second);
        let sel3 = r.select(&m);
        assert_eq!(names(&sel3), first);
    }

    #[test]
    fn weighted_keeps_every_candidate() {
        let r = registry_with(&[("a", 1, 0.0, 0.5), ("b", 2, 0.0, 0.5), ("c", 3, 0.0, 0.5)]);
        r.set_strategy(SelectionStrategy::Weighted);
        let sel = r.select(&monitor());
        let mut selected = names(&sel);
        selected.sort();
        assert_eq!(selected, vec!["a", "b", "c"]);
    }
}
