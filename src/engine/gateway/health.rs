// ── Gateway: Health Monitor ────────────────────────────────────────────────
// Per-provider health records, rolling metric streams, and raise/resolve
// alerts. Outcomes arrive from the gateway (`record_success`/`record_failure`)
// and from the periodic probe loop; alert transitions go out on the event bus.
//
// Status model (first failure degrades, a run of failures kills):
//   Healthy ──(failure)──> Degraded ──(threshold)──> Unhealthy
//      ↑                                                 │
//      └──────────────────(success)─────────────────────-┘

use super::events::{EventBus, GatewayEvent};
use crate::atoms::constants::HEALTH_METRIC_RETENTION_SECS;
use crate::atoms::types::HealthStatus;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

// ── Config ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Consecutive failures before a provider is unhealthy and the
    /// `consecutive_failures` alert fires.
    pub consecutive_failure_threshold: u32,
    /// Error-rate alert threshold, percent of total checks.
    pub error_rate_threshold_pct: f64,
    /// Average-latency alert threshold, milliseconds.
    pub response_time_threshold_ms: f64,
    /// How long metric samples are kept.
    pub metric_retention: ChronoDuration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 5,
            error_rate_threshold_pct: 50.0,
            response_time_threshold_ms: 10_000.0,
            metric_retention: ChronoDuration::seconds(HEALTH_METRIC_RETENTION_SECS),
        }
    }
}

// ── Records ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub code: String,
    pub at: DateTime<Utc>,
}

/// One named value stream with running aggregates, pruned by retention.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MetricSeries {
    #[serde(skip)]
    samples: VecDeque<(DateTime<Utc>, f64)>,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl MetricSeries {
    fn record(&mut self, at: DateTime<Utc>, value: f64, retention: ChronoDuration) {
        self.samples.push_back((at, value));
        let cutoff = at - retention;
        while self.samples.front().is_some_and(|(t, _)| *t < cutoff) {
            self.samples.pop_front();
        }
        // Aggregates are recomputed over the retained window.
        self.count = self.samples.len() as u64;
        self.sum = self.samples.iter().map(|(_, v)| v).sum();
        self.min = self.samples.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
        self.max = self.samples.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub last_error: Option<LastError>,
    pub last_success: Option<DateTime<Utc>>,
    pub metrics: HashMap<String, MetricSeries>,
}

impl Default for ProviderRecord {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            last_error: None,
            last_success: None,
            metrics: HashMap::new(),
        }
    }
}

impl ProviderRecord {
    pub fn error_rate_pct(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.failed_checks as f64 * 100.0 / self.total_checks as f64
    }

    fn average_latency_ms(&self) -> Option<f64> {
        self.metrics.get("latency_ms").and_then(MetricSeries::average)
    }
}

// ── Alerts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsecutiveFailures,
    HighErrorRate,
    HighResponseTime,
}

impl AlertKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::HighErrorRate => "high_error_rate",
            Self::HighResponseTime => "high_response_time",
        }
    }

    fn severity(self) -> &'static str {
        match self {
            Self::ConsecutiveFailures => "high",
            _ => "medium",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Stable id: `{provider}:{kind}`.
    pub id: String,
    pub provider: String,
    pub kind: AlertKind,
    pub severity: &'static str,
    pub first_triggered: DateTime<Utc>,
    pub last_triggered: DateTime<Utc>,
    pub trigger_count: u64,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ── Monitor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub overall: HealthStatus,
    pub providers: HashMap<String, ProviderRecord>,
    pub alerts: Vec<Alert>,
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    records: Mutex<HashMap<String, ProviderRecord>>,
    alerts: Mutex<HashMap<String, Alert>>,
    events: EventBus,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, events: EventBus) -> Self {
        HealthMonitor {
            config,
            records: Mutex::new(HashMap::new()),
            alerts: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn record_success(&self, provider: &str, latency_ms: Option<u64>) {
        let now = Utc::now();
        let mut records = self.records.lock();
        let record = records.entry(provider.to_string()).or_default();
        record.status = HealthStatus::Healthy;
        record.consecutive_failures = 0;
        record.total_checks += 1;
        record.successful_checks += 1;
        record.last_success = Some(now);
        if let Some(ms) = latency_ms {
            record
                .metrics
                .entry("latency_ms".into())
                .or_default()
                .record(now, ms as f64, self.config.metric_retention);
        }
        let record = record.clone();
        drop(records);
        self.evaluate_alerts(provider, &record);
        self.events.emit(GatewayEvent::ProviderSucceeded {
            provider: provider.to_string(),
            latency_ms: latency_ms.unwrap_or(0),
        });
    }

    pub fn record_failure(&self, provider: &str, message: &str, code: &str, latency_ms: Option<u64>) {
        let now = Utc::now();
        let mut records = self.records.lock();
        let record = records.entry(provider.to_string()).or_default();
        record.consecutive_failures += 1;
        record.total_checks += 1;
        record.failed_checks += 1;
        record.last_error =
            Some(LastError { message: message.to_string(), code: code.to_string(), at: now });
        record.status = if record.consecutive_failures >= self.config.consecutive_failure_threshold {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        if let Some(ms) = latency_ms {
            record
                .metrics
                .entry("latency_ms".into())
                .or_default()
                .record(now, ms as f64, self.config.metric_retention);
        }
        let record = record.clone();
        drop(records);
        self.evaluate_alerts(provider, &record);
        self.events.emit(GatewayEvent::ProviderFailed {
            provider: provider.to_string(),
            message: message.to_string(),
        });
    }

    pub fn status_of(&self, provider: &str) -> HealthStatus {
        self.records.lock().get(provider).map(|r| r.status).unwrap_or(HealthStatus::Unknown)
    }

    /// Healthy iff every provider is healthy; unhealthy iff every provider is
    /// unhealthy; degraded otherwise. No providers at all is unknown.
    pub fn overall(&self) -> HealthStatus {
        let records = self.records.lock();
        if records.is_empty() {
            return HealthStatus::Unknown;
        }
        if records.values().all(|r| r.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if records.values().all(|r| r.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            overall: self.overall(),
            providers: self.records.lock().clone(),
            alerts: self.alerts.lock().values().cloned().collect(),
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().values().filter(|a| a.resolved_at.is_none()).cloned().collect()
    }

    /// Admin: drop all metric streams and counters, keep provider names.
    pub fn reset_metrics(&self) {
        let mut records = self.records.lock();
        for record in records.values_mut() {
            *record = ProviderRecord { status: record.status, ..Default::default() };
        }
        self.alerts.lock().clear();
    }

    // ── Alert evaluation ───────────────────────────────────────────────────

    fn evaluate_alerts(&self, provider: &str, record: &ProviderRecord) {
        let c = &self.config;
        self.transition(
            provider,
            AlertKind::ConsecutiveFailures,
            record.consecutive_failures >= c.consecutive_failure_threshold,
            record.consecutive_failures == 0,
        );
        self.transition(
            provider,
            AlertKind::HighErrorRate,
            record.error_rate_pct() >= c.error_rate_threshold_pct,
            record.error_rate_pct() < c.error_rate_threshold_pct / 2.0,
        );
        let avg = record.average_latency_ms().unwrap_or(0.0);
        self.transition(
            provider,
            AlertKind::HighResponseTime,
            avg >= c.response_time_threshold_ms,
            avg < c.response_time_threshold_ms / 2.0,
        );
    }

    fn transition(&self, provider: &str, kind: AlertKind, raise: bool, resolve: bool) {
        let id = format!("{}:{}", provider, kind.as_str());
        let now = Utc::now();
        let mut alerts = self.alerts.lock();

        if let Some(alert) = alerts.get_mut(&id) {
            if raise {
                alert.last_triggered = now;
                alert.trigger_count += 1;
                if alert.resolved_at.take().is_some() {
                    // Re-raised after a resolution.
                    let snapshot = alert.clone();
                    self.emit_raised(&snapshot);
                }
            } else if resolve && alert.resolved_at.is_none() {
                alert.resolved_at = Some(now);
                log::info!("[health] alert resolved: {}", alert.id);
                self.events.emit(GatewayEvent::AlertResolved {
                    id: alert.id.clone(),
                    provider: provider.to_string(),
                    alert: kind.as_str().to_string(),
                });
            }
            return;
        }

        if raise {
            let alert = Alert {
                id: id.clone(),
                provider: provider.to_string(),
                kind,
                severity: kind.severity(),
                first_triggered: now,
                last_triggered: now,
                trigger_count: 1,
                resolved_at: None,
            };
            self.emit_raised(&alert);
            alerts.insert(id, alert);
        }
    }

    fn emit_raised(&self, alert: &Alert) {
        log::warn!("[health] alert raised: {} (severity {})", alert.id, alert.severity);
        self.events.emit(GatewayEvent::AlertRaised {
            id: alert.id.clone(),
            provider: alert.provider.clone(),
            alert: alert.kind.as_str().to_string(),
            severity: alert.severity.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(HealthMonitorConfig::default(), EventBus::default())
    }

    #[test]
    fn success_marks_healthy_and_resets_streak() {
        let m = monitor();
        m.record_failure("gemini", "503", "provider_error", None);
        assert_eq!(m.status_of("gemini"), HealthStatus::Degraded);
        m.record_success("gemini", Some(100));
        assert_eq!(m.status_of("gemini"), HealthStatus::Healthy);
        let snap = m.snapshot();
        assert_eq!(snap.providers["gemini"].consecutive_failures, 0);
    }

    #[test]
    fn streak_of_failures_goes_unhealthy_and_raises_alert() {
        let m = monitor();
        for _ in 0..5 {
            m.record_failure("openai", "overloaded", "provider_error", None);
        }
        assert_eq!(m.status_of("openai"), HealthStatus::Unhealthy);
        let alerts = m.active_alerts();
        assert!(alerts.iter().any(|a| a.kind == AlertKind::ConsecutiveFailures));
        // Stable id, not a fresh one per trigger.
        assert!(alerts.iter().any(|a| a.id == "openai:consecutive_failures"));
    }

    #[test]
    fn consecutive_failures_alert_resolves_on_success() {
        let m = monitor();
        for _ in 0..5 {
            m.record_failure("glm", "timeout", "timeout", None);
        }
        assert!(!m.active_alerts().is_empty());
        m.record_success("glm", None);
        assert!(m
            .active_alerts()
            .iter()
            .all(|a| a.kind != AlertKind::ConsecutiveFailures));
    }

    #[test]
    fn error_rate_alert_resolves_below_half_threshold() {
        let m = monitor();
        // 1 failure / 1 check = 100% — raised.
        m.record_failure("p", "503", "provider_error", None);
        assert!(m.active_alerts().iter().any(|a| a.kind == AlertKind::HighErrorRate));
        // Two successes: 1/3 ≈ 33% — below threshold but not below half of it.
        m.record_success("p", None);
        m.record_success("p", None);
        assert!(m.active_alerts().iter().any(|a| a.kind == AlertKind::HighErrorRate));
        // Two more: 1/5 = 20% < 25% — resolved.
        m.record_success("p", None);
        m.record_success("p", None);
        assert!(m.active_alerts().iter().all(|a| a.kind != AlertKind::HighErrorRate));
        let resolved = m
            .snapshot()
            .alerts
            .into_iter()
            .find(|a| a.kind == AlertKind::HighErrorRate)
            .unwrap();
        assert!(resolved.resolved_at.is_some());
    }

    #[test]
    fn overall_rollup() {
        let m = monitor();
        assert_eq!(m.overall(), HealthStatus::Unknown);
        m.record_success("a", None);
        m.record_success("b", None);
        assert_eq!(m.overall(), HealthStatus::Healthy);
        for _ in 0..5 {
            m.record_failure("b", "down", "provider_error", None);
        }
        assert_eq!(m.overall(), HealthStatus::Degraded);
        for _ in 0..5 {
            m.record_failure("a", "down", "provider_error", None);
        }
        assert_eq!(m.overall(), HealthStatus::Unhealthy);
    }

    #[test]
    fn latency_metrics_aggregate() {
        let m = monitor();
        m.record_success("p", Some(100));
        m.record_success("p", Some(300));
        let snap = m.snapshot();
        let series = &snap.providers["p"].metrics["latency_ms"];
        assert_eq!(series.count, 2);
        assert_eq!(series.min, 100.0);
        assert_eq!(series.max, 300.0);
        assert_eq!(series.average(), Some(200.0));
    }
}
