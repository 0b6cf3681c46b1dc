//! Health tracker: cached capabilities, TTL refresh and failure bookkeeping.

use crate::discovery::{Discover, DiscoveryError, DiscoveryResult};
use crate::endpoint::{Endpoint, HealthState, ServiceType};
use crate::error::ErrorKind;
use crate::registry::{EndpointEntry, Registry};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default bound on a single capability probe.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Owns the discoverer and applies the registry's [`crate::HealthPolicy`].
pub struct HealthTracker {
    registry: Arc<Registry>,
    discoverer: Arc<dyn Discover>,
    discovery_timeout: Duration,
}

impl HealthTracker {
    pub fn new(registry: Arc<Registry>, discoverer: Arc<dyn Discover>) -> Self {
        Self {
            registry,
            discoverer,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Snapshot of `entry`, probing it first if its capabilities are older than the TTL.
    ///
    /// Concurrent callers on the same stale entry share one probe: the first takes the
    /// entry's refresh gate, the rest wait on it and then reuse whatever probe completed
    /// while they waited, even when the TTL is zero. An endpoint
    /// still inside its backoff window is not probed. The probe outcome is written only
    /// after it completes, so dropping this future leaves the entry untouched.
    pub async fn get_or_refresh(&self, entry: &EndpointEntry) -> Endpoint {
        if let Some(snapshot) = self.cached(entry) {
            debug!(endpoint = %entry.url(), service = %entry.service(), "capabilities cached");
            return snapshot;
        }

        let seen = entry.read().probe_count;
        let _gate = entry.refresh_gate.lock().await;
        if let Some(snapshot) = self.probed_since(entry, seen).or_else(|| self.cached(entry)) {
            debug!(endpoint = %entry.url(), "refresh coalesced");
            return snapshot;
        }

        let timeout = self.discovery_timeout;
        let probe = self.discoverer.discover(entry.url(), entry.service(), timeout);
        let result = match tokio::time::timeout(timeout, probe).await {
            Ok(result) => result,
            Err(_) => DiscoveryResult::unavailable(
                entry.url(),
                DiscoveryError::Timeout(timeout.as_millis() as u64),
            ),
        };
        self.apply_probe(entry, result)
    }

    /// Refresh every endpoint of `service` concurrently; snapshots in configured order.
    pub async fn refresh_all(&self, service: ServiceType) -> Vec<Endpoint> {
        let entries = self.registry.endpoints(service);
        join_all(entries.iter().map(|entry| self.get_or_refresh(entry))).await
    }

    /// Record a successful request against `entry`.
    pub fn mark_success(&self, entry: &EndpointEntry, item: &str, latency_ms: Option<u64>) {
        let now = Instant::now();
        let backoff = self.registry.policy().backoff();
        let mut state = entry.write();
        let previous = state.effective_health(now, backoff);
        state.record_success(now, latency_ms);
        state.last_used_item = Some(item.to_string());
        drop(state);

        if previous != HealthState::Healthy {
            info!(endpoint = %entry.url(), service = %entry.service(), %item, "endpoint recovered");
        }
    }

    /// Record a failed request against `entry` and return its new health.
    pub fn mark_failure(&self, entry: &EndpointEntry, kind: ErrorKind, error: &str) -> HealthState {
        let now = Instant::now();
        let mut state = entry.write();
        let strategy = self.registry.policy().strategy_for(state.is_local);
        let health = strategy.apply_failure(&mut state, kind, error.to_string(), now);
        let failures = state.consecutive_failures;
        drop(state);

        warn!(
            endpoint = %entry.url(),
            service = %entry.service(),
            error_kind = %kind,
            strategy = strategy.label(),
            %health,
            failures,
            "{}",
            error
        );
        health
    }

    /// Point-in-time copies of every endpoint.
    pub fn inspect(&self) -> Vec<Endpoint> {
        self.registry.inspect()
    }

    fn cached(&self, entry: &EndpointEntry) -> Option<Endpoint> {
        let policy = self.registry.policy();
        let now = Instant::now();
        let state = entry.read();
        let backoff = policy.backoff();
        let waiting_out_backoff = state.effective_health(now, backoff) == HealthState::Unhealthy;
        if state.is_fresh(now, policy.ttl()) || waiting_out_backoff {
            Some(state.snapshot(entry.url(), entry.service(), now, backoff))
        } else {
            None
        }
    }

    fn probed_since(&self, entry: &EndpointEntry, seen: u64) -> Option<Endpoint> {
        let state = entry.read();
        if state.probe_count == seen {
            return None;
        }
        let now = Instant::now();
        Some(state.snapshot(entry.url(), entry.service(), now, self.registry.policy().backoff()))
    }

    fn apply_probe(&self, entry: &EndpointEntry, result: DiscoveryResult) -> Endpoint {
        let policy = self.registry.policy();
        let backoff = policy.backoff();
        let now = Instant::now();
        let mut state = entry.write();
        let previous = state.effective_health(now, backoff);

        if result.available {
            state.apply_discovery(&result, now);
            if previous == HealthState::Healthy {
                debug!(
                    endpoint = %entry.url(),
                    provider = %state.provider_type,
                    models = state.supported_models.len(),
                    voices = state.supported_voices.len(),
                    "capabilities refreshed"
                );
            } else {
                info!(endpoint = %entry.url(), provider = %state.provider_type, "endpoint recovered");
            }
        } else {
            let error = result
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "endpoint unavailable".to_string());
            state.mark_probed(now);
            let strategy = policy.strategy_for(state.is_local);
            let health =
                strategy.apply_failure(&mut state, ErrorKind::DiscoveryUnavailable, error.clone(), now);
            warn!(
                endpoint = %entry.url(),
                service = %entry.service(),
                strategy = strategy.label(),
                %health,
                "discovery failed: {}",
                error
            );
        }
        state.snapshot(entry.url(), entry.service(), now, backoff)
    }
}
