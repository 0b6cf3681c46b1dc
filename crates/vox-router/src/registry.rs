//! Endpoint registry: the only shared mutable state in the router.
//!
//! Each [`EndpointEntry`] carries its own state lock and its own refresh gate, so a slow
//! probe on one endpoint never blocks reads or writes of another. The registry itself is
//! just two `DashMap` indexes over those entries (configured order per service, and
//! lookup by URL).

use crate::classify::{classify, is_local_url};
use crate::config::RouterConfig;
use crate::discovery::DiscoveryResult;
use crate::endpoint::{normalize_url, Endpoint, HealthState, ProviderType, ServiceType};
use crate::policy::HealthPolicy;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Mutable per-endpoint state. Only touched under the entry's lock, never across `.await`.
#[derive(Debug, Clone)]
pub(crate) struct EndpointState {
    pub(crate) provider_type: ProviderType,
    pub(crate) supported_models: Vec<String>,
    pub(crate) supported_voices: Vec<String>,
    pub(crate) is_local: bool,
    pub(crate) health: HealthState,
    /// Last health observation (probe, success or failure). Backoff is measured from here.
    pub(crate) last_checked: Option<Instant>,
    pub(crate) last_checked_at: Option<DateTime<Utc>>,
    /// Last completed probe. TTL is measured from here.
    pub(crate) probed: Option<Instant>,
    /// Completed probes so far. Lets gate waiters see that a probe finished meanwhile.
    pub(crate) probe_count: u64,
    pub(crate) discovered_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
    pub(crate) response_time_ms: Option<u64>,
    pub(crate) consecutive_failures: u32,
    pub(crate) last_used_item: Option<String>,
}

impl EndpointState {
    pub(crate) fn new(url: &str) -> Self {
        let provider_type = classify(url, &[], &[]);
        Self {
            provider_type,
            supported_models: Vec::new(),
            supported_voices: Vec::new(),
            is_local: is_local_url(url) || provider_type.is_local(),
            health: HealthState::Healthy,
            last_checked: None,
            last_checked_at: None,
            probed: None,
            probe_count: 0,
            discovered_at: None,
            last_error: None,
            response_time_ms: None,
            consecutive_failures: 0,
            last_used_item: None,
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_checked = Some(now);
        self.last_checked_at = Some(Utc::now());
    }

    /// Health as selection sees it: an expired backoff reads as `RetryEligible`.
    pub(crate) fn effective_health(&self, now: Instant, backoff: Duration) -> HealthState {
        match (self.health, self.last_checked) {
            (HealthState::Unhealthy, Some(at)) if now.saturating_duration_since(at) <= backoff => {
                HealthState::Unhealthy
            }
            (HealthState::Unhealthy, _) => HealthState::RetryEligible,
            (health, _) => health,
        }
    }

    /// Whether discovered capabilities are still inside their TTL.
    pub(crate) fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.probed
            .map(|at| now.saturating_duration_since(at) < ttl)
            .unwrap_or(false)
    }

    pub(crate) fn record_success(&mut self, now: Instant, latency_ms: Option<u64>) {
        self.health = HealthState::Healthy;
        self.consecutive_failures = 0;
        self.last_error = None;
        if latency_ms.is_some() {
            self.response_time_ms = latency_ms;
        }
        self.touch(now);
    }

    pub(crate) fn mark_probed(&mut self, now: Instant) {
        self.probed = Some(now);
        self.probe_count = self.probe_count.wrapping_add(1);
        self.discovered_at = Some(Utc::now());
    }

    /// Replace capabilities with what a successful probe found.
    pub(crate) fn apply_discovery(&mut self, result: &DiscoveryResult, now: Instant) {
        self.provider_type = result.provider_type;
        self.supported_models = result.models.clone();
        self.supported_voices = result.voices.clone();
        self.is_local = self.is_local || result.provider_type.is_local();
        self.mark_probed(now);
        self.record_success(now, result.response_time_ms);
    }

    pub(crate) fn snapshot(
        &self,
        url: &str,
        service: ServiceType,
        now: Instant,
        backoff: Duration,
    ) -> Endpoint {
        Endpoint {
            url: url.to_string(),
            service_type: service,
            provider_type: self.provider_type,
            supported_models: self.supported_models.clone(),
            supported_voices: self.supported_voices.clone(),
            is_local: self.is_local,
            health: self.effective_health(now, backoff),
            last_checked_at: self.last_checked_at,
            discovered_at: self.discovered_at,
            last_error: self.last_error.clone(),
            response_time_ms: self.response_time_ms,
            consecutive_failures: self.consecutive_failures,
            last_used_item: self.last_used_item.clone(),
        }
    }
}

/// One configured endpoint. Lives for the whole process once registered.
#[derive(Debug)]
pub struct EndpointEntry {
    url: String,
    service: ServiceType,
    state: RwLock<EndpointState>,
    /// Held for the duration of a probe so concurrent refreshes coalesce.
    pub(crate) refresh_gate: tokio::sync::Mutex<()>,
}

impl EndpointEntry {
    fn new(service: ServiceType, url: String) -> Self {
        let state = EndpointState::new(&url);
        Self {
            url,
            service,
            state: RwLock::new(state),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, EndpointState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, EndpointState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot_at(&self, now: Instant, backoff: Duration) -> Endpoint {
        self.read().snapshot(&self.url, self.service, now, backoff)
    }
}

/// Registry of endpoints per service, in configured order.
#[derive(Debug)]
pub struct Registry {
    policy: HealthPolicy,
    order: DashMap<ServiceType, Vec<Arc<EndpointEntry>>>,
    index: DashMap<(ServiceType, String), Arc<EndpointEntry>>,
}

impl Registry {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            order: DashMap::new(),
            index: DashMap::new(),
        }
    }

    /// One entry per configured URL, in configured order. Duplicates collapse.
    pub fn from_config(config: &RouterConfig) -> Self {
        let registry = Self::new(config.health.clone());
        for service in ServiceType::ALL {
            for url in config.base_urls(service) {
                if url.trim().is_empty() {
                    continue;
                }
                registry.register(service, url);
            }
        }
        registry
    }

    /// Register `url` for `service`, or return the existing entry.
    pub fn register(&self, service: ServiceType, url: &str) -> Arc<EndpointEntry> {
        let url = normalize_url(url);
        match self.index.entry((service, url.clone())) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                let entry = Arc::new(EndpointEntry::new(service, url));
                self.order
                    .entry(service)
                    .or_default()
                    .push(Arc::clone(&entry));
                debug!(endpoint = %entry.url(), %service, "endpoint registered");
                slot.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Entries for `service` in configured order.
    pub fn endpoints(&self, service: ServiceType) -> Vec<Arc<EndpointEntry>> {
        self.order
            .get(&service)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, service: ServiceType, url: &str) -> Option<Arc<EndpointEntry>> {
        self.index
            .get(&(service, normalize_url(url)))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Point-in-time copies of every endpoint, TTS first then STT.
    pub fn inspect(&self) -> Vec<Endpoint> {
        ServiceType::ALL
            .iter()
            .flat_map(|service| self.inspect_service(*service))
            .collect()
    }

    pub fn inspect_service(&self, service: ServiceType) -> Vec<Endpoint> {
        let now = Instant::now();
        let backoff = self.policy.backoff();
        self.endpoints(service)
            .iter()
            .map(|entry| entry.snapshot_at(now, backoff))
            .collect()
    }
}
