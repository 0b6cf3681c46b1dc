//! Selector / failover engine.
//!
//! ```text
//!  preferred items ──► plan() ──► [Candidate, Candidate, …]   (computed once)
//!                                      │
//!                     ┌────────────────┘
//!                     ▼
//!               SpeechClient::perform ── Ok ──► mark_success ──► Completion
//!                     │
//!                    Err ──► mark_failure, log attempt ──► next candidate
//!                                                          │
//!                                  none left / deadline ───┴──► AllCandidatesExhausted
//! ```
//!
//! Each attempt is bounded by the per-attempt timeout and by what is left of the overall
//! deadline. Only the first counts against the endpoint: an attempt cut short because the
//! overall budget ran out is logged in the attempt log but leaves the endpoint's health alone.
//!
//! Item-first ordering: the preference list is the outer loop and the configured endpoint
//! order the inner one, so a preferred voice on a later endpoint beats a less preferred
//! voice on an earlier endpoint.

use crate::classify::{BuiltinHeuristics, ItemHeuristics};
use crate::client::{
    HttpSpeechClient, SpeechClient, SpeechFailure, SpeechOutput, SpeechPayload, SpeechRequest,
};
use crate::config::RouterConfig;
use crate::discovery::HttpDiscoverer;
use crate::endpoint::{Endpoint, ProviderType, ServiceType};
use crate::error::{AttemptLog, AttemptRecord, RouterError, RouterResult};
use crate::health::HealthTracker;
use crate::registry::Registry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// The endpoint and voice/model a request was served by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    pub endpoint_url: String,
    pub provider_type: ProviderType,
    /// Voice for TTS, model for STT.
    pub resolved_item: String,
    /// TTS model sent with the voice; `None` for STT.
    pub resolved_model: Option<String>,
}

/// One planned attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub endpoint_url: String,
    pub provider_type: ProviderType,
    pub item: String,
    pub model: Option<String>,
    /// Chosen by provider default because no preferred item matched anywhere.
    pub fallback: bool,
}

impl Candidate {
    fn into_selection(self) -> SelectionResult {
        SelectionResult {
            endpoint_url: self.endpoint_url,
            provider_type: self.provider_type,
            resolved_item: self.item,
            resolved_model: self.model,
        }
    }
}

/// A served request: where it went, what came back, and what failed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub selection: SelectionResult,
    pub output: SpeechOutput,
    pub failed_attempts: AttemptLog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorOptions {
    /// Bound on a whole failover pass.
    pub deadline: Duration,
    /// Bound on one attempt against one endpoint.
    pub attempt_timeout: Duration,
    /// TTS model preference, most preferred first.
    pub tts_models: Vec<String>,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        let config = RouterConfig::default();
        Self {
            deadline: config.request_deadline(),
            attempt_timeout: config.request_timeout(),
            tts_models: config.tts.models,
        }
    }
}

pub struct Selector {
    tracker: Arc<HealthTracker>,
    client: Arc<dyn SpeechClient>,
    heuristics: Arc<dyn ItemHeuristics>,
    options: SelectorOptions,
}

impl Selector {
    pub fn new(tracker: Arc<HealthTracker>, client: Arc<dyn SpeechClient>) -> Self {
        Self {
            tracker,
            client,
            heuristics: Arc::new(BuiltinHeuristics),
            options: SelectorOptions::default(),
        }
    }

    pub fn with_heuristics(mut self, heuristics: Arc<dyn ItemHeuristics>) -> Self {
        self.heuristics = heuristics;
        self
    }

    pub fn with_options(mut self, options: SelectorOptions) -> Self {
        self.options = options;
        self
    }

    /// Wire the full HTTP stack from configuration. One connection pool is shared by
    /// discovery and speech requests.
    pub fn from_config(config: &RouterConfig) -> RouterResult<Self> {
        let registry = Arc::new(Registry::from_config(config));
        let speech = HttpSpeechClient::new(config.api_key.clone())?;
        let discoverer = HttpDiscoverer::with_client(speech.http().clone(), config.api_key.clone());
        let tracker = HealthTracker::new(registry, Arc::new(discoverer))
            .with_discovery_timeout(config.discovery_timeout());
        Ok(Self::new(Arc::new(tracker), Arc::new(speech)).with_options(SelectorOptions {
            deadline: config.request_deadline(),
            attempt_timeout: config.request_timeout(),
            tts_models: config.tts.models.clone(),
        }))
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    /// Point-in-time copies of every endpoint.
    pub fn inspect(&self) -> Vec<Endpoint> {
        self.tracker.inspect()
    }

    /// Refresh the service's endpoints and return the ordered candidate list.
    pub async fn plan(&self, service: ServiceType, preferred: &[String]) -> Vec<Candidate> {
        let endpoints = self.tracker.refresh_all(service).await;
        order_candidates(
            service,
            &endpoints,
            preferred,
            &self.options.tts_models,
            self.heuristics.as_ref(),
        )
    }

    /// Serve `payload` from the best endpoint, failing over in order.
    pub async fn select(
        &self,
        service: ServiceType,
        preferred: &[String],
        payload: &SpeechPayload,
    ) -> RouterResult<Completion> {
        self.select_within(service, preferred, payload, self.options.deadline)
            .await
    }

    /// As [`Selector::select`], with an explicit bound on the whole pass.
    #[instrument(skip_all, fields(service = %service))]
    pub async fn select_within(
        &self,
        service: ServiceType,
        preferred: &[String],
        payload: &SpeechPayload,
        deadline: Duration,
    ) -> RouterResult<Completion> {
        if payload.service() != service {
            return Err(RouterError::InvalidRequest(format!(
                "{} payload sent to {} selection",
                payload.service(),
                service
            )));
        }
        let registry = self.tracker.registry();
        if registry.endpoints(service).is_empty() {
            return Err(RouterError::NoEndpointsConfigured(service));
        }

        let deadline_at = Instant::now() + deadline;
        let candidates = self.plan(service, preferred).await;
        debug!(candidates = candidates.len(), "candidates built");

        let mut attempts = AttemptLog::default();
        let mut deadline_exceeded = false;
        for candidate in candidates {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                deadline_exceeded = true;
                break;
            }
            let Some(entry) = registry.get(service, &candidate.endpoint_url) else {
                continue;
            };

            let budget = remaining.min(self.options.attempt_timeout);
            let request = SpeechRequest {
                endpoint_url: entry.url(),
                service,
                item: &candidate.item,
                model: candidate.model.as_deref(),
                payload,
                deadline: budget,
            };
            let started = Instant::now();
            let outcome = match tokio::time::timeout(budget, self.client.perform(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SpeechFailure::Timeout),
            };

            match outcome {
                Ok(output) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.tracker
                        .mark_success(&entry, &candidate.item, Some(latency_ms));
                    info!(
                        endpoint = %candidate.endpoint_url,
                        item = %candidate.item,
                        latency_ms,
                        failed_attempts = attempts.len(),
                        "request served"
                    );
                    return Ok(Completion {
                        selection: candidate.into_selection(),
                        output,
                        failed_attempts: attempts,
                    });
                }
                Err(failure) => {
                    let error_kind = failure.kind();
                    let cut_by_deadline =
                        matches!(failure, SpeechFailure::Timeout) && Instant::now() >= deadline_at;
                    if cut_by_deadline {
                        debug!(endpoint = %candidate.endpoint_url, "overall deadline reached mid-attempt");
                        attempts.push(AttemptRecord {
                            endpoint_url: candidate.endpoint_url,
                            item: candidate.item,
                            error_kind,
                            message: format!("{}: overall deadline reached", failure),
                        });
                        deadline_exceeded = true;
                        break;
                    }
                    let message = failure.to_string();
                    self.tracker.mark_failure(&entry, error_kind, &message);
                    attempts.push(AttemptRecord {
                        endpoint_url: candidate.endpoint_url,
                        item: candidate.item,
                        error_kind,
                        message,
                    });
                }
            }
        }

        deadline_exceeded |= Instant::now() >= deadline_at;
        warn!(attempts = attempts.len(), deadline_exceeded, "all candidates exhausted");
        Err(RouterError::AllCandidatesExhausted {
            service,
            attempts,
            deadline_exceeded,
        })
    }
}

/// Build the candidate list from endpoint snapshots in configured order.
///
/// Each eligible endpoint appears at most once, paired with its most preferred supported
/// item. Eligible endpoints that support no preferred item follow in configured order with
/// their default item, so when nothing preferred matches the first entry is the first
/// eligible endpoint.
pub fn order_candidates(
    service: ServiceType,
    endpoints: &[Endpoint],
    preferred: &[String],
    tts_models: &[String],
    heuristics: &dyn ItemHeuristics,
) -> Vec<Candidate> {
    let eligible: Vec<&Endpoint> = endpoints.iter().filter(|e| e.is_selectable()).collect();
    let mut candidates: Vec<Candidate> = Vec::new();

    for item in preferred.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        for endpoint in &eligible {
            if candidates.iter().any(|c| c.endpoint_url == endpoint.url) {
                continue;
            }
            if supports(endpoint, service, item, heuristics) {
                candidates.push(candidate(endpoint, item.to_string(), tts_models, heuristics, false));
            }
        }
    }

    for endpoint in &eligible {
        if candidates.iter().any(|c| c.endpoint_url == endpoint.url) {
            continue;
        }
        if let Some(item) = default_item(endpoint, service, heuristics) {
            candidates.push(candidate(endpoint, item, tts_models, heuristics, true));
        }
    }
    candidates
}

fn supports(endpoint: &Endpoint, service: ServiceType, item: &str, heuristics: &dyn ItemHeuristics) -> bool {
    let listed = endpoint.supported_items();
    if listed.is_empty() {
        heuristics.assumes_support(endpoint.provider_type, service, item)
    } else {
        listed.iter().any(|known| known == item)
    }
}

fn default_item(endpoint: &Endpoint, service: ServiceType, heuristics: &dyn ItemHeuristics) -> Option<String> {
    let listed = endpoint.supported_items();
    let builtin = heuristics.default_item(endpoint.provider_type, service);
    match builtin {
        Some(item) if listed.is_empty() || listed.contains(&item) => Some(item),
        _ => listed.first().cloned(),
    }
}

/// TTS model: first configured model the endpoint lists, else the provider default.
fn resolve_model(endpoint: &Endpoint, tts_models: &[String], heuristics: &dyn ItemHeuristics) -> Option<String> {
    if endpoint.service_type != ServiceType::Tts {
        return None;
    }
    let listed = &endpoint.supported_models;
    let configured = if listed.is_empty() {
        tts_models.first()
    } else {
        tts_models.iter().find(|m| listed.contains(*m))
    };
    configured
        .cloned()
        .or_else(|| heuristics.default_model(endpoint.provider_type))
}

fn candidate(
    endpoint: &Endpoint,
    item: String,
    tts_models: &[String],
    heuristics: &dyn ItemHeuristics,
    fallback: bool,
) -> Candidate {
    Candidate {
        endpoint_url: endpoint.url.clone(),
        provider_type: endpoint.provider_type,
        item,
        model: resolve_model(endpoint, tts_models, heuristics),
        fallback,
    }
}
