//! Endpoint discovery: probe an OpenAI-compatible endpoint for its models and voices.
//!
//! Network failure is data here, not control flow: [`Discover::discover`] always returns a
//! [`DiscoveryResult`], with `available = false` and a structured [`DiscoveryError`] when the
//! endpoint could not be reached.

use crate::classify::{classify, is_local_url};
use crate::endpoint::{ordered_set, ProviderType, ServiceType};
use crate::error::RouterResult;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Longest response-body excerpt kept in an error.
const BODY_EXCERPT_CHARS: usize = 200;

/// Why a capability probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("probe timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    InvalidBody(String),
}

/// Outcome of one capability probe.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    pub available: bool,
    pub provider_type: ProviderType,
    pub models: Vec<String>,
    pub voices: Vec<String>,
    pub response_time_ms: Option<u64>,
    pub error: Option<DiscoveryError>,
}

impl DiscoveryResult {
    /// Successful probe; the provider tag is derived from what was found.
    pub fn available(
        url: &str,
        models: Vec<String>,
        voices: Vec<String>,
        response_time_ms: u64,
    ) -> Self {
        let models = ordered_set(models);
        let voices = ordered_set(voices);
        Self {
            available: true,
            provider_type: classify(url, &models, &voices),
            models,
            voices,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn unavailable(url: &str, error: DiscoveryError) -> Self {
        Self {
            available: false,
            provider_type: classify(url, &[], &[]),
            models: Vec::new(),
            voices: Vec::new(),
            response_time_ms: None,
            error: Some(error),
        }
    }
}

/// Capability prober. Implementations must not fail past their own boundary.
#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self, url: &str, service: ServiceType, timeout: Duration) -> DiscoveryResult;
}

/// Probes `GET {url}/models` and, for TTS, best-effort `GET {url}/audio/voices`.
#[derive(Debug, Clone)]
pub struct HttpDiscoverer {
    client: reqwest::Client,
    /// Bearer key, only ever sent to non-local endpoints.
    api_key: Option<String>,
}

impl HttpDiscoverer {
    pub fn new(api_key: Option<String>) -> RouterResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, api_key })
    }

    /// Reuse an existing client (connection pool shared with the speech client).
    pub fn with_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    async fn get_json(
        &self,
        target: &str,
        endpoint_url: &str,
        timeout: Duration,
    ) -> Result<Value, DiscoveryError> {
        let mut req = self.client.get(target).timeout(timeout);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            if !is_local_url(endpoint_url) {
                req = req.bearer_auth(key);
            }
        }
        let res = req
            .send()
            .await
            .map_err(|e| transport_error(&e, timeout))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }
        res.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                DiscoveryError::Timeout(timeout.as_millis() as u64)
            } else {
                DiscoveryError::InvalidBody(e.to_string())
            }
        })
    }
}

#[async_trait]
impl Discover for HttpDiscoverer {
    async fn discover(&self, url: &str, service: ServiceType, timeout: Duration) -> DiscoveryResult {
        let base = url.trim().trim_end_matches('/');
        let started = Instant::now();

        let models = match self.get_json(&format!("{}/models", base), url, timeout).await {
            Ok(body) => names_from(&body, &["data", "models"]),
            Err(error) => {
                debug!(endpoint = %url, %service, %error, "model listing failed");
                return DiscoveryResult::unavailable(url, error);
            }
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        let voices = if service == ServiceType::Tts {
            match self.get_json(&format!("{}/audio/voices", base), url, timeout).await {
                Ok(body) => names_from(&body, &["voices", "data"]),
                Err(error) => {
                    debug!(endpoint = %url, %error, "voice listing unavailable");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        debug!(
            endpoint = %url,
            %service,
            models = models.len(),
            voices = voices.len(),
            response_time_ms,
            "probe complete"
        );
        DiscoveryResult::available(url, models, voices, response_time_ms)
    }
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> DiscoveryError {
    if err.is_timeout() {
        DiscoveryError::Timeout(timeout.as_millis() as u64)
    } else {
        DiscoveryError::Connect(err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}

/// Extract names from `{"data": [{"id": ..}]}`, `{"voices": ["a", ..]}` or a bare array.
fn names_from(body: &Value, keys: &[&str]) -> Vec<String> {
    let list = keys
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .or_else(|| body.as_array());
    match list {
        Some(items) => ordered_set(items.iter().filter_map(item_name)),
        None => Vec::new(),
    }
}

fn item_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
