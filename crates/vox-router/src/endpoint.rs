//! Endpoint data model: service and provider tags, health states, and the
//! point-in-time [`Endpoint`] snapshot handed out by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which speech API an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Tts,
    Stt,
}

impl ServiceType {
    pub const ALL: [ServiceType; 2] = [ServiceType::Tts, ServiceType::Stt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tts => "tts",
            Self::Stt => "stt",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tts" => Ok(Self::Tts),
            "stt" => Ok(Self::Stt),
            other => Err(format!("unknown service type '{}' (expected tts or stt)", other)),
        }
    }
}

/// Backing implementation behind an endpoint, as inferred by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    OpenAiCloud,
    LocalWhisper,
    LocalKokoro,
    UnknownCompatible,
}

impl ProviderType {
    /// Providers that only ever run on the user's machine.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalWhisper | Self::LocalKokoro)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenAiCloud => "openai",
            Self::LocalWhisper => "whisper",
            Self::LocalKokoro => "kokoro",
            Self::UnknownCompatible => "openai-compatible",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cached belief about whether an endpoint currently serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Failed recently; excluded until the backoff window passes.
    Unhealthy,
    /// Failed, but may be tried again on the next selection.
    RetryEligible,
}

impl HealthState {
    pub fn is_selectable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::RetryEligible => "retry-eligible",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one registry entry.
///
/// Produced by [`crate::Registry::inspect`] and the health tracker; mutating it has
/// no effect on the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub service_type: ServiceType,
    pub provider_type: ProviderType,
    pub supported_models: Vec<String>,
    /// TTS only; always empty for STT endpoints.
    pub supported_voices: Vec<String>,
    pub is_local: bool,
    /// Effective health at snapshot time (an expired backoff reads as `RetryEligible`).
    pub health: HealthState,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Last completed capability probe, successful or not.
    pub discovered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_used_item: Option<String>,
}

impl Endpoint {
    pub fn is_selectable(&self) -> bool {
        self.health.is_selectable()
    }

    /// Voices for TTS endpoints, models for STT endpoints.
    pub fn supported_items(&self) -> &[String] {
        match self.service_type {
            ServiceType::Tts => &self.supported_voices,
            ServiceType::Stt => &self.supported_models,
        }
    }
}

/// Collect into an ordered set: first occurrence wins, blanks are dropped.
pub(crate) fn ordered_set<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.as_ref().trim();
        if item.is_empty() || out.iter().any(|existing| existing == item) {
            continue;
        }
        out.push(item.to_string());
    }
    out
}

/// Canonical form used as the registry key: trimmed, without trailing slash.
pub(crate) fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
