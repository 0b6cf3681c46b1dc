//! Capability classifier: map an endpoint's URL and discovered names to a provider tag.
//!
//! Pure and table-driven: [`classify`] walks [`DEFAULT_RULES`] in order and returns the
//! first match, falling back to [`ProviderType::UnknownCompatible`]. Callers with their
//! own conventions pass a different table to [`classify_with`].
//!
//! [`ItemHeuristics`] answers the second question the selector has when an endpoint
//! exposes no voice/model enumeration: is this item *assumed* to be supported, and
//! what should be used when nothing preferred matches.

use crate::endpoint::{ProviderType, ServiceType};
use once_cell::sync::Lazy;
use regex::Regex;
use url::{Host, Url};

const KOKORO_PORT: u16 = 8880;
const WHISPER_PORT: u16 = 2022;

/// Kokoro voice ids: language letter + gender letter + name, e.g. `af_sky`, `bm_george`.
static KOKORO_VOICE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-z][a-z]_[a-z0-9]+$").ok());

/// OpenAI cloud voices (used when the cloud does not enumerate them).
pub const OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer", "verse",
];
pub const OPENAI_TTS_MODELS: &[&str] = &["tts-1", "tts-1-hd", "gpt-4o-mini-tts"];
pub const OPENAI_STT_MODELS: &[&str] = &["whisper-1", "gpt-4o-transcribe", "gpt-4o-mini-transcribe"];

/// Everything the rules may look at. Built once per classification.
#[derive(Debug)]
pub struct Signals<'a> {
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub models: &'a [String],
    pub voices: &'a [String],
}

impl<'a> Signals<'a> {
    pub fn new(url: &str, models: &'a [String], voices: &'a [String]) -> Self {
        let (host, port, path) = match Url::parse(url.trim()) {
            Ok(parsed) => (
                parsed.host_str().unwrap_or_default().to_ascii_lowercase(),
                parsed.port(),
                parsed.path().to_ascii_lowercase(),
            ),
            Err(_) => (String::new(), None, String::new()),
        };
        Self {
            host,
            port,
            path,
            models,
            voices,
        }
    }
}

/// One row of the classification table.
#[derive(Clone, Copy)]
pub struct ProviderRule {
    pub provider: ProviderType,
    pub matches: fn(&Signals<'_>) -> bool,
}

/// Built-in heuristics, most specific first.
pub static DEFAULT_RULES: &[ProviderRule] = &[
    ProviderRule {
        provider: ProviderType::OpenAiCloud,
        matches: is_openai_host,
    },
    ProviderRule {
        provider: ProviderType::LocalKokoro,
        matches: looks_like_kokoro,
    },
    ProviderRule {
        provider: ProviderType::LocalWhisper,
        matches: looks_like_whisper,
    },
];

fn is_openai_host(s: &Signals<'_>) -> bool {
    s.host == "api.openai.com" || s.host.ends_with(".openai.com")
}

fn looks_like_kokoro(s: &Signals<'_>) -> bool {
    s.port == Some(KOKORO_PORT)
        || s.models.iter().any(|m| m.to_ascii_lowercase().contains("kokoro"))
        || s.voices.iter().any(|v| is_kokoro_voice(v))
}

fn looks_like_whisper(s: &Signals<'_>) -> bool {
    s.port == Some(WHISPER_PORT)
        || s.host.contains("whisper")
        || s.path.contains("whisper")
        || s.models.iter().any(|m| m.to_ascii_lowercase().contains("whisper"))
}

/// True for Kokoro-style voice ids such as `af_sky`.
pub fn is_kokoro_voice(voice: &str) -> bool {
    KOKORO_VOICE
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(voice))
}

/// Classify with the built-in table.
pub fn classify(url: &str, discovered_models: &[String], discovered_voices: &[String]) -> ProviderType {
    classify_with(DEFAULT_RULES, url, discovered_models, discovered_voices)
}

/// Classify with a caller-supplied table. Unmatched input is `UnknownCompatible`.
pub fn classify_with(
    rules: &[ProviderRule],
    url: &str,
    discovered_models: &[String],
    discovered_voices: &[String],
) -> ProviderType {
    let signals = Signals::new(url, discovered_models, discovered_voices);
    rules
        .iter()
        .find(|rule| (rule.matches)(&signals))
        .map(|rule| rule.provider)
        .unwrap_or(ProviderType::UnknownCompatible)
}

/// Loopback, private-range, link-local and mDNS hosts count as local.
pub fn is_local_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    match parsed.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain == "host.docker.internal"
        }
        Some(Host::Ipv4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Some(Host::Ipv6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
        None => false,
    }
}

/// Assumptions used when an endpoint does not enumerate its voices/models.
pub trait ItemHeuristics: Send + Sync {
    /// Whether `item` (voice for TTS, model for STT) is assumed to work on an endpoint
    /// that listed nothing.
    fn assumes_support(&self, provider: ProviderType, service: ServiceType, item: &str) -> bool;

    /// Voice (TTS) or model (STT) to use when no preferred item matches.
    fn default_item(&self, provider: ProviderType, service: ServiceType) -> Option<String>;

    /// TTS model to send when none of the configured models is known to work.
    fn default_model(&self, provider: ProviderType) -> Option<String>;
}

/// Built-in table for OpenAI, Kokoro and Whisper servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinHeuristics;

impl ItemHeuristics for BuiltinHeuristics {
    fn assumes_support(&self, provider: ProviderType, service: ServiceType, item: &str) -> bool {
        let item = item.trim();
        match (provider, service) {
            (ProviderType::OpenAiCloud, ServiceType::Tts) => {
                OPENAI_VOICES.iter().any(|v| v.eq_ignore_ascii_case(item))
            }
            (ProviderType::OpenAiCloud, ServiceType::Stt) => {
                OPENAI_STT_MODELS.iter().any(|m| m.eq_ignore_ascii_case(item))
            }
            (ProviderType::LocalKokoro, ServiceType::Tts) => is_kokoro_voice(item),
            (ProviderType::LocalKokoro, ServiceType::Stt) => false,
            // whisper.cpp style servers ignore the model field
            (ProviderType::LocalWhisper, ServiceType::Stt) => true,
            (ProviderType::LocalWhisper, ServiceType::Tts) => false,
            (ProviderType::UnknownCompatible, _) => true,
        }
    }

    fn default_item(&self, provider: ProviderType, service: ServiceType) -> Option<String> {
        let item = match (provider, service) {
            (ProviderType::LocalKokoro, ServiceType::Tts) => "af_sky",
            (ProviderType::OpenAiCloud, ServiceType::Tts) => "alloy",
            (ProviderType::LocalWhisper, ServiceType::Tts) => return None,
            (ProviderType::UnknownCompatible, ServiceType::Tts) => return None,
            (ProviderType::LocalKokoro, ServiceType::Stt) => return None,
            (_, ServiceType::Stt) => "whisper-1",
        };
        Some(item.to_string())
    }

    fn default_model(&self, provider: ProviderType) -> Option<String> {
        match provider {
            ProviderType::LocalWhisper => None,
            _ => Some("tts-1".to_string()),
        }
    }
}
