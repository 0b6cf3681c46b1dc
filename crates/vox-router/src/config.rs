//! Router configuration: endpoint lists, preference lists and health policy.
//!
//! Precedence: environment (`VOX_*`) > config file (`VOX_CONFIG`, else `config/vox.toml`)
//! > built-in defaults.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | VOX_TTS__BASE_URLS | http://127.0.0.1:8880/v1,https://api.openai.com/v1 | Ordered TTS endpoints (comma list). |
//! | VOX_TTS__VOICES | af_sky,alloy | Ordered voice preference. |
//! | VOX_TTS__MODELS | tts-1,tts-1-hd,gpt-4o-mini-tts | Ordered TTS model preference. |
//! | VOX_STT__BASE_URLS | http://127.0.0.1:2022/v1,https://api.openai.com/v1 | Ordered STT endpoints. |
//! | VOX_STT__MODELS | whisper-1 | Ordered STT model preference. |
//! | VOX_DISCOVERY_TIMEOUT_MS | 3000 | Bound on one capability probe. |
//! | VOX_REQUEST_DEADLINE_MS | 30000 | Bound on one whole failover pass. |
//! | VOX_REQUEST_TIMEOUT_MS | 15000 | Bound on one attempt against one endpoint. |
//! | VOX_API_KEY / OPENAI_API_KEY | unset | Bearer key for non-local endpoints. |
//!
//! Health policy keys live under `VOX_HEALTH__*`, see [`HealthPolicy`].

use crate::endpoint::ServiceType;
use crate::error::{RouterError, RouterResult};
use crate::policy::HealthPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/vox.toml";

const LIST_KEYS: [&str; 5] = [
    "tts.base_urls",
    "tts.voices",
    "tts.models",
    "stt.base_urls",
    "stt.models",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_tts_urls() -> Vec<String> {
    strings(&["http://127.0.0.1:8880/v1", "https://api.openai.com/v1"])
}

fn default_stt_urls() -> Vec<String> {
    strings(&["http://127.0.0.1:2022/v1", "https://api.openai.com/v1"])
}

fn default_voices() -> Vec<String> {
    strings(&["af_sky", "alloy"])
}

fn default_tts_models() -> Vec<String> {
    strings(&["tts-1", "tts-1-hd", "gpt-4o-mini-tts"])
}

fn default_stt_models() -> Vec<String> {
    strings(&["whisper-1"])
}

fn default_discovery_timeout_ms() -> u64 {
    3000
}

fn default_request_deadline_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_urls")]
    pub base_urls: Vec<String>,
    /// Voice preference, most preferred first.
    #[serde(default = "default_voices")]
    pub voices: Vec<String>,
    /// Model sent alongside the chosen voice: first one the endpoint supports.
    #[serde(default = "default_tts_models")]
    pub models: Vec<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_urls: default_tts_urls(),
            voices: default_voices(),
            models: default_tts_models(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_urls")]
    pub base_urls: Vec<String>,
    #[serde(default = "default_stt_models")]
    pub models: Vec<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_urls: default_stt_urls(),
            models: default_stt_models(),
        }
    }
}

/// Everything the router needs from its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub health: HealthPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: default_discovery_timeout_ms(),
            request_deadline_ms: default_request_deadline_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            api_key: None,
            tts: TtsConfig::default(),
            stt: SttConfig::default(),
            health: HealthPolicy::default(),
        }
    }
}

impl RouterConfig {
    /// Load from `VOX_CONFIG` (or `config/vox.toml` when present) and the process environment.
    pub fn load() -> RouterResult<Self> {
        let path = std::env::var("VOX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let file = path.exists().then_some(path.as_path());
        Self::build(file, None).map(Self::with_env_api_key)
    }

    /// Load from an explicit file (which must exist) and the process environment.
    pub fn load_from(path: &Path) -> RouterResult<Self> {
        if !path.exists() {
            return Err(RouterError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Self::build(Some(path), None).map(Self::with_env_api_key)
    }

    /// Assemble defaults, an optional file and an environment source.
    ///
    /// `env` replaces the process environment when given (`VOX_`-prefixed keys).
    pub fn build(file: Option<&Path>, env: Option<config::Map<String, String>>) -> RouterResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let mut environment = config::Environment::with_prefix("VOX")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true)
            .source(env);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let config: Self = builder.add_source(environment).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn with_env_api_key(mut self) -> Self {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            self.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        self
    }

    fn validate(&self) -> RouterResult<()> {
        if self.discovery_timeout_ms == 0 {
            return Err(RouterError::Config("discovery_timeout_ms must be positive".into()));
        }
        if self.request_deadline_ms == 0 {
            return Err(RouterError::Config("request_deadline_ms must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(RouterError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn base_urls(&self, service: ServiceType) -> &[String] {
        match service {
            ServiceType::Tts => &self.tts.base_urls,
            ServiceType::Stt => &self.stt.base_urls,
        }
    }

    /// Voices for TTS, models for STT.
    pub fn preferred_items(&self, service: ServiceType) -> &[String] {
        match service {
            ServiceType::Tts => &self.tts.voices,
            ServiceType::Stt => &self.stt.models,
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
