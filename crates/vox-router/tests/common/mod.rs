//! Scripted discoverer and speech client shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vox_router::{
    Discover, DiscoveryError, DiscoveryResult, HealthPolicy, HealthTracker, Registry, Selector,
    ServiceType, SpeechClient, SpeechFailure, SpeechOutput, SpeechPayload, SpeechRequest,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn prefs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone)]
pub enum Probe {
    Up { models: Vec<String>, voices: Vec<String> },
    Down(String),
}

/// Answers probes from a per-URL script; unknown URLs report up with nothing listed.
#[derive(Default)]
pub struct ScriptedDiscoverer {
    script: Mutex<HashMap<String, Probe>>,
    delay: Option<Duration>,
    probes: AtomicUsize,
}

impl ScriptedDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up(self, url: &str, models: &[&str], voices: &[&str]) -> Self {
        self.set(
            url,
            Probe::Up {
                models: prefs(models),
                voices: prefs(voices),
            },
        );
        self
    }

    pub fn down(self, url: &str, reason: &str) -> Self {
        self.set(url, Probe::Down(reason.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, url: &str, probe: Probe) {
        self.script.lock().unwrap().insert(key(url), probe);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discover for ScriptedDiscoverer {
    async fn discover(&self, url: &str, _service: ServiceType, _timeout: Duration) -> DiscoveryResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let probe = self.script.lock().unwrap().get(&key(url)).cloned();
        match probe {
            Some(Probe::Up { models, voices }) => DiscoveryResult::available(url, models, voices, 3),
            Some(Probe::Down(reason)) => {
                DiscoveryResult::unavailable(url, DiscoveryError::Connect(reason))
            }
            None => DiscoveryResult::available(url, Vec::new(), Vec::new(), 3),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(SpeechFailure),
    /// Succeeds after the given delay.
    Slow(Duration),
    /// Fails after the given delay.
    SlowFail(Duration, SpeechFailure),
    /// Never answers within any sane deadline.
    Hang,
}

/// Speech client whose per-URL behaviour can be changed between calls.
#[derive(Default)]
pub struct ScriptedClient {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, behavior: Behavior) -> Self {
        self.set(url, behavior);
        self
    }

    pub fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(key(url), behavior);
    }

    /// `(endpoint_url, item)` per call, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn output_for(request: &SpeechRequest<'_>) -> SpeechOutput {
    match request.payload {
        SpeechPayload::Speak { .. } => {
            SpeechOutput::Audio(format!("audio:{}:{}", request.endpoint_url, request.item).into_bytes())
        }
        SpeechPayload::Transcribe { .. } => SpeechOutput::Transcript(format!("text via {}", request.item)),
    }
}

#[async_trait]
impl SpeechClient for ScriptedClient {
    async fn perform(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SpeechFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((request.endpoint_url.to_string(), request.item.to_string()));
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&key(request.endpoint_url))
            .cloned()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Succeed => Ok(output_for(request)),
            Behavior::Fail(failure) => Err(failure),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(output_for(request))
            }
            Behavior::SlowFail(delay, failure) => {
                tokio::time::sleep(delay).await;
                Err(failure)
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(output_for(request))
            }
        }
    }
}

/// Selector over TTS endpoints registered in the given order.
pub fn tts_selector(
    policy: HealthPolicy,
    urls: &[&str],
    discoverer: Arc<ScriptedDiscoverer>,
    client: Arc<ScriptedClient>,
) -> Selector {
    let registry = Arc::new(Registry::new(policy));
    for url in urls {
        registry.register(ServiceType::Tts, url);
    }
    let tracker = Arc::new(HealthTracker::new(registry, discoverer));
    Selector::new(tracker, client)
}

pub fn speak() -> SpeechPayload {
    SpeechPayload::speak("hello there")
}
