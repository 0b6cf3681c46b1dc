//! # Vox Router - Endpoint Registry & Failover for Speech Services
//!
//! Picks a TTS or STT endpoint (cloud or local, OpenAI-compatible) per request, together
//! with the voice or model to use, and fails over in order when an endpoint errors.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Selector                             │
//! │  preferences → candidate plan → SpeechClient → success/fail   │
//! │         ↓                                         ↓           │
//! │  ┌──────────────┐   probe   ┌──────────────┐  mark_success    │
//! │  │HealthTracker │ ────────→ │  Discoverer  │  mark_failure    │
//! │  │ (TTL, policy)│           │ (/models,    │        ↓         │
//! │  └──────────────┘           │ /audio/voices)│  ┌───────────┐  │
//! │         ↓                   └──────────────┘  │  Registry │  │
//! │  ┌──────────────┐                ↓            │ (per-entry│  │
//! │  │ RetryStrategy│          Classifier         │   locks)  │  │
//! │  └──────────────┘   (provider tag, locality)  └───────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod policy;
pub mod registry;
pub mod selector;

pub use classify::{classify, classify_with, is_local_url, BuiltinHeuristics, ItemHeuristics, ProviderRule};
pub use client::{
    HttpSpeechClient, SpeechClient, SpeechFailure, SpeechOutput, SpeechPayload, SpeechRequest,
};
pub use config::{RouterConfig, SttConfig, TtsConfig};
pub use discovery::{Discover, DiscoveryError, DiscoveryResult, HttpDiscoverer};
pub use endpoint::{Endpoint, HealthState, ProviderType, ServiceType};
pub use error::{AttemptLog, AttemptRecord, ErrorKind, RouterError, RouterResult};
pub use health::HealthTracker;
pub use policy::{HealthPolicy, RetryStrategy};
pub use registry::{EndpointEntry, Registry};
pub use selector::{order_candidates, Candidate, Completion, SelectionResult, Selector, SelectorOptions};
