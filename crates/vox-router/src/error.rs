//! Error types for the vox router

use crate::endpoint::ServiceType;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for router operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Why a single endpoint attempt (or probe) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Capability probe failed. Folded into health state, never surfaced on its own.
    DiscoveryUnavailable,
    /// The speech client returned an application or transport error.
    RequestFailed,
    /// The speech request did not finish inside its budget.
    RequestTimeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoveryUnavailable => "discovery_unavailable",
            Self::RequestFailed => "request_failed",
            Self::RequestTimeout => "request_timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed candidate inside a failover pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub endpoint_url: String,
    /// Voice (TTS) or model (STT) that was requested.
    pub item: String,
    pub error_kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} ({})",
            self.endpoint_url, self.item, self.error_kind, self.message
        )
    }
}

/// Ordered history of every failed attempt in one failover pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttemptLog {
    entries: Vec<AttemptRecord>,
}

impl AttemptLog {
    pub fn push(&mut self, record: AttemptRecord) {
        self.entries.push(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AttemptRecord] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttemptRecord> {
        self.entries.iter()
    }

    /// Endpoint URLs in the order they were tried.
    pub fn endpoints(&self) -> Vec<&str> {
        self.entries.iter().map(|r| r.endpoint_url.as_str()).collect()
    }
}

impl fmt::Display for AttemptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("no eligible endpoints");
        }
        for (i, record) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}. {}", i + 1, record)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a AttemptLog {
    type Item = &'a AttemptRecord;
    type IntoIter = std::slice::Iter<'a, AttemptRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn deadline_note(deadline_exceeded: &bool) -> &'static str {
    if *deadline_exceeded {
        " (overall deadline exceeded)"
    } else {
        ""
    }
}

/// Errors surfaced at the router boundary
#[derive(Error, Debug)]
pub enum RouterError {
    /// Every candidate failed. Carries the full attempt history, not just the last failure.
    #[error("all {service} candidates exhausted{}: {attempts}", deadline_note(.deadline_exceeded))]
    AllCandidatesExhausted {
        service: ServiceType,
        attempts: AttemptLog,
        deadline_exceeded: bool,
    },

    #[error("no {0} endpoints configured")]
    NoEndpointsConfigured(ServiceType),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    /// Attempt history when this is an exhaustion error.
    pub fn attempts(&self) -> Option<&AttemptLog> {
        match self {
            Self::AllCandidatesExhausted { attempts, .. } => Some(attempts),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for RouterError {
    fn from(err: config::ConfigError) -> Self {
        RouterError::Config(err.to_string())
    }
}
