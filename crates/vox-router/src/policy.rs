//! Health policy: how failures change an endpoint's health.
//!
//! Two named strategies, chosen per endpoint from configuration:
//! - [`RetryStrategy::AlwaysRetryLocal`]: local services come and go during development,
//!   so a failure only records a diagnostic and the endpoint stays selectable.
//! - [`RetryStrategy::StandardBackoff`]: the endpoint is excluded until the backoff window
//!   passes, then becomes eligible again on its own.

use crate::endpoint::HealthState;
use crate::error::ErrorKind;
use crate::registry::EndpointState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

fn default_true() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    60
}

fn default_backoff_seconds() -> u64 {
    30
}

/// Health and cache policy.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | VOX_HEALTH__ALWAYS_RETRY_LOCAL | true | Never quarantine local endpoints. |
/// | VOX_HEALTH__TTL_SECONDS | 60 | Lifetime of discovered capabilities. |
/// | VOX_HEALTH__UNHEALTHY_BACKOFF_SECONDS | 30 | Minimum pause before a failed remote endpoint is retried. |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    #[serde(default = "default_true")]
    pub always_retry_local: bool,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_backoff_seconds")]
    pub unhealthy_backoff_seconds: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            always_retry_local: default_true(),
            ttl_seconds: default_ttl_seconds(),
            unhealthy_backoff_seconds: default_backoff_seconds(),
        }
    }
}

impl HealthPolicy {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.unhealthy_backoff_seconds)
    }

    /// Strategy applied to failures of an endpoint with the given locality.
    pub fn strategy_for(&self, is_local: bool) -> RetryStrategy {
        if is_local && self.always_retry_local {
            RetryStrategy::AlwaysRetryLocal
        } else {
            RetryStrategy::StandardBackoff
        }
    }
}

/// What a failure does to an endpoint. The backoff window length comes from
/// [`HealthPolicy::backoff`], which is also what lifts the quarantine on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    AlwaysRetryLocal,
    StandardBackoff,
}

impl RetryStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlwaysRetryLocal => "always-retry-local",
            Self::StandardBackoff => "standard-backoff",
        }
    }

    /// Record a failure on `state` and return the resulting health.
    pub(crate) fn apply_failure(
        &self,
        state: &mut EndpointState,
        kind: ErrorKind,
        error: String,
        now: Instant,
    ) -> HealthState {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_error = Some(format!("{}: {}", kind, error));
        state.touch(now);
        state.health = match self {
            Self::AlwaysRetryLocal => HealthState::RetryEligible,
            Self::StandardBackoff => HealthState::Unhealthy,
        };
        state.health
    }
}
