//! Remote store configuration.
//!
//! Resolved once when the process starts and passed explicitly to
//! [`crate::remote::connect`]; nothing in the engine reads it from global state.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

/// Environment variable holding the remote endpoint.
pub const ENDPOINT_VAR: &str = "STASH_REMOTE_URL";
/// Environment variable holding the remote credential.
pub const CREDENTIAL_VAR: &str = "STASH_REMOTE_KEY";
/// Environment variable overriding the request timeout, in seconds.
pub const TIMEOUT_VAR: &str = "STASH_REMOTE_TIMEOUT_SECS";

/// Default per-request timeout for the HTTP transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the remote store lives and how to authenticate with it.
///
/// Remote mode needs both values; with either missing the engine runs
/// local-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the remote store
    pub endpoint: Option<String>,
    /// API credential sent with every request
    pub credential: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Configuration for a remote store.
    pub fn new(endpoint: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            endpoint: non_blank(endpoint.into()),
            credential: non_blank(credential.into()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Configuration with no remote at all.
    pub fn local_only() -> Self {
        Self {
            endpoint: None,
            credential: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Missing or blank variables count as absent; only a malformed timeout
    /// is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout = match env::var(TIMEOUT_VAR) {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue {
                    name: TIMEOUT_VAR.to_string(),
                    value,
                })?,
            Err(_) => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            endpoint: env::var(ENDPOINT_VAR).ok().and_then(non_blank),
            credential: env::var(CREDENTIAL_VAR).ok().and_then(non_blank),
            timeout,
        })
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True iff both endpoint and credential are present.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.credential.is_some()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::local_only()
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
