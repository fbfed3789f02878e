use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;

/// Wikimedia rejects requests without an identifying user agent
pub const DEFAULT_USER_AGENT: &str = concat!(
    "kgrag/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/kgrag/kgrag)"
);

/// Transport settings for one external service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    pub connect_timeout_seconds: u32,
    /// Request timeout in seconds, covering the whole response
    pub request_timeout_seconds: u32,
    /// User agent override
    pub user_agent: Option<String>,
    /// Backoff for rate limits, timeouts and server errors
    pub retry: RetryPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            request_timeout_seconds: 60,
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl NetworkConfig {
    /// Text generation is slow; give model endpoints a longer request budget
    #[must_use]
    pub fn for_language_model() -> Self {
        Self {
            request_timeout_seconds: 120,
            ..Self::default()
        }
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn validate(&self) -> Result<(), NetworkConfigError> {
        if self.connect_timeout_seconds == 0 {
            return Err(NetworkConfigError::ZeroTimeout("connect_timeout_seconds"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(NetworkConfigError::ZeroTimeout("request_timeout_seconds"));
        }
        if self.user_agent.as_deref().is_some_and(|ua| ua.trim().is_empty()) {
            return Err(NetworkConfigError::EmptyUserAgent);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkConfigError {
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("User agent must not be empty")]
    EmptyUserAgent,
}
