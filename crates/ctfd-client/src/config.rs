//! CTFd connection settings

use serde::{Deserialize, Serialize};

const DEFAULT_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How to reach and authenticate against a CTFd instance.
///
/// Either an admin API token or a session cookie with its CSRF nonce is
/// required; the token wins when both are set.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the instance, without the `/api/v1` suffix
    pub url: String,
    /// Admin access token (`Authorization: Token ...`)
    pub api_key: Option<String>,
    /// Session cookie value
    pub session: Option<String>,
    /// CSRF nonce matching the session
    pub nonce: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: std::env::var("CTFD_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()),
            api_key: std::env::var("CTFD_API_KEY").ok(),
            session: std::env::var("CTFD_SESSION").ok(),
            nonce: std::env::var("CTFD_NONCE").ok(),
            timeout_secs: std::env::var("CTFD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("ctfd-converge/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific instance, ignoring the environment
    pub fn new(url: &str) -> Self {
        ClientConfig {
            url: url.to_string(),
            api_key: None,
            session: None,
            nonce: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }

    /// Set the admin API token
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Authenticate with a session cookie and its CSRF nonce
    pub fn with_session(mut self, session: &str, nonce: &str) -> Self {
        self.session = Some(session.to_string());
        self.nonce = Some(nonce.to_string());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Whether some form of credentials is configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.session.is_some()
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("session", &redact(&self.session))
            .field("nonce", &redact(&self.nonce))
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
