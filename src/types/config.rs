//! Configuration types
//!
//! Server addressing, authentication schemes and HTTP client tuning.

use serde::{Deserialize, Serialize};

use crate::storage::credentials::Credential;

/// Default TabbyAPI address when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// How the admin credential is attached to privileged requests.
///
/// Server versions disagree on the header, so the scheme is chosen per server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthScheme {
    /// `X-api-key: <key>`
    ApiKey,
    /// `X-admin-key: <key>`
    #[default]
    AdminKey,
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Any other header carrying the raw key
    Header { name: String },
}

impl AuthScheme {
    /// Build the `(name, value)` header pair for a credential
    pub fn header(&self, credential: &Credential) -> (String, String) {
        let key = credential.expose().to_string();
        match self {
            AuthScheme::ApiKey => ("X-api-key".to_string(), key),
            AuthScheme::AdminKey => ("X-admin-key".to_string(), key),
            AuthScheme::Bearer => ("Authorization".to_string(), format!("Bearer {}", key)),
            AuthScheme::Header { name } => (name.clone(), key),
        }
    }

    /// Parse a scheme name as given on the command line
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "api-key" | "x-api-key" => Ok(AuthScheme::ApiKey),
            "admin-key" | "x-admin-key" => Ok(AuthScheme::AdminKey),
            "bearer" | "authorization" => Ok(AuthScheme::Bearer),
            other if other.starts_with("header:") => {
                let name = value.trim()["header:".len()..].trim();
                if name.is_empty() {
                    Err("Custom header name is empty".to_string())
                } else {
                    Ok(AuthScheme::Header {
                        name: name.to_string(),
                    })
                }
            }
            _ => Err(format!(
                "Unknown auth scheme '{}' (expected api-key, admin-key, bearer or header:<name>)",
                value
            )),
        }
    }
}

/// Target server for one operation
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the TabbyAPI server, without the `/v1` suffix
    pub base_url: String,
    /// Header scheme used to send the credential
    pub auth_scheme: AuthScheme,
    /// Explicit credential. When `None` the client's resolver is consulted.
    pub credential: Option<Credential>,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_scheme: AuthScheme::default(),
            credential: None,
        }
    }

    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Join an API path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.normalized_base_url(),
            path.trim_start_matches('/')
        )
    }

    /// Base URL with surrounding whitespace and trailing slashes removed.
    /// Also used as the key for the active-load registry.
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound for every non-streamed exchange, and for the wait on load response headers
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Longest silence tolerated between two chunks of a load stream
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
    /// Optional HTTP(S) proxy URL
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_stream_idle_timeout() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("tabby-loader/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            proxy: None,
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn stream_idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stream_idle_timeout_secs.max(1))
    }
}
