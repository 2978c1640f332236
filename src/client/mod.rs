//! TabbyAPI admin client
//!
//! Loads and unloads models on a remote TabbyAPI server and follows the
//! streamed load progress.

pub mod admin;
pub mod load;
pub mod progress;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::storage::credentials::{Credential, CredentialResolver};
use crate::types::config::{ClientConfig, ServerConfig};
use crate::types::model::Catalog;

pub use load::{LoadBodyEncoder, LoadOutcome, TabbyLoadEncoder};
pub use progress::{LogSink, ProgressGuard, ProgressSink};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

/// Client errors
#[derive(Debug, Error)]
pub enum TabbyError {
    #[error("No admin key configured. Set one with `set-key` or the API_KEY_TABBY variable.")]
    CredentialMissing,
    #[error("Invalid load request: {0}")]
    ValidationFailed(String),
    #[error("Server rejected the load ({status}): {message}")]
    LoadRejected { status: u16, message: String },
    #[error("Server rejected the request ({status}): {message}")]
    RequestRejected { status: u16, message: String },
    #[error("Malformed progress stream: {0}")]
    StreamParse(String),
    #[error("Progress stream ended after {observed} of {expected} model(s) finished loading")]
    IncompleteStream { expected: u8, observed: u8 },
    #[error("Network error: {0}")]
    Network(String),
    #[error("A model load is already running on {0}")]
    AlreadyInProgress(String),
    #[error("Load cancelled")]
    Cancelled,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the client last observed about the server's model
#[derive(Clone, PartialEq, Debug)]
pub enum ModelState {
    NotLoaded,
    Loading(String),
    Loaded(String),
    Error(String),
}

/// Admin client for one or more TabbyAPI servers
pub struct TabbyClient {
    transport: Arc<dyn Transport>,
    resolver: CredentialResolver,
    encoder: Arc<dyn LoadBodyEncoder>,
    config: ClientConfig,
    /// Last fetched catalog per normalized base URL
    catalogs: DashMap<String, Catalog>,
    state: RwLock<ModelState>,
}

impl TabbyClient {
    /// Client backed by reqwest
    pub fn new(config: ClientConfig, resolver: CredentialResolver) -> Result<Self, TabbyError> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), config, resolver))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        resolver: CredentialResolver,
    ) -> Self {
        tracing::debug!("TabbyClient initialized");
        Self {
            transport,
            resolver,
            encoder: Arc::new(TabbyLoadEncoder),
            config,
            catalogs: DashMap::new(),
            state: RwLock::new(ModelState::NotLoaded),
        }
    }

    /// Swap the load body encoder for servers with a different field layout
    pub fn with_encoder(mut self, encoder: Arc<dyn LoadBodyEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Last catalog fetched from `server`, empty if none was
    pub fn catalog(&self, server: &ServerConfig) -> Catalog {
        self.catalogs
            .get(&server.normalized_base_url())
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub async fn model_state(&self) -> ModelState {
        self.state.read().await.clone()
    }

    async fn set_state(&self, state: ModelState) {
        *self.state.write().await = state;
    }

    /// Credential for `server`: the explicit one if given, otherwise a fresh lookup
    pub async fn resolve_credential(&self, server: &ServerConfig) -> Option<Credential> {
        match &server.credential {
            Some(credential) => Some(credential.clone()),
            None => self.resolver.resolve().await,
        }
    }

    fn auth_headers(server: &ServerConfig, credential: &Credential) -> Vec<(String, String)> {
        vec![server.auth_scheme.header(credential)]
    }

    /// Run a non-streamed exchange under the request timeout
    async fn exchange(&self, request: HttpRequest) -> Result<(u16, String), TabbyError> {
        let timeout = self.config.request_timeout();
        let url = request.url.clone();
        let result = tokio::time::timeout(timeout, async {
            let response = self.transport.send(request).await?;
            let status = response.status;
            let body = response.text().await?;
            Ok::<_, TabbyError>((status, body))
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TabbyError::Network(format!(
                "{} timed out after {}s",
                url,
                timeout.as_secs()
            ))),
        }
    }
}
