//! Unload and catalog requests
//!
//! Both are plain request/response exchanges; no streaming involved.

use crate::client::transport::{error_detail, HttpRequest};
use crate::client::{ModelState, TabbyClient, TabbyError};
use crate::storage::credentials::Credential;
use crate::types::config::ServerConfig;
use crate::types::model::{Catalog, ModelList};

pub const UNLOAD_PATH: &str = "/v1/model/unload";
pub const MODEL_LIST_PATH: &str = "/v1/model/list";
pub const DRAFT_LIST_PATH: &str = "/v1/model/draft/list";

impl TabbyClient {
    /// Unload whatever model the server has loaded
    pub async fn unload_model(&self, server: &ServerConfig) -> Result<(), TabbyError> {
        let credential = self
            .resolve_credential(server)
            .await
            .ok_or(TabbyError::CredentialMissing)?;

        let request = HttpRequest::post(server.endpoint(UNLOAD_PATH), None)
            .with_headers(Self::auth_headers(server, &credential));
        let (status, body) = self.exchange(request).await?;

        if !(200..300).contains(&status) {
            let message = error_detail(status, &body);
            tracing::error!("Unload failed ({}): {}", status, message);
            return Err(TabbyError::RequestRejected { status, message });
        }

        tracing::info!("Model unloaded on {}", server.normalized_base_url());
        self.set_state(ModelState::NotLoaded).await;
        Ok(())
    }

    /// Fetch the model and draft model lists.
    ///
    /// Best-effort: a missing credential or any failure yields an empty catalog.
    /// The result replaces the catalog cached for `server` either way.
    pub async fn fetch_catalog(&self, server: &ServerConfig) -> Catalog {
        let catalog = match self.resolve_credential(server).await {
            None => {
                tracing::warn!("No admin key available, skipping model list fetch");
                Catalog::default()
            }
            Some(credential) => {
                let (models, drafts) = tokio::join!(
                    self.fetch_list(server, &credential, MODEL_LIST_PATH),
                    self.fetch_list(server, &credential, DRAFT_LIST_PATH),
                );
                match (models, drafts) {
                    (Ok(models), Ok(draft_models)) => {
                        tracing::debug!(
                            "Fetched {} model(s) and {} draft model(s)",
                            models.len(),
                            draft_models.len()
                        );
                        Catalog {
                            models,
                            draft_models,
                        }
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!("Failed to fetch model lists: {}", e);
                        Catalog::default()
                    }
                }
            }
        };

        self.catalogs
            .insert(server.normalized_base_url(), catalog.clone());
        catalog
    }

    async fn fetch_list(
        &self,
        server: &ServerConfig,
        credential: &Credential,
        path: &str,
    ) -> Result<Vec<String>, TabbyError> {
        let request = HttpRequest::get(server.endpoint(path))
            .with_headers(Self::auth_headers(server, credential));
        let (status, body) = self.exchange(request).await?;

        if !(200..300).contains(&status) {
            return Err(TabbyError::RequestRejected {
                status,
                message: error_detail(status, &body),
            });
        }

        let list: ModelList = serde_json::from_str(&body)?;
        Ok(list.data.into_iter().map(|card| card.id).collect())
    }
}
