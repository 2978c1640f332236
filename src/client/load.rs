//! Model load orchestration
//!
//! Validates the request, submits it, then follows the progress stream until
//! every requested model has reported `finished` and the server closes the stream.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::progress::{ProgressGuard, ProgressSink};
use crate::client::stream::FrameDecoder;
use crate::client::transport::{error_detail, ByteStream, HttpRequest};
use crate::client::{ModelState, TabbyClient, TabbyError};
use crate::storage::credentials::Credential;
use crate::types::config::ServerConfig;
use crate::types::model::{LoadBody, LoadRequest};
use crate::types::progress::{LoadPhase, ProgressEvent};

pub const LOAD_PATH: &str = "/v1/model/load";

// ============================================================================
// Body encoding
// ============================================================================

/// Turns a load request into the JSON body the server expects
pub trait LoadBodyEncoder: Send + Sync {
    fn encode(&self, request: &LoadRequest) -> Result<Value, TabbyError>;
}

/// TabbyAPI's `/v1/model/load` body layout
#[derive(Debug, Default, Clone, Copy)]
pub struct TabbyLoadEncoder;

impl LoadBodyEncoder for TabbyLoadEncoder {
    fn encode(&self, request: &LoadRequest) -> Result<Value, TabbyError> {
        Ok(serde_json::to_value(LoadBody::from(request))?)
    }
}

// ============================================================================
// Active load registry
// ============================================================================

/// Servers with a load in flight, keyed by normalized base URL
static ACTIVE_LOADS: Lazy<DashMap<String, Uuid>> = Lazy::new(DashMap::new);

/// Holds a server's slot in [`ACTIVE_LOADS`] until dropped
struct ActiveLoad {
    server: String,
}

impl ActiveLoad {
    fn acquire(server: String, session_id: Uuid) -> Result<Self, TabbyError> {
        match ACTIVE_LOADS.entry(server.clone()) {
            Entry::Occupied(_) => Err(TabbyError::AlreadyInProgress(server)),
            Entry::Vacant(slot) => {
                slot.insert(session_id);
                Ok(Self { server })
            }
        }
    }
}

impl Drop for ActiveLoad {
    fn drop(&mut self) {
        ACTIVE_LOADS.remove(&self.server);
    }
}

/// Whether a load against `server` is currently running in this process
pub fn is_load_active(server: &ServerConfig) -> bool {
    ACTIVE_LOADS.contains_key(&server.normalized_base_url())
}

// ============================================================================
// Session
// ============================================================================

/// Terminal-event bookkeeping for one load
#[derive(Debug, Clone)]
pub struct LoadSession {
    pub id: Uuid,
    expected: u8,
    completed: u8,
    frames: usize,
}

impl LoadSession {
    pub fn new(expected: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            expected,
            completed: 0,
            frames: 0,
        }
    }

    pub fn expected(&self) -> u8 {
        self.expected
    }

    pub fn completed(&self) -> u8 {
        self.completed
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.expected
    }

    /// Apply one event, reporting to `sink`
    pub fn apply(&mut self, event: &ProgressEvent, sink: &dyn ProgressSink) -> Result<(), TabbyError> {
        self.frames += 1;
        let phase = LoadPhase::from_completed(self.completed);

        if event.is_finished() {
            if self.is_complete() {
                return Err(TabbyError::StreamParse(format!(
                    "unexpected extra 'finished' frame after {} model(s) completed",
                    self.completed
                )));
            }
            tracing::debug!(
                "[{}] {} finished (model_type={:?})",
                self.id,
                phase,
                event.model_type
            );
            sink.phase_complete(phase);
            self.completed += 1;
            return Ok(());
        }

        let percent = event.percent().map_err(TabbyError::StreamParse)?;
        if self.is_complete() {
            tracing::warn!(
                "[{}] ignoring progress frame after all models finished",
                self.id
            );
            return Ok(());
        }
        sink.progress(phase, percent);
        Ok(())
    }

    /// Check the final tally once the stream has ended
    pub fn finish(&self) -> Result<(), TabbyError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(TabbyError::IncompleteStream {
                expected: self.expected,
                observed: self.completed,
            })
        }
    }
}

/// Read a progress stream to its end.
///
/// Fails on a chunk error, a malformed frame, an idle gap longer than
/// `idle_timeout`, cancellation, or an end of stream with models still pending.
pub async fn consume_progress(
    mut body: ByteStream,
    session: &mut LoadSession,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> Result<(), TabbyError> {
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("[{}] load cancelled, closing stream", session.id);
                return Err(TabbyError::Cancelled);
            }
            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(TabbyError::Network(format!(
                    "no progress received for {:?}",
                    idle_timeout
                )))
            }
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };

        for event in decoder.push(&chunk)? {
            session.apply(&event, sink)?;
        }
    }

    if let Some(event) = decoder.finish()? {
        session.apply(&event, sink)?;
    }

    session.finish()
}

// ============================================================================
// Orchestration
// ============================================================================

/// Result of a completed load
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub session_id: Uuid,
    pub model: String,
    pub draft_model: Option<String>,
    pub terminal_events: u8,
    pub frames: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TabbyClient {
    /// Load a model (and optional draft model) and follow its progress.
    ///
    /// `sink` is reset to idle on every exit path.
    pub async fn load_model(
        &self,
        server: &ServerConfig,
        request: &LoadRequest,
        sink: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<LoadOutcome, TabbyError> {
        let guard = ProgressGuard::new(sink, request);
        let started_at = Utc::now();

        request.validate().map_err(TabbyError::ValidationFailed)?;
        self.catalog(server)
            .check(request)
            .map_err(TabbyError::ValidationFailed)?;

        let mut session = LoadSession::new(request.expected_terminal_events());
        let _active = ActiveLoad::acquire(server.normalized_base_url(), session.id)?;

        let credential = self
            .resolve_credential(server)
            .await
            .ok_or(TabbyError::CredentialMissing)?;

        let body = self.encoder.encode(request)?;

        self.set_state(ModelState::Loading(request.model_id.clone()))
            .await;
        tracing::info!(
            "[{}] Loading '{}' on {}",
            session.id,
            request.model_id,
            server.normalized_base_url()
        );

        let result = self
            .run_load(server, &credential, body, &mut session, guard.sink(), &cancel)
            .await;

        match &result {
            Ok(()) => {
                tracing::info!(
                    "[{}] '{}' loaded ({} frame(s))",
                    session.id,
                    request.model_id,
                    session.frames()
                );
                self.set_state(ModelState::Loaded(request.model_id.clone()))
                    .await;
            }
            Err(e) => {
                tracing::error!("[{}] Load of '{}' failed: {}", session.id, request.model_id, e);
                self.set_state(ModelState::Error(e.to_string())).await;
            }
        }
        result?;

        Ok(LoadOutcome {
            session_id: session.id,
            model: request.model_id.clone(),
            draft_model: request.draft.as_ref().map(|d| d.model_name.clone()),
            terminal_events: session.completed(),
            frames: session.frames(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_load(
        &self,
        server: &ServerConfig,
        credential: &Credential,
        body: Value,
        session: &mut LoadSession,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), TabbyError> {
        let request = HttpRequest::post(server.endpoint(LOAD_PATH), Some(body))
            .with_headers(Self::auth_headers(server, credential));

        let timeout = self.config.request_timeout();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TabbyError::Cancelled),
            sent = tokio::time::timeout(timeout, self.transport.send(request)) => match sent {
                Ok(response) => response?,
                Err(_) => {
                    return Err(TabbyError::Network(format!(
                        "no response to load request within {}s",
                        timeout.as_secs()
                    )))
                }
            },
        };

        if !response.is_success() {
            let status = response.status;
            let text = tokio::time::timeout(timeout, response.text())
                .await
                .unwrap_or_else(|_| Ok(String::new()))
                .unwrap_or_default();
            return Err(TabbyError::LoadRejected {
                status,
                message: error_detail(status, &text),
            });
        }

        consume_progress(
            response.body,
            session,
            sink,
            cancel,
            self.config.stream_idle_timeout(),
        )
        .await
    }
}
