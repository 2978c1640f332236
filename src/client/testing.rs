//! Test doubles shared by the client tests

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::progress::ProgressSink;
use crate::client::transport::{HttpRequest, HttpResponse, Transport};
use crate::client::{TabbyClient, TabbyError};
use crate::storage::credentials::{
    CredentialCache, CredentialResolver, MemoryCredentialCache, SecretError, SecretStore,
    CREDENTIAL_CACHE_KEY,
};
use crate::types::config::ClientConfig;
use crate::types::model::LoadRequest;
use crate::types::progress::LoadPhase;

/// One scripted piece of a response body
pub enum Chunk {
    Data(Vec<u8>),
    Fail(String),
    /// Sleep before yielding nothing further
    Stall(Duration),
}

pub fn data(text: &str) -> Chunk {
    Chunk::Data(text.as_bytes().to_vec())
}

/// Scripted reply
pub enum Reply {
    Response { status: u16, chunks: Vec<Chunk> },
    ConnectError(String),
}

impl Reply {
    pub fn ok(chunks: Vec<Chunk>) -> Self {
        Reply::Response { status: 200, chunks }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Reply::Response {
            status,
            chunks: vec![data(body)],
        }
    }
}

/// Transport that replays scripted replies and records every request
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TabbyError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted reply left");

        match reply {
            Reply::ConnectError(msg) => Err(TabbyError::Network(msg)),
            Reply::Response { status, chunks } => {
                let body = stream::iter(chunks)
                    .then(|chunk| async move {
                        match chunk {
                            Chunk::Data(bytes) => Some(Ok(bytes)),
                            Chunk::Fail(msg) => Some(Err(TabbyError::Network(msg))),
                            Chunk::Stall(duration) => {
                                tokio::time::sleep(duration).await;
                                None
                            }
                        }
                    })
                    .filter_map(|item| async move { item })
                    .boxed();
                Ok(HttpResponse { status, body })
            }
        }
    }
}

/// Everything a sink was told, in order
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Started(String),
    Progress(LoadPhase, u8),
    PhaseComplete(LoadPhase),
    Reset,
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressSink for RecordingSink {
    fn started(&self, request: &LoadRequest) {
        self.record(SinkEvent::Started(request.model_id.clone()));
    }

    fn progress(&self, phase: LoadPhase, percent: u8) {
        self.record(SinkEvent::Progress(phase, percent));
    }

    fn phase_complete(&self, phase: LoadPhase) {
        self.record(SinkEvent::PhaseComplete(phase));
    }

    fn reset(&self) {
        self.record(SinkEvent::Reset);
    }
}

struct NoSecret;

#[async_trait]
impl SecretStore for NoSecret {
    async fn find_secret(&self, id: &str) -> Result<String, SecretError> {
        Err(SecretError::NotFound(id.to_string()))
    }
}

/// Resolver with an optional cached key and an empty secret store
pub fn resolver(key: Option<&str>) -> CredentialResolver {
    let cache = Arc::new(MemoryCredentialCache::new());
    if let Some(key) = key {
        cache.set(CREDENTIAL_CACHE_KEY, key).unwrap();
    }
    CredentialResolver::new(cache, Arc::new(NoSecret))
}

pub fn client(transport: Arc<FakeTransport>, key: Option<&str>) -> TabbyClient {
    TabbyClient::with_transport(transport, ClientConfig::default(), resolver(key))
}
