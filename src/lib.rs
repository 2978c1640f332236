//! Tabby Loader Library
//!
//! Model load/unload client for TabbyAPI servers: admin credential lookup,
//! streamed load progress, and the model catalog.

pub mod client;
pub mod storage;
pub mod types;

pub use client::{LogSink, ModelState, ProgressSink, TabbyClient, TabbyError};
pub use storage::credentials::{Credential, CredentialResolver};
pub use types::config::{AuthScheme, ClientConfig, ServerConfig};
pub use types::model::{CacheMode, Catalog, DraftRequest, LoadRequest};
pub use types::progress::{LoadPhase, ProgressEvent};
