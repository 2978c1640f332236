//! Shared type definitions
//!
//! Server configuration, load requests and progress frames used across the crate.

pub mod config;
pub mod model;
pub mod progress;
