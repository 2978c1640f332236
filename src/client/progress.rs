//! Progress reporting
//!
//! A [`ProgressSink`] receives percentages and phase completions during a load.
//! [`ProgressGuard`] puts the sink back to idle however the load ends.

use crate::types::model::LoadRequest;
use crate::types::progress::LoadPhase;

/// Receiver for load progress
pub trait ProgressSink: Send + Sync {
    /// A load is about to be attempted
    fn started(&self, _request: &LoadRequest) {}

    /// Non-terminal progress, in whole percent
    fn progress(&self, phase: LoadPhase, percent: u8);

    /// One model finished loading
    fn phase_complete(&self, phase: LoadPhase);

    /// Back to idle. Called exactly once per load, on success and failure alike.
    fn reset(&self) {}
}

/// Scoped progress indicator: calls `started` on creation and `reset` on drop
pub struct ProgressGuard<'a> {
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressGuard<'a> {
    pub fn new(sink: &'a dyn ProgressSink, request: &LoadRequest) -> Self {
        sink.started(request);
        Self { sink }
    }

    pub fn sink(&self) -> &dyn ProgressSink {
        self.sink
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.sink.reset();
    }
}

/// Sink that reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn started(&self, request: &LoadRequest) {
        match &request.draft {
            Some(draft) => tracing::info!(
                "Loading {} with draft model {}",
                request.model_id,
                draft.model_name
            ),
            None => tracing::info!("Loading {}", request.model_id),
        }
    }

    fn progress(&self, phase: LoadPhase, percent: u8) {
        tracing::info!("Loading {}: {}%", phase, percent);
    }

    fn phase_complete(&self, phase: LoadPhase) {
        tracing::info!("Finished loading {}", phase);
    }
}

/// Sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn progress(&self, _phase: LoadPhase, _percent: u8) {}

    fn phase_complete(&self, _phase: LoadPhase) {}
}
