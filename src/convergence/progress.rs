// ABOUTME: Structured progress events emitted during convergence.
// ABOUTME: A single sink per run; writes are concurrency-safe (§5 shared resources).

use std::sync::Arc;

use parking_lot::Mutex;

/// Status of one container-transition progress event, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Creating,
    Created,
    Starting,
    Started,
    Waiting,
    Healthy,
    Exited,
    Error,
    Skipped,
    Warning,
    Working,
    Done,
}

/// One progress event. `id` is `"Container " + canonicalName` per §7, or a
/// service-scoped id for events above container granularity.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub id: String,
    pub status: ProgressStatus,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(id: impl Into<String>, status: ProgressStatus) -> Self {
        Self {
            id: id.into(),
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Sink for progress events. Implementations must be safe to call from
/// multiple concurrent reconcile tasks.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Default sink: forwards every event to `tracing`, at a level derived from
/// its status (`Error` → error, `Warning` → warn, everything else → info).
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event.status {
            ProgressStatus::Error => {
                tracing::error!(id = %event.id, message = event.message.as_deref().unwrap_or(""), "{:?}", event.status)
            }
            ProgressStatus::Warning => {
                tracing::warn!(id = %event.id, message = event.message.as_deref().unwrap_or(""), "{:?}", event.status)
            }
            _ => {
                tracing::info!(id = %event.id, message = event.message.as_deref().unwrap_or(""), "{:?}", event.status)
            }
        }
    }
}

/// In-memory sink used by tests to assert on the emitted event sequence.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
