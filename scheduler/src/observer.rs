//! Event observers: a hook for out-of-tree extensions that want to see
//! every decoded master event. Loading is the embedder's business; the
//! scheduler only walks the registered list per event.

use stevedore_types::Event;

pub trait EventObserver: Send + Sync {
    fn name(&self) -> &str;

    /// Called inline on the event loop; implementations must not block.
    fn on_event(&self, event: &Event);
}

/// Built-in observer behind `--trace-events`.
pub struct TraceObserver;

impl EventObserver for TraceObserver {
    fn name(&self) -> &str {
        "trace"
    }

    fn on_event(&self, event: &Event) {
        tracing::debug!(event_type = %event.event_type, "master event");
    }
}
