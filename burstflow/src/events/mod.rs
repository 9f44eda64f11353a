//! Event emission for orchestration milestones.
//!
//! Components hold an `Arc<dyn EventSink>` and emit dotted event names such
//! as `admission.acquired` or `batch.item_failed`. The default sink discards
//! everything; tests use [`CollectingEventSink`] to assert on the sequence.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the sink used when a component is built without one.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
