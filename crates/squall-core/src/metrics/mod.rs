//! Metrics emitted by the batching engine, storage provider and queue services.
//!
//! Events are recorded through the `metrics` facade. Nothing is exported
//! unless the embedding process installs a recorder.

pub mod events;

/// Macro for emitting metric events (Vector-style pattern).
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding metric.
///
/// # Example
///
/// ```ignore
/// use squall_core::metrics::events::BatchRetried;
///
/// emit!(BatchRetried { target: "jobs".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
