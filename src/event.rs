//! Runtime events for monitoring the graph.
//!
//! Events are non-fatal notifications. The graph keeps running after an
//! event is emitted; they exist for logging, metrics and UI refreshes.

use std::sync::Arc;

/// Runtime events emitted by an [`AudioGraph`](crate::AudioGraph).
///
/// # Example
///
/// ```
/// use audio_graph::GraphEvent;
///
/// fn handle_event(event: GraphEvent) {
///     match event {
///         GraphEvent::GraphChanging => {}
///         GraphEvent::GraphChanged => eprintln!("effect chain changed"),
///         GraphEvent::OutputDeviceChanged { buffer_size, sample_rate } => {
///             eprintln!("output now {}Hz, {} frames", sample_rate, buffer_size);
///         }
///         GraphEvent::EngineStartFailed { reason } => {
///             eprintln!("engine silent: {}", reason);
///         }
///         GraphEvent::RenderBuffersDropped { count } => {
///             eprintln!("observer missed {} buffers", count);
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// An audio unit is about to be inserted or removed.
    GraphChanging,

    /// An audio unit insertion or removal completed.
    GraphChanged,

    /// The output hardware changed and the engine was restarted on it.
    OutputDeviceChanged {
        /// Buffer size of the new device in frames.
        buffer_size: u32,
        /// Sample rate of the new device in Hz.
        sample_rate: u32,
    },

    /// The engine could not be started.
    ///
    /// The chain is still attached and connected, producing silence.
    EngineStartFailed {
        /// Reason reported by the runtime.
        reason: String,
    },

    /// The render tap dropped buffers because the observer fell behind.
    ///
    /// Observers receive best-effort snapshots; this reports how many were
    /// skipped since the previous report.
    RenderBuffersDropped {
        /// Number of buffers dropped.
        count: u64,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`AudioGraphBuilder::on_event()`].
///
/// [`AudioGraphBuilder::on_event()`]: crate::AudioGraphBuilder::on_event
pub type EventCallback = Arc<dyn Fn(GraphEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use audio_graph::{event_callback, GraphEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(GraphEvent::GraphChanged);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(GraphEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_event_debug() {
        let event = GraphEvent::RenderBuffersDropped { count: 7 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("RenderBuffersDropped"));
        assert!(debug.contains('7'));
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |event| {
            if event == GraphEvent::GraphChanged {
                called_clone.store(true, Ordering::SeqCst);
            }
        });

        callback(GraphEvent::GraphChanged);
        assert!(called.load(Ordering::SeqCst));
    }
}
