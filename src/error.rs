//! Error types for audio-graph.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`GraphError`]): A topology or lifecycle operation was
//!   rejected and nothing was changed, or the backend refused a request
//! - **Recoverable events**: Runtime issues surfaced via [`EventCallback`](crate::EventCallback)

use std::path::PathBuf;

/// Errors returned by graph construction, topology mutations and the
/// engine lifecycle.
///
/// Topology errors (`IndexOutOfRange`, `UnsortedIndices`, `DuplicateIndex`,
/// `NotAdjacent`) are always detected before any edge is touched, so a
/// rejected call leaves the chain exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A node chain was created without any permanent node.
    #[error("node chain requires at least one permanent node")]
    EmptyChain,

    /// A removable index does not refer to an existing removable node.
    #[error("removable index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of removable nodes at the time of the call.
        len: usize,
    },

    /// Removal indices were not sorted in descending order.
    #[error("removal indices must be sorted descending")]
    UnsortedIndices,

    /// A removal index was given more than once.
    #[error("duplicate removal index: {index}")]
    DuplicateIndex {
        /// The repeated index.
        index: usize,
    },

    /// Two endpoints passed to `reconnect` are not neighbours in the chain.
    #[error("{from} does not feed {to} directly")]
    NotAdjacent {
        /// Description of the upstream endpoint.
        from: String,
        /// Description of the downstream endpoint.
        to: String,
    },

    /// A node id is not part of the chain.
    #[error("unknown node: {id}")]
    UnknownNode {
        /// Id of the node that was not found.
        id: u64,
    },

    /// An engine operation was called in a state that does not allow it.
    #[error("cannot {operation} while engine is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the engine was in.
        state: &'static str,
    },

    /// The audio runtime refused to start.
    ///
    /// The chain stays attached and connected; retry `start()` or escalate
    /// to `restart()`.
    #[error("audio engine failed to start: {reason}")]
    EngineStart {
        /// Reason reported by the runtime.
        reason: String,
    },

    /// The requested output device was not found.
    #[error("output device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// No output device is available on this system.
    #[error("no output device available")]
    NoOutputDevice,

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// The audio unit host could not create the requested unit.
    #[error("unknown audio unit type {component_type:#010x}/{component_subtype:#010x}")]
    UnknownAudioUnit {
        /// Component type code.
        component_type: u32,
        /// Component sub-type code.
        component_subtype: u32,
    },

    /// A render observer was registered outside a tokio runtime.
    #[error("render observers require a running tokio runtime")]
    NoAsyncRuntime,

    /// Reading or writing persisted state failed.
    #[error("persistence error: {path}: {source}")]
    Persistence {
        /// Path of the state file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Persisted state could not be encoded or decoded.
    #[error("invalid persisted state: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Creates a backend error from any displayable error.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::BackendError(err.to_string())
    }

    /// Creates an engine start error with the given reason.
    pub fn engine_start(reason: impl Into<String>) -> Self {
        Self::EngineStart {
            reason: reason.into(),
        }
    }

    /// Creates a persistence error for the given path.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_out_of_range_display() {
        let err = GraphError::IndexOutOfRange { index: 4, len: 2 };
        assert_eq!(err.to_string(), "removable index 4 out of range (len 2)");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = GraphError::InvalidState {
            operation: "start",
            state: "idle",
        };
        assert_eq!(err.to_string(), "cannot start while engine is idle");
    }

    #[test]
    fn test_unknown_audio_unit_display() {
        let err = GraphError::UnknownAudioUnit {
            component_type: 0x6175_6678,
            component_subtype: 1,
        };
        assert_eq!(
            err.to_string(),
            "unknown audio unit type 0x61756678/0x00000001"
        );
    }

    #[test]
    fn test_engine_start_helper() {
        let err = GraphError::engine_start("device busy");
        assert_eq!(err.to_string(), "audio engine failed to start: device busy");
    }

    #[test]
    fn test_persistence_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = GraphError::persistence("/tmp/graph.json", io_err);
        assert!(err.to_string().contains("/tmp/graph.json"));
    }
}
