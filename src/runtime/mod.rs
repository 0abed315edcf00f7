//! The real-time audio runtime boundary.
//!
//! An [`AudioRuntime`] owns the attached nodes and the edges between them and
//! drives rendering on its own audio thread. Control-side calls mutate a
//! staged topology; [`AudioRuntime::commit`] publishes it to the render side
//! in one step so the audio thread never observes a half-repaired chain.
//!
//! Two implementations ship with the crate:
//!
//! - [`CpalRuntime`]: renders to an output device through CPAL
//! - [`MockRuntime`]: in-memory runtime for tests and demos

mod mock;
mod output;
mod topology;

pub use output::CpalRuntime;
pub use mock::MockRuntime;
pub use topology::Edge;
pub(crate) use topology::{Topology, Violation};

use std::fmt;
use std::sync::Arc;

use crate::format::AudioFormat;
use crate::node::{NodeId, ProcessingNode};
use crate::GraphError;

/// Target of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Input of an attached node.
    Node(NodeId),
    /// The terminal output.
    Sink,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Sink => f.write_str("sink"),
        }
    }
}

impl From<NodeId> for Endpoint {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// Metadata of one rendered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderInfo {
    /// Frame position of the first frame in the block.
    pub sample_time: u64,
    /// Number of frames in the block.
    pub frame_count: u32,
    /// Format of the block.
    pub format: AudioFormat,
}

/// Receives every rendered block on the audio thread.
///
/// `post_render` must not allocate, lock, block or perform I/O.
pub trait RenderSink: Send {
    /// Called after each block has been rendered to the sink.
    fn post_render(&mut self, info: RenderInfo, samples: &[f32]);
}

/// Notification fired by the runtime outside the audio thread.
pub type Notification = Arc<dyn Fn() + Send + Sync>;

/// The three callbacks a render observer installs.
pub struct RenderCallbacks {
    /// Post-render hook, runs on the audio thread.
    pub render: Box<dyn RenderSink>,
    /// Fired when the output hardware changes.
    pub device_changed: Notification,
    /// Fired when the output sample rate changes.
    pub sample_rate_changed: Notification,
}

/// The native runtime a [`GraphEngine`](crate::GraphEngine) drives.
///
/// Topology calls are staged and become audible on [`commit`](Self::commit).
/// Callers must disconnect a node before detaching it.
pub trait AudioRuntime: Send {
    /// Attaches a node so it can be connected.
    fn attach(&mut self, node: &ProcessingNode);

    /// Detaches a node. It must no longer be connected.
    fn detach(&mut self, id: NodeId);

    /// Returns `true` if the node is attached.
    fn is_attached(&self, id: NodeId) -> bool;

    /// Connects a node's output to an endpoint, optionally forcing a format.
    fn connect(&mut self, from: NodeId, to: Endpoint, format: Option<AudioFormat>);

    /// Removes the edge leaving a node, if any.
    fn disconnect_output(&mut self, id: NodeId);

    /// Removes the edge entering an endpoint, if any.
    fn disconnect_input(&mut self, to: Endpoint);

    /// Publishes the staged topology to the render side.
    fn commit(&mut self);

    /// Starts rendering, or re-opens the output if already running.
    fn start(&mut self) -> Result<(), GraphError>;

    /// Stops rendering. Idempotent.
    fn stop(&mut self);

    /// Returns `true` while rendering.
    fn is_running(&self) -> bool;

    /// Format of the terminal output.
    fn output_format(&self) -> AudioFormat;

    /// Installs render observer callbacks, replacing any previous ones.
    fn install_render_callbacks(&mut self, callbacks: RenderCallbacks);

    /// Removes render observer callbacks. Safe to call when none are installed.
    fn remove_render_callbacks(&mut self);

    /// Returns `true` if render observer callbacks are installed.
    fn has_render_callbacks(&self) -> bool;

    /// Sets the handler fired when the output configuration changes
    /// (device swap, hot-unplug, sample rate change).
    fn set_configuration_change_handler(&mut self, handler: Notification);
}
