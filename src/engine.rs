//! Engine lifecycle around a node chain.

use std::fmt;

use crate::chain::NodeChain;
use crate::format::AudioFormat;
use crate::node::{NodeId, ProcessingNode};
use crate::runtime::{AudioRuntime, Endpoint};
use crate::GraphError;

/// Lifecycle state of a [`GraphEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing attached.
    Idle,
    /// Chain attached and connected, not rendering. Also the stopped state.
    Built,
    /// Rendering.
    Running,
}

impl EngineState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Built => "built",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the runtime and the chain and sequences their lifecycle.
///
/// ```text
/// Idle --build()--> Built --start()--> Running
///                   Built <--stop()--- Running
/// any  --restart()--> Running (Built if the runtime refuses to start)
/// any  --tear_down()--> Idle
/// ```
///
/// Out-of-order calls are rejected with `InvalidState` instead of producing
/// a half-built graph.
pub struct GraphEngine {
    runtime: Box<dyn AudioRuntime>,
    chain: NodeChain,
    state: EngineState,
}

impl GraphEngine {
    /// Creates an idle engine.
    pub fn new(runtime: Box<dyn AudioRuntime>, chain: NodeChain) -> Self {
        Self {
            runtime,
            chain,
            state: EngineState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Returns `true` while rendering.
    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// The chain.
    pub fn chain(&self) -> &NodeChain {
        &self.chain
    }

    /// The runtime.
    pub fn runtime(&self) -> &dyn AudioRuntime {
        self.runtime.as_ref()
    }

    /// The runtime, mutably. Topology changes must go through the engine.
    pub(crate) fn runtime_mut(&mut self) -> &mut dyn AudioRuntime {
        self.runtime.as_mut()
    }

    /// Attaches and connects the chain.
    pub fn build(&mut self) -> Result<(), GraphError> {
        self.require(&[EngineState::Idle], "build")?;
        self.chain.attach(self.runtime.as_mut());
        self.chain.connect(self.runtime.as_mut());
        self.state = EngineState::Built;
        Ok(())
    }

    /// Starts rendering.
    ///
    /// Calling this while running re-opens the output (after a device
    /// change) without touching any edge. On failure the error is logged and
    /// returned; the chain stays attached and connected but silent.
    pub fn start(&mut self) -> Result<(), GraphError> {
        self.require(&[EngineState::Built, EngineState::Running], "start")?;
        match self.runtime.start() {
            Ok(()) => {
                if self.state != EngineState::Running {
                    tracing::info!(nodes = self.chain.node_count(), "Audio engine started");
                }
                self.state = EngineState::Running;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Audio engine failed to start: {}", e);
                self.state = EngineState::Built;
                Err(match e {
                    GraphError::EngineStart { .. } => e,
                    other => GraphError::engine_start(other.to_string()),
                })
            }
        }
    }

    /// Stops rendering. Idempotent.
    pub fn stop(&mut self) {
        self.runtime.stop();
        if self.state == EngineState::Running {
            self.state = EngineState::Built;
            tracing::info!("Audio engine stopped");
        }
    }

    /// Tears the whole graph down and rebuilds it.
    ///
    /// Every edge is disconnected and every node detached in one pass, then
    /// the chain is reattached, connected and started. Node state such as
    /// reverb and delay tails is cleared on the way.
    pub fn restart(&mut self) -> Result<(), GraphError> {
        tracing::info!(state = %self.state, "Restarting audio engine");
        self.stop();
        if self.state != EngineState::Idle {
            self.chain.detach(self.runtime.as_mut());
        }
        for node in self.chain.nodes() {
            node.reset();
        }
        self.state = EngineState::Idle;
        self.build()?;
        self.start()
    }

    /// Stops and detaches everything.
    pub fn tear_down(&mut self) {
        if self.state == EngineState::Idle {
            return;
        }
        self.stop();
        self.chain.detach(self.runtime.as_mut());
        self.state = EngineState::Idle;
        tracing::info!("Audio engine torn down");
    }

    /// Inserts a removable node. See [`NodeChain::insert`].
    pub fn insert_node(&mut self, node: ProcessingNode) -> Result<usize, GraphError> {
        self.require(&[EngineState::Built, EngineState::Running], "insert")?;
        Ok(self.chain.insert(node, self.runtime.as_mut()))
    }

    /// Removes removable nodes. See [`NodeChain::remove`].
    pub fn remove_nodes(&mut self, indices: &[usize]) -> Result<Vec<ProcessingNode>, GraphError> {
        self.require(&[EngineState::Built, EngineState::Running], "remove")?;
        self.chain.remove(indices, self.runtime.as_mut())
    }

    /// Rebuilds one edge with an explicit format. See [`NodeChain::reconnect`].
    pub fn reconnect(
        &mut self,
        from: NodeId,
        to: Endpoint,
        format: AudioFormat,
    ) -> Result<(), GraphError> {
        self.require(&[EngineState::Built, EngineState::Running], "reconnect")?;
        self.chain.reconnect(from, to, format, self.runtime.as_mut())
    }

    fn require(&self, allowed: &[EngineState], operation: &'static str) -> Result<(), GraphError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(GraphError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }
}

impl fmt::Debug for GraphEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEngine")
            .field("state", &self.state)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}
