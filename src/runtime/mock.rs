//! Mock audio runtime for testing without hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::format::AudioFormat;
use crate::node::{NodeId, ProcessingNode};
use crate::runtime::{
    AudioRuntime, Edge, Endpoint, Notification, RenderCallbacks, RenderInfo, Topology, Violation,
};
use crate::GraphError;

#[derive(Default)]
struct MockState {
    topology: Topology,
    committed: Vec<ProcessingNode>,
    committed_edges: Vec<Edge>,
    commits: usize,
    running: bool,
    starts: usize,
    start_failure: Option<String>,
    format: AudioFormat,
    sample_time: u64,
    violations: Vec<String>,
    callbacks: Option<RenderCallbacks>,
    config_handler: Option<Notification>,
}

impl MockState {
    fn record(&mut self, result: Result<(), Violation>) {
        if let Err(violation) = result {
            self.violations.push(violation.to_string());
        }
    }
}

/// An in-memory [`AudioRuntime`] that renders on demand.
///
/// The mock keeps the same staged/committed split as a real runtime and
/// records every topology call that would corrupt the graph (double
/// connections, edges on detached nodes, detaching a connected node) instead
/// of applying it. Tests assert that [`violations()`](Self::violations) stays
/// empty.
///
/// Clones share state, so a test can hand one clone to the graph and keep
/// another to drive rendering and inspect edges.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioFormat, AudioRuntime, Endpoint, MockRuntime, ProcessingNode};
///
/// let mut runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
/// let node = ProcessingNode::passthrough("source");
/// runtime.attach(&node);
/// runtime.connect(node.id(), Endpoint::Sink, None);
/// runtime.commit();
/// runtime.start().unwrap();
///
/// let out = runtime.render(&[0.5, 0.5]);
/// assert_eq!(out, vec![0.5, 0.5]);
/// assert!(runtime.violations().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    /// Creates a mock runtime with the given output format.
    pub fn new(format: AudioFormat) -> Self {
        let runtime = Self::default();
        runtime.state.lock().format = format;
        runtime
    }

    /// Makes every following `start()` fail with the given reason, or succeed
    /// again with `None`.
    pub fn set_start_failure(&self, reason: Option<&str>) {
        self.state.lock().start_failure = reason.map(str::to_string);
    }

    /// Staged edges.
    pub fn edges(&self) -> Vec<Edge> {
        self.state.lock().topology.edges().to_vec()
    }

    /// Edges as of the last commit.
    pub fn committed_edges(&self) -> Vec<Edge> {
        self.state.lock().committed_edges.clone()
    }

    /// Number of commits so far.
    pub fn commit_count(&self) -> usize {
        self.state.lock().commits
    }

    /// Ids of attached nodes, in attach order.
    pub fn attached(&self) -> Vec<NodeId> {
        self.state
            .lock()
            .topology
            .nodes()
            .iter()
            .map(ProcessingNode::id)
            .collect()
    }

    /// Topology calls that were rejected.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Number of successful `start()` calls.
    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    /// Follows staged output edges from a node.
    pub fn walk_from(&self, id: NodeId) -> Vec<Endpoint> {
        self.state.lock().topology.walk_from(id)
    }

    /// Endpoint a node's output is connected to.
    pub fn successor(&self, id: NodeId) -> Option<Endpoint> {
        self.state.lock().topology.output_of(id).map(|e| e.to)
    }

    /// Format forced on a node's output edge.
    pub fn edge_format(&self, id: NodeId) -> Option<AudioFormat> {
        self.state
            .lock()
            .topology
            .output_of(id)
            .and_then(|e| e.format)
    }

    /// Names of the nodes the committed plan renders, in order.
    pub fn render_path(&self) -> Vec<String> {
        self.state
            .lock()
            .committed
            .iter()
            .map(|n| n.name().to_string())
            .collect()
    }

    /// Renders one block through the committed chain.
    ///
    /// Runs on the calling thread, which plays the part of the audio thread.
    /// Returns silence while stopped.
    pub fn render(&self, input: &[f32]) -> Vec<f32> {
        let mut state = self.state.lock();
        let mut block = input.to_vec();
        if !state.running {
            block.fill(0.0);
            return block;
        }

        let format = state.format;
        for node in &state.committed {
            if !node.is_bypassed() {
                node.processor().process(&mut block, format);
            }
        }

        let frames = block.len() / usize::from(format.channels.max(1));
        let info = RenderInfo {
            sample_time: state.sample_time,
            frame_count: frames as u32,
            format,
        };
        state.sample_time += frames as u64;
        if let Some(callbacks) = state.callbacks.as_mut() {
            callbacks.render.post_render(info, &block);
        }
        block
    }

    /// Simulates the output hardware changing.
    pub fn fire_device_change(&self) {
        let (observer, handler) = {
            let state = self.state.lock();
            (
                state.callbacks.as_ref().map(|c| Arc::clone(&c.device_changed)),
                state.config_handler.clone(),
            )
        };
        if let Some(notify) = observer {
            notify();
        }
        if let Some(notify) = handler {
            notify();
        }
    }

    /// Simulates the output switching to a new sample rate.
    pub fn fire_sample_rate_change(&self, sample_rate: u32) {
        let (observer, handler) = {
            let mut state = self.state.lock();
            state.format.sample_rate = sample_rate;
            (
                state
                    .callbacks
                    .as_ref()
                    .map(|c| Arc::clone(&c.sample_rate_changed)),
                state.config_handler.clone(),
            )
        };
        if let Some(notify) = observer {
            notify();
        }
        if let Some(notify) = handler {
            notify();
        }
    }
}

impl AudioRuntime for MockRuntime {
    fn attach(&mut self, node: &ProcessingNode) {
        self.state.lock().topology.attach(node);
    }

    fn detach(&mut self, id: NodeId) {
        let mut state = self.state.lock();
        let result = state.topology.detach(id);
        state.record(result);
    }

    fn is_attached(&self, id: NodeId) -> bool {
        self.state.lock().topology.is_attached(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint, format: Option<AudioFormat>) {
        let mut state = self.state.lock();
        let result = state.topology.connect(from, to, format);
        state.record(result);
    }

    fn disconnect_output(&mut self, id: NodeId) {
        self.state.lock().topology.disconnect_output(id);
    }

    fn disconnect_input(&mut self, to: Endpoint) {
        self.state.lock().topology.disconnect_input(to);
    }

    fn commit(&mut self) {
        let mut state = self.state.lock();
        state.committed = state.topology.render_order();
        state.committed_edges = state.topology.edges().to_vec();
        state.commits += 1;
    }

    fn start(&mut self) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.start_failure.clone() {
            state.running = false;
            return Err(GraphError::engine_start(reason));
        }
        state.running = true;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn output_format(&self) -> AudioFormat {
        self.state.lock().format
    }

    fn install_render_callbacks(&mut self, callbacks: RenderCallbacks) {
        self.state.lock().callbacks = Some(callbacks);
    }

    fn remove_render_callbacks(&mut self) {
        self.state.lock().callbacks = None;
    }

    fn has_render_callbacks(&self) -> bool {
        self.state.lock().callbacks.is_some()
    }

    fn set_configuration_change_handler(&mut self, handler: Notification) {
        self.state.lock().config_handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PlayerProcessor;

    #[test]
    fn test_mock_renders_committed_chain_only() {
        let mut runtime = MockRuntime::new(AudioFormat::new(48_000, 1));
        let player = ProcessingNode::new("player", Arc::new(PlayerProcessor::new(0.5, 0.0)));
        runtime.attach(&player);
        runtime.connect(player.id(), Endpoint::Sink, None);
        runtime.start().unwrap();

        // Not committed yet: nothing on the render path
        assert_eq!(runtime.render(&[1.0]), vec![1.0]);

        runtime.commit();
        assert_eq!(runtime.render(&[1.0]), vec![0.5]);
        assert_eq!(runtime.render_path(), ["player"]);
    }

    #[test]
    fn test_mock_silent_when_stopped() {
        let runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
        assert_eq!(runtime.render(&[1.0, 1.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_mock_records_violations() {
        let mut runtime = MockRuntime::default();
        let node = ProcessingNode::passthrough("a");
        runtime.connect(node.id(), Endpoint::Sink, None);
        assert_eq!(runtime.violations().len(), 1);
        assert!(runtime.edges().is_empty());
    }

    #[test]
    fn test_mock_start_failure() {
        let mut runtime = MockRuntime::default();
        runtime.set_start_failure(Some("no device"));
        assert!(runtime.start().is_err());
        assert!(!runtime.is_running());

        runtime.set_start_failure(None);
        runtime.start().unwrap();
        assert!(runtime.is_running());
        assert_eq!(runtime.start_count(), 1);
    }

    #[test]
    fn test_mock_sample_rate_change_updates_format() {
        let runtime = MockRuntime::new(AudioFormat::new(44_100, 2));
        runtime.fire_sample_rate_change(96_000);
        assert_eq!(runtime.output_format().sample_rate, 96_000);
    }
}
