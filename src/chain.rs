//! Ordered node chain and its topology repair algorithms.

use crate::format::AudioFormat;
use crate::node::{NodeId, ProcessingNode};
use crate::runtime::{AudioRuntime, Endpoint};
use crate::GraphError;

/// One removed node together with the neighbours it is bridged between.
#[derive(Debug, Clone, Copy)]
struct Rewire {
    node: NodeId,
    predecessor: NodeId,
    successor: Endpoint,
}

/// An ordered, linear chain of processing nodes ending at the sink.
///
/// The chain is split into a permanent prefix, which is never removed, and a
/// removable suffix of user-managed effect nodes. Removable indices always
/// refer to positions within the suffix.
///
/// Every mutation ends with [`AudioRuntime::commit`], so the render side only
/// ever sees the chain before or after a repair.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioFormat, Endpoint, MockRuntime, NodeChain, ProcessingNode};
///
/// let mut runtime = MockRuntime::new(AudioFormat::cd());
/// let source = ProcessingNode::passthrough("source");
/// let eq = ProcessingNode::passthrough("eq");
///
/// let mut chain = NodeChain::new(vec![source.clone()], vec![])?;
/// chain.attach(&mut runtime);
/// chain.connect(&mut runtime);
///
/// let index = chain.insert(eq.clone(), &mut runtime);
/// assert_eq!(index, 0);
/// assert_eq!(
///     runtime.walk_from(source.id()),
///     vec![Endpoint::Node(source.id()), Endpoint::Node(eq.id()), Endpoint::Sink]
/// );
/// # Ok::<(), audio_graph::GraphError>(())
/// ```
#[derive(Debug, Clone)]
pub struct NodeChain {
    permanent: Vec<ProcessingNode>,
    removable: Vec<ProcessingNode>,
}

impl NodeChain {
    /// Creates a chain.
    ///
    /// # Errors
    ///
    /// Returns `EmptyChain` if `permanent` is empty.
    pub fn new(
        permanent: Vec<ProcessingNode>,
        removable: Vec<ProcessingNode>,
    ) -> Result<Self, GraphError> {
        if permanent.is_empty() {
            return Err(GraphError::EmptyChain);
        }
        Ok(Self {
            permanent,
            removable,
        })
    }

    /// The permanent prefix.
    pub fn permanent(&self) -> &[ProcessingNode] {
        &self.permanent
    }

    /// The removable suffix.
    pub fn removable(&self) -> &[ProcessingNode] {
        &self.removable
    }

    /// All nodes in signal order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProcessingNode> {
        self.permanent.iter().chain(self.removable.iter())
    }

    /// Total number of nodes. Never zero.
    pub fn node_count(&self) -> usize {
        self.permanent.len() + self.removable.len()
    }

    /// The head of the chain.
    pub fn first(&self) -> &ProcessingNode {
        &self.permanent[0]
    }

    /// The node connected to the sink.
    pub fn last(&self) -> &ProcessingNode {
        match self.removable.last() {
            Some(node) => node,
            None => &self.permanent[self.permanent.len() - 1],
        }
    }

    /// Position of a node in signal order.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes().position(|n| n.id() == id)
    }

    /// Where a node's output goes according to chain order.
    pub fn successor_of(&self, id: NodeId) -> Option<Endpoint> {
        let position = self.position(id)?;
        Some(
            self.nodes()
                .nth(position + 1)
                .map_or(Endpoint::Sink, |n| Endpoint::Node(n.id())),
        )
    }

    /// Attaches every node in order.
    pub fn attach(&self, runtime: &mut dyn AudioRuntime) {
        for node in self.nodes() {
            runtime.attach(node);
        }
    }

    /// Connects every adjacent pair, then the last node to the sink.
    ///
    /// With a single node, that node is connected directly to the sink.
    pub fn connect(&self, runtime: &mut dyn AudioRuntime) {
        let nodes: Vec<&ProcessingNode> = self.nodes().collect();
        for pair in nodes.windows(2) {
            runtime.connect(pair[0].id(), Endpoint::Node(pair[1].id()), None);
        }
        runtime.connect(self.last().id(), Endpoint::Sink, None);
        runtime.commit();

        tracing::debug!(nodes = nodes.len(), "Node chain connected");
    }

    /// Disconnects every edge, then detaches every node.
    pub fn detach(&self, runtime: &mut dyn AudioRuntime) {
        for node in self.nodes() {
            runtime.disconnect_output(node.id());
        }
        for node in self.nodes() {
            runtime.detach(node.id());
        }
        runtime.commit();
    }

    /// Appends a node to the removable suffix and splices it in before the
    /// sink.
    ///
    /// Returns the new node's removable index.
    pub fn insert(&mut self, node: ProcessingNode, runtime: &mut dyn AudioRuntime) -> usize {
        let former_last = self.last().id();

        runtime.disconnect_output(former_last);
        runtime.attach(&node);
        runtime.connect(former_last, Endpoint::Node(node.id()), None);
        runtime.connect(node.id(), Endpoint::Sink, None);
        runtime.commit();

        tracing::debug!(node = node.name(), id = %node.id(), "Node inserted");
        self.removable.push(node);
        self.removable.len() - 1
    }

    /// Removes removable nodes and bridges the gaps they leave.
    ///
    /// `indices` must be valid removable indices sorted strictly descending.
    /// Every removed node's neighbours are resolved against the chain as it
    /// is before the call: the predecessor is the nearest surviving node
    /// upstream (or the last permanent node), the successor the nearest
    /// surviving node downstream (or the sink). A contiguous run therefore
    /// collapses into a single bridging edge.
    ///
    /// Removed nodes are rewired first and detached afterwards, so no node is
    /// detached while connected. Returns the removed nodes in the order of
    /// `indices`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange`, `DuplicateIndex` or `UnsortedIndices`
    /// without touching the chain.
    pub fn remove(
        &mut self,
        indices: &[usize],
        runtime: &mut dyn AudioRuntime,
    ) -> Result<Vec<ProcessingNode>, GraphError> {
        self.validate_removal(indices)?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let plan: Vec<Rewire> = indices
            .iter()
            .map(|&index| self.resolve_neighbours(index, indices))
            .collect();

        for rewire in &plan {
            runtime.disconnect_output(rewire.predecessor);
            runtime.disconnect_input(rewire.successor);
            runtime.disconnect_output(rewire.node);
            runtime.connect(rewire.predecessor, rewire.successor, None);
        }

        for rewire in &plan {
            runtime.detach(rewire.node);
        }
        let removed: Vec<ProcessingNode> = indices
            .iter()
            .map(|&index| self.removable.remove(index))
            .collect();
        runtime.commit();

        tracing::debug!(
            removed = removed.len(),
            remaining = self.removable.len(),
            "Nodes removed"
        );
        Ok(removed)
    }

    /// Rebuilds the edge between two adjacent endpoints with an explicit
    /// format, bypassing format negotiation.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `from` is not in the chain and `NotAdjacent`
    /// if `from` does not feed `to` directly.
    pub fn reconnect(
        &self,
        from: NodeId,
        to: Endpoint,
        format: AudioFormat,
        runtime: &mut dyn AudioRuntime,
    ) -> Result<(), GraphError> {
        let successor = self
            .successor_of(from)
            .ok_or(GraphError::UnknownNode { id: from.get() })?;
        if successor != to {
            return Err(GraphError::NotAdjacent {
                from: Endpoint::Node(from).to_string(),
                to: to.to_string(),
            });
        }

        runtime.disconnect_output(from);
        runtime.connect(from, to, Some(format));
        runtime.commit();

        tracing::debug!(from = %from, %to, %format, "Edge reconnected");
        Ok(())
    }

    fn validate_removal(&self, indices: &[usize]) -> Result<(), GraphError> {
        let len = self.removable.len();
        let mut previous: Option<usize> = None;
        for &index in indices {
            if index >= len {
                return Err(GraphError::IndexOutOfRange { index, len });
            }
            if let Some(previous) = previous {
                if index == previous {
                    return Err(GraphError::DuplicateIndex { index });
                }
                if index > previous {
                    return Err(GraphError::UnsortedIndices);
                }
            }
            previous = Some(index);
        }
        Ok(())
    }

    fn resolve_neighbours(&self, index: usize, removing: &[usize]) -> Rewire {
        let last_permanent = self.permanent[self.permanent.len() - 1].id();

        let predecessor = (0..index)
            .rev()
            .find(|i| !removing.contains(i))
            .map_or(last_permanent, |i| self.removable[i].id());

        let successor = (index + 1..self.removable.len())
            .find(|i| !removing.contains(i))
            .map_or(Endpoint::Sink, |i| Endpoint::Node(self.removable[i].id()));

        Rewire {
            node: self.removable[index].id(),
            predecessor,
            successor,
        }
    }
}
