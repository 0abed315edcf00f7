//! Staged node/edge bookkeeping shared by the runtimes.

use std::fmt;

use crate::format::AudioFormat;
use crate::node::{NodeId, ProcessingNode};
use crate::runtime::Endpoint;

/// A directed connection between a node output and an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Upstream node.
    pub from: NodeId,
    /// Downstream endpoint.
    pub to: Endpoint,
    /// Format forced on this edge, `None` for negotiated.
    pub format: Option<AudioFormat>,
}

/// A topology call that would corrupt the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Violation {
    NotAttached(NodeId),
    OutputInUse(NodeId),
    InputInUse(Endpoint),
    DetachedWhileConnected(NodeId),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAttached(id) => write!(f, "node {id} is not attached"),
            Self::OutputInUse(id) => write!(f, "output of node {id} already connected"),
            Self::InputInUse(to) => write!(f, "input of {to} already connected"),
            Self::DetachedWhileConnected(id) => {
                write!(f, "node {id} detached while still connected")
            }
        }
    }
}

/// Attached nodes plus the edges between them.
///
/// Every node has at most one output edge and every endpoint at most one
/// input edge. Calls that would break this are rejected with a [`Violation`]
/// and leave the topology untouched.
#[derive(Debug, Default, Clone)]
pub(crate) struct Topology {
    nodes: Vec<ProcessingNode>,
    edges: Vec<Edge>,
}

impl Topology {
    pub fn attach(&mut self, node: &ProcessingNode) {
        if !self.is_attached(node.id()) {
            self.nodes.push(node.clone());
        }
    }

    pub fn detach(&mut self, id: NodeId) -> Result<(), Violation> {
        if self.is_connected(id) {
            return Err(Violation::DetachedWhileConnected(id));
        }
        self.nodes.retain(|n| n.id() != id);
        Ok(())
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id() == id)
    }

    pub fn connect(
        &mut self,
        from: NodeId,
        to: Endpoint,
        format: Option<AudioFormat>,
    ) -> Result<(), Violation> {
        if !self.is_attached(from) {
            return Err(Violation::NotAttached(from));
        }
        if let Endpoint::Node(id) = to {
            if !self.is_attached(id) {
                return Err(Violation::NotAttached(id));
            }
        }
        if self.output_of(from).is_some() {
            return Err(Violation::OutputInUse(from));
        }
        if self.input_of(to).is_some() {
            return Err(Violation::InputInUse(to));
        }
        self.edges.push(Edge { from, to, format });
        Ok(())
    }

    pub fn disconnect_output(&mut self, id: NodeId) {
        self.edges.retain(|e| e.from != id);
    }

    pub fn disconnect_input(&mut self, to: Endpoint) {
        self.edges.retain(|e| e.to != to);
    }

    pub fn nodes(&self) -> &[ProcessingNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn output_of(&self, id: NodeId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.from == id)
    }

    pub fn input_of(&self, to: Endpoint) -> Option<&Edge> {
        self.edges.iter().find(|e| e.to == to)
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.edges
            .iter()
            .any(|e| e.from == id || e.to == Endpoint::Node(id))
    }

    /// Follows output edges from `start`, returning every endpoint reached.
    ///
    /// Stops at the first endpoint without an output edge, or when a node
    /// repeats.
    pub fn walk_from(&self, start: NodeId) -> Vec<Endpoint> {
        let mut path = vec![Endpoint::Node(start)];
        let mut current = start;
        while let Some(edge) = self.output_of(current) {
            if path.contains(&edge.to) {
                break;
            }
            path.push(edge.to);
            match edge.to {
                Endpoint::Node(next) => current = next,
                Endpoint::Sink => break,
            }
        }
        path
    }

    /// Nodes feeding the sink, in signal order.
    ///
    /// Walks input edges back from the sink; nodes not on that path are not
    /// rendered.
    pub fn render_order(&self) -> Vec<ProcessingNode> {
        let mut order = Vec::new();
        let mut to = Endpoint::Sink;
        while let Some(edge) = self.input_of(to) {
            let Some(node) = self.nodes.iter().find(|n| n.id() == edge.from) else {
                break;
            };
            if order.iter().any(|n: &ProcessingNode| n.id() == edge.from) {
                break;
            }
            order.push(node.clone());
            to = Endpoint::Node(edge.from);
        }
        order.reverse();
        order
    }
}
