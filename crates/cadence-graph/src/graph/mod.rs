//! Graph construction and compilation.
//!
//! The graph is built in two phases, mirroring a mutation-side builder and an
//! audio-side snapshot:
//!
//! - [`NodeGraph`] is an arena owned by the control thread. Nodes are added
//!   to it and refer to each other by [`NodeKey`].
//! - [`NodeGraph::build`] runs the transform (cycle check, property
//!   resolution, latency balancing, topological ordering) and yields an
//!   [`ExecutionPlan`]. Preparing that plan for a sample rate and block size
//!   gives the immutable [`PreparedPlan`] the players render.
//!
//! # Example
//!
//! ```rust
//! use cadence_graph::graph::NodeGraph;
//! use cadence_graph::nodes::{GainNode, SinNode};
//! use cadence_graph::NodeId;
//!
//! let mut graph = NodeGraph::new();
//! let sine = graph.add(SinNode::new(NodeId(1), 440.0, 1));
//! let gain = graph.add(GainNode::new(NodeId(2), sine, 0.5));
//! let plan = graph.build(gain).unwrap();
//! assert_eq!(plan.len(), 2);
//! ```

pub mod plan;
mod transform;

use std::fmt;

use thiserror::Error;

use crate::node::{Node, NodeId};

pub use plan::{ExecutionPlan, LatencyCompensation, PreparedPlan};

/// Handle to a node slot in a [`NodeGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

impl NodeKey {
    /// Slot index inside the graph.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key[{}]", self.0)
    }
}

/// Errors detected while building a graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A key does not belong to this graph.
    #[error("{0} does not belong to this graph")]
    UnknownNode(NodeKey),
    /// A reserved slot was never filled.
    #[error("{0} was reserved but never given a node")]
    UnfilledSlot(NodeKey),
    /// A slot already holds a node.
    #[error("{0} already holds a node")]
    SlotOccupied(NodeKey),
    /// The inputs of a node lead back to itself.
    #[error("cycle detected through {0}")]
    CycleDetected(NodeKey),
    /// Two reachable nodes declare the same id.
    #[error("node id {0} is used by more than one node")]
    DuplicateNodeId(NodeId),
}

/// Arena of nodes under construction.
#[derive(Default)]
pub struct NodeGraph {
    slots: Vec<Option<Box<dyn Node>>>,
}

impl fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGraph").field("slots", &self.slots.len()).finish()
    }
}

impl NodeGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // --- Node mutations ---

    /// Adds a node and returns its key.
    pub fn add(&mut self, node: impl Node) -> NodeKey {
        self.add_boxed(Box::new(node))
    }

    /// Adds an already boxed node.
    pub fn add_boxed(&mut self, node: Box<dyn Node>) -> NodeKey {
        let key = NodeKey(self.slots.len());
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: {} at {key}", node.name());
        self.slots.push(Some(node));
        key
    }

    /// Reserves a key to be filled later with [`insert`](Self::insert).
    ///
    /// Lets a node refer to one that is created after it (a feedback send, for
    /// instance); [`build`](Self::build) rejects any cycle this creates.
    pub fn reserve(&mut self) -> NodeKey {
        let key = NodeKey(self.slots.len());
        self.slots.push(None);
        key
    }

    /// Fills a reserved slot.
    pub fn insert(&mut self, key: NodeKey, node: impl Node) -> Result<(), GraphError> {
        let slot = self.slots.get_mut(key.0).ok_or(GraphError::UnknownNode(key))?;
        if slot.is_some() {
            return Err(GraphError::SlotOccupied(key));
        }
        *slot = Some(Box::new(node));
        Ok(())
    }

    /// The node at `key`, if the slot is filled.
    pub fn get(&self, key: NodeKey) -> Option<&dyn Node> {
        self.slots.get(key.0)?.as_deref()
    }

    /// Number of slots, filled or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // --- Compilation ---

    /// Compiles the graph rooted at `root` into an execution plan.
    ///
    /// Nodes not reachable from `root` are dropped.
    pub fn build(self, root: NodeKey) -> Result<ExecutionPlan, GraphError> {
        transform::build(self.slots, root)
    }
}
