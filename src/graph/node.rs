//! Node handles and materialization states of the dependency graph.
//!
//! This module provides [`NodeId`], the strongly-typed handle through which nodes reference each
//! other, and [`NodeState`], the monotonic lifecycle every node goes through.

use std::fmt;

/// A strongly-typed handle to a node stored in a [`NodeArena`](crate::graph::NodeArena).
///
/// `NodeId` wraps the node's position in the arena. Handles are assigned sequentially when
/// nodes are created and stay valid for the lifetime of the arena, since nodes are never
/// removed or replaced.
///
/// Handle values depend on discovery order and therefore on scheduling. They must never leak
/// into emitted output; anything persisted refers to nodes by [`NodeKey`](crate::nodes::NodeKey)
/// or by portable token.
///
/// # Examples
///
/// ```rust
/// use aotgraph::graph::NodeId;
///
/// let node = NodeId::new(5);
/// assert_eq!(node.index(), 5);
/// assert_eq!(node.to_string(), "n5");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    ///
    /// This constructor is primarily intended for testing. Normal usage obtains `NodeId`
    /// values from the arena.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node handle.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

/// The materialization state of a node.
///
/// States only ever advance: `Unmarked -> Marked -> Expanded -> Emitted`. The ordering of the
/// variants is the ordering of the lifecycle, so "at least Marked" is `state >= Marked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// Created but not yet known to be required
    Unmarked = 0,
    /// Required by a root; dependencies not yet computed
    Marked = 1,
    /// Dependencies computed and enqueued
    Expanded = 2,
    /// Output produced
    Emitted = 3,
}

impl NodeState {
    /// Converts the raw atomic representation back into a state.
    ///
    /// Values beyond the last state saturate to [`NodeState::Emitted`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeState::Unmarked,
            1 => NodeState::Marked,
            2 => NodeState::Expanded,
            _ => NodeState::Emitted,
        }
    }

    /// Returns `true` once the node is part of the output.
    #[must_use]
    pub const fn is_marked(self) -> bool {
        !matches!(self, NodeState::Unmarked)
    }
}
