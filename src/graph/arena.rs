//! Append-only node storage with an identity index.
//!
//! Nodes live in a lock-free `boxcar::Vec` and are addressed by [`NodeId`]. A `DashMap` maps
//! each logical key to its handle. Insertion goes through the map's entry API, so concurrent
//! callers racing on one key serialize on the entry and all observe the same handle, while
//! lookups of existing keys never block each other.

use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU8, Ordering},
        OnceLock,
    },
};

use dashmap::DashMap;

use crate::graph::{
    edge::DependencyEdge,
    node::{NodeId, NodeState},
};

/// A node of the dependency graph.
pub struct GraphNode<K> {
    key: K,
    state: AtomicU8,
    dependencies: OnceLock<Vec<DependencyEdge>>,
}

impl<K> GraphNode<K> {
    fn new(key: K) -> Self {
        GraphNode {
            key,
            state: AtomicU8::new(NodeState::Unmarked as u8),
            dependencies: OnceLock::new(),
        }
    }

    /// The logical identity of the node.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The current materialization state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The static dependencies recorded when the node was expanded.
    ///
    /// Empty until the node is expanded.
    pub fn dependencies(&self) -> &[DependencyEdge] {
        self.dependencies.get().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Arena of graph nodes keyed by logical identity.
pub struct NodeArena<K> {
    nodes: boxcar::Vec<GraphNode<K>>,
    index: DashMap<K, NodeId>,
}

impl<K> Default for NodeArena<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        NodeArena {
            nodes: boxcar::Vec::new(),
            index: DashMap::new(),
        }
    }
}

impl<K> NodeArena<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node for `key`, creating it in the Unmarked state if absent.
    ///
    /// Idempotent, including under concurrency: every caller passing an equal key receives
    /// the same handle, and exactly one node is created.
    pub fn get_or_create(&self, key: K) -> NodeId {
        if let Some(existing) = self.index.get(&key) {
            return *existing;
        }

        let entry = self.index.entry(key.clone());
        *entry.or_insert_with(|| NodeId(self.nodes.push(GraphNode::new(key))))
    }

    /// Looks up the node for `key` without creating it.
    pub fn find(&self, key: &K) -> Option<NodeId> {
        self.index.get(key).map(|id| *id)
    }

    /// Returns the node behind a handle.
    pub fn get(&self, id: NodeId) -> Option<&GraphNode<K>> {
        self.nodes.get(id.index())
    }

    /// Returns the key of a node.
    pub fn key(&self, id: NodeId) -> Option<&K> {
        self.get(id).map(GraphNode::key)
    }

    /// Returns the state of a node; unknown handles read as [`NodeState::Unmarked`].
    pub fn state(&self, id: NodeId) -> NodeState {
        self.get(id).map_or(NodeState::Unmarked, GraphNode::state)
    }

    /// Marks a node, returning `true` only for the call that moved it out of Unmarked.
    pub fn try_mark(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|node| {
            node.state
                .compare_exchange(
                    NodeState::Unmarked as u8,
                    NodeState::Marked as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        })
    }

    /// Advances a node to at least `state`. States never move backwards.
    pub fn advance(&self, id: NodeId, state: NodeState) {
        if let Some(node) = self.get(id) {
            node.state.fetch_max(state as u8, Ordering::AcqRel);
        }
    }

    /// Records the static dependencies of a node; only the first call has an effect.
    pub fn set_dependencies(&self, id: NodeId, dependencies: Vec<DependencyEdge>) -> bool {
        self.get(id)
            .is_some_and(|node| node.dependencies.set(dependencies).is_ok())
    }

    /// Number of nodes, marked or not.
    pub fn len(&self) -> usize {
        self.nodes.count()
    }

    /// Returns `true` if no node was created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates all nodes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &GraphNode<K>)> {
        self.nodes.iter().map(|(index, node)| (NodeId(index), node))
    }

    /// Handles of all nodes that reached at least Marked.
    pub fn marked(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.state().is_marked())
            .map(|(id, _)| id)
            .collect()
    }
}
