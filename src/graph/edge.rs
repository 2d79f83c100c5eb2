//! Edges produced when a node is expanded.

use crate::graph::node::{NodeId, NodeState};

/// A static dependency: `from` needs `to` in the output.
///
/// The `reason` is a diagnostic label only; it never influences the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    /// The node which requires the dependency
    pub from: NodeId,
    /// The required node
    pub to: NodeId,
    /// Diagnostic label
    pub reason: &'static str,
}

/// Guard of a conditional dependency: satisfied once `node` has reached at least `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition {
    /// The node whose state is observed
    pub node: NodeId,
    /// The minimum state
    pub state: NodeState,
}

impl Condition {
    /// Condition satisfied once `node` is marked.
    #[must_use]
    pub const fn marked(node: NodeId) -> Self {
        Condition {
            node,
            state: NodeState::Marked,
        }
    }
}

/// A dependency that only exists once its [`Condition`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConditionalDependency {
    /// The node which becomes required
    pub target: NodeId,
    /// When the dependency exists
    pub condition: Condition,
    /// Diagnostic label
    pub reason: &'static str,
}

/// The outcome of expanding one node.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Dependencies which hold unconditionally
    pub edges: Vec<(NodeId, &'static str)>,
    /// Dependencies gated on the state of another node
    pub conditional: Vec<ConditionalDependency>,
}

impl Expansion {
    /// A terminal expansion with no dependencies.
    #[must_use]
    pub fn terminal() -> Self {
        Self::default()
    }

    /// Adds a static dependency.
    pub fn depends_on(&mut self, target: NodeId, reason: &'static str) {
        self.edges.push((target, reason));
    }

    /// Adds a dependency that activates once `condition` holds.
    pub fn depends_on_if(&mut self, target: NodeId, condition: Condition, reason: &'static str) {
        self.conditional.push(ConditionalDependency {
            target,
            condition,
            reason,
        });
    }

    /// Returns `true` if the expansion yields no dependency at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.conditional.is_empty()
    }
}
