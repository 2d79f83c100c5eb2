//! Dependency graph engine.
//!
//! This module provides the generic machinery behind the compilation pipeline: an append-only
//! [`NodeArena`] that deduplicates nodes by logical key, the edge types produced when a node is
//! expanded, and the [`DependencyAnalyzer`] which drives marking and expansion to a fixed point.
//!
//! The engine knows nothing about compiler artifacts. What a node means and which edges it has
//! is supplied by a [`DependencyProvider`]; the session wires in one that builds nodes through
//! the [`NodeFactory`](crate::nodes::NodeFactory) and compiles method bodies on expansion.
//!
//! # Key Components
//!
//! - [`NodeId`] / [`NodeState`] - Node handles and their monotonic lifecycle
//! - [`NodeArena`] - Lock-free node storage with a concurrent identity index
//! - [`DependencyEdge`], [`ConditionalDependency`], [`Expansion`] - Expansion results
//! - [`DependencyAnalyzer`] - Batch-parallel worklist marking with conditional edges
//! - [`dot`] - Graphviz rendering for diagnostics

mod arena;
pub mod dot;
mod edge;
mod engine;
mod node;

pub use arena::{GraphNode, NodeArena};
pub use edge::{Condition, ConditionalDependency, DependencyEdge, Expansion};
pub use engine::{
    CancellationToken, DependencyAnalyzer, DependencyProvider, GraphOutcome, GraphStatistics,
};
pub use node::{NodeId, NodeState};
