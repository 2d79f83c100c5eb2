//! Worklist fixed-point marking over a lazily discovered dependency graph.
//!
//! The graph is never built up front. Starting from the roots, the [`DependencyAnalyzer`] asks a
//! [`DependencyProvider`] for the edges of every node it marks; targets that were not marked
//! before are marked and enqueued in turn. Expansion is therefore a re-entrant producer of
//! edges, and cycles are legal: each node is expanded at most once and the set of identities is
//! finite, so the walk terminates.
//!
//! # Conditional Dependencies
//!
//! Some dependencies only exist once another node reaches a given state. A virtual method
//! implementation, for example, is only needed once some code dispatches through its slot.
//! Conditional edges whose guard already holds are activated immediately; the others are
//! deferred and activated the moment their guard node is marked or expanded. Before completion
//! every deferred edge is rescanned until a full rescan activates nothing.
//!
//! # Parallelism
//!
//! Marked nodes are expanded in batches. All nodes of a batch are expanded in parallel on the
//! current rayon pool, which is where method compilation happens. Marking, edge bookkeeping
//! and conditional activation run on the coordinating thread between batches. Each batch is
//! processed in key order, so the first error reported for a given input does not depend on
//! thread scheduling.

use std::{
    collections::HashMap,
    hash::Hash,
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, trace};
use rayon::prelude::*;

use crate::{
    graph::{
        arena::NodeArena,
        edge::{ConditionalDependency, DependencyEdge, Expansion},
        node::{NodeId, NodeState},
    },
    Result,
};

/// Computes the dependencies of a node on demand.
///
/// Implementations are called concurrently for the nodes of one batch and must therefore be
/// `Sync`. They may create new nodes in the arena while expanding.
pub trait DependencyProvider: Sync {
    /// Returns the static and conditional dependencies of `node`.
    ///
    /// # Errors
    ///
    /// Any error aborts the analysis and is returned from [`DependencyAnalyzer::compute`].
    fn expand(&self, node: NodeId) -> Result<Expansion>;
}

/// Shared flag through which a host requests cancellation.
///
/// Clones share the flag. The analyzer checks it before each node expansion and between
/// batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token which is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How an analysis ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOutcome {
    /// The fixed point was reached
    Completed,
    /// Cancellation was requested before the fixed point
    Cancelled,
}

/// Counters collected while computing the fixed point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStatistics {
    /// Nodes moved from Unmarked to Marked
    pub marked: usize,
    /// Nodes expanded
    pub expanded: usize,
    /// Static and activated conditional edges
    pub edges: usize,
    /// Conditional edges whose guard did not hold when they were produced
    pub conditional_deferred: usize,
    /// Conditional edges activated
    pub conditional_activated: usize,
    /// Expansion batches
    pub batches: usize,
    /// Rescans of the deferred conditional edges
    pub rescans: usize,
}

/// Drives marking and expansion to a fixed point.
pub struct DependencyAnalyzer<'a, K, P: ?Sized> {
    nodes: &'a NodeArena<K>,
    provider: &'a P,
    cancel: CancellationToken,
    worklist: Vec<NodeId>,
    /// Deferred conditional edges, keyed by the node their guard observes
    pending: HashMap<NodeId, Vec<(NodeId, ConditionalDependency)>>,
    edges: Vec<DependencyEdge>,
    stats: GraphStatistics,
}

impl<'a, K, P> DependencyAnalyzer<'a, K, P>
where
    K: Eq + Hash + Clone + Ord + Send + Sync,
    P: DependencyProvider + ?Sized,
{
    /// Creates an analyzer over `nodes`, expanding through `provider`.
    pub fn new(nodes: &'a NodeArena<K>, provider: &'a P, cancel: CancellationToken) -> Self {
        DependencyAnalyzer {
            nodes,
            provider,
            cancel,
            worklist: Vec::new(),
            pending: HashMap::new(),
            edges: Vec::new(),
            stats: GraphStatistics::default(),
        }
    }

    /// Marks a root and enqueues it for expansion. Roots already marked are ignored.
    pub fn add_root(&mut self, root: NodeId) {
        self.mark(root);
    }

    /// Runs marking and expansion until no node is left to expand and no deferred
    /// conditional edge can be activated.
    ///
    /// # Errors
    ///
    /// Returns the first provider error, in key order within the failing batch.
    pub fn compute(&mut self) -> Result<GraphOutcome> {
        loop {
            while !self.worklist.is_empty() {
                if self.cancel.is_cancelled() {
                    debug!("Dependency analysis cancelled with {} nodes pending", self.worklist.len());
                    return Ok(GraphOutcome::Cancelled);
                }

                let mut batch = mem::take(&mut self.worklist);
                batch.retain(|node| self.nodes.state(*node) < NodeState::Expanded);
                batch.sort_by(|a, b| self.nodes.key(*a).cmp(&self.nodes.key(*b)));

                self.stats.batches += 1;
                debug!(
                    "Expanding batch {} with {} nodes",
                    self.stats.batches,
                    batch.len()
                );

                let provider = self.provider;
                let cancel = &self.cancel;
                let results: Vec<Option<Result<Expansion>>> = batch
                    .par_iter()
                    .map(|node| {
                        if cancel.is_cancelled() {
                            None
                        } else {
                            Some(provider.expand(*node))
                        }
                    })
                    .collect();

                for (node, result) in batch.into_iter().zip(results) {
                    let Some(result) = result else {
                        debug!("Dependency analysis cancelled during batch {}", self.stats.batches);
                        return Ok(GraphOutcome::Cancelled);
                    };
                    self.apply(node, result?);
                }
            }

            self.stats.rescans += 1;
            if self.rescan() == 0 {
                break;
            }
        }

        self.stats.edges = self.edges.len();
        debug!(
            "Dependency analysis reached a fixed point: {} marked, {} expanded, {} edges",
            self.stats.marked, self.stats.expanded, self.stats.edges
        );
        Ok(GraphOutcome::Completed)
    }

    /// Handles of every marked node, in creation order.
    #[must_use]
    pub fn marked_nodes(&self) -> Vec<NodeId> {
        self.nodes.marked()
    }

    /// Every static and activated conditional edge, with its reason.
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Counters of the analysis so far.
    #[must_use]
    pub fn statistics(&self) -> GraphStatistics {
        GraphStatistics {
            edges: self.edges.len(),
            ..self.stats
        }
    }

    /// Number of conditional edges still waiting for their guard.
    #[must_use]
    pub fn pending_conditional(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn apply(&mut self, node: NodeId, expansion: Expansion) {
        trace!(
            "Expanded {} into {} edges and {} conditional edges",
            node,
            expansion.edges.len(),
            expansion.conditional.len()
        );

        let mut recorded = Vec::with_capacity(expansion.edges.len());
        for (target, reason) in expansion.edges {
            recorded.push(DependencyEdge {
                from: node,
                to: target,
                reason,
            });
            self.mark(target);
        }

        for dependency in expansion.conditional {
            let guard = dependency.condition;
            if self.nodes.state(guard.node) >= guard.state {
                self.activate(node, &dependency);
            } else {
                self.stats.conditional_deferred += 1;
                self.pending
                    .entry(guard.node)
                    .or_default()
                    .push((node, dependency));
            }
        }

        self.edges.extend_from_slice(&recorded);
        self.nodes.set_dependencies(node, recorded);
        self.nodes.advance(node, NodeState::Expanded);
        self.stats.expanded += 1;

        // Guards waiting for this node to be expanded
        let mut woken = Vec::new();
        self.wake(node, &mut woken);
        for target in woken {
            self.mark(target);
        }
    }

    fn mark(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !self.nodes.try_mark(current) {
                continue;
            }

            self.worklist.push(current);
            self.stats.marked += 1;
            self.wake(current, &mut stack);
        }
    }

    /// Activates the deferred edges guarded by `node` whose guard now holds, pushing their
    /// targets onto `targets`.
    fn wake(&mut self, node: NodeId, targets: &mut Vec<NodeId>) {
        let Some(waiting) = self.pending.remove(&node) else {
            return;
        };

        let state = self.nodes.state(node);
        let mut still_waiting = Vec::new();
        for (from, dependency) in waiting {
            if state >= dependency.condition.state {
                self.record_activation(from, &dependency);
                targets.push(dependency.target);
            } else {
                still_waiting.push((from, dependency));
            }
        }

        if !still_waiting.is_empty() {
            self.pending.insert(node, still_waiting);
        }
    }

    fn activate(&mut self, from: NodeId, dependency: &ConditionalDependency) {
        self.record_activation(from, dependency);
        self.mark(dependency.target);
    }

    fn record_activation(&mut self, from: NodeId, dependency: &ConditionalDependency) {
        trace!(
            "Activated conditional edge {} -> {} ({})",
            from,
            dependency.target,
            dependency.reason
        );
        self.edges.push(DependencyEdge {
            from,
            to: dependency.target,
            reason: dependency.reason,
        });
        self.stats.conditional_activated += 1;
    }

    /// Activates every deferred edge whose guard holds. Returns the number activated.
    fn rescan(&mut self) -> usize {
        let mut guards: Vec<NodeId> = self.pending.keys().copied().collect();
        guards.sort();

        let mut activated = Vec::new();
        for guard in guards {
            let before = activated.len();
            self.wake(guard, &mut activated);
            if activated.len() > before {
                trace!("Rescan activated {} edges guarded by {}", activated.len() - before, guard);
            }
        }

        let count = activated.len();
        for target in activated {
            self.mark(target);
        }
        count
    }
}
