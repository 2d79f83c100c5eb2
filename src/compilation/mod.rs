//! Compilation sessions.
//!
//! A [`Compilation`] ties the pieces of the pipeline together: it marks the roots, drives the
//! dependency analyzer to a fixed point while method bodies are compiled on expansion, and then
//! emits every marked node in key order together with the session's token table.
//!
//! Sessions are configured through a [`CompilationBuilder`] and run exactly once.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aotgraph::prelude::*;
//!
//! # fn backend() -> Arc<dyn CodegenBackend> { unimplemented!() }
//! let type_system = Arc::new(TypeSystemContext::new());
//! let app = type_system.add_module("App", "/build/App.dll")?;
//!
//! let compilation = CompilationBuilder::new(
//!     type_system,
//!     CompilationModuleGroup::single(app),
//!     "/build/App.dll",
//! )
//! .use_backend(backend())
//! .use_optimization_mode(OptimizationMode::PreferSpeed)
//! .use_backend_options(&["inline-depth=2"])
//! .build()?;
//!
//! match compilation.emit()? {
//!     EmitOutcome::Completed(output) => println!("{} nodes", output.nodes.len()),
//!     EmitOutcome::Cancelled => println!("cancelled"),
//! }
//! # Ok::<(), aotgraph::Error>(())
//! ```

mod builder;
mod provider;

pub use builder::CompilationBuilder;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    OnceLock,
};

use log::info;
use rayon::ThreadPool;

use crate::{
    codegen::CodegenDriver,
    graph::{
        dot, CancellationToken, DependencyAnalyzer, DependencyEdge, GraphOutcome, GraphStatistics,
        NodeId, NodeState,
    },
    metadata::entity::{EntityId, ModuleIndex},
    nodes::{EmittedNode, NodeFactory, NodeKey},
    resolver::TokenTable,
    Error, Result,
};
use provider::SessionProvider;

/// Where the dependency walk of a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilationRoot {
    /// The native code of one method
    Method(EntityId),
    /// The layout and vtable of one type
    Type(EntityId),
    /// Every compilable method of a module
    AllMethods(ModuleIndex),
}

/// Everything a completed session produced.
#[derive(Debug, Clone)]
pub struct CompilationOutput {
    /// Every marked node, sorted by key
    pub nodes: Vec<EmittedNode>,
    /// The tokens issued during the session, sorted
    pub tokens: TokenTable,
    /// Counters of the dependency analysis
    pub statistics: GraphStatistics,
}

impl CompilationOutput {
    /// Returns the emitted node with the given key.
    #[must_use]
    pub fn node(&self, key: &NodeKey) -> Option<&EmittedNode> {
        self.nodes
            .binary_search_by(|node| node.key.cmp(key))
            .ok()
            .map(|index| &self.nodes[index])
    }

    /// Returns `true` if a node with the given key was emitted.
    #[must_use]
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.node(key).is_some()
    }

    /// Keys of all emitted nodes, in order.
    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.iter().map(|node| &node.key)
    }
}

/// How [`Compilation::emit`] ended.
#[derive(Debug, Clone)]
pub enum EmitOutcome {
    /// The fixed point was reached and every marked node was emitted
    Completed(CompilationOutput),
    /// Cancellation was requested; nothing was emitted
    Cancelled,
}

impl EmitOutcome {
    /// Returns the output of a completed session.
    #[must_use]
    pub fn into_output(self) -> Option<CompilationOutput> {
        match self {
            EmitOutcome::Completed(output) => Some(output),
            EmitOutcome::Cancelled => None,
        }
    }

    /// Returns `true` for [`EmitOutcome::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EmitOutcome::Cancelled)
    }
}

/// A configured compilation session.
///
/// Created by [`CompilationBuilder::build`]. All configuration is immutable; the session can
/// be run once through [`Compilation::emit`].
pub struct Compilation {
    factory: NodeFactory,
    driver: CodegenDriver,
    roots: Vec<CompilationRoot>,
    pool: Option<ThreadPool>,
    cancel: CancellationToken,
    consumed: AtomicBool,
    edges: OnceLock<Vec<DependencyEdge>>,
}

impl Compilation {
    /// The node factory of the session.
    #[must_use]
    pub fn factory(&self) -> &NodeFactory {
        &self.factory
    }

    /// The codegen driver of the session.
    #[must_use]
    pub fn driver(&self) -> &CodegenDriver {
        &self.driver
    }

    /// The roots the session starts from.
    #[must_use]
    pub fn roots(&self) -> &[CompilationRoot] {
        &self.roots
    }

    /// The token through which the session can be cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the session: computes the dependency closure of the roots, compiling methods as
    /// they are reached, and emits every marked node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionConsumed`] when called a second time. Any resolution, codegen or
    /// graph error aborts the session; no partial output is returned.
    pub fn emit(&self) -> Result<EmitOutcome> {
        if self.consumed.swap(true, Ordering::AcqRel) {
            return Err(Error::SessionConsumed);
        }

        info!(
            "Starting compilation of {} roots with backend {}",
            self.roots.len(),
            self.driver.backend_name()
        );

        let provider = SessionProvider::new(&self.factory, &self.driver);
        let analyze = || -> Result<(GraphOutcome, GraphStatistics, Vec<DependencyEdge>)> {
            let mut analyzer =
                DependencyAnalyzer::new(self.factory.arena(), &provider, self.cancel.clone());
            for root in &self.roots {
                for node in self.root_nodes(root) {
                    analyzer.add_root(node);
                }
            }

            let outcome = analyzer.compute()?;
            Ok((outcome, analyzer.statistics(), analyzer.edges().to_vec()))
        };

        let (outcome, statistics, edges) = match &self.pool {
            Some(pool) => pool.install(analyze)?,
            None => analyze()?,
        };
        let _ = self.edges.set(edges);

        if outcome == GraphOutcome::Cancelled {
            info!("Compilation cancelled after {} nodes", statistics.expanded);
            return Ok(EmitOutcome::Cancelled);
        }

        let mut marked = self.factory.arena().marked();
        marked.sort_by(|a, b| self.factory.arena().key(*a).cmp(&self.factory.arena().key(*b)));

        let mut nodes = Vec::with_capacity(marked.len());
        for node in marked {
            let compiled = provider.take_compiled(node);
            nodes.push(self.factory.emit(node, compiled.as_ref())?);
            self.factory.arena().advance(node, NodeState::Emitted);
        }

        let tokens = self.factory.resolver().token_table();
        info!(
            "Compilation finished: {} nodes, {} edges, {} tokens",
            nodes.len(),
            statistics.edges,
            tokens.len()
        );

        Ok(EmitOutcome::Completed(CompilationOutput {
            nodes,
            tokens,
            statistics,
        }))
    }

    /// Renders the dependency graph of a finished run in DOT format.
    ///
    /// Returns `None` before [`Compilation::emit`] ran.
    #[must_use]
    pub fn dependency_graph_dot(&self) -> Option<String> {
        let edges = self.edges.get()?;
        Some(dot::to_dot("compilation", self.factory.arena(), edges))
    }

    fn root_nodes(&self, root: &CompilationRoot) -> Vec<NodeId> {
        match *root {
            CompilationRoot::Method(method) => vec![self.factory.method_code(method)],
            CompilationRoot::Type(ty) => {
                vec![self.factory.type_layout(ty), self.factory.vtable(ty)]
            }
            CompilationRoot::AllMethods(module) => self
                .factory
                .type_system()
                .methods_in_module(module)
                .into_iter()
                .filter(|method| self.is_compilable(*method))
                .map(|method| self.factory.method_code(method))
                .collect(),
        }
    }

    /// Methods with a body that are not open generic definitions.
    fn is_compilable(&self, method: EntityId) -> bool {
        let type_system = self.factory.type_system();
        let Some(desc) = type_system.method(method) else {
            return false;
        };

        let open_owner = desc.instantiation.is_none()
            && type_system
                .type_desc(desc.owner)
                .is_some_and(|owner| owner.generic_parameters > 0 && owner.instantiation.is_none());

        desc.generic_parameters == 0 && !open_owner && self.factory.has_body(method)
    }
}
