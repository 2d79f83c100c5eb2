//! Session-side dependency provider: static dependencies plus codegen discoveries.

use dashmap::DashMap;
use log::trace;

use crate::{
    codegen::{CodegenDriver, CompiledMethodResult},
    graph::{DependencyProvider, Expansion, NodeId},
    nodes::{NodeFactory, NodeKey},
    Result,
};

/// Expands nodes for the dependency analyzer.
///
/// Static dependencies come from the node factory. `MethodCode` nodes are additionally
/// compiled on expansion; the dependencies the backend caused are appended and the result is
/// kept for emission.
pub(crate) struct SessionProvider<'a> {
    factory: &'a NodeFactory,
    driver: &'a CodegenDriver,
    compiled: DashMap<NodeId, CompiledMethodResult>,
}

impl<'a> SessionProvider<'a> {
    pub(crate) fn new(factory: &'a NodeFactory, driver: &'a CodegenDriver) -> Self {
        SessionProvider {
            factory,
            driver,
            compiled: DashMap::new(),
        }
    }

    /// Takes the codegen result of a method node out of the provider.
    pub(crate) fn take_compiled(&self, node: NodeId) -> Option<CompiledMethodResult> {
        self.compiled.remove(&node).map(|(_, result)| result)
    }
}

impl DependencyProvider for SessionProvider<'_> {
    fn expand(&self, node: NodeId) -> Result<Expansion> {
        let key = self.factory.key(node)?;
        let mut expansion = self.factory.dependencies(node, &key)?;

        if let NodeKey::MethodCode(_) = key {
            let result = self.driver.compile(self.factory, node)?;
            for &(target, reason) in &result.dependencies {
                expansion.depends_on(target, reason);
            }
            trace!("{key} compiled, {} edges in total", expansion.edges.len());
            self.compiled.insert(node, result);
        }

        Ok(expansion)
    }
}
