//! Runs the backend on one method node and checks what it returns.

use std::sync::Arc;

use log::debug;

use crate::{
    codegen::{
        devirtualize::DevirtualizationManager, interface::CodegenContext, CodegenBackend,
        CodegenRequest, CompiledMethodResult,
    },
    config::BackendFlags,
    graph::NodeId,
    nodes::{NodeFactory, NodeKey},
    Error, Result,
};

/// Runs the code generation backend for method nodes.
///
/// The driver owns the session's immutable [`BackendFlags`] and the devirtualization oracle,
/// and hands both to the backend with every request. Backend failures are fatal: they are
/// reported as [`Error::Codegen`] naming the method and are never retried.
pub struct CodegenDriver {
    backend: Arc<dyn CodegenBackend>,
    flags: BackendFlags,
    devirtualizer: DevirtualizationManager,
}

impl CodegenDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CodegenBackend>,
        flags: BackendFlags,
        devirtualizer: DevirtualizationManager,
    ) -> Self {
        CodegenDriver {
            backend,
            flags,
            devirtualizer,
        }
    }

    /// The backend configuration handed to every request.
    #[must_use]
    pub fn flags(&self) -> &BackendFlags {
        &self.flags
    }

    /// Name of the backend.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// The devirtualization oracle.
    #[must_use]
    pub fn devirtualizer(&self) -> &DevirtualizationManager {
        &self.devirtualizer
    }

    /// Compiles the method behind a `MethodCode` node.
    ///
    /// # Errors
    ///
    /// - [`Error::GraphError`] if `node` is not a `MethodCode` node
    /// - [`Error::Codegen`] if the method has no body, the backend fails, or a relocation lies
    ///   outside the produced code
    /// - Resolution errors raised while the backend resolved references, with the method node
    ///   attached as requester
    pub fn compile(&self, factory: &NodeFactory, node: NodeId) -> Result<CompiledMethodResult> {
        let NodeKey::MethodCode(method) = factory.key(node)? else {
            return Err(Error::GraphError(format!(
                "{node} is not a method code node"
            )));
        };

        let ir = factory
            .il_provider()
            .method_ir(factory.type_system(), method)
            .ok_or_else(|| Error::Codegen {
                method,
                diagnostic: "no method body available".to_string(),
            })?;

        let request = CodegenRequest {
            method,
            module: method.module(),
            ir: &ir,
            flags: &self.flags,
        };
        let mut context = CodegenContext::new(factory, &self.devirtualizer, method);

        let output = self
            .backend
            .compile(&request, &mut context)
            .map_err(|error| match error {
                Error::BackendFailure(diagnostic) => Error::Codegen { method, diagnostic },
                other => other,
            })?;

        for relocation in &output.relocations {
            let end = relocation.offset as usize + relocation.kind.size();
            if end > output.code.len() {
                return Err(Error::Codegen {
                    method,
                    diagnostic: format!(
                        "relocation at offset {} exceeds code size {}",
                        relocation.offset,
                        output.code.len()
                    ),
                });
            }
        }

        let dependencies = context.into_dependencies();
        debug!(
            "Compiled {} with {}: {} bytes, {} relocations, {} dependencies",
            method,
            self.backend.name(),
            output.code.len(),
            output.relocations.len(),
            dependencies.len()
        );

        Ok(CompiledMethodResult {
            code: output.code,
            relocations: output.relocations,
            dependencies,
        })
    }
}
