//! Reference resolution offered to the backend while it compiles a method.

use log::trace;

use crate::{
    codegen::{
        devirtualize::{Devirtualization, DevirtualizationManager},
        RelocationTarget,
    },
    graph::NodeId,
    metadata::{
        entity::{EntityId, EntityKind},
        token::Token,
    },
    nodes::{NodeFactory, NodeKey, ReadyToRunHelper},
    Error, Result,
};

/// Dispatch kind of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// The callee is known statically
    Direct,
    /// The callee is selected through a virtual slot at runtime
    Virtual,
}

/// Services the backend may call while compiling a method body.
///
/// Tokens passed in are the module-local metadata tokens found in the body. Every method
/// returning a [`RelocationTarget`] records a dependency of the method being compiled on the
/// node behind the target.
pub trait CodegenInterface {
    /// The method being compiled.
    fn method(&self) -> EntityId;

    /// Returns a load-time token for an arbitrary entity token, e.g. for `ldtoken`.
    ///
    /// # Errors
    ///
    /// Fails if the token cannot be mapped to an entity or tokenized.
    fn resolve_token(&mut self, token: Token) -> Result<RelocationTarget>;

    /// Returns the target of a call through a method token.
    ///
    /// Virtual calls which the devirtualization oracle proves monomorphic are bound directly to
    /// the single implementation.
    ///
    /// # Errors
    ///
    /// Fails if the token does not name a method or cannot be tokenized.
    fn call(&mut self, token: Token, kind: CallKind) -> Result<RelocationTarget>;

    /// Returns the runtime handle of a type, e.g. for boxing or casts.
    ///
    /// # Errors
    ///
    /// Fails if the token does not name a type or cannot be tokenized.
    fn type_handle(&mut self, token: Token) -> Result<RelocationTarget>;

    /// Returns the allocation target for constructing an object through `constructor`.
    ///
    /// # Errors
    ///
    /// Fails if the token does not name a method or cannot be tokenized.
    fn new_object(&mut self, constructor: Token) -> Result<RelocationTarget>;

    /// Returns the target needed to access a field.
    ///
    /// # Errors
    ///
    /// Fails if the token does not name a field or cannot be tokenized.
    fn field(&mut self, token: Token) -> Result<RelocationTarget>;

    /// Returns the cell of a runtime helper.
    fn helper(&mut self, helper: ReadyToRunHelper) -> RelocationTarget;

    /// Asks the devirtualization oracle about a virtual call through a method token.
    ///
    /// # Errors
    ///
    /// Fails if the token cannot be mapped to an entity.
    fn devirtualize(&mut self, token: Token) -> Result<Devirtualization>;
}

/// The [`CodegenInterface`] implementation used by the codegen driver.
///
/// Collects every dependency the backend causes while compiling one method.
pub struct CodegenContext<'a> {
    factory: &'a NodeFactory,
    devirtualizer: &'a DevirtualizationManager,
    method: EntityId,
    requester: NodeKey,
    dependencies: Vec<(NodeId, &'static str)>,
}

impl<'a> CodegenContext<'a> {
    /// Creates a context for compiling `method`.
    #[must_use]
    pub fn new(
        factory: &'a NodeFactory,
        devirtualizer: &'a DevirtualizationManager,
        method: EntityId,
    ) -> Self {
        CodegenContext {
            factory,
            devirtualizer,
            method,
            requester: NodeKey::MethodCode(method),
            dependencies: Vec::new(),
        }
    }

    /// Dependencies recorded so far.
    #[must_use]
    pub fn dependencies(&self) -> &[(NodeId, &'static str)] {
        &self.dependencies
    }

    /// Consumes the context, returning the recorded dependencies.
    #[must_use]
    pub fn into_dependencies(self) -> Vec<(NodeId, &'static str)> {
        self.dependencies
    }

    fn depend(&mut self, node: NodeId, reason: &'static str) -> RelocationTarget {
        trace!("{} depends on {} ({})", self.requester, node, reason);
        self.dependencies.push((node, reason));
        RelocationTarget::Node(node)
    }

    fn entity(&self, token: Token, expected: EntityKind) -> Result<EntityId> {
        let entity = self
            .factory
            .type_system()
            .resolve_local(self.method.module(), token)?;

        if entity.kind() == Some(expected) {
            Ok(entity)
        } else {
            Err(Error::InvalidToken(token))
        }
    }

    fn reference(&mut self, entity: EntityId, reason: &'static str) -> Result<RelocationTarget> {
        let node = self
            .factory
            .reference_node(entity, self.method.module(), &self.requester)?;
        Ok(self.depend(node, reason))
    }
}

impl CodegenInterface for CodegenContext<'_> {
    fn method(&self) -> EntityId {
        self.method
    }

    fn resolve_token(&mut self, token: Token) -> Result<RelocationTarget> {
        let entity = self
            .factory
            .type_system()
            .resolve_local(self.method.module(), token)?;

        let node = self
            .factory
            .reference_node(entity, self.method.module(), &self.requester)?;
        self.depend(node, "token reference");

        let portable = self
            .factory
            .resolver()
            .resolve(entity, self.method.module())
            .map_err(|e| e.with_requester(&self.requester))?;
        Ok(RelocationTarget::Token(portable))
    }

    fn call(&mut self, token: Token, kind: CallKind) -> Result<RelocationTarget> {
        let callee = self.entity(token, EntityKind::Method)?;

        match kind {
            CallKind::Direct => self.reference(callee, "direct call"),
            CallKind::Virtual => {
                if let Devirtualization::Monomorphic(target) = self.devirtualizer.resolve(callee) {
                    return self.reference(target, "devirtualized call");
                }

                let type_system = self.factory.type_system();
                if type_system.method(callee).is_some_and(|desc| desc.is_virtual()) {
                    let slot_use = self.factory.virtual_method_use(type_system.root_slot(callee));
                    self.depend(slot_use, "virtual call");
                }

                let target = if self.factory.group().contains_entity(callee) {
                    self.factory.signature(callee)
                } else {
                    self.factory
                        .reference_node(callee, self.method.module(), &self.requester)?
                };
                let stub = self.factory.helper(ReadyToRunHelper::DelayLoadVirtualCall);
                self.depend(stub, "virtual dispatch stub");
                Ok(self.depend(target, "virtual call target"))
            }
        }
    }

    fn type_handle(&mut self, token: Token) -> Result<RelocationTarget> {
        let ty = self.entity(token, EntityKind::Type)?;
        self.reference(ty, "type handle")
    }

    fn new_object(&mut self, constructor: Token) -> Result<RelocationTarget> {
        let ctor = self.entity(constructor, EntityKind::Method)?;
        let owner = self
            .factory
            .type_system()
            .method(ctor)
            .ok_or(Error::EntityNotFound(ctor))?
            .owner;

        let helper = self.factory.helper(ReadyToRunHelper::NewObject);
        self.depend(helper, "allocation helper");
        self.reference(ctor, "constructor")?;

        if self.factory.group().contains_entity(owner) {
            let vtable = self.factory.vtable(owner);
            Ok(self.depend(vtable, "allocated type"))
        } else {
            self.reference(owner, "allocated type")
        }
    }

    fn field(&mut self, token: Token) -> Result<RelocationTarget> {
        let field = self.entity(token, EntityKind::Field)?;
        self.reference(field, "field access")
    }

    fn helper(&mut self, helper: ReadyToRunHelper) -> RelocationTarget {
        let node = self.factory.helper(helper);
        self.depend(node, "helper call")
    }

    fn devirtualize(&mut self, token: Token) -> Result<Devirtualization> {
        let method = self.entity(token, EntityKind::Method)?;
        Ok(self.devirtualizer.resolve(method))
    }
}
