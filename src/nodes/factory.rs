//! Deduplicating construction of graph nodes.
//!
//! The [`NodeFactory`] owns the node arena, the token resolver and the IL provider. Every
//! request for an artifact goes through it, so equal keys always map to one node.

use std::sync::Arc;

use log::trace;

use crate::{
    graph::{NodeArena, NodeId},
    metadata::{
        entity::{EntityId, EntityKind, ModuleIndex, TypeSystemContext},
        group::CompilationModuleGroup,
        il::IlProvider,
    },
    nodes::{NodeKey, ReadyToRunHelper},
    resolver::{ModuleToken, TokenResolver},
    Error, Result,
};

/// Creates and deduplicates the nodes of a compilation.
///
/// The factory owns the node arena and the collaborators needed to decide which node makes a
/// reference valid: the entity model, the compilation group, the token resolver and the IL
/// provider. It is shared by reference between the worker threads expanding nodes.
///
/// Lookups are concurrent; insertion is serialized per identity, so callers racing on one key
/// all converge on a single node. Nodes are never removed or replaced.
pub struct NodeFactory {
    arena: NodeArena<NodeKey>,
    resolver: Arc<TokenResolver>,
    il_provider: Arc<dyn IlProvider>,
}

impl NodeFactory {
    /// Creates a factory with an empty arena.
    #[must_use]
    pub fn new(resolver: Arc<TokenResolver>, il_provider: Arc<dyn IlProvider>) -> Self {
        NodeFactory {
            arena: NodeArena::new(),
            resolver,
            il_provider,
        }
    }

    /// The node arena.
    #[must_use]
    pub fn arena(&self) -> &NodeArena<NodeKey> {
        &self.arena
    }

    /// The entity model.
    #[must_use]
    pub fn type_system(&self) -> &TypeSystemContext {
        self.resolver.type_system()
    }

    /// The compilation group.
    #[must_use]
    pub fn group(&self) -> &CompilationModuleGroup {
        self.resolver.group()
    }

    /// The token resolver.
    #[must_use]
    pub fn resolver(&self) -> &TokenResolver {
        &self.resolver
    }

    /// The IL provider.
    #[must_use]
    pub fn il_provider(&self) -> &dyn IlProvider {
        self.il_provider.as_ref()
    }

    /// Returns the node for `key`, creating it if absent.
    pub fn get_or_create(&self, key: NodeKey) -> NodeId {
        let id = self.arena.get_or_create(key);
        trace!("{key} -> {id}");
        id
    }

    /// Returns the key of a node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] for handles the arena does not know.
    pub fn key(&self, node: NodeId) -> Result<NodeKey> {
        self.arena
            .key(node)
            .copied()
            .ok_or_else(|| Error::GraphError(format!("Unknown node {node}")))
    }

    /// Node for the native code of `method`.
    pub fn method_code(&self, method: EntityId) -> NodeId {
        self.get_or_create(NodeKey::MethodCode(method))
    }

    /// Node for the runtime layout of `ty`.
    pub fn type_layout(&self, ty: EntityId) -> NodeId {
        self.get_or_create(NodeKey::TypeLayout(ty))
    }

    /// Node for the virtual dispatch table of `ty`.
    pub fn vtable(&self, ty: EntityId) -> NodeId {
        self.get_or_create(NodeKey::VTable(ty))
    }

    /// Node for the generic dictionary of an instantiation.
    pub fn generic_dictionary(&self, instantiation: EntityId) -> NodeId {
        self.get_or_create(NodeKey::GenericDictionary(instantiation))
    }

    /// Node for the portable signature of `entity`.
    pub fn signature(&self, entity: EntityId) -> NodeId {
        self.get_or_create(NodeKey::Signature(entity))
    }

    /// Node for the import cell binding `token` at load time.
    pub fn import_cell(&self, token: ModuleToken) -> NodeId {
        self.get_or_create(NodeKey::ImportCell(token))
    }

    /// Node for the cell of a runtime helper.
    pub fn helper(&self, helper: ReadyToRunHelper) -> NodeId {
        self.get_or_create(NodeKey::HelperCell(helper))
    }

    /// Marker node recording that code dispatches through the virtual `slot`.
    pub fn virtual_method_use(&self, slot: EntityId) -> NodeId {
        self.get_or_create(NodeKey::VirtualMethodUse(slot))
    }

    /// Returns `true` if the IL provider has a body for `method`.
    #[must_use]
    pub fn has_body(&self, method: EntityId) -> bool {
        self.il_provider.method_ir(self.type_system(), method).is_some()
    }

    /// Returns the node which makes a reference from code of `from` to `entity` valid.
    ///
    /// - In-group types: `TypeLayout`
    /// - In-group methods: `MethodCode` when they have a body, `Signature` otherwise
    /// - In-group fields: the owner's `TypeLayout`
    /// - In-group stand-alone signatures: `Signature`
    /// - Anything outside the group: the `ImportCell` of the token `from` refers to it by
    ///
    /// The entity is tokenized in every case, so the token table covers every reference.
    ///
    /// # Errors
    ///
    /// Returns resolution failures with `requester` attached, and [`Error::EntityNotFound`]
    /// for in-group fields without a description.
    pub fn reference_node(
        &self,
        entity: EntityId,
        from: ModuleIndex,
        requester: &NodeKey,
    ) -> Result<NodeId> {
        let token = self
            .resolver
            .resolve(entity, from)
            .map_err(|e| e.with_requester(requester))?;

        if !self.group().contains_entity(entity) {
            return Ok(self.import_cell(token));
        }

        match entity.kind() {
            Some(EntityKind::Type) => Ok(self.type_layout(entity)),
            Some(EntityKind::Method) if self.has_body(entity) => Ok(self.method_code(entity)),
            Some(EntityKind::Method | EntityKind::Signature) => Ok(self.signature(entity)),
            Some(EntityKind::Field) => {
                let field = self
                    .type_system()
                    .field(entity)
                    .ok_or(Error::EntityNotFound(entity))?;
                self.reference_node(field.owner, from, requester)
            }
            None => Err(Error::InvalidToken(entity.token())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{metadata::token::Token, test::SampleWorld};

    #[test]
    fn test_get_or_create_is_idempotent() {
        let world = SampleWorld::new();
        let factory = world.factory();

        let a = factory.type_layout(world.lib_type);
        assert_eq!(factory.type_layout(world.lib_type), a);
        assert_ne!(factory.vtable(world.lib_type), a);
        assert_eq!(factory.key(a).unwrap(), NodeKey::TypeLayout(world.lib_type));
        assert!(matches!(factory.key(NodeId::new(999)), Err(Error::GraphError(_))));
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let world = SampleWorld::new();
        let factory = world.factory();

        let ids: Vec<NodeId> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| factory.method_code(world.main)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(factory.arena().len(), 1);
    }

    #[test]
    fn test_reference_nodes() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let requester = NodeKey::MethodCode(world.main);

        let layout = factory.reference_node(world.lib_type, world.app, &requester).unwrap();
        assert_eq!(factory.key(layout).unwrap(), NodeKey::TypeLayout(world.lib_type));

        let code = factory.reference_node(world.helper, world.app, &requester).unwrap();
        assert_eq!(factory.key(code).unwrap(), NodeKey::MethodCode(world.helper));

        let sig = factory.reference_node(world.abstract_method, world.app, &requester).unwrap();
        assert_eq!(factory.key(sig).unwrap(), NodeKey::Signature(world.abstract_method));

        let owner = factory.reference_node(world.counter_field, world.app, &requester).unwrap();
        assert_eq!(factory.key(owner).unwrap(), NodeKey::TypeLayout(world.program));

        let import = factory.reference_node(world.external_type, world.app, &requester).unwrap();
        assert!(matches!(factory.key(import).unwrap(), NodeKey::ImportCell(token) if token.is_import()));
    }

    #[test]
    fn test_unresolvable_reference_names_requester() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let requester = NodeKey::MethodCode(world.lib_method);

        let err = factory
            .reference_node(world.external_type, world.lib, &requester)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvableReference { entity, requester: Some(r), .. }
                if entity == world.external_type && r == requester
        ));
    }

    #[test]
    fn test_unknown_field() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let missing = EntityId::new(world.app, Token::new(0x0400_0042));

        assert!(matches!(
            factory.reference_node(missing, world.app, &NodeKey::MethodCode(world.main)),
            Err(Error::EntityNotFound(_))
        ));
    }
}
