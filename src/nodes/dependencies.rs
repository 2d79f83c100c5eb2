//! Static and conditional dependencies of each node kind.
//!
//! Dependencies discovered while compiling a method body are not computed here; the session
//! adds them to the expansion of `MethodCode` nodes after running the codegen driver.

use crate::{
    graph::{Condition, Expansion, NodeId},
    metadata::entity::{EntityId, EntityKind, Instantiation},
    nodes::{factory::NodeFactory, NodeKey},
    Error, Result,
};

impl NodeFactory {
    /// Computes the dependencies a node has independent of code generation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntityNotFound`] for entities missing from the entity model and
    /// resolution failures for references that cannot be tokenized.
    pub fn dependencies(&self, node: NodeId, key: &NodeKey) -> Result<Expansion> {
        let mut expansion = Expansion::terminal();

        match *key {
            NodeKey::MethodCode(method) => {
                let desc = self
                    .type_system()
                    .method(method)
                    .ok_or(Error::EntityNotFound(method))?;

                let owner = self.reference_node(desc.owner, method.module(), key)?;
                expansion.depends_on(owner, "owning type");

                if desc.instantiation.is_some() {
                    expansion.depends_on(self.generic_dictionary(method), "instantiation dictionary");
                }
            }
            NodeKey::TypeLayout(ty) => {
                let desc = self
                    .type_system()
                    .type_desc(ty)
                    .ok_or(Error::EntityNotFound(ty))?;

                if let Some(base) = desc.base {
                    expansion.depends_on(self.reference_node(base, ty.module(), key)?, "base type");
                }

                if let Some(instantiation) = &desc.instantiation {
                    let definition = self.reference_node(instantiation.definition, ty.module(), key)?;
                    expansion.depends_on(definition, "generic definition");
                    self.instantiation_arguments(instantiation, ty, key, &mut expansion)?;
                }
            }
            NodeKey::VTable(ty) => {
                let desc = self
                    .type_system()
                    .type_desc(ty)
                    .ok_or(Error::EntityNotFound(ty))?;

                expansion.depends_on(self.type_layout(ty), "vtable owner");
                if let Some(base) = desc.base {
                    if self.group().contains_entity(base) {
                        expansion.depends_on(self.vtable(base), "base vtable");
                    }
                }

                for method in self.type_system().methods_of(ty) {
                    let Some(method_desc) = self.type_system().method(method) else {
                        continue;
                    };
                    if !method_desc.is_virtual() || !self.has_body(method) {
                        continue;
                    }

                    let slot_use = self.virtual_method_use(self.type_system().root_slot(method));
                    expansion.depends_on_if(
                        self.method_code(method),
                        Condition::marked(slot_use),
                        "virtual slot implementation",
                    );
                }
            }
            NodeKey::GenericDictionary(entity) => {
                let instantiation = self.instantiation_of(entity)?;
                self.instantiation_arguments(&instantiation, entity, key, &mut expansion)?;
                expansion.depends_on(self.signature(entity), "dictionary signature");
            }
            NodeKey::VirtualMethodUse(slot) => {
                if let Some(desc) = self.type_system().method(slot) {
                    if self.group().contains_entity(desc.owner) {
                        expansion.depends_on(self.type_layout(desc.owner), "slot owner");
                    }
                }
            }
            NodeKey::Signature(_) | NodeKey::ImportCell(_) | NodeKey::HelperCell(_) => {}
        }

        log::trace!("{} ({}) has {} static dependencies", key, node, expansion.edges.len());
        Ok(expansion)
    }

    /// The instantiation details of a type or method instantiation.
    pub(crate) fn instantiation_of(&self, entity: EntityId) -> Result<Instantiation> {
        let instantiation = match entity.kind() {
            Some(EntityKind::Type) => self
                .type_system()
                .type_desc(entity)
                .and_then(|desc| desc.instantiation.clone()),
            Some(EntityKind::Method) => self
                .type_system()
                .method(entity)
                .and_then(|desc| desc.instantiation.clone()),
            _ => None,
        };

        instantiation.ok_or(Error::EntityNotFound(entity))
    }

    fn instantiation_arguments(
        &self,
        instantiation: &Instantiation,
        owner: EntityId,
        key: &NodeKey,
        expansion: &mut Expansion,
    ) -> Result<()> {
        for argument in &instantiation.arguments {
            let node = self.reference_node(*argument, owner.module(), key)?;
            expansion.depends_on(node, "instantiation argument");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::SampleWorld;

    fn targets(factory: &NodeFactory, expansion: &Expansion) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = expansion
            .edges
            .iter()
            .map(|(target, _)| factory.key(*target).unwrap())
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_method_code_depends_on_owner() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let key = NodeKey::MethodCode(world.main);
        let node = factory.get_or_create(key);

        let expansion = factory.dependencies(node, &key).unwrap();
        assert_eq!(targets(&factory, &expansion), vec![NodeKey::TypeLayout(world.program)]);
        assert!(expansion.conditional.is_empty());
    }

    #[test]
    fn test_instantiated_type_layout() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let key = NodeKey::TypeLayout(world.list_of_lib_type);
        let node = factory.get_or_create(key);

        let expansion = factory.dependencies(node, &key).unwrap();
        assert_eq!(
            targets(&factory, &expansion),
            vec![
                NodeKey::TypeLayout(world.generic_list),
                NodeKey::TypeLayout(world.lib_type),
            ]
        );
    }

    #[test]
    fn test_vtable_slots_are_conditional() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let key = NodeKey::VTable(world.derived);
        let node = factory.get_or_create(key);

        let expansion = factory.dependencies(node, &key).unwrap();
        assert_eq!(
            targets(&factory, &expansion),
            vec![NodeKey::TypeLayout(world.derived), NodeKey::VTable(world.base)]
        );

        assert_eq!(expansion.conditional.len(), 1);
        let conditional = expansion.conditional[0];
        assert_eq!(
            factory.key(conditional.target).unwrap(),
            NodeKey::MethodCode(world.derived_speak)
        );
        assert_eq!(
            factory.key(conditional.condition.node).unwrap(),
            NodeKey::VirtualMethodUse(world.base_speak)
        );
    }

    #[test]
    fn test_generic_dictionary() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let key = NodeKey::GenericDictionary(world.list_of_lib_type);
        let node = factory.get_or_create(key);

        let expansion = factory.dependencies(node, &key).unwrap();
        assert_eq!(
            targets(&factory, &expansion),
            vec![
                NodeKey::TypeLayout(world.lib_type),
                NodeKey::Signature(world.list_of_lib_type),
            ]
        );

        let plain = NodeKey::GenericDictionary(world.program);
        let plain_node = factory.get_or_create(plain);
        assert!(matches!(
            factory.dependencies(plain_node, &plain),
            Err(Error::EntityNotFound(_))
        ));
    }

    #[test]
    fn test_terminal_kinds() {
        let world = SampleWorld::new();
        let factory = world.factory();

        for key in [
            NodeKey::Signature(world.abstract_method),
            NodeKey::HelperCell(crate::nodes::ReadyToRunHelper::NewObject),
        ] {
            let node = factory.get_or_create(key);
            assert!(factory.dependencies(node, &key).unwrap().is_empty());
        }
    }

    #[test]
    fn test_virtual_method_use_depends_on_owner() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let key = NodeKey::VirtualMethodUse(world.base_speak);
        let node = factory.get_or_create(key);

        let expansion = factory.dependencies(node, &key).unwrap();
        assert_eq!(targets(&factory, &expansion), vec![NodeKey::TypeLayout(world.base)]);
    }

    #[test]
    fn test_vtable_slot_gated_on_introducing_method() {
        let world = SampleWorld::new();
        let chain = world.add_override_chain();
        let factory = world.factory();
        let key = NodeKey::VTable(chain.big_disc);
        let node = factory.get_or_create(key);

        let expansion = factory.dependencies(node, &key).unwrap();
        assert_eq!(expansion.conditional.len(), 1);
        let conditional = expansion.conditional[0];
        assert_eq!(
            factory.key(conditional.target).unwrap(),
            NodeKey::MethodCode(chain.big_disc_area)
        );
        assert_eq!(
            factory.key(conditional.condition.node).unwrap(),
            NodeKey::VirtualMethodUse(chain.figure_area)
        );
    }
}
