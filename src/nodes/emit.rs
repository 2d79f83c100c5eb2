//! Byte layouts of emitted nodes.
//!
//! Every node kind has a fixed little-endian layout with 8-byte pointer slots. Slots that refer
//! to other nodes or to load-time tokens are left zeroed and described by a relocation.
//!
//! | Kind | Layout |
//! |------|--------|
//! | `MethodCode` | code bytes produced by the backend |
//! | `TypeLayout` | `u32` flags, `u32` fields, `u32` methods, `u32` generic args, base slot |
//! | `VTable` | `u32` slot count, `u32` reserved, base vtable slot, one slot per virtual method |
//! | `GenericDictionary` | `u32` slot count, `u32` reserved, one slot per argument |
//! | `Signature` | portable signature blob |
//! | `ImportCell` | one slot bound to the token at load time |
//! | `HelperCell` | `u32` helper id, `u32` reserved |
//! | `VirtualMethodUse` | empty |
//!
//! Relocations are validated before a node is handed out: each must lie inside the node's data
//! and may only target tokens or marked nodes.

use crate::{
    codegen::{CompiledMethodResult, Relocation, RelocationKind, RelocationTarget},
    graph::NodeId,
    metadata::entity::{EntityId, EntityKind},
    nodes::{factory::NodeFactory, NodeKey},
    resolver::{signature::SignatureContext, ModuleToken},
    Error, Result,
};

/// What an emitted relocation points at, independent of node handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationSymbol {
    /// Another emitted node
    Node(NodeKey),
    /// A token bound at load time
    Token(ModuleToken),
}

/// A relocation of an emitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmittedRelocation {
    /// Byte offset inside the node data
    pub offset: u32,
    /// How the slot is patched
    pub kind: RelocationKind,
    /// The patched-in symbol
    pub symbol: RelocationSymbol,
}

/// The output of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedNode {
    /// Identity of the node
    pub key: NodeKey,
    /// Data bytes
    pub data: Vec<u8>,
    /// Fixups applied to `data`
    pub relocations: Vec<EmittedRelocation>,
}

#[derive(Default)]
struct NodeWriter {
    data: Vec<u8>,
    relocations: Vec<Relocation>,
}

impl NodeWriter {
    fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn write_slot(&mut self, target: Option<RelocationTarget>) -> Result<()> {
        if let Some(target) = target {
            let offset = u32::try_from(self.data.len())
                .map_err(|_| malformed_error!("Node data exceeds 4 GiB"))?;
            self.relocations.push(Relocation {
                offset,
                kind: RelocationKind::Absolute64,
                target,
            });
        }
        self.data.extend_from_slice(&[0u8; 8]);
        Ok(())
    }
}

fn count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| malformed_error!("Count {} exceeds 32 bits", len))
}

impl NodeFactory {
    /// Produces the data and relocations of a marked node.
    ///
    /// `compiled` must carry the codegen result for `MethodCode` nodes and is ignored for
    /// every other kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if a method was not compiled or a relocation targets an
    /// unmarked node or lies outside the data, and entity model or resolution errors for
    /// layouts that cannot be produced.
    pub fn emit(&self, node: NodeId, compiled: Option<&CompiledMethodResult>) -> Result<EmittedNode> {
        let key = self.key(node)?;
        let mut writer = NodeWriter::default();

        match key {
            NodeKey::MethodCode(_) => {
                let result = compiled
                    .ok_or_else(|| Error::GraphError(format!("{key} was marked but never compiled")))?;
                writer.data = result.code.clone();
                writer.relocations = result.relocations.clone();
            }
            NodeKey::TypeLayout(ty) => {
                let desc = self.type_system().type_desc(ty).ok_or(Error::EntityNotFound(ty))?;
                let generic_arguments = desc
                    .instantiation
                    .as_ref()
                    .map_or(usize::from(desc.generic_parameters), |i| i.arguments.len());

                writer.write_u32(desc.flags.bits());
                writer.write_u32(count(self.type_system().fields_of(ty).len())?);
                writer.write_u32(count(self.type_system().methods_of(ty).len())?);
                writer.write_u32(count(generic_arguments)?);

                let base = match desc.base {
                    Some(base) => Some(RelocationTarget::Node(self.reference_node(
                        base,
                        ty.module(),
                        &key,
                    )?)),
                    None => None,
                };
                writer.write_slot(base)?;
            }
            NodeKey::VTable(ty) => {
                let desc = self.type_system().type_desc(ty).ok_or(Error::EntityNotFound(ty))?;
                let slots: Vec<EntityId> = self
                    .type_system()
                    .methods_of(ty)
                    .into_iter()
                    .filter(|m| self.type_system().method(*m).is_some_and(|d| d.is_virtual()))
                    .collect();

                writer.write_u32(count(slots.len())?);
                writer.write_u32(0);

                let base = desc
                    .base
                    .and_then(|base| self.arena().find(&NodeKey::VTable(base)))
                    .filter(|id| self.arena().state(*id).is_marked())
                    .map(RelocationTarget::Node);
                writer.write_slot(base)?;

                for method in slots {
                    let compiled = self
                        .arena()
                        .find(&NodeKey::MethodCode(method))
                        .filter(|id| self.arena().state(*id).is_marked());
                    let target = match compiled {
                        Some(id) => RelocationTarget::Node(id),
                        None => RelocationTarget::Token(self.resolver().resolve(method, ty.module())?),
                    };
                    writer.write_slot(Some(target))?;
                }
            }
            NodeKey::GenericDictionary(entity) => {
                let instantiation = self.instantiation_of(entity)?;
                writer.write_u32(count(instantiation.arguments.len())?);
                writer.write_u32(0);

                for argument in instantiation.arguments {
                    let target = self.reference_node(argument, entity.module(), &key)?;
                    writer.write_slot(Some(RelocationTarget::Node(target)))?;
                }
            }
            NodeKey::Signature(entity) => {
                let context = SignatureContext::new(self.resolver(), entity.module());
                writer.data = match entity.kind() {
                    Some(EntityKind::Type) => context.type_signature(entity)?,
                    Some(EntityKind::Method) => context.method_signature(entity)?,
                    Some(EntityKind::Field) => context.field_signature(entity)?,
                    Some(EntityKind::Signature) => self
                        .type_system()
                        .signature(entity)
                        .ok_or(Error::EntityNotFound(entity))?
                        .to_vec(),
                    None => return Err(Error::InvalidToken(entity.token())),
                };
            }
            NodeKey::ImportCell(token) => {
                writer.write_slot(Some(RelocationTarget::Token(token)))?;
            }
            NodeKey::HelperCell(helper) => {
                writer.write_u32(helper.id());
                writer.write_u32(0);
            }
            NodeKey::VirtualMethodUse(_) => {}
        }

        let relocations = writer
            .relocations
            .iter()
            .map(|relocation| self.emitted_relocation(&key, relocation, writer.data.len()))
            .collect::<Result<Vec<_>>>()?;

        Ok(EmittedNode {
            key,
            data: writer.data,
            relocations,
        })
    }

    fn emitted_relocation(
        &self,
        key: &NodeKey,
        relocation: &Relocation,
        data_len: usize,
    ) -> Result<EmittedRelocation> {
        let end = relocation.offset as usize + relocation.kind.size();
        if end > data_len {
            return Err(Error::GraphError(format!(
                "Relocation in {key} at offset {} exceeds data size {data_len}",
                relocation.offset
            )));
        }

        let symbol = match relocation.target {
            RelocationTarget::Token(token) => RelocationSymbol::Token(token),
            RelocationTarget::Node(target) => {
                if !self.arena().state(target).is_marked() {
                    return Err(Error::GraphError(format!(
                        "Relocation in {key} at offset {} targets unmarked node {target}",
                        relocation.offset
                    )));
                }
                RelocationSymbol::Node(self.key(target)?)
            }
        };

        Ok(EmittedRelocation {
            offset: relocation.offset,
            kind: relocation.kind,
            symbol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{graph::NodeState, nodes::ReadyToRunHelper, test::SampleWorld};

    fn mark(factory: &NodeFactory, key: NodeKey) -> NodeId {
        let id = factory.get_or_create(key);
        factory.arena().advance(id, NodeState::Expanded);
        id
    }

    #[test]
    fn test_helper_and_marker_layouts() {
        let world = SampleWorld::new();
        let factory = world.factory();

        let helper = mark(&factory, NodeKey::HelperCell(ReadyToRunHelper::NewObject));
        let emitted = factory.emit(helper, None).unwrap();
        assert_eq!(emitted.data, vec![0x60, 0, 0, 0, 0, 0, 0, 0]);
        assert!(emitted.relocations.is_empty());

        let marker = mark(&factory, NodeKey::VirtualMethodUse(world.base_speak));
        assert!(factory.emit(marker, None).unwrap().data.is_empty());
    }

    #[test]
    fn test_type_layout_base_slot() {
        let world = SampleWorld::new();
        let factory = world.factory();

        mark(&factory, NodeKey::TypeLayout(world.base));
        let derived = mark(&factory, NodeKey::TypeLayout(world.derived));

        let emitted = factory.emit(derived, None).unwrap();
        assert_eq!(emitted.data.len(), 24);
        assert_eq!(
            emitted.relocations,
            vec![EmittedRelocation {
                offset: 16,
                kind: RelocationKind::Absolute64,
                symbol: RelocationSymbol::Node(NodeKey::TypeLayout(world.base)),
            }]
        );
    }

    #[test]
    fn test_unmarked_target_is_rejected() {
        let world = SampleWorld::new();
        let factory = world.factory();

        // Base layout exists only after reference_node creates it, but is never marked
        let derived = mark(&factory, NodeKey::TypeLayout(world.derived));
        let err = factory.emit(derived, None).unwrap_err();
        assert!(matches!(err, Error::GraphError(ref msg) if msg.contains("unmarked")));
    }

    #[test]
    fn test_vtable_slots() {
        let world = SampleWorld::new();
        let factory = world.factory();

        let vtable = mark(&factory, NodeKey::VTable(world.derived));
        let emitted = factory.emit(vtable, None).unwrap();

        // Header, base slot, one method slot; the override was never compiled
        assert_eq!(emitted.data.len(), 8 + 8 + 8);
        assert_eq!(emitted.relocations.len(), 1);
        assert!(matches!(
            emitted.relocations[0].symbol,
            RelocationSymbol::Token(token) if token.module == world.app
        ));

        mark(&factory, NodeKey::MethodCode(world.derived_speak));
        mark(&factory, NodeKey::VTable(world.base));
        let emitted = factory.emit(vtable, None).unwrap();
        assert_eq!(
            emitted.relocations.iter().map(|r| r.symbol).collect::<Vec<_>>(),
            vec![
                RelocationSymbol::Node(NodeKey::VTable(world.base)),
                RelocationSymbol::Node(NodeKey::MethodCode(world.derived_speak)),
            ]
        );
    }

    #[test]
    fn test_import_cell() {
        let world = SampleWorld::new();
        let factory = world.factory();
        let token = factory.resolver().resolve(world.external_type, world.app).unwrap();

        let cell = mark(&factory, NodeKey::ImportCell(token));
        let emitted = factory.emit(cell, None).unwrap();
        assert_eq!(emitted.data, vec![0; 8]);
        assert_eq!(emitted.relocations[0].symbol, RelocationSymbol::Token(token));
    }

    #[test]
    fn test_signature_blobs() {
        let world = SampleWorld::new();
        let factory = world.factory();

        let sig = mark(&factory, NodeKey::Signature(world.locals_signature));
        assert_eq!(factory.emit(sig, None).unwrap().data, world.locals_blob.to_vec());

        let method = mark(&factory, NodeKey::Signature(world.abstract_method));
        assert!(!factory.emit(method, None).unwrap().data.is_empty());
    }

    #[test]
    fn test_uncompiled_method_is_rejected() {
        let world = SampleWorld::new();
        let factory = world.factory();

        let code = mark(&factory, NodeKey::MethodCode(world.main));
        assert!(matches!(factory.emit(code, None), Err(Error::GraphError(_))));
    }
}
