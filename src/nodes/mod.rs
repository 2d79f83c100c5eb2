//! Compiler artifacts as dependency graph nodes.
//!
//! Every artifact an image may contain is identified by a [`NodeKey`]. The key is a pure
//! function of the artifact, so the [`NodeFactory`] can deduplicate nodes across concurrent
//! requests: two callers asking for the layout of the same type receive the same node.
//!
//! # Node Kinds
//!
//! | Key | Artifact | Expands to |
//! |-----|----------|------------|
//! | `MethodCode` | Native code of a method body | owner layout, dictionary, codegen discoveries |
//! | `TypeLayout` | Runtime type descriptor | base type, generic definition and arguments |
//! | `VTable` | Virtual dispatch table | layout, base vtable, used virtual slots |
//! | `GenericDictionary` | Runtime lookup slots of an instantiation | arguments, signature |
//! | `Signature` | Portable signature blob | nothing |
//! | `ImportCell` | Load-time fixup for an out-of-group entity | nothing |
//! | `HelperCell` | Slot for a runtime helper routine | nothing |
//! | `VirtualMethodUse` | Marker: some code dispatches through a slot | owner layout |

mod dependencies;
mod emit;
mod factory;

use std::fmt;

use strum::{Display, EnumCount, EnumIter};

use crate::{metadata::entity::EntityId, resolver::ModuleToken};

pub use emit::{EmittedNode, EmittedRelocation, RelocationSymbol};
pub use factory::NodeFactory;

/// Runtime helper routines generated code may call through a helper cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumCount)]
#[repr(u32)]
pub enum ReadyToRunHelper {
    /// Allocate an object
    NewObject = 0x60,
    /// Allocate an array
    NewArray = 0x61,
    /// Box a value type
    Box = 0x58,
    /// Unbox a value type
    Unbox = 0x5A,
    /// Throw an exception
    Throw = 0x20,
    /// Resolve a method entry on first call
    DelayLoadMethodCall = 0x100,
    /// Resolve a virtual dispatch target on first call
    DelayLoadVirtualCall = 0x101,
    /// Locate the static base of a type
    StaticBase = 0x102,
}

impl ReadyToRunHelper {
    /// The helper id written into helper cells.
    #[must_use]
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Logical identity of a graph node.
///
/// Keys order first by kind, in declaration order, then by the identity they carry. Output is
/// sorted by key, which makes emission independent of discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKey {
    /// Native code of a method with a body
    MethodCode(EntityId),
    /// Runtime layout of a type
    TypeLayout(EntityId),
    /// Virtual dispatch table of a type
    VTable(EntityId),
    /// Generic dictionary of a type or method instantiation
    GenericDictionary(EntityId),
    /// Portable signature of an entity
    Signature(EntityId),
    /// Load-time fixup for an entity outside the compilation group
    ImportCell(ModuleToken),
    /// Slot for a runtime helper
    HelperCell(ReadyToRunHelper),
    /// Marker recording that a virtual slot is dispatched through
    VirtualMethodUse(EntityId),
}

impl NodeKey {
    /// Short name of the key's kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKey::MethodCode(_) => "MethodCode",
            NodeKey::TypeLayout(_) => "TypeLayout",
            NodeKey::VTable(_) => "VTable",
            NodeKey::GenericDictionary(_) => "GenericDictionary",
            NodeKey::Signature(_) => "Signature",
            NodeKey::ImportCell(_) => "ImportCell",
            NodeKey::HelperCell(_) => "HelperCell",
            NodeKey::VirtualMethodUse(_) => "VirtualMethodUse",
        }
    }

    /// The entity the node stands for, if it stands for one.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            NodeKey::MethodCode(id)
            | NodeKey::TypeLayout(id)
            | NodeKey::VTable(id)
            | NodeKey::GenericDictionary(id)
            | NodeKey::Signature(id)
            | NodeKey::VirtualMethodUse(id) => Some(*id),
            NodeKey::ImportCell(_) | NodeKey::HelperCell(_) => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::ImportCell(token) => write!(f, "ImportCell({token})"),
            NodeKey::HelperCell(helper) => write!(f, "HelperCell({helper})"),
            other => match other.entity() {
                Some(entity) => write!(f, "{}({entity})", other.kind_name()),
                None => write!(f, "{}", other.kind_name()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{entity::ModuleIndex, token::Token},
        resolver::TokenKind,
    };

    #[test]
    fn test_key_display() {
        let entity = EntityId::new(ModuleIndex::new(2), Token::new(0x0200_0003));
        assert_eq!(NodeKey::TypeLayout(entity).to_string(), "TypeLayout([m2]0x02000003)");
        assert_eq!(
            NodeKey::HelperCell(ReadyToRunHelper::NewObject).to_string(),
            "HelperCell(NewObject)"
        );

        let token = ModuleToken {
            module: ModuleIndex::new(0),
            kind: TokenKind::TypeImport,
            row: 1,
        };
        assert_eq!(NodeKey::ImportCell(token).to_string(), "ImportCell(m0:TypeImport#1)");
    }

    #[test]
    fn test_key_ordering() {
        let a = EntityId::new(ModuleIndex::new(0), Token::new(0x0600_0002));
        let b = EntityId::new(ModuleIndex::new(1), Token::new(0x0200_0001));

        let mut keys = vec![
            NodeKey::TypeLayout(b),
            NodeKey::MethodCode(a),
            NodeKey::VirtualMethodUse(a),
            NodeKey::TypeLayout(a),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                NodeKey::MethodCode(a),
                NodeKey::TypeLayout(a),
                NodeKey::TypeLayout(b),
                NodeKey::VirtualMethodUse(a),
            ]
        );
    }

    #[test]
    fn test_helper_ids_are_unique() {
        use std::collections::HashSet;
        use strum::IntoEnumIterator;

        let ids: HashSet<u32> = ReadyToRunHelper::iter().map(ReadyToRunHelper::id).collect();
        assert_eq!(ids.len(), ReadyToRunHelper::COUNT);
    }
}
