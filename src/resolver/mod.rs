//! Portable, load-time resolvable tokens for entity references.
//!
//! Precompiled code must not embed addresses of types or methods: the image may be loaded next
//! to other precompiled modules whose layout is unknown at compile time. Every reference the
//! generated code makes is therefore expressed as a [`ModuleToken`], a `(module, kind, row)`
//! triple the runtime loader binds when the image is loaded.
//!
//! # Resolution Rules
//!
//! - An entity owned by a module of the compilation group is tokenized by its own definition
//!   row: `(owning module, kind of the definition table, row)`.
//! - An entity owned by any other module is tokenized through a reference row held by the
//!   module the reference is made from: `(from module, kind of the reference table, row)`.
//!   Such tokens are bound through import cells.
//! - When the requesting module holds no reference row for an out-of-group entity, resolution
//!   fails with [`Error::UnresolvableReference`]. The failure is fatal and never retried.
//!
//! Token values depend only on entity identity and never on the order in which references are
//! discovered, so two runs over the same inputs produce identical token tables regardless of
//! scheduling.
//!
//! # Thread Safety
//!
//! Tokens are cached in per-module partitions (`SkipMap`s keyed both ways), created lazily on
//! first use. Concurrent resolutions of one entity converge on the same cached value.

pub mod signature;

use std::{fmt, sync::Arc};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use strum::{Display, EnumCount, EnumIter};

use crate::{
    metadata::{
        entity::{EntityId, ModuleIndex, TypeSystemContext},
        group::CompilationModuleGroup,
        token::{MetadataTable, Token},
    },
    Error, Result,
};

/// What a [`ModuleToken`] row indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumCount)]
#[repr(u8)]
pub enum TokenKind {
    /// A `TypeDef` row
    TypeLayout = 0,
    /// A `TypeSpec` row
    TypeSpec = 1,
    /// A `MethodDef` row
    Method = 2,
    /// A `MethodSpec` row
    MethodSpec = 3,
    /// A `Field` row
    Field = 4,
    /// A `StandAloneSig` row
    Signature = 5,
    /// A `TypeRef` row bound at load time
    TypeImport = 6,
    /// A `MemberRef` row bound at load time
    MemberImport = 7,
}

impl From<MetadataTable> for TokenKind {
    fn from(table: MetadataTable) -> Self {
        match table {
            MetadataTable::TypeDef => TokenKind::TypeLayout,
            MetadataTable::TypeSpec => TokenKind::TypeSpec,
            MetadataTable::MethodDef => TokenKind::Method,
            MetadataTable::MethodSpec => TokenKind::MethodSpec,
            MetadataTable::Field => TokenKind::Field,
            MetadataTable::StandAloneSig => TokenKind::Signature,
            MetadataTable::TypeRef => TokenKind::TypeImport,
            MetadataTable::MemberRef => TokenKind::MemberImport,
        }
    }
}

/// A portable, address-free reference: `(module index, kind, row)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ModuleToken {
    /// The module whose table holds the row
    pub module: ModuleIndex,
    /// The table kind of the row
    pub kind: TokenKind,
    /// The 1-based row index
    pub row: u32,
}

impl ModuleToken {
    /// Size of the serialized form in bytes.
    pub const ENCODED_SIZE: usize = 9;

    /// Creates a token for a metadata token of `module`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if the token's table carries no portable kind.
    pub fn new(module: ModuleIndex, token: Token) -> Result<Self> {
        let table = token.table_kind().ok_or(Error::InvalidToken(token))?;

        Ok(ModuleToken {
            module,
            kind: TokenKind::from(table),
            row: token.row(),
        })
    }

    /// Serializes the token as 9 little-endian bytes: `u32` module, `u8` kind, `u32` row.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut bytes = [0u8; Self::ENCODED_SIZE];
        bytes[0..4].copy_from_slice(&self.module.value().to_le_bytes());
        bytes[4] = self.kind as u8;
        bytes[5..9].copy_from_slice(&self.row.to_le_bytes());
        bytes
    }

    /// Returns `true` if the token is bound through an import cell at load time.
    #[must_use]
    pub fn is_import(&self) -> bool {
        matches!(self.kind, TokenKind::TypeImport | TokenKind::MemberImport)
    }
}

impl fmt::Display for ModuleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.module, self.kind, self.row)
    }
}

/// One row of a [`TokenTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEntry {
    /// The portable token
    pub token: ModuleToken,
    /// The entity it resolves to
    pub entity: EntityId,
}

/// Snapshot of every token handed out during a session, sorted by token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenTable {
    entries: Vec<TokenEntry>,
}

impl TokenTable {
    /// The entries, sorted by token.
    #[must_use]
    pub fn entries(&self) -> &[TokenEntry] {
        &self.entries
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no token was handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the table for an image writer.
    ///
    /// Layout: `u32` entry count, then per entry the 9-byte token followed by the owning module
    /// (`u32`) and definition token (`u32`) of the entity. All integers are little-endian.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the entry count does not fit 32 bits.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| malformed_error!("Token table too large - {} entries", self.entries.len()))?;

        let mut buffer = Vec::with_capacity(4 + self.entries.len() * (ModuleToken::ENCODED_SIZE + 8));
        buffer.extend_from_slice(&count.to_le_bytes());
        for entry in &self.entries {
            buffer.extend_from_slice(&entry.token.to_bytes());
            buffer.extend_from_slice(&entry.entity.module().value().to_le_bytes());
            buffer.extend_from_slice(&entry.entity.token().value().to_le_bytes());
        }

        Ok(buffer)
    }
}

#[derive(Default)]
struct TokenPartition {
    by_entity: SkipMap<EntityId, ModuleToken>,
    by_token: SkipMap<ModuleToken, EntityId>,
}

/// Maps entities to portable tokens relative to the module a reference is made from.
pub struct TokenResolver {
    type_system: Arc<TypeSystemContext>,
    group: Arc<CompilationModuleGroup>,
    partitions: DashMap<ModuleIndex, Arc<TokenPartition>>,
}

impl TokenResolver {
    /// Creates a resolver over an entity model and compilation group.
    #[must_use]
    pub fn new(type_system: Arc<TypeSystemContext>, group: Arc<CompilationModuleGroup>) -> Self {
        TokenResolver {
            type_system,
            group,
            partitions: DashMap::new(),
        }
    }

    /// The entity model the resolver reads.
    #[must_use]
    pub fn type_system(&self) -> &Arc<TypeSystemContext> {
        &self.type_system
    }

    /// The compilation group the resolver tokenizes for.
    #[must_use]
    pub fn group(&self) -> &Arc<CompilationModuleGroup> {
        &self.group
    }

    /// Produces the token through which code of `from` refers to `entity`.
    ///
    /// The call is idempotent: repeated resolutions return the same token.
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvableReference`] if `entity` is outside the group and `from` holds no
    ///   reference row for it. The requester is left empty for the caller to fill in.
    /// - [`Error::EntityNotFound`] if an in-group entity is unknown to the entity model.
    /// - [`Error::InvalidToken`] if the entity's token has no portable kind.
    pub fn resolve(&self, entity: EntityId, from: ModuleIndex) -> Result<ModuleToken> {
        let home = if self.group.contains_entity(entity) {
            entity.module()
        } else {
            from
        };

        let partition = self.partition(home);
        if let Some(cached) = partition.by_entity.get(&entity) {
            return Ok(*cached.value());
        }

        let token = if self.group.contains_entity(entity) {
            if !self.type_system.contains(entity) {
                return Err(Error::EntityNotFound(entity));
            }
            ModuleToken::new(entity.module(), entity.token())?
        } else {
            let row = self.type_system.reference_row(from, entity).ok_or(
                Error::UnresolvableReference {
                    entity,
                    from,
                    requester: None,
                },
            )?;
            ModuleToken::new(from, row)?
        };

        // Tokens are a pure function of the entity, so racing inserts store equal values.
        partition.by_token.get_or_insert(token, entity);
        let token = *partition.by_entity.get_or_insert(entity, token).value();
        Ok(token)
    }

    /// Reverse lookup of a token handed out earlier.
    #[must_use]
    pub fn entity_for(&self, token: &ModuleToken) -> Option<EntityId> {
        let partition = self.partitions.get(&token.module)?;
        let entry = partition.by_token.get(token)?;
        Some(*entry.value())
    }

    /// Number of tokens handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|partition| partition.by_token.len())
            .sum()
    }

    /// Returns `true` if no token was handed out yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots all partitions into a table sorted by token.
    #[must_use]
    pub fn token_table(&self) -> TokenTable {
        let mut entries: Vec<TokenEntry> = self
            .partitions
            .iter()
            .flat_map(|partition| {
                partition
                    .by_token
                    .iter()
                    .map(|entry| TokenEntry {
                        token: *entry.key(),
                        entity: *entry.value(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by_key(|entry| entry.token);

        TokenTable { entries }
    }

    fn partition(&self, module: ModuleIndex) -> Arc<TokenPartition> {
        self.partitions.entry(module).or_default().value().clone()
    }
}
