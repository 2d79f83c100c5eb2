//! Entity model consumed by the compilation pipeline.
//!
//! The pipeline never decodes metadata itself. A loader (or a test) populates a
//! [`TypeSystemContext`] with the modules, types, methods, fields, stand-alone signatures and
//! cross-module reference rows it discovered, and the graph, resolver and codegen layers query
//! it through the methods below.
//!
//! # Key Components
//!
//! - [`ModuleIndex`] - Position of a module inside the context, stable for a session
//! - [`EntityId`] - Global identity of a definition: owning module plus definition token
//! - [`TypeDesc`], [`MethodDesc`], [`FieldDesc`] - Descriptions of definitions
//! - [`TypeSystemContext`] - Concurrent registry of all of the above
//!
//! # Thread Safety
//!
//! All registries are concurrent (`DashMap` and `boxcar::Vec`), so the context is shared by
//! reference between worker threads while nodes are expanded in parallel.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use bitflags::bitflags;
use dashmap::DashMap;

use crate::{
    metadata::{
        il::MethodIr,
        token::{MetadataTable, Token},
    },
    Error, Result,
};

/// Index of a module inside a [`TypeSystemContext`].
///
/// Module indices are assigned in registration order and are the module component of every
/// portable token, so they must be assigned identically in every run over the same inputs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ModuleIndex(u32);

impl ModuleIndex {
    /// Creates a module index from its raw value.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        ModuleIndex(index)
    }

    /// Returns the raw index value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// The category of an entity, derived from the table of its definition token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A type definition or a generic type instantiation
    Type,
    /// A method definition or a generic method instantiation
    Method,
    /// A field definition
    Field,
    /// A stand-alone signature
    Signature,
}

impl EntityKind {
    /// Maps a definition table to its entity kind.
    ///
    /// Returns `None` for reference tables, which never identify an entity on their own.
    #[must_use]
    pub fn from_table(table: MetadataTable) -> Option<Self> {
        match table {
            MetadataTable::TypeDef | MetadataTable::TypeSpec => Some(EntityKind::Type),
            MetadataTable::MethodDef | MetadataTable::MethodSpec => Some(EntityKind::Method),
            MetadataTable::Field => Some(EntityKind::Field),
            MetadataTable::StandAloneSig => Some(EntityKind::Signature),
            MetadataTable::TypeRef | MetadataTable::MemberRef => None,
        }
    }
}

/// Global identity of a definition: the owning module and the definition token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityId {
    module: ModuleIndex,
    token: Token,
}

impl EntityId {
    /// Creates an entity identity.
    #[must_use]
    pub const fn new(module: ModuleIndex, token: Token) -> Self {
        EntityId { module, token }
    }

    /// The module which owns the definition.
    #[must_use]
    pub const fn module(&self) -> ModuleIndex {
        self.module
    }

    /// The definition token inside the owning module.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// The entity kind, or `None` when the token is not a definition token.
    #[must_use]
    pub fn kind(&self) -> Option<EntityKind> {
        self.token.table_kind().and_then(EntityKind::from_table)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.module, self.token)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Type attributes relevant to layout and dispatch
    pub struct TypeFlags: u32 {
        /// Type cannot be derived from
        const SEALED = 0x0001;
        /// Type is an interface
        const INTERFACE = 0x0002;
        /// Type cannot be instantiated
        const ABSTRACT = 0x0004;
        /// Type is a value type
        const VALUE_TYPE = 0x0008;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Method attributes relevant to dispatch
    pub struct MethodFlags: u32 {
        /// Method has no `this` parameter
        const STATIC = 0x0001;
        /// Method occupies a virtual slot
        const VIRTUAL = 0x0002;
        /// Method has no body
        const ABSTRACT = 0x0004;
        /// Virtual method cannot be overridden further
        const FINAL = 0x0008;
        /// Virtual method introduces a new slot
        const NEW_SLOT = 0x0010;
    }
}

/// A generic instantiation: the generic definition plus its type arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instantiation {
    /// The open generic definition
    pub definition: EntityId,
    /// The type arguments, in declaration order
    pub arguments: Vec<EntityId>,
}

/// Description of a module registered in the context.
#[derive(Debug, Clone)]
pub struct ModuleDesc {
    /// Simple module name
    pub name: String,
    /// Filesystem path the module was loaded from
    pub path: PathBuf,
}

/// Description of a type definition or type instantiation.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    /// Identity of the type (`TypeDef` or `TypeSpec` token)
    pub id: EntityId,
    /// Full type name, for diagnostics
    pub name: String,
    /// Layout and dispatch attributes
    pub flags: TypeFlags,
    /// Base type, if any
    pub base: Option<EntityId>,
    /// Number of generic parameters of an open definition
    pub generic_parameters: u16,
    /// Instantiation details for `TypeSpec` types
    pub instantiation: Option<Instantiation>,
}

impl TypeDesc {
    /// Creates a plain type with no base type and no flags.
    #[must_use]
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        TypeDesc {
            id,
            name: name.into(),
            flags: TypeFlags::empty(),
            base: None,
            generic_parameters: 0,
            instantiation: None,
        }
    }

    /// Sets the base type.
    #[must_use]
    pub fn with_base(mut self, base: EntityId) -> Self {
        self.base = Some(base);
        self
    }

    /// Sets the type flags.
    #[must_use]
    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Marks the type as an open generic definition with `count` parameters.
    #[must_use]
    pub fn with_generic_parameters(mut self, count: u16) -> Self {
        self.generic_parameters = count;
        self
    }

    /// Marks the type as an instantiation of `definition` over `arguments`.
    #[must_use]
    pub fn with_instantiation(mut self, definition: EntityId, arguments: Vec<EntityId>) -> Self {
        self.instantiation = Some(Instantiation {
            definition,
            arguments,
        });
        self
    }

    /// Returns `true` if the type cannot be derived from.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeFlags::SEALED)
    }
}

/// Description of a method definition or method instantiation.
#[derive(Debug, Clone)]
pub struct MethodDesc {
    /// Identity of the method (`MethodDef` or `MethodSpec` token)
    pub id: EntityId,
    /// The declaring type
    pub owner: EntityId,
    /// Method name, for diagnostics
    pub name: String,
    /// Dispatch attributes
    pub flags: MethodFlags,
    /// The virtual slot this method overrides, if any
    pub overrides: Option<EntityId>,
    /// The method body, if the method has one
    pub body: Option<MethodIr>,
    /// Number of generic parameters of an open definition
    pub generic_parameters: u16,
    /// Instantiation details for `MethodSpec` methods
    pub instantiation: Option<Instantiation>,
}

impl MethodDesc {
    /// Creates a non-virtual method without a body.
    #[must_use]
    pub fn new(id: EntityId, owner: EntityId, name: impl Into<String>) -> Self {
        MethodDesc {
            id,
            owner,
            name: name.into(),
            flags: MethodFlags::empty(),
            overrides: None,
            body: None,
            generic_parameters: 0,
            instantiation: None,
        }
    }

    /// Attaches a method body.
    #[must_use]
    pub fn with_body(mut self, body: MethodIr) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the method flags.
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Marks the method as a virtual override of `slot`.
    #[must_use]
    pub fn overriding(mut self, slot: EntityId) -> Self {
        self.flags |= MethodFlags::VIRTUAL;
        self.overrides = Some(slot);
        self
    }

    /// Marks the method as an open generic definition with `count` parameters.
    #[must_use]
    pub fn with_generic_parameters(mut self, count: u16) -> Self {
        self.generic_parameters = count;
        self
    }

    /// Marks the method as an instantiation of `definition` over `arguments`.
    #[must_use]
    pub fn with_instantiation(mut self, definition: EntityId, arguments: Vec<EntityId>) -> Self {
        self.instantiation = Some(Instantiation {
            definition,
            arguments,
        });
        self
    }

    /// Returns `true` if the method occupies a virtual slot.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }
}

/// Description of a field definition.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    /// Identity of the field
    pub id: EntityId,
    /// The declaring type
    pub owner: EntityId,
    /// Field name, for diagnostics
    pub name: String,
}

impl FieldDesc {
    /// Creates a field description.
    #[must_use]
    pub fn new(id: EntityId, owner: EntityId, name: impl Into<String>) -> Self {
        FieldDesc {
            id,
            owner,
            name: name.into(),
        }
    }
}

/// Concurrent registry of every entity known to a compilation.
///
/// Besides the primary maps keyed by [`EntityId`], the context maintains secondary indices
/// (methods and fields per declaring type, overriders per virtual slot) and the reference rows
/// each module holds to entities of other modules.
#[derive(Default)]
pub struct TypeSystemContext {
    modules: boxcar::Vec<ModuleDesc>,
    types: DashMap<EntityId, Arc<TypeDesc>>,
    methods: DashMap<EntityId, Arc<MethodDesc>>,
    fields: DashMap<EntityId, Arc<FieldDesc>>,
    signatures: DashMap<EntityId, Arc<[u8]>>,
    methods_by_owner: DashMap<EntityId, Vec<EntityId>>,
    fields_by_owner: DashMap<EntityId, Vec<EntityId>>,
    overriders: DashMap<EntityId, Vec<EntityId>>,
    /// (referencing module, reference token) -> target entity
    references: DashMap<(ModuleIndex, Token), EntityId>,
    /// (referencing module, target entity) -> reference token
    reference_rows: DashMap<(ModuleIndex, EntityId), Token>,
}

impl TypeSystemContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the module count no longer fits a 32-bit index.
    pub fn add_module(&self, name: impl Into<String>, path: impl Into<PathBuf>) -> Result<ModuleIndex> {
        let position = self.modules.push(ModuleDesc {
            name: name.into(),
            path: path.into(),
        });

        u32::try_from(position)
            .map(ModuleIndex::new)
            .map_err(|_| malformed_error!("Module index {} exceeds 32 bits", position))
    }

    /// Returns the description of a module.
    #[must_use]
    pub fn module(&self, index: ModuleIndex) -> Option<&ModuleDesc> {
        self.modules.get(index.value() as usize)
    }

    /// Finds a module by the path it was loaded from.
    #[must_use]
    pub fn module_by_path(&self, path: &Path) -> Option<ModuleIndex> {
        self.modules
            .iter()
            .find(|(_, module)| module.path == path)
            .and_then(|(position, _)| u32::try_from(position).ok())
            .map(ModuleIndex::new)
    }

    /// Finds a module by its simple name.
    #[must_use]
    pub fn module_by_name(&self, name: &str) -> Option<ModuleIndex> {
        self.modules
            .iter()
            .find(|(_, module)| module.name == name)
            .and_then(|(position, _)| u32::try_from(position).ok())
            .map(ModuleIndex::new)
    }

    /// Number of registered modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.count()
    }

    /// Registers a type definition or instantiation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for an unknown owning module and
    /// [`Error::InvalidToken`] if the identity is not a `TypeDef` or `TypeSpec` token.
    pub fn add_type(&self, desc: TypeDesc) -> Result<()> {
        self.check_definition(desc.id, EntityKind::Type)?;
        self.types.insert(desc.id, Arc::new(desc));
        Ok(())
    }

    /// Registers a method definition or instantiation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for an unknown owning module and
    /// [`Error::InvalidToken`] if the identity is not a `MethodDef` or `MethodSpec` token.
    pub fn add_method(&self, desc: MethodDesc) -> Result<()> {
        self.check_definition(desc.id, EntityKind::Method)?;

        Self::insert_sorted(&self.methods_by_owner, desc.owner, desc.id);
        if let Some(slot) = desc.overrides {
            Self::insert_sorted(&self.overriders, slot, desc.id);
        }

        self.methods.insert(desc.id, Arc::new(desc));
        Ok(())
    }

    /// Registers a field definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for an unknown owning module and
    /// [`Error::InvalidToken`] if the identity is not a `Field` token.
    pub fn add_field(&self, desc: FieldDesc) -> Result<()> {
        self.check_definition(desc.id, EntityKind::Field)?;

        Self::insert_sorted(&self.fields_by_owner, desc.owner, desc.id);
        self.fields.insert(desc.id, Arc::new(desc));
        Ok(())
    }

    /// Registers a stand-alone signature blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for an unknown owning module and
    /// [`Error::InvalidToken`] if the identity is not a `StandAloneSig` token.
    pub fn add_signature(&self, id: EntityId, blob: &[u8]) -> Result<()> {
        self.check_definition(id, EntityKind::Signature)?;
        self.signatures.insert(id, Arc::from(blob));
        Ok(())
    }

    /// Registers a reference row of `module` pointing at `target`.
    ///
    /// Reference rows are `TypeRef` and `MemberRef` rows, plus `TypeSpec` and `MethodSpec` rows
    /// that instantiate an entity owned by another module.
    ///
    /// When a module holds several rows for the same target, the lowest row is used for
    /// reverse lookups so that resolution does not depend on registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for an unknown module and [`Error::InvalidToken`] if
    /// `reference` is not from a reference table.
    pub fn add_reference(&self, module: ModuleIndex, reference: Token, target: EntityId) -> Result<()> {
        if self.module(module).is_none() {
            return Err(Error::ModuleNotFound(module.to_string()));
        }

        match reference.table_kind() {
            Some(
                MetadataTable::TypeRef
                | MetadataTable::MemberRef
                | MetadataTable::TypeSpec
                | MetadataTable::MethodSpec,
            ) => {}
            _ => return Err(Error::InvalidToken(reference)),
        }

        self.references.insert((module, reference), target);
        self.reference_rows
            .entry((module, target))
            .and_modify(|existing| {
                if reference < *existing {
                    *existing = reference;
                }
            })
            .or_insert(reference);

        Ok(())
    }

    /// Maps a token used inside `module` to the entity it names.
    ///
    /// Reference rows are followed to the entity they point at; any other definition token
    /// names an entity of `module` itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for tokens of unknown tables or dangling reference rows,
    /// and [`Error::EntityNotFound`] for definition tokens without a registered entity.
    pub fn resolve_local(&self, module: ModuleIndex, token: Token) -> Result<EntityId> {
        let Some(table) = token.table_kind() else {
            return Err(Error::InvalidToken(token));
        };

        if let Some(target) = self.references.get(&(module, token)) {
            return Ok(*target.value());
        }

        if table.is_reference() {
            return Err(Error::InvalidToken(token));
        }

        let entity = EntityId::new(module, token);
        if self.contains(entity) {
            Ok(entity)
        } else {
            Err(Error::EntityNotFound(entity))
        }
    }

    /// Returns the reference row through which `module` refers to `entity`, if any.
    #[must_use]
    pub fn reference_row(&self, module: ModuleIndex, entity: EntityId) -> Option<Token> {
        self.reference_rows
            .get(&(module, entity))
            .map(|row| *row.value())
    }

    /// Returns `true` if any registry holds `entity`.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        match entity.kind() {
            Some(EntityKind::Type) => self.types.contains_key(&entity),
            Some(EntityKind::Method) => self.methods.contains_key(&entity),
            Some(EntityKind::Field) => self.fields.contains_key(&entity),
            Some(EntityKind::Signature) => self.signatures.contains_key(&entity),
            None => false,
        }
    }

    /// Returns the description of a type.
    #[must_use]
    pub fn type_desc(&self, id: EntityId) -> Option<Arc<TypeDesc>> {
        self.types.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the description of a method.
    #[must_use]
    pub fn method(&self, id: EntityId) -> Option<Arc<MethodDesc>> {
        self.methods.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the description of a field.
    #[must_use]
    pub fn field(&self, id: EntityId) -> Option<Arc<FieldDesc>> {
        self.fields.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns a stand-alone signature blob.
    #[must_use]
    pub fn signature(&self, id: EntityId) -> Option<Arc<[u8]>> {
        self.signatures.get(&id).map(|entry| entry.value().clone())
    }

    /// Methods declared by `owner`, in token order.
    #[must_use]
    pub fn methods_of(&self, owner: EntityId) -> Vec<EntityId> {
        self.methods_by_owner
            .get(&owner)
            .map(|methods| methods.value().clone())
            .unwrap_or_default()
    }

    /// Fields declared by `owner`, in token order.
    #[must_use]
    pub fn fields_of(&self, owner: EntityId) -> Vec<EntityId> {
        self.fields_by_owner
            .get(&owner)
            .map(|fields| fields.value().clone())
            .unwrap_or_default()
    }

    /// Methods overriding the virtual `slot`, in identity order.
    #[must_use]
    pub fn overriders_of(&self, slot: EntityId) -> Vec<EntityId> {
        self.overriders
            .get(&slot)
            .map(|methods| methods.value().clone())
            .unwrap_or_default()
    }

    /// The method that introduced the virtual slot `method` fills.
    ///
    /// Follows `overrides` links to the top of the chain. A method that overrides nothing is its
    /// own slot. A cycle in the links stops the walk at the first repeated method.
    #[must_use]
    pub fn root_slot(&self, method: EntityId) -> EntityId {
        let mut slot = method;
        let mut visited = HashSet::new();
        while visited.insert(slot) {
            match self.methods.get(&slot).and_then(|desc| desc.overrides) {
                Some(next) => slot = next,
                None => break,
            }
        }
        slot
    }

    /// `method` and every method overriding it, directly or through intermediate overrides,
    /// in identity order.
    #[must_use]
    pub fn override_closure(&self, method: EntityId) -> Vec<EntityId> {
        let mut seen = HashSet::from([method]);
        let mut pending = vec![method];
        while let Some(current) = pending.pop() {
            for overrider in self.overriders_of(current) {
                if seen.insert(overrider) {
                    pending.push(overrider);
                }
            }
        }

        let mut closure: Vec<EntityId> = seen.into_iter().collect();
        closure.sort();
        closure
    }

    /// All methods owned by `module`, in identity order.
    #[must_use]
    pub fn methods_in_module(&self, module: ModuleIndex) -> Vec<EntityId> {
        let mut methods: Vec<EntityId> = self
            .methods
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| id.module() == module)
            .collect();
        methods.sort();
        methods
    }

    fn check_definition(&self, id: EntityId, expected: EntityKind) -> Result<()> {
        if self.module(id.module()).is_none() {
            return Err(Error::ModuleNotFound(id.module().to_string()));
        }

        if id.kind() == Some(expected) {
            Ok(())
        } else {
            Err(Error::InvalidToken(id.token()))
        }
    }

    fn insert_sorted(index: &DashMap<EntityId, Vec<EntityId>>, key: EntityId, value: EntityId) {
        let mut entries = index.entry(key).or_default();
        if let Err(position) = entries.binary_search(&value) {
            entries.insert(position, value);
        }
    }
}
