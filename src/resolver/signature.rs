//! Portable signature encoding relative to a context module.
//!
//! A [`SignatureContext`] binds a [`TokenResolver`] to the module whose code references the
//! encoded entities. Every handle is written as an ECMA-335 style blob whose embedded tokens
//! come from the resolver, so the blob stays valid when the image is loaded next to modules
//! compiled separately.
//!
//! # Format
//!
//! - Types: `[MODULE_ZAPSIG module]` (`CLASS` | `VALUETYPE`) `TypeDefOrRef`, or
//!   `GENERICINST` followed by the definition and the arguments, each encoded recursively
//! - Methods: flags byte, `[module]`, `MethodDefOrRef`, `[count args...]`
//! - Fields: flags byte, `[module]`, then either the owner type and field row or a `MemberRef` row
//!
//! The module override is written whenever a token lives in a module other than the context
//! module. All integers use the compressed encoding of ECMA-335 II.23.2.

use crate::{
    metadata::entity::{EntityId, ModuleIndex, TypeFlags},
    resolver::{ModuleToken, TokenKind, TokenResolver},
    Error, Result,
};

#[allow(non_snake_case, dead_code, missing_docs)]
/// Signature element bytes used by the portable encoding
pub mod ELEMENT_TYPE {
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const GENERICINST: u8 = 0x15;
    // Followed by a compressed module index, then the type
    pub const MODULE_ZAPSIG: u8 = 0x3F;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Leading flag bits of method and field entries
pub mod ENTRY_FLAGS {
    pub const METHOD_INSTANTIATING: u8 = 0x01;
    pub const FIELD_MEMBER_REF: u8 = 0x01;
    pub const MODULE_OVERRIDE: u8 = 0x80;
}

/// Largest value the compressed integer encoding can represent.
pub const MAX_COMPRESSED_UINT: u32 = 0x1FFF_FFFF;

/// Appends `value` in the ECMA-335 compressed unsigned integer encoding.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if `value` exceeds [`MAX_COMPRESSED_UINT`].
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) -> Result<()> {
    if value <= 0x7F {
        // 1-byte encoding: 0xxxxxxx
        buffer.push(value as u8);
    } else if value <= 0x3FFF {
        // 2-byte encoding: 10xxxxxx xxxxxxxx
        buffer.push(0x80 | (value >> 8) as u8);
        buffer.push(value as u8);
    } else if value <= MAX_COMPRESSED_UINT {
        // 4-byte encoding: 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        buffer.push(0xC0 | (value >> 24) as u8);
        buffer.push((value >> 16) as u8);
        buffer.push((value >> 8) as u8);
        buffer.push(value as u8);
    } else {
        return Err(malformed_error!(
            "Value 0x{:08X} exceeds the compressed integer range",
            value
        ));
    }

    Ok(())
}

/// Encodes a type token as a `TypeDefOrRef` coded index.
///
/// - `TypeDef`: `(rid << 2) | 0`
/// - `TypeRef`: `(rid << 2) | 1`
/// - `TypeSpec`: `(rid << 2) | 2`
fn type_def_or_ref(token: &ModuleToken) -> Result<u32> {
    match token.kind {
        TokenKind::TypeLayout => Ok(token.row << 2),
        TokenKind::TypeImport => Ok((token.row << 2) | 1),
        TokenKind::TypeSpec => Ok((token.row << 2) | 2),
        _ => Err(malformed_error!(
            "Token {} cannot be encoded as TypeDefOrRef",
            token
        )),
    }
}

/// Encodes a method token as a `MethodDefOrRef` coded index.
fn method_def_or_ref(token: &ModuleToken) -> Result<u32> {
    match token.kind {
        TokenKind::Method => Ok(token.row << 1),
        TokenKind::MemberImport => Ok((token.row << 1) | 1),
        _ => Err(malformed_error!(
            "Token {} cannot be encoded as MethodDefOrRef",
            token
        )),
    }
}

/// A [`TokenResolver`] bound to the module whose code is being encoded.
pub struct SignatureContext<'a> {
    resolver: &'a TokenResolver,
    module: ModuleIndex,
}

impl<'a> SignatureContext<'a> {
    /// Creates a context for references made from `module`.
    #[must_use]
    pub fn new(resolver: &'a TokenResolver, module: ModuleIndex) -> Self {
        SignatureContext { resolver, module }
    }

    /// The context module.
    #[must_use]
    pub fn module(&self) -> ModuleIndex {
        self.module
    }

    /// Resolves `entity` relative to the context module.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures from [`TokenResolver::resolve`].
    pub fn resolve(&self, entity: EntityId) -> Result<ModuleToken> {
        self.resolver.resolve(entity, self.module)
    }

    /// Encodes a type handle into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for the type or any instantiation argument.
    pub fn type_signature(&self, ty: EntityId) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.encode_type(ty, &mut buffer)?;
        Ok(buffer)
    }

    /// Encodes a method entry into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for the method or any instantiation argument.
    pub fn method_signature(&self, method: EntityId) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.encode_method(method, &mut buffer)?;
        Ok(buffer)
    }

    /// Encodes a field handle into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for the field or its owner.
    pub fn field_signature(&self, field: EntityId) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.encode_field(field, &mut buffer)?;
        Ok(buffer)
    }

    /// Appends a type handle to `buffer`.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for the type or any instantiation argument.
    pub fn encode_type(&self, ty: EntityId, buffer: &mut Vec<u8>) -> Result<()> {
        let desc = self.resolver.type_system().type_desc(ty);

        if let Some(instantiation) = desc.as_ref().and_then(|d| d.instantiation.as_ref()) {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            self.encode_type(instantiation.definition, buffer)?;

            let count = u32::try_from(instantiation.arguments.len())
                .map_err(|_| malformed_error!("Too many generic arguments for {}", ty))?;
            write_compressed_uint(count, buffer)?;
            for argument in &instantiation.arguments {
                self.encode_type(*argument, buffer)?;
            }
            return Ok(());
        }

        let token = self.resolve(ty)?;
        self.write_module_override(&token, buffer)?;

        let value_type = desc.is_some_and(|d| d.flags.contains(TypeFlags::VALUE_TYPE));
        buffer.push(if value_type {
            ELEMENT_TYPE::VALUETYPE
        } else {
            ELEMENT_TYPE::CLASS
        });
        write_compressed_uint(type_def_or_ref(&token)?, buffer)
    }

    /// Appends a method entry to `buffer`.
    ///
    /// Instantiated methods are written as their generic definition followed by the type
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for the method or any instantiation argument, and
    /// [`Error::EntityNotFound`] for unknown in-group methods.
    pub fn encode_method(&self, method: EntityId, buffer: &mut Vec<u8>) -> Result<()> {
        let desc = self.resolver.type_system().method(method);
        let instantiation = desc.as_ref().and_then(|d| d.instantiation.clone());

        let definition = instantiation
            .as_ref()
            .map_or(method, |instantiation| instantiation.definition);
        let token = self.resolve(definition)?;

        let mut flags = 0u8;
        if instantiation.is_some() {
            flags |= ENTRY_FLAGS::METHOD_INSTANTIATING;
        }
        if token.module != self.module {
            flags |= ENTRY_FLAGS::MODULE_OVERRIDE;
        }

        buffer.push(flags);
        if token.module != self.module {
            write_compressed_uint(token.module.value(), buffer)?;
        }
        write_compressed_uint(method_def_or_ref(&token)?, buffer)?;

        if let Some(instantiation) = instantiation {
            let count = u32::try_from(instantiation.arguments.len())
                .map_err(|_| malformed_error!("Too many generic arguments for {}", method))?;
            write_compressed_uint(count, buffer)?;
            for argument in &instantiation.arguments {
                self.encode_type(*argument, buffer)?;
            }
        }

        Ok(())
    }

    /// Appends a field handle to `buffer`.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for the field or its owner, and [`Error::EntityNotFound`]
    /// when an in-group field has no description.
    pub fn encode_field(&self, field: EntityId, buffer: &mut Vec<u8>) -> Result<()> {
        let token = self.resolve(field)?;

        let mut flags = 0u8;
        if token.kind == TokenKind::MemberImport {
            flags |= ENTRY_FLAGS::FIELD_MEMBER_REF;
        }
        if token.module != self.module {
            flags |= ENTRY_FLAGS::MODULE_OVERRIDE;
        }

        buffer.push(flags);
        if token.module != self.module {
            write_compressed_uint(token.module.value(), buffer)?;
        }

        match token.kind {
            TokenKind::Field => {
                let desc = self
                    .resolver
                    .type_system()
                    .field(field)
                    .ok_or(Error::EntityNotFound(field))?;
                self.encode_type(desc.owner, buffer)?;
                write_compressed_uint(token.row, buffer)
            }
            TokenKind::MemberImport => write_compressed_uint(token.row, buffer),
            _ => Err(malformed_error!("Token {} does not name a field", token)),
        }
    }

    fn write_module_override(&self, token: &ModuleToken, buffer: &mut Vec<u8>) -> Result<()> {
        if token.module != self.module {
            buffer.push(ELEMENT_TYPE::MODULE_ZAPSIG);
            write_compressed_uint(token.module.value(), buffer)?;
        }
        Ok(())
    }
}
