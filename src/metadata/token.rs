use std::fmt;
use std::hash::{Hash, Hasher};

use strum::{Display, EnumCount, EnumIter};

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
///
/// Tokens are module-local: the same value names different entities in different modules.
/// Pair a token with its [`crate::metadata::entity::ModuleIndex`] to obtain a global identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table and a row index.
    ///
    /// Only the low 24 bits of `row` are kept.
    #[must_use]
    pub fn from_parts(table: MetadataTable, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the table of this token if it is one the pipeline understands.
    #[must_use]
    pub fn table_kind(&self) -> Option<MetadataTable> {
        MetadataTable::from_id(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// The metadata tables whose tokens can name compilation entities or references to them.
///
/// Definition tables (`TypeDef`, `MethodDef`, `Field`, `TypeSpec`, `MethodSpec`,
/// `StandAloneSig`) identify entities owned by a module. Reference tables (`TypeRef`,
/// `MemberRef`) are rows through which a module points at entities owned by another module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumCount)]
#[repr(u8)]
pub enum MetadataTable {
    /// `TypeRef` table (0x01)
    TypeRef = 0x01,
    /// `TypeDef` table (0x02)
    TypeDef = 0x02,
    /// `Field` table (0x04)
    Field = 0x04,
    /// `MethodDef` table (0x06)
    MethodDef = 0x06,
    /// `MemberRef` table (0x0A)
    MemberRef = 0x0A,
    /// `StandAloneSig` table (0x11)
    StandAloneSig = 0x11,
    /// `TypeSpec` table (0x1B)
    TypeSpec = 0x1B,
    /// `MethodSpec` table (0x2B)
    MethodSpec = 0x2B,
}

impl MetadataTable {
    /// Maps a raw table id to a known table.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(MetadataTable::TypeRef),
            0x02 => Some(MetadataTable::TypeDef),
            0x04 => Some(MetadataTable::Field),
            0x06 => Some(MetadataTable::MethodDef),
            0x0A => Some(MetadataTable::MemberRef),
            0x11 => Some(MetadataTable::StandAloneSig),
            0x1B => Some(MetadataTable::TypeSpec),
            0x2B => Some(MetadataTable::MethodSpec),
            _ => None,
        }
    }

    /// Returns `true` for tables that hold references to entities of other modules.
    #[must_use]
    pub fn is_reference(self) -> bool {
        matches!(self, MetadataTable::TypeRef | MetadataTable::MemberRef)
    }
}
