//! Boundary to the native code generation backend.
//!
//! The pipeline does not generate machine code. A [`CodegenBackend`] compiles one method body
//! at a time from a [`CodegenRequest`]; whenever the body references a type, method, field or
//! runtime helper, the backend asks the [`CodegenInterface`] it was handed for a relocation
//! target. Each such request records a dependency edge on the method node being compiled, so
//! the dependency graph learns about code-level references as a side effect of compiling.
//!
//! # Key Components
//!
//! - [`CodegenBackend`] - The substitutable backend
//! - [`CodegenInterface`] - Reference resolution and devirtualization offered to the backend
//! - [`CodegenDriver`] - Runs the backend for a method node and validates its output
//! - [`DevirtualizationManager`] - Class hierarchy oracle for virtual call sites

mod devirtualize;
mod driver;
mod interface;

pub use devirtualize::{Devirtualization, DevirtualizationManager};
pub use driver::CodegenDriver;
pub use interface::{CallKind, CodegenContext, CodegenInterface};

use crate::{
    config::BackendFlags,
    graph::NodeId,
    metadata::{
        entity::{EntityId, ModuleIndex},
        il::MethodIr,
    },
    resolver::ModuleToken,
    Result,
};

/// How a relocation patches its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    /// 8-byte absolute address
    Absolute64,
    /// 4-byte displacement relative to the end of the slot
    Relative32,
}

impl RelocationKind {
    /// Number of bytes the relocation patches.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            RelocationKind::Absolute64 => 8,
            RelocationKind::Relative32 => 4,
        }
    }
}

/// What a relocation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationTarget {
    /// A node of the dependency graph
    Node(NodeId),
    /// A token bound at load time
    Token(ModuleToken),
}

/// A fixup inside generated code or node data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relocation {
    /// Byte offset of the patched slot
    pub offset: u32,
    /// How the slot is patched
    pub kind: RelocationKind,
    /// What the slot refers to
    pub target: RelocationTarget,
}

/// Everything a backend receives to compile one method.
#[derive(Debug)]
pub struct CodegenRequest<'a> {
    /// The method being compiled
    pub method: EntityId,
    /// The module the method belongs to
    pub module: ModuleIndex,
    /// The method body
    pub ir: &'a MethodIr,
    /// The session's backend configuration
    pub flags: &'a BackendFlags,
}

/// What a backend produces for one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutput {
    /// Machine code
    pub code: Vec<u8>,
    /// Fixups inside `code`
    pub relocations: Vec<Relocation>,
}

/// The result of compiling a method node.
#[derive(Debug, Clone, Default)]
pub struct CompiledMethodResult {
    /// Machine code
    pub code: Vec<u8>,
    /// Fixups inside `code`
    pub relocations: Vec<Relocation>,
    /// Dependencies discovered while compiling, with their reasons
    pub dependencies: Vec<(NodeId, &'static str)>,
}

/// A native code generator.
///
/// Backends are shared between the worker threads of a session and must be thread-safe. A
/// failure to compile a body is reported as [`Error::BackendFailure`](crate::Error::BackendFailure);
/// the driver attaches the method identity and aborts the session.
pub trait CodegenBackend: Send + Sync {
    /// Name of the backend, for diagnostics.
    fn name(&self) -> &str;

    /// Compiles one method body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendFailure`](crate::Error::BackendFailure) when the body cannot
    /// be compiled, or propagates errors returned by `interface`.
    fn compile(
        &self,
        request: &CodegenRequest<'_>,
        interface: &mut dyn CodegenInterface,
    ) -> Result<BackendOutput>;
}
