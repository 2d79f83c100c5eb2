//! Method bodies as seen by the code generation backend.
//!
//! The pipeline treats IL as opaque bytes. The only consumer that interprets a body is the
//! backend; the pipeline merely fetches it through an [`IlProvider`] and forwards it in the
//! codegen request. Swapping the provider lets a host substitute pre-processed bodies (for
//! example stubs or bodies rewritten by an earlier pass) without touching the entity model.

use crate::metadata::{
    entity::{EntityId, TypeSystemContext},
    token::Token,
};

/// Intermediate representation of a method body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodIr {
    /// Raw instruction stream
    pub code: Vec<u8>,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// `StandAloneSig` token of the local variable signature, if any
    pub locals: Option<Token>,
}

impl MethodIr {
    /// Creates a body with the default stack depth of 8 and no locals.
    #[must_use]
    pub fn new(code: impl Into<Vec<u8>>) -> Self {
        MethodIr {
            code: code.into(),
            max_stack: 8,
            locals: None,
        }
    }

    /// Sets the local variable signature.
    #[must_use]
    pub fn with_locals(mut self, locals: Token) -> Self {
        self.locals = Some(locals);
        self
    }

    /// Size of the instruction stream in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns `true` if the instruction stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Source of method bodies for code generation.
///
/// Implementations must be thread-safe: bodies are requested concurrently while method nodes
/// of one batch are compiled in parallel.
pub trait IlProvider: Send + Sync {
    /// Returns the body of `method`, or `None` if the method has no body.
    fn method_ir(&self, type_system: &TypeSystemContext, method: EntityId) -> Option<MethodIr>;
}

/// Default provider reading bodies straight from the entity model.
///
/// Generic method instantiations without a body of their own share the body of their
/// generic definition.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataIlProvider;

impl IlProvider for MetadataIlProvider {
    fn method_ir(&self, type_system: &TypeSystemContext, method: EntityId) -> Option<MethodIr> {
        let desc = type_system.method(method)?;
        if let Some(body) = &desc.body {
            return Some(body.clone());
        }

        let definition = desc.instantiation.as_ref()?.definition;
        type_system.method(definition)?.body.clone()
    }
}
