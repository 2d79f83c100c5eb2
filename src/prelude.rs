//! # aotgraph Prelude
//!
//! Re-exports the types needed to set up and run a compilation session, implement a backend
//! and inspect the output.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all aotgraph operations
pub use crate::Error;

/// The result type used throughout aotgraph
pub use crate::Result;

// ================================================================================================
// Entity Model
// ================================================================================================

/// Metadata tokens and tables
pub use crate::metadata::token::{MetadataTable, Token};

/// Entities and their descriptions
pub use crate::metadata::entity::{
    EntityId, EntityKind, FieldDesc, MethodDesc, MethodFlags, ModuleIndex, TypeDesc, TypeFlags,
    TypeSystemContext,
};

/// Compilation group
pub use crate::metadata::group::CompilationModuleGroup;

/// Method bodies
pub use crate::metadata::il::{IlProvider, MetadataIlProvider, MethodIr};

// ================================================================================================
// Configuration
// ================================================================================================

/// Backend configuration
pub use crate::config::{BackendFlags, BackendOption, JitFlags, OptimizationMode};

// ================================================================================================
// Session
// ================================================================================================

/// Compilation session and its output
pub use crate::compilation::{
    Compilation, CompilationBuilder, CompilationOutput, CompilationRoot, EmitOutcome,
};

/// Cancellation and statistics
pub use crate::graph::{CancellationToken, GraphStatistics};

// ================================================================================================
// Backend Boundary
// ================================================================================================

/// Types a backend implementation works with
pub use crate::codegen::{
    BackendOutput, CallKind, CodegenBackend, CodegenInterface, CodegenRequest, Devirtualization,
    Relocation, RelocationKind, RelocationTarget,
};

// ================================================================================================
// Nodes and Tokens
// ================================================================================================

/// Node identities and emitted nodes
pub use crate::nodes::{EmittedNode, EmittedRelocation, NodeKey, ReadyToRunHelper, RelocationSymbol};

/// Module-relative tokens
pub use crate::resolver::{ModuleToken, TokenKind, TokenTable};
