//! Entity model shared by every stage of the pipeline.
//!
//! Metadata decoding is the job of the surrounding loader. This module only defines what the
//! pipeline needs to know about the loaded modules: tokens, the entities they name, which
//! modules form the compilation group, and where method bodies come from.
//!
//! # Key Components
//!
//! - [`token`] - Module-local metadata tokens and the tables they index
//! - [`entity`] - Entity identities, descriptions and the concurrent [`entity::TypeSystemContext`]
//! - [`group`] - The [`group::CompilationModuleGroup`] compiled into one image
//! - [`il`] - Method bodies and the pluggable [`il::IlProvider`]

/// Entity identities and the concurrent entity registry
pub mod entity;
/// The set of modules compiled together
pub mod group;
/// Method bodies and IL providers
pub mod il;
/// Commonly used metadata token type
pub mod token;
