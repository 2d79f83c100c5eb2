// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

//! # aotgraph
//!
//! The core of an ahead-of-time compiler for ECMA-335 modules: a dependency-graph-driven
//! pipeline that discovers, starting from a set of roots, every artifact a native image needs
//! (method code, type layouts, vtables, generic dictionaries, signatures, import and helper
//! cells), compiles method bodies through a pluggable backend while the graph is explored, and
//! emits the result in a deterministic order together with a module-relative token table.
//!
//! ## Features
//!
//! - **Lazy graph discovery** - Nodes are created on first reference and expanded once
//! - **Conditional dependencies** - Virtual slot implementations are only compiled when some
//!   code dispatches through the slot
//! - **Parallel expansion** - Batches of nodes are expanded, and methods compiled, on a rayon pool
//! - **Deterministic output** - Nodes are emitted in key order and tokens are address-free
//! - **Substitutable backend** - Code generation sits behind the [`codegen::CodegenBackend`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aotgraph::prelude::*;
//!
//! # fn backend() -> Arc<dyn CodegenBackend> { unimplemented!() }
//! let type_system = Arc::new(TypeSystemContext::new());
//! let app = type_system.add_module("App", "/build/App.dll")?;
//! // ... populate types, methods and reference rows from a metadata loader ...
//!
//! let compilation = CompilationBuilder::new(
//!     type_system.clone(),
//!     CompilationModuleGroup::single(app),
//!     "/build/App.dll",
//! )
//! .use_backend(backend())
//! .build()?;
//!
//! if let Some(output) = compilation.emit()?.into_output() {
//!     for node in &output.nodes {
//!         println!("{}: {} bytes", node.key, node.data.len());
//!     }
//!     let tokens = output.tokens.encode()?;
//!     println!("{} token table bytes", tokens.len());
//! }
//! # Ok::<(), aotgraph::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - The entity model the compiler works on: modules, types, methods, fields,
//!   stand-alone signatures, reference rows and method bodies
//! - [`config`] - Backend flags derived from the optimization mode, plus free-form options
//! - [`resolver`] - Stable module-relative tokens and portable signature encoding
//! - [`graph`] - The generic dependency graph engine
//! - [`nodes`] - Node kinds, their dependencies and their emitted layouts
//! - [`codegen`] - The backend boundary, the codegen driver and devirtualization
//! - [`compilation`] - Session builder and the compilation session
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], with [`Error`] covering configuration
//! problems, entity model lookups, unresolvable references and code generation failures.
//! Every error is fatal to a session; cancellation is reported as
//! [`compilation::EmitOutcome::Cancelled`].

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

pub mod codegen;
pub mod compilation;
pub mod config;
pub mod graph;
pub mod metadata;
pub mod nodes;
pub mod resolver;

/// `aotgraph` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `aotgraph` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;
