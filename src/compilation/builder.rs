//! Fluent construction of compilation sessions.
//!
//! [`CompilationBuilder`] collects the inputs of a session and validates them in
//! [`CompilationBuilder::build`].

use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc, OnceLock},
};

use log::debug;
use rayon::ThreadPoolBuilder;

use crate::{
    codegen::{CodegenBackend, CodegenDriver, DevirtualizationManager},
    compilation::{Compilation, CompilationRoot},
    config::{parse_backend_options, BackendFlags, BackendOption, OptimizationMode},
    graph::CancellationToken,
    metadata::{
        entity::{EntityId, EntityKind, TypeSystemContext},
        group::CompilationModuleGroup,
        il::{IlProvider, MetadataIlProvider},
    },
    nodes::NodeFactory,
    resolver::TokenResolver,
    Error, Result,
};

/// Fluent builder for a [`Compilation`].
///
/// Every `use_*` method consumes and returns the builder. Nothing is validated until
/// [`CompilationBuilder::build`], which turns the collected settings into immutable session
/// state.
///
/// # Defaults
///
/// - Optimization mode [`OptimizationMode::Blended`], no backend options
/// - Bodies read through [`MetadataIlProvider`]
/// - Expansion on rayon's global pool
/// - Without explicit roots, every compilable method of the input module is rooted
#[must_use]
pub struct CompilationBuilder {
    type_system: Arc<TypeSystemContext>,
    group: CompilationModuleGroup,
    input: PathBuf,
    options: Vec<BackendOption>,
    mode: OptimizationMode,
    il_provider: Arc<dyn IlProvider>,
    backend: Option<Arc<dyn CodegenBackend>>,
    parallelism: Option<usize>,
    cancel: CancellationToken,
    roots: Vec<CompilationRoot>,
}

impl CompilationBuilder {
    /// Starts a session over `type_system`, compiling `group`, with the module loaded from
    /// `input` as the input module.
    pub fn new(
        type_system: Arc<TypeSystemContext>,
        group: CompilationModuleGroup,
        input: impl AsRef<Path>,
    ) -> Self {
        CompilationBuilder {
            type_system,
            group,
            input: input.as_ref().to_path_buf(),
            options: Vec::new(),
            mode: OptimizationMode::default(),
            il_provider: Arc::new(MetadataIlProvider),
            backend: None,
            parallelism: None,
            cancel: CancellationToken::new(),
            roots: Vec::new(),
        }
    }

    /// Sets the `name=value` backend options, replacing any set passed earlier.
    ///
    /// Malformed strings are skipped.
    pub fn use_backend_options<S: AsRef<str>>(mut self, options: &[S]) -> Self {
        self.options = parse_backend_options(options);
        self
    }

    /// Selects the optimization mode.
    pub fn use_optimization_mode(mut self, mode: OptimizationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replaces the source of method bodies.
    pub fn use_il_provider(mut self, provider: Arc<dyn IlProvider>) -> Self {
        self.il_provider = provider;
        self
    }

    /// Sets the code generation backend. Required.
    pub fn use_backend(mut self, backend: Arc<dyn CodegenBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Runs expansion on a dedicated pool with `threads` worker threads.
    pub fn use_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }

    /// Shares a cancellation token with the host.
    pub fn use_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Adds a root.
    pub fn add_root(mut self, root: CompilationRoot) -> Self {
        self.roots.push(root);
        self
    }

    /// Validates the settings and creates the session.
    ///
    /// # Errors
    ///
    /// - [`Error::ModuleNotFound`] if no module was loaded from the input path
    /// - [`Error::Configuration`] if the input module or a root lies outside the group, no
    ///   backend was set, parallelism is zero, or the thread pool cannot be created
    pub fn build(self) -> Result<Compilation> {
        let input = self
            .type_system
            .module_by_path(&self.input)
            .ok_or_else(|| Error::ModuleNotFound(self.input.display().to_string()))?;

        if !self.group.contains_module(input) {
            return Err(Error::Configuration(format!(
                "Input module {} is not part of the compilation group",
                self.input.display()
            )));
        }

        let Some(backend) = self.backend else {
            return Err(Error::Configuration(
                "No code generation backend was supplied".to_string(),
            ));
        };

        let pool = match self.parallelism {
            Some(0) => {
                return Err(Error::Configuration(
                    "Parallelism must be at least 1".to_string(),
                ))
            }
            Some(threads) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("aotgraph-{index}"))
                    .build()
                    .map_err(|e| {
                        Error::Configuration(format!("Failed to create thread pool: {e}"))
                    })?,
            ),
            None => None,
        };

        let mut roots = self.roots;
        if roots.is_empty() {
            roots.push(CompilationRoot::AllMethods(input));
        }
        let is_group_entity = |entity: EntityId, kind: EntityKind| {
            entity.kind() == Some(kind)
                && self.group.contains_entity(entity)
                && self.type_system.contains(entity)
        };
        for root in &roots {
            let valid = match *root {
                CompilationRoot::Method(entity) => is_group_entity(entity, EntityKind::Method),
                CompilationRoot::Type(entity) => is_group_entity(entity, EntityKind::Type),
                CompilationRoot::AllMethods(module) => self.group.contains_module(module),
            };
            if !valid {
                return Err(Error::Configuration(format!(
                    "Root {root:?} does not name a known entity of the compilation group"
                )));
            }
        }

        let flags = BackendFlags::from_parts(self.mode, self.options);
        debug!(
            "Session over {} with {} roots, mode {}, {} backend options",
            self.input.display(),
            roots.len(),
            self.mode,
            flags.options().len()
        );

        let group = Arc::new(self.group);
        let resolver = Arc::new(TokenResolver::new(self.type_system.clone(), group.clone()));
        let devirtualizer = DevirtualizationManager::new(self.type_system, group);

        Ok(Compilation {
            factory: NodeFactory::new(resolver, self.il_provider),
            driver: CodegenDriver::new(backend, flags, devirtualizer),
            roots,
            pool,
            cancel: self.cancel,
            consumed: AtomicBool::new(false),
            edges: OnceLock::new(),
        })
    }
}
