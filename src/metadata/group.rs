//! The set of modules compiled together into one image.

use std::collections::BTreeSet;

use crate::metadata::entity::{EntityId, ModuleIndex};

/// The modules whose code is compiled into the image being produced.
///
/// Entities owned by a module in the group are referenced directly by definition token and get
/// their own graph nodes. Entities of any other module are reached through import cells bound
/// at load time.
///
/// A *closed* group promises that no module outside it can derive from its types, which lets
/// the devirtualization oracle reason about the complete set of overrides. Open groups never
/// devirtualize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationModuleGroup {
    modules: BTreeSet<ModuleIndex>,
    closed: bool,
}

impl CompilationModuleGroup {
    /// Creates an open group over `modules`.
    #[must_use]
    pub fn new(modules: impl IntoIterator<Item = ModuleIndex>) -> Self {
        CompilationModuleGroup {
            modules: modules.into_iter().collect(),
            closed: false,
        }
    }

    /// Creates an open group holding just `module`.
    #[must_use]
    pub fn single(module: ModuleIndex) -> Self {
        Self::new([module])
    }

    /// Creates a closed group over `modules`.
    #[must_use]
    pub fn closed(modules: impl IntoIterator<Item = ModuleIndex>) -> Self {
        CompilationModuleGroup {
            modules: modules.into_iter().collect(),
            closed: true,
        }
    }

    /// Returns `true` if `module` is compiled into the image.
    #[must_use]
    pub fn contains_module(&self, module: ModuleIndex) -> bool {
        self.modules.contains(&module)
    }

    /// Returns `true` if the module owning `entity` is compiled into the image.
    #[must_use]
    pub fn contains_entity(&self, entity: EntityId) -> bool {
        self.contains_module(entity.module())
    }

    /// Returns `true` if no module outside the group can extend its types.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The modules of the group, in index order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleIndex> + '_ {
        self.modules.iter().copied()
    }
}
