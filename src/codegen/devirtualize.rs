//! Devirtualization oracle based on class hierarchy analysis.
//!
//! A virtual call site can be compiled as a direct call when the set of possible runtime
//! targets has exactly one element. That set is only knowable when the compilation group is
//! closed: a module outside an open group may derive from any of its types and add overrides
//! at runtime. Open groups therefore always answer [`Devirtualization::Unknown`].
//!
//! Within a closed group a call through method `m` is monomorphic when
//! - `m` is not virtual at all,
//! - `m` is final, or declared on a sealed type,
//! - exactly one concrete method exists in the group among `m` and its overrides, followed
//!   through every level of the override chain.

use std::sync::Arc;

use dashmap::DashMap;

use crate::metadata::{
    entity::{EntityId, MethodFlags, TypeSystemContext},
    group::CompilationModuleGroup,
};

/// Answer of the devirtualization oracle for a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Devirtualization {
    /// The call always reaches this implementation
    Monomorphic(EntityId),
    /// The target depends on the runtime type
    Unknown,
}

/// Caching class hierarchy oracle for virtual call sites.
pub struct DevirtualizationManager {
    type_system: Arc<TypeSystemContext>,
    group: Arc<CompilationModuleGroup>,
    cache: DashMap<EntityId, Devirtualization>,
}

impl DevirtualizationManager {
    /// Creates an oracle over the given entity model and group.
    #[must_use]
    pub fn new(type_system: Arc<TypeSystemContext>, group: Arc<CompilationModuleGroup>) -> Self {
        DevirtualizationManager {
            type_system,
            group,
            cache: DashMap::new(),
        }
    }

    /// Resolves the runtime target of a virtual call through `method`.
    pub fn resolve(&self, method: EntityId) -> Devirtualization {
        if let Some(cached) = self.cache.get(&method) {
            return *cached;
        }

        let answer = self.analyze(method);
        *self.cache.entry(method).or_insert(answer)
    }

    /// Number of cached answers.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn analyze(&self, method: EntityId) -> Devirtualization {
        if !self.group.is_closed() || !self.group.contains_entity(method) {
            return Devirtualization::Unknown;
        }

        let Some(desc) = self.type_system.method(method) else {
            return Devirtualization::Unknown;
        };

        if !desc.is_virtual() || desc.flags.contains(MethodFlags::FINAL) {
            return Devirtualization::Monomorphic(method);
        }

        if self
            .type_system
            .type_desc(desc.owner)
            .is_some_and(|owner| owner.is_sealed())
        {
            return Devirtualization::Monomorphic(method);
        }

        // Receivers of the static type reach `method` or one of its overrides at any depth
        let implementations: Vec<EntityId> = self
            .type_system
            .override_closure(method)
            .into_iter()
            .filter(|candidate| self.group.contains_entity(*candidate))
            .filter(|candidate| {
                self.type_system
                    .method(*candidate)
                    .is_some_and(|d| !d.flags.contains(MethodFlags::ABSTRACT))
            })
            .collect();

        match implementations.as_slice() {
            [single] => Devirtualization::Monomorphic(*single),
            _ => Devirtualization::Unknown,
        }
    }
}
