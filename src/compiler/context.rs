//! Module-wide state shared by protection passes.
//!
//! The [`CompilerContext`] is the explicit home of everything that outlives a
//! single function: the decryption guard of each protected function, the
//! recipes needed to decrypt shadow buffers again from another function, the
//! set of functions already transformed, and the event log.

use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};

use crate::{
    compiler::events::EventLog,
    ir::{FunctionId, GlobalId},
    obfuscation::ShadowRecipe,
};

/// Shared state for one protection run over a module.
///
/// All collection fields use thread-safe types (`DashMap`, `DashSet`) so the
/// context can be shared by reference with passes.
pub struct CompilerContext {
    /// Accumulated events from all passes.
    pub events: EventLog,

    /// Functions that were changed by at least one pass.
    pub processed_functions: DashSet<FunctionId>,

    /// Decryption guard of each protected function.
    guards: DashMap<FunctionId, GlobalId>,

    /// How to decrypt each shadow buffer produced so far, keyed by buffer.
    recipes: DashMap<GlobalId, ShadowRecipe>,

    /// When the run started.
    start_time: Instant,
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: EventLog::new(),
            processed_functions: DashSet::new(),
            guards: DashMap::new(),
            recipes: DashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the elapsed time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    // ── Guard table ─────────────────────────────────────────────────────

    /// Returns the guard currently registered for `function`.
    #[must_use]
    pub fn guard(&self, function: FunctionId) -> Option<GlobalId> {
        self.guards.get(&function).map(|g| *g)
    }

    /// Registers the guard of `function`, returning the one it replaces.
    pub fn set_guard(&self, function: FunctionId, guard: GlobalId) -> Option<GlobalId> {
        self.guards.insert(function, guard)
    }

    /// Number of functions with a guard.
    #[must_use]
    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }

    // ── Shadow recipes ──────────────────────────────────────────────────

    /// Records how `shadow` is decrypted.
    pub fn register_recipe(&self, shadow: GlobalId, recipe: ShadowRecipe) {
        self.recipes.insert(shadow, recipe);
    }

    /// Returns the recipe of a shadow buffer.
    #[must_use]
    pub fn recipe(&self, shadow: GlobalId) -> Option<ShadowRecipe> {
        self.recipes.get(&shadow).map(|r| r.clone())
    }

    /// Marks `function` as decrypting `shadow` itself.
    ///
    /// Returns `false` if it already did.
    pub fn add_recipe_user(&self, shadow: GlobalId, function: FunctionId) -> bool {
        self.recipes
            .get_mut(&shadow)
            .is_some_and(|mut r| r.users.insert(function))
    }

    // ── Processed functions ─────────────────────────────────────────────

    /// Marks a function as transformed.
    pub fn mark_processed(&self, function: FunctionId) {
        self.processed_functions.insert(function);
    }

    /// Checks whether a function was transformed.
    #[must_use]
    pub fn is_processed(&self, function: FunctionId) -> bool {
        self.processed_functions.contains(&function)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::ir::IntWidth;

    #[test]
    fn test_guard_table_replaces() {
        let ctx = CompilerContext::new();
        let f = FunctionId::new(0);
        assert_eq!(ctx.set_guard(f, GlobalId::new(3)), None);
        assert_eq!(ctx.set_guard(f, GlobalId::new(9)), Some(GlobalId::new(3)));
        assert_eq!(ctx.guard(f), Some(GlobalId::new(9)));
        assert_eq!(ctx.guard_count(), 1);
    }

    #[test]
    fn test_recipe_users() {
        let ctx = CompilerContext::new();
        let shadow = GlobalId::new(1);
        let owner = FunctionId::new(0);
        ctx.register_recipe(
            shadow,
            ShadowRecipe {
                blob: None,
                width: IntWidth::W8,
                keys: vec![1, 1],
                unencrypted: BTreeSet::from([0, 1]),
                users: BTreeSet::from([owner]),
            },
        );

        assert!(!ctx.add_recipe_user(shadow, owner));
        assert!(ctx.add_recipe_user(shadow, FunctionId::new(1)));
        assert_eq!(ctx.recipe(shadow).unwrap().users.len(), 2);
        assert!(!ctx.add_recipe_user(GlobalId::new(7), owner));
    }
}
