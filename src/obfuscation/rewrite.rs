//! Use rewriting and dead-global cleanup.
//!
//! Rewriting happens in two phases: every edit is computed against the
//! unmodified module first, then all edits are applied. No operand scan ever
//! sees a partially rewritten initializer.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
    ir::{Constant, FunctionId, Global, GlobalId, InstId, InstKind, Module, Value},
    Result,
};

/// What an original global is replaced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Another global (shadow buffer or rewritten wrapper).
    Global(GlobalId),
    /// A function-local value (stack buffer). Only instruction operands that
    /// are the global's address can take it.
    Local(Value),
}

/// Counts of rewritten users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// Instructions with at least one replaced operand.
    pub instructions: usize,
    /// Initializers with at least one replaced reference.
    pub initializers: usize,
}

impl RewriteSummary {
    /// Returns `true` if nothing was rewritten.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions == 0 && self.initializers == 0
    }
}

/// Replaces uses of the keys of `map` in the instructions of `function` and
/// in the initializers of `holders`.
///
/// Uses elsewhere in the module are left alone.
///
/// # Errors
///
/// Returns [`crate::Error::FunctionNotFound`] for an unknown function.
pub fn rewrite_uses(
    module: &mut Module,
    function: FunctionId,
    holders: &BTreeSet<GlobalId>,
    map: &BTreeMap<GlobalId, Replacement>,
) -> Result<RewriteSummary> {
    if map.is_empty() {
        return Ok(RewriteSummary::default());
    }
    let global_map = |id: GlobalId| match map.get(&id) {
        Some(Replacement::Global(new)) => Some(*new),
        _ => None,
    };

    // Phase 1: compute every edit against the current module.
    let mut inst_edits: Vec<(InstId, InstKind)> = Vec::new();
    for (_, inst) in module.try_function(function)?.instructions() {
        let mut kind = inst.kind().clone();
        let mut changed = false;
        for operand in kind.operands_mut() {
            if let Some(Replacement::Local(local)) = operand.as_global().and_then(|g| map.get(&g)) {
                *operand = local.clone();
                changed = true;
                continue;
            }
            if let Value::Const(constant) = operand {
                if let Some(replaced) = constant.replace_globals(&global_map) {
                    *operand = Value::Const(replaced);
                    changed = true;
                }
            }
        }
        if changed {
            inst_edits.push((inst.id(), kind));
        }
    }

    let mut init_edits: Vec<(GlobalId, Constant)> = Vec::new();
    for holder in holders {
        let replaced = module
            .global(*holder)
            .and_then(|g| g.initializer.as_ref())
            .and_then(|init| init.replace_globals(&global_map));
        if let Some(init) = replaced {
            init_edits.push((*holder, init));
        }
    }

    // Phase 2: apply.
    let summary = RewriteSummary {
        instructions: inst_edits.len(),
        initializers: init_edits.len(),
    };
    let body = module.try_function_mut(function)?;
    for (id, kind) in inst_edits {
        if let Some(inst) = body.inst_mut(id) {
            inst.set_kind(kind);
        }
    }
    for (id, init) in init_edits {
        if let Some(global) = module.global_mut(id) {
            global.initializer = Some(init);
        }
    }

    debug!(
        instructions = summary.instructions,
        initializers = summary.initializers,
        "uses rewritten"
    );
    Ok(summary)
}

/// Erases every candidate without uses, repeating until nothing changes.
///
/// Erasing one global can make another one dead (a wrapper is the last user
/// of its raw data), so candidates are revisited until a fixpoint.
///
/// # Errors
///
/// Returns [`crate::Error::GlobalNotFound`] if erasure fails.
pub fn erase_dead(module: &mut Module, candidates: &[GlobalId]) -> Result<Vec<(GlobalId, Global)>> {
    let mut removed = Vec::new();
    loop {
        let mut progress = false;
        for id in candidates {
            if module.global(*id).is_some() && module.use_count(*id) == 0 {
                let global = module.erase_global(*id)?;
                removed.push((*id, global));
                progress = true;
            }
        }
        if !progress {
            return Ok(removed);
        }
    }
}
