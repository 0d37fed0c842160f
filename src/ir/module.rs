//! Modules: the global symbol table, function list and use queries.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::{
    ir::{Function, FunctionId, Global, GlobalId, InstId},
    Error, Result,
};

/// Target properties the passes need to know about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    /// Target triple, informational only.
    pub triple: String,
    /// Whether the target signs pointers (arm64e-style pointer authentication).
    pub ptrauth: bool,
}

/// A single use of a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalUse {
    /// Operand of an instruction.
    Instruction {
        /// Function containing the instruction.
        function: FunctionId,
        /// The using instruction.
        inst: InstId,
    },
    /// Referenced from another global's initializer.
    Initializer(GlobalId),
    /// Listed in the module's `compiler_used` array.
    CompilerUsed,
}

/// A compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    globals: Vec<Option<Global>>,
    functions: Vec<Function>,
    compiler_used: Vec<GlobalId>,
    target: TargetInfo,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the target description.
    #[must_use]
    pub fn with_target(mut self, target: TargetInfo) -> Self {
        self.target = target;
        self
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target description.
    #[must_use]
    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    // ── Globals ─────────────────────────────────────────────────────────

    /// Adds a global, renaming it `name.N` if the name is taken.
    pub fn add_global(&mut self, mut global: Global) -> GlobalId {
        global.name = self.unique_name(&global.name);
        let id = GlobalId::new(self.globals.len());
        self.globals.push(Some(global));
        id
    }

    /// Returns a symbol name derived from `base` that no live global uses.
    #[must_use]
    pub fn unique_name(&self, base: &str) -> String {
        let taken: HashSet<&str> = self.globals().map(|(_, g)| g.name.as_str()).collect();
        if !taken.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}.{n}"))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// Looks up a live global.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.index()).and_then(Option::as_ref)
    }

    /// Looks up a live global mutably.
    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut Global> {
        self.globals.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Looks up a live global or fails with [`Error::GlobalNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::GlobalNotFound`] for unknown or erased ids.
    pub fn try_global(&self, id: GlobalId) -> Result<&Global> {
        self.global(id).ok_or(Error::GlobalNotFound(id))
    }

    /// Iterates live globals in creation order.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (GlobalId::new(i), g)))
    }

    /// Number of live globals.
    #[must_use]
    pub fn global_count(&self) -> usize {
        self.globals().count()
    }

    /// Finds a live global by symbol name.
    #[must_use]
    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.globals().find(|(_, g)| g.name == name).map(|(id, _)| id)
    }

    /// Removes a global from the module and from `compiler_used`.
    ///
    /// Remaining references to it are left dangling; callers check
    /// [`Module::use_count`] first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GlobalNotFound`] if the global is not live.
    pub fn erase_global(&mut self, id: GlobalId) -> Result<Global> {
        let slot = self
            .globals
            .get_mut(id.index())
            .ok_or(Error::GlobalNotFound(id))?;
        let global = slot.take().ok_or(Error::GlobalNotFound(id))?;
        self.compiler_used.retain(|g| *g != id);
        Ok(global)
    }

    /// Marks a global as used so later optimisation keeps it alive.
    pub fn append_compiler_used(&mut self, id: GlobalId) {
        if !self.compiler_used.contains(&id) {
            self.compiler_used.push(id);
        }
    }

    /// Globals listed in `compiler_used`.
    #[must_use]
    pub fn compiler_used(&self) -> &[GlobalId] {
        &self.compiler_used
    }

    // ── Functions ───────────────────────────────────────────────────────

    /// Adds a function.
    pub fn add_function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId::new(self.functions.len());
        self.functions.push(function);
        id
    }

    /// Looks up a function.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Looks up a function mutably.
    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id.index())
    }

    /// Looks up a function or fails with [`Error::FunctionNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown ids.
    pub fn try_function(&self, id: FunctionId) -> Result<&Function> {
        self.function(id).ok_or(Error::FunctionNotFound(id))
    }

    /// Looks up a function mutably or fails with [`Error::FunctionNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown ids.
    pub fn try_function_mut(&mut self, id: FunctionId) -> Result<&mut Function> {
        self.function_mut(id).ok_or(Error::FunctionNotFound(id))
    }

    /// Finds a function by name.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name() == name)
            .map(FunctionId::new)
    }

    /// Iterates functions in module order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId::new(i), f))
    }

    /// Ids of all functions in module order.
    #[must_use]
    pub fn function_ids(&self) -> Vec<FunctionId> {
        (0..self.functions.len()).map(FunctionId::new).collect()
    }

    // ── Use queries ─────────────────────────────────────────────────────

    /// All uses of a global: instruction operands, other initializers and
    /// `compiler_used` entries.
    #[must_use]
    pub fn global_users(&self, id: GlobalId) -> Vec<GlobalUse> {
        let mut uses = Vec::new();

        for (fid, function) in self.functions() {
            for (_, inst) in function.instructions() {
                let used = inst
                    .operands()
                    .into_iter()
                    .filter_map(|op| op.as_const())
                    .any(|c| c.references(id));
                if used {
                    uses.push(GlobalUse::Instruction {
                        function: fid,
                        inst: inst.id(),
                    });
                }
            }
        }

        for (gid, global) in self.globals() {
            if global
                .initializer
                .as_ref()
                .is_some_and(|init| init.references(id))
            {
                uses.push(GlobalUse::Initializer(gid));
            }
        }

        if self.compiler_used.contains(&id) {
            uses.push(GlobalUse::CompilerUsed);
        }

        uses
    }

    /// Number of uses of a global.
    #[must_use]
    pub fn use_count(&self, id: GlobalId) -> usize {
        self.global_users(id).len()
    }

    /// Functions that reach `id` through instruction operands, directly or
    /// through chains of initializers of other globals.
    ///
    /// Returns `None` when the global escapes the module's view: it is
    /// reachable from the initializer of a global that is visible outside
    /// the module, so uses elsewhere cannot be ruled out.
    #[must_use]
    pub fn functions_using(&self, id: GlobalId) -> Option<BTreeSet<FunctionId>> {
        let mut functions = BTreeSet::new();
        let mut seen = HashSet::from([id]);
        let mut pending = VecDeque::from([id]);

        while let Some(current) = pending.pop_front() {
            for user in self.global_users(current) {
                match user {
                    GlobalUse::Instruction { function, .. } => {
                        functions.insert(function);
                    }
                    GlobalUse::Initializer(holder) => {
                        let holder_linkage = self.global(holder)?.linkage;
                        if !holder_linkage.is_local() {
                            return None;
                        }
                        if seen.insert(holder) {
                            pending.push_back(holder);
                        }
                    }
                    GlobalUse::CompilerUsed => {}
                }
            }
        }

        Some(functions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, IrType, Linkage, ModuleBuilder};

    #[test]
    fn test_unique_names() {
        let mut module = Module::new("m");
        let a = module.add_global(Global::new("s", Constant::c_string("a")));
        let b = module.add_global(Global::new("s", Constant::c_string("b")));
        let c = module.add_global(Global::new("s", Constant::c_string("c")));
        assert_eq!(module.global(a).unwrap().name, "s");
        assert_eq!(module.global(b).unwrap().name, "s.1");
        assert_eq!(module.global(c).unwrap().name, "s.2");
    }

    #[test]
    fn test_erase_global() {
        let mut module = Module::new("m");
        let a = module.add_global(Global::new("s", Constant::c_string("a")));
        module.append_compiler_used(a);
        assert_eq!(module.use_count(a), 1);
        module.erase_global(a).unwrap();
        assert!(module.global(a).is_none());
        assert!(module.compiler_used().is_empty());
        assert!(matches!(module.erase_global(a), Err(Error::GlobalNotFound(_))));
    }

    #[test]
    fn test_functions_using_follows_initializers() {
        let mut mb = ModuleBuilder::new("m");
        let raw = mb.global(Global::new(".str", Constant::c_string("hi")));
        let holder = mb.global(Global::new(
            "table",
            Constant::Array {
                elem: IrType::Ptr,
                elements: vec![Constant::Global(raw)],
            },
        ));
        let f = mb
            .function("f", vec![], IrType::Ptr, |fb| {
                fb.ins().ret(Some(crate::ir::Value::global(holder)))?;
                Ok(())
            })
            .unwrap();
        let module = mb.finish();

        assert_eq!(
            module.functions_using(raw),
            Some(BTreeSet::from([f]))
        );
        assert_eq!(
            module.global_users(raw),
            vec![GlobalUse::Initializer(holder)]
        );
    }

    #[test]
    fn test_functions_using_detects_escape() {
        let mut module = Module::new("m");
        let raw = module.add_global(Global::new(".str", Constant::c_string("hi")));
        module.add_global(
            Global::new("exported", Constant::Global(raw)).with_linkage(Linkage::External),
        );
        assert_eq!(module.functions_using(raw), None);
    }
}
