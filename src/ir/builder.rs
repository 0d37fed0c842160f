//! Builders for emitting instructions and assembling modules.
//!
//! [`InstructionBuilder`] is the mutation workhorse used by the passes: it
//! emits instructions either at the end of a block or at a fixed insertion
//! point that advances as instructions are emitted, so a sequence of calls
//! produces instructions in call order.
//!
//! [`ModuleBuilder`] and [`FunctionBuilder`] are thin conveniences for
//! assembling whole modules, mostly used by tests and benchmarks.
//!
//! # Example
//!
//! ```rust
//! use ircloak::ir::{Constant, Global, IrType, ModuleBuilder, Value};
//!
//! let mut mb = ModuleBuilder::new("demo");
//! let text = mb.global(Global::new(".str", Constant::c_string("hello")));
//! mb.function("first_char", vec![], IrType::I8, |fb| {
//!     let byte = fb.ins().load(IrType::I8, Value::global(text))?;
//!     fb.ins().ret(Some(byte))?;
//!     Ok(())
//! })?;
//! let module = mb.finish();
//! assert_eq!(module.global_count(), 1);
//! # Ok::<(), ircloak::Error>(())
//! ```

use crate::{
    ir::{
        AtomicOrdering, BinaryOp, BlockId, CmpPredicate, Function, FunctionId, Global, GlobalId,
        InstId, InstKind, IrType, Linkage, Module, TargetInfo, Value,
    },
    Result,
};

/// Emits instructions into a block of a function.
pub struct InstructionBuilder<'f> {
    function: &'f mut Function,
    block: BlockId,
    position: Option<usize>,
    name: Option<String>,
}

impl<'f> InstructionBuilder<'f> {
    /// Positions the builder at the end of `block`.
    pub fn at_end(function: &'f mut Function, block: BlockId) -> Self {
        Self {
            function,
            block,
            position: None,
            name: None,
        }
    }

    /// Positions the builder before the instruction at `position` in `block`.
    pub fn at(function: &'f mut Function, block: BlockId, position: usize) -> Self {
        Self {
            function,
            block,
            position: Some(position),
            name: None,
        }
    }

    /// Names the next emitted instruction.
    pub fn named(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the block being built.
    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Emits a raw instruction.
    ///
    /// # Errors
    ///
    /// Fails if the block does not exist or the insertion point is invalid.
    pub fn emit(&mut self, kind: InstKind) -> Result<InstId> {
        let name = self.name.take();
        match self.position {
            None => self.function.push_inst(self.block, kind, name),
            Some(position) => {
                let id = self.function.insert_inst(self.block, position, kind, name)?;
                self.position = Some(position + 1);
                Ok(id)
            }
        }
    }

    fn value(&mut self, kind: InstKind) -> Result<Value> {
        self.emit(kind).map(Value::Inst)
    }

    /// `alloca ty`
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn alloca(&mut self, ty: IrType) -> Result<Value> {
        self.value(InstKind::Alloca { ty })
    }

    /// Plain load.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn load(&mut self, ty: IrType, ptr: Value) -> Result<Value> {
        self.load_atomic(ty, ptr, AtomicOrdering::NotAtomic, 0)
    }

    /// Load with an ordering and alignment.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn load_atomic(
        &mut self,
        ty: IrType,
        ptr: Value,
        ordering: AtomicOrdering,
        align: u32,
    ) -> Result<Value> {
        self.value(InstKind::Load {
            ty,
            ptr,
            ordering,
            align,
        })
    }

    /// Plain store.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn store(&mut self, value: Value, ptr: Value) -> Result<InstId> {
        self.store_atomic(value, ptr, AtomicOrdering::NotAtomic, 0)
    }

    /// Store with an ordering and alignment.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn store_atomic(
        &mut self,
        value: Value,
        ptr: Value,
        ordering: AtomicOrdering,
        align: u32,
    ) -> Result<InstId> {
        self.emit(InstKind::Store {
            value,
            ptr,
            ordering,
            align,
        })
    }

    /// Address of element `index` of an `elem` array starting at `base`.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn element_ptr(&mut self, elem: IrType, base: Value, index: u64) -> Result<Value> {
        self.value(InstKind::ElementPtr {
            elem,
            base,
            index: Value::int(64, index),
        })
    }

    /// Address of member `field` of a `ty` struct at `base`.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn field_ptr(&mut self, ty: IrType, base: Value, field: usize) -> Result<Value> {
        self.value(InstKind::FieldPtr { ty, base, field })
    }

    /// Binary integer operation.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn binary(&mut self, op: BinaryOp, ty: IrType, lhs: Value, rhs: Value) -> Result<Value> {
        self.value(InstKind::Binary { op, ty, lhs, rhs })
    }

    /// `xor ty lhs, rhs`
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn xor(&mut self, ty: IrType, lhs: Value, rhs: Value) -> Result<Value> {
        self.binary(BinaryOp::Xor, ty, lhs, rhs)
    }

    /// Integer comparison.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn icmp(&mut self, pred: CmpPredicate, lhs: Value, rhs: Value) -> Result<Value> {
        self.value(InstKind::ICmp { pred, lhs, rhs })
    }

    /// Direct call; yields `None` for void callees.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn call(
        &mut self,
        callee: impl Into<String>,
        ret: IrType,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let has_result = ret != IrType::Void;
        let id = self.emit(InstKind::Call {
            callee: callee.into(),
            ret,
            args,
        })?;
        Ok(has_result.then_some(Value::Inst(id)))
    }

    /// Unconditional branch.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn br(&mut self, target: BlockId) -> Result<InstId> {
        self.emit(InstKind::Br { target })
    }

    /// Conditional branch.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn cond_br(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) -> Result<InstId> {
        self.emit(InstKind::CondBr {
            cond,
            then_block,
            else_block,
        })
    }

    /// Return.
    ///
    /// # Errors
    ///
    /// See [`Self::emit`].
    pub fn ret(&mut self, value: Option<Value>) -> Result<InstId> {
        self.emit(InstKind::Ret { value })
    }
}

/// Assembles a function body block by block.
pub struct FunctionBuilder {
    function: Function,
    current: BlockId,
}

impl FunctionBuilder {
    /// Starts a function with an `entry` block.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<IrType>, ret: IrType) -> Self {
        let mut function = Function::new(name, params, ret);
        let current = function.add_block("entry");
        Self { function, current }
    }

    /// Appends a new block without switching to it.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        self.function.add_block(name)
    }

    /// Directs subsequent instructions into `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Builder positioned at the end of the current block.
    pub fn ins(&mut self) -> InstructionBuilder<'_> {
        InstructionBuilder::at_end(&mut self.function, self.current)
    }

    /// Attaches an annotation to the function.
    pub fn annotate(&mut self, annotation: impl Into<String>) {
        self.function.annotate(annotation);
    }

    /// Sets the function linkage.
    pub fn linkage(&mut self, linkage: Linkage) {
        self.function.set_linkage(linkage);
    }

    /// Finishes the function.
    #[must_use]
    pub fn finish(self) -> Function {
        self.function
    }
}

/// Assembles a module.
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Starts an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    /// Sets the target description.
    #[must_use]
    pub fn target(mut self, target: TargetInfo) -> Self {
        self.module = self.module.with_target(target);
        self
    }

    /// Adds a global.
    pub fn global(&mut self, global: Global) -> GlobalId {
        self.module.add_global(global)
    }

    /// Adds a function whose body is produced by `body`.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by `body`.
    pub fn function<F>(
        &mut self,
        name: impl Into<String>,
        params: Vec<IrType>,
        ret: IrType,
        body: F,
    ) -> Result<FunctionId>
    where
        F: FnOnce(&mut FunctionBuilder) -> Result<()>,
    {
        let mut fb = FunctionBuilder::new(name, params, ret);
        body(&mut fb)?;
        Ok(self.module.add_function(fb.finish()))
    }

    /// Adds an already built function.
    pub fn add_function(&mut self, function: Function) -> FunctionId {
        self.module.add_function(function)
    }

    /// Returns the module under construction.
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Finishes the module.
    #[must_use]
    pub fn finish(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_point_advances() {
        let mut f = Function::new("f", vec![], IrType::Void);
        let entry = f.add_block("entry");
        f.push_inst(entry, InstKind::Ret { value: None }, None)
            .unwrap();

        let mut b = InstructionBuilder::at(&mut f, entry, 0);
        let slot = b.alloca(IrType::I32).unwrap();
        b.named("init").store(Value::int(32, 7), slot).unwrap();

        let kinds: Vec<_> = f.instructions().map(|(_, i)| i.kind().clone()).collect();
        assert!(matches!(kinds[0], InstKind::Alloca { .. }));
        assert!(matches!(kinds[1], InstKind::Store { .. }));
        assert!(matches!(kinds[2], InstKind::Ret { .. }));
        f.verify().unwrap();
    }

    #[test]
    fn test_module_builder() {
        let mut mb = ModuleBuilder::new("m");
        let f = mb
            .function("id", vec![IrType::I32], IrType::I32, |fb| {
                fb.ins().ret(Some(Value::Arg(0)))?;
                Ok(())
            })
            .unwrap();
        let module = mb.finish();
        assert_eq!(module.function_by_name("id"), Some(f));
        module.function(f).unwrap().verify().unwrap();
    }
}
