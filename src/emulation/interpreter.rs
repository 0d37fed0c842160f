//! Instruction interpreter.
//!
//! [`Process`] executes functions of a [`Module`] against a [`SharedMemory`].
//! A process is `Sync`: independent threads may call into it concurrently and
//! observe each other's writes to global storage, which is how the decrypt
//! once behaviour of protected functions is exercised.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    emulation::memory::{mask, MemoryStats, Pointer, Region, RtValue, SharedMemory},
    ir::{BinaryOp, BlockId, CmpPredicate, Constant, FunctionId, GlobalId, InstKind, IrType, Module, Value},
    Error, Result,
};

/// Execution limits for a single top-level call.
///
/// # Default Values
///
/// | Limit | Default Value |
/// |-------|---------------|
/// | `max_instructions` | 1,000,000 |
/// | `max_call_depth` | 64 |
#[derive(Clone, Debug)]
pub struct EmulationLimits {
    /// Maximum instructions executed per top-level call, including callees.
    pub max_instructions: u64,
    /// Maximum nesting of calls.
    pub max_call_depth: usize,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_call_depth: 64,
        }
    }
}

impl EmulationLimits {
    /// Sets the instruction budget.
    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }
}

/// An emulated process running code of one module.
#[derive(Debug)]
pub struct Process<'m> {
    module: &'m Module,
    memory: SharedMemory,
    limits: EmulationLimits,
    executed: AtomicU64,
}

struct Frame<'a> {
    args: &'a [RtValue],
    values: HashMap<crate::ir::InstId, RtValue>,
    slots: Vec<Pointer>,
}

impl<'m> Process<'m> {
    /// Creates a process with default limits and fresh memory.
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Self::with_limits(module, EmulationLimits::default())
    }

    /// Creates a process with explicit limits.
    #[must_use]
    pub fn with_limits(module: &'m Module, limits: EmulationLimits) -> Self {
        Self {
            module,
            memory: SharedMemory::new(),
            limits,
            executed: AtomicU64::new(0),
        }
    }

    /// The module being executed.
    #[must_use]
    pub fn module(&self) -> &'m Module {
        self.module
    }

    /// Calls `function` with `args` and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown ids,
    /// [`Error::EmulationLimit`] when the instruction budget is exhausted and
    /// [`Error::Emulation`] for unsupported or invalid operations.
    pub fn call(&self, function: FunctionId, args: &[RtValue]) -> Result<RtValue> {
        let mut budget = self.limits.max_instructions;
        self.invoke(function, args, 0, &mut budget)
    }

    /// Calls the function named `name`.
    ///
    /// # Errors
    ///
    /// See [`Process::call`].
    pub fn call_by_name(&self, name: &str, args: &[RtValue]) -> Result<RtValue> {
        let function = self
            .module
            .function_by_name(name)
            .ok_or_else(|| Error::Emulation(format!("no function named {name}")))?;
        self.call(function, args)
    }

    /// Current bytes of a global.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GlobalNotFound`] for unknown or erased globals.
    pub fn read_global(&self, id: GlobalId) -> Result<Vec<u8>> {
        self.memory.snapshot(self.module, Region::Global(id))
    }

    /// Reads a NUL-terminated byte string starting at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emulation`] if no terminator is found in the region.
    pub fn read_c_string(&self, ptr: Pointer) -> Result<Vec<u8>> {
        let bytes = self.memory.snapshot(self.module, ptr.region)?;
        let tail = bytes
            .get(ptr.offset..)
            .ok_or_else(|| Error::Emulation("string pointer out of bounds".to_string()))?;
        let end = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::Emulation("unterminated string".to_string()))?;
        Ok(tail[..end].to_vec())
    }

    /// Loads a value through the process memory.
    ///
    /// # Errors
    ///
    /// See [`SharedMemory::load`].
    pub fn load(&self, ptr: Pointer, ty: &IrType) -> Result<RtValue> {
        self.memory
            .load(self.module, ptr, ty, crate::ir::AtomicOrdering::NotAtomic)
    }

    /// Memory traffic counters.
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Total instructions executed by all calls so far.
    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    fn invoke(
        &self,
        id: FunctionId,
        args: &[RtValue],
        depth: usize,
        budget: &mut u64,
    ) -> Result<RtValue> {
        if depth >= self.limits.max_call_depth {
            return Err(Error::Emulation(format!(
                "call depth limit of {} exceeded",
                self.limits.max_call_depth
            )));
        }
        let function = self.module.try_function(id)?;
        let entry = function.entry_block().ok_or_else(|| {
            Error::Emulation(format!("call to declaration {}", function.name()))
        })?;
        if args.len() != function.params().len() {
            return Err(Error::Emulation(format!(
                "{} expects {} arguments, got {}",
                function.name(),
                function.params().len(),
                args.len()
            )));
        }

        let mut frame = Frame {
            args,
            values: HashMap::new(),
            slots: Vec::new(),
        };
        let result = self.run(id, entry, &mut frame, depth, budget);
        for slot in frame.slots {
            self.memory.free(slot);
        }
        result
    }

    fn run(
        &self,
        id: FunctionId,
        entry: BlockId,
        frame: &mut Frame<'_>,
        depth: usize,
        budget: &mut u64,
    ) -> Result<RtValue> {
        let function = self.module.try_function(id)?;
        let mut block = entry;

        loop {
            let insts = function
                .block(block)
                .ok_or(Error::BlockNotFound(block))?
                .insts();

            let mut next = None;
            for inst_id in insts {
                if *budget == 0 {
                    return Err(Error::EmulationLimit(self.limits.max_instructions));
                }
                *budget -= 1;
                self.executed.fetch_add(1, Ordering::Relaxed);

                let inst = function
                    .inst(*inst_id)
                    .ok_or_else(|| invalid_ir!("dangling instruction {}", inst_id))?;
                let result = match inst.kind() {
                    InstKind::Alloca { ty } => {
                        let ptr = self.memory.allocate(ty);
                        frame.slots.push(ptr);
                        RtValue::Ptr(ptr)
                    }
                    InstKind::Load {
                        ty, ptr, ordering, ..
                    } => {
                        let ptr = self.eval(frame, ptr)?.as_ptr()?;
                        self.memory.load(self.module, ptr, ty, *ordering)?
                    }
                    InstKind::Store {
                        value,
                        ptr,
                        ordering,
                        ..
                    } => {
                        let value = self.eval(frame, value)?;
                        let ptr = self.eval(frame, ptr)?.as_ptr()?;
                        self.memory.store(self.module, ptr, value, *ordering)?;
                        RtValue::Void
                    }
                    InstKind::ElementPtr { elem, base, index } => {
                        let base = self.eval(frame, base)?.as_ptr()?;
                        let index = usize::try_from(self.eval(frame, index)?.as_int()?)
                            .map_err(|_| Error::Emulation("element index overflow".to_string()))?;
                        RtValue::Ptr(base.add(index * elem.size_in_bytes()))
                    }
                    InstKind::FieldPtr { ty, base, field } => {
                        let base = self.eval(frame, base)?.as_ptr()?;
                        let offset = ty.field_offset(*field).ok_or_else(|| {
                            Error::Emulation(format!("type {ty} has no field {field}"))
                        })?;
                        RtValue::Ptr(base.add(offset))
                    }
                    InstKind::Binary { op, ty, lhs, rhs } => {
                        let bits = ty.int_bits().ok_or_else(|| {
                            Error::Emulation(format!("binary operation on {ty}"))
                        })?;
                        let lhs = self.eval(frame, lhs)?.as_int()?;
                        let rhs = self.eval(frame, rhs)?.as_int()?;
                        RtValue::Int {
                            bits,
                            value: mask(bits, binary(*op, bits, lhs, rhs)),
                        }
                    }
                    InstKind::ICmp { pred, lhs, rhs } => {
                        let lhs = self.eval(frame, lhs)?;
                        let rhs = self.eval(frame, rhs)?;
                        RtValue::Int {
                            bits: 1,
                            value: u64::from(compare(*pred, lhs, rhs)?),
                        }
                    }
                    InstKind::Call { callee, args, .. } => {
                        let target = self
                            .module
                            .function_by_name(callee)
                            .ok_or_else(|| Error::Emulation(format!("call to unknown @{callee}")))?;
                        let values = args
                            .iter()
                            .map(|a| self.eval(frame, a))
                            .collect::<Result<Vec<_>>>()?;
                        self.invoke(target, &values, depth + 1, budget)?
                    }
                    InstKind::Br { target } => {
                        next = Some(*target);
                        break;
                    }
                    InstKind::CondBr {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        let taken = self.eval(frame, cond)?.as_int()? != 0;
                        next = Some(if taken { *then_block } else { *else_block });
                        break;
                    }
                    InstKind::Ret { value } => {
                        return match value {
                            Some(v) => self.eval(frame, v),
                            None => Ok(RtValue::Void),
                        };
                    }
                };
                frame.values.insert(*inst_id, result);
            }

            block = next.ok_or_else(|| {
                invalid_ir!("{}: block {} falls through", function.name(), block)
            })?;
        }
    }

    fn eval(&self, frame: &Frame<'_>, value: &Value) -> Result<RtValue> {
        match value {
            Value::Const(constant) => eval_constant(constant),
            Value::Inst(id) => frame
                .values
                .get(id)
                .copied()
                .ok_or_else(|| Error::Emulation(format!("use of undefined value {id}"))),
            Value::Arg(n) => frame
                .args
                .get(*n)
                .copied()
                .ok_or_else(|| Error::Emulation(format!("argument {n} out of range"))),
        }
    }
}

fn eval_constant(constant: &Constant) -> Result<RtValue> {
    match constant {
        Constant::Int { bits, value } => Ok(RtValue::Int {
            bits: *bits,
            value: *value,
        }),
        Constant::Null => Ok(RtValue::Null),
        Constant::Global(_) | Constant::Cast(_) => constant
            .as_global()
            .map(|g| RtValue::Ptr(Pointer::global(g)))
            .ok_or_else(|| Error::Emulation(format!("unsupported operand {constant}"))),
        other => Err(Error::Emulation(format!("aggregate operand {other}"))),
    }
}

fn binary(op: BinaryOp, bits: u32, lhs: u64, rhs: u64) -> u64 {
    match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
        BinaryOp::Shl if rhs < u64::from(bits) => lhs << rhs,
        BinaryOp::LShr if rhs < u64::from(bits) => lhs >> rhs,
        BinaryOp::Shl | BinaryOp::LShr => 0,
    }
}

fn compare(pred: CmpPredicate, lhs: RtValue, rhs: RtValue) -> Result<bool> {
    if let (RtValue::Int { value: l, .. }, RtValue::Int { value: r, .. }) = (lhs, rhs) {
        return Ok(match pred {
            CmpPredicate::Eq => l == r,
            CmpPredicate::Ne => l != r,
            CmpPredicate::Ult => l < r,
            CmpPredicate::Ule => l <= r,
            CmpPredicate::Ugt => l > r,
            CmpPredicate::Uge => l >= r,
        });
    }
    match pred {
        CmpPredicate::Eq => Ok(lhs == rhs),
        CmpPredicate::Ne => Ok(lhs != rhs),
        _ => Err(Error::Emulation(format!(
            "ordered comparison {pred} of non-integers"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AtomicOrdering, Global, ModuleBuilder};

    #[test]
    fn test_loop_and_arithmetic() {
        // sum = 0; for i in 0..n { sum += i }
        let mut mb = ModuleBuilder::new("m");
        mb.function("sum", vec![IrType::I32], IrType::I32, |fb| {
            let header = fb.add_block("header");
            let body = fb.add_block("body");
            let exit = fb.add_block("exit");

            let i = fb.ins().alloca(IrType::I32)?;
            let sum = fb.ins().alloca(IrType::I32)?;
            fb.ins().store(Value::int(32, 0), i.clone())?;
            fb.ins().store(Value::int(32, 0), sum.clone())?;
            fb.ins().br(header)?;

            fb.switch_to(header);
            let iv = fb.ins().load(IrType::I32, i.clone())?;
            let done = fb.ins().icmp(CmpPredicate::Uge, iv, Value::Arg(0))?;
            fb.ins().cond_br(done, exit, body)?;

            fb.switch_to(body);
            let iv = fb.ins().load(IrType::I32, i.clone())?;
            let sv = fb.ins().load(IrType::I32, sum.clone())?;
            let sv = fb.ins().binary(BinaryOp::Add, IrType::I32, sv, iv.clone())?;
            fb.ins().store(sv, sum.clone())?;
            let iv = fb.ins().binary(BinaryOp::Add, IrType::I32, iv, Value::int(32, 1))?;
            fb.ins().store(iv, i)?;
            fb.ins().br(header)?;

            fb.switch_to(exit);
            let sv = fb.ins().load(IrType::I32, sum)?;
            fb.ins().ret(Some(sv))?;
            Ok(())
        })
        .unwrap();
        let module = mb.finish();

        let process = Process::new(&module);
        let result = process
            .call_by_name("sum", &[RtValue::Int { bits: 32, value: 10 }])
            .unwrap();
        assert_eq!(result, RtValue::Int { bits: 32, value: 45 });
    }

    #[test]
    fn test_instruction_limit() {
        let mut mb = ModuleBuilder::new("m");
        mb.function("spin", vec![], IrType::Void, |fb| {
            let looping = fb.add_block("loop");
            fb.ins().br(looping)?;
            fb.switch_to(looping);
            fb.ins().br(looping)?;
            Ok(())
        })
        .unwrap();
        let module = mb.finish();

        let process = Process::with_limits(&module, EmulationLimits::default().with_max_instructions(100));
        let err = process.call_by_name("spin", &[]).unwrap_err();
        assert!(matches!(err, Error::EmulationLimit(100)));
    }

    #[test]
    fn test_global_writes_are_shared() {
        let mut mb = ModuleBuilder::new("m");
        let flag = mb.global(
            Global::new("flag", Constant::int(32, 0)).with_constant(false),
        );
        mb.function("set", vec![], IrType::Void, |fb| {
            fb.ins()
                .store_atomic(Value::int(32, 1), Value::global(flag), AtomicOrdering::Release, 4)?;
            fb.ins().ret(None)?;
            Ok(())
        })
        .unwrap();
        let module = mb.finish();

        let process = Process::new(&module);
        assert_eq!(process.read_global(flag).unwrap(), vec![0, 0, 0, 0]);
        process.call_by_name("set", &[]).unwrap();
        assert_eq!(process.read_global(flag).unwrap(), vec![1, 0, 0, 0]);
        assert_eq!(process.memory_stats().release_stores, 1);
    }
}
