//! IR instructions and operands.
//!
//! Operand field naming follows a fixed convention:
//! - `ptr`: address operand of memory operations
//! - `value`: value being stored or returned
//! - `base`: pointer an address computation starts from
//! - `lhs`, `rhs`: binary operands
//! - `target`, `then_block`, `else_block`: branch targets

#![allow(missing_docs)]

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::ir::{BlockId, Constant, GlobalId, InstId, IrType};

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Immediate constant, including global addresses.
    Const(Constant),
    /// Result of another instruction in the same function.
    Inst(InstId),
    /// Function argument by position.
    Arg(usize),
}

impl Value {
    /// Integer immediate.
    #[must_use]
    pub fn int(bits: u32, value: u64) -> Self {
        Value::Const(Constant::int(bits, value))
    }

    /// Address of a global.
    #[must_use]
    pub fn global(id: GlobalId) -> Self {
        Value::Const(Constant::Global(id))
    }

    /// Returns the global this operand refers to after stripping pointer casts.
    #[must_use]
    pub fn as_global(&self) -> Option<GlobalId> {
        match self {
            Value::Const(c) => c.as_global(),
            Value::Inst(_) | Value::Arg(_) => None,
        }
    }

    /// Returns the constant if this operand is an immediate.
    #[must_use]
    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Value::Const(c) => Some(c),
            Value::Inst(_) | Value::Arg(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(c) => write!(f, "{c}"),
            Value::Inst(id) => write!(f, "{id}"),
            Value::Arg(n) => write!(f, "%arg{n}"),
        }
    }
}

/// Memory ordering of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum AtomicOrdering {
    /// Plain, non-atomic access.
    #[default]
    #[strum(serialize = "")]
    NotAtomic,
    /// Atomic without ordering constraints.
    Monotonic,
    /// Acquire (loads).
    Acquire,
    /// Release (stores).
    Release,
    /// Sequentially consistent.
    #[strum(serialize = "seq_cst")]
    SeqCst,
}

impl AtomicOrdering {
    /// Returns `true` for any atomic ordering.
    #[must_use]
    pub const fn is_atomic(self) -> bool {
        !matches!(self, Self::NotAtomic)
    }
}

/// Binary integer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    LShr,
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPredicate {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Unsigned less than.
    Ult,
    /// Unsigned less or equal.
    Ule,
    /// Unsigned greater than.
    Ugt,
    /// Unsigned greater or equal.
    Uge,
}

/// Instruction payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Reserve function-local storage of type `ty`; yields its address.
    Alloca { ty: IrType },
    /// `result = load ty, ptr`
    Load {
        ty: IrType,
        ptr: Value,
        ordering: AtomicOrdering,
        align: u32,
    },
    /// `store value, ptr`
    Store {
        value: Value,
        ptr: Value,
        ordering: AtomicOrdering,
        align: u32,
    },
    /// `result = base + index * sizeof(elem)`
    ElementPtr {
        elem: IrType,
        base: Value,
        index: Value,
    },
    /// `result = base + offsetof(ty, field)`
    FieldPtr {
        ty: IrType,
        base: Value,
        field: usize,
    },
    /// `result = op lhs, rhs` on integers of type `ty`.
    Binary {
        op: BinaryOp,
        ty: IrType,
        lhs: Value,
        rhs: Value,
    },
    /// `result = icmp pred lhs, rhs` (yields `i1`).
    ICmp {
        pred: CmpPredicate,
        lhs: Value,
        rhs: Value,
    },
    /// Direct call of a function in the same module, by name.
    Call {
        callee: String,
        ret: IrType,
        args: Vec<Value>,
    },
    /// Unconditional branch.
    Br { target: BlockId },
    /// Conditional branch on an `i1`.
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Return from the function.
    Ret { value: Option<Value> },
}

impl InstKind {
    /// Returns `true` for block terminators.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. }
        )
    }

    /// Returns `true` if the instruction produces a value.
    #[must_use]
    pub fn has_result(&self) -> bool {
        match self {
            InstKind::Store { .. }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Ret { .. } => false,
            InstKind::Call { ret, .. } => *ret != IrType::Void,
            _ => true,
        }
    }

    /// Successor blocks of a terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }

    /// All value operands, in a fixed order.
    #[must_use]
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::Br { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::ElementPtr { base, index, .. } => vec![base, index],
            InstKind::FieldPtr { base, .. } => vec![base],
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Call { args, .. } => args.iter().collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter().collect(),
        }
    }

    /// Mutable access to all value operands, same order as [`Self::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::Br { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::ElementPtr { base, index, .. } => vec![base, index],
            InstKind::FieldPtr { base, .. } => vec![base],
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Call { args, .. } => args.iter_mut().collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter_mut().collect(),
        }
    }

    /// Rewrites branch targets equal to `from` into `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            InstKind::Br { target } if *target == from => *target = to,
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } => {
                if *then_block == from {
                    *then_block = to;
                }
                if *else_block == from {
                    *else_block = to;
                }
            }
            _ => {}
        }
    }
}

/// An instruction in a function's arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    id: InstId,
    kind: InstKind,
    name: Option<String>,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(id: InstId, kind: InstKind, name: Option<String>) -> Self {
        Self { id, kind, name }
    }

    /// Returns the instruction id.
    #[must_use]
    pub const fn id(&self) -> InstId {
        self.id
    }

    /// Returns the payload.
    #[must_use]
    pub fn kind(&self) -> &InstKind {
        &self.kind
    }

    /// Returns the payload mutably.
    pub fn kind_mut(&mut self) -> &mut InstKind {
        &mut self.kind
    }

    /// Replaces the payload.
    pub fn set_kind(&mut self, kind: InstKind) {
        self.kind = kind;
    }

    /// Optional value name used by the printer.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// All value operands.
    #[must_use]
    pub fn operands(&self) -> Vec<&Value> {
        self.kind.operands()
    }

    /// Globals referenced by operands, after stripping pointer casts.
    pub fn referenced_globals(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.kind
            .operands()
            .into_iter()
            .filter_map(Value::as_global)
    }

    /// Returns `true` if the instruction is a terminator.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_enumeration() {
        let store = InstKind::Store {
            value: Value::int(8, 1),
            ptr: Value::Const(Constant::Global(GlobalId::new(4)).cast()),
            ordering: AtomicOrdering::Release,
            align: 4,
        };
        assert_eq!(store.operands().len(), 2);
        assert!(!store.has_result());

        let inst = Instruction::new(InstId::new(0), store, None);
        let globals: Vec<_> = inst.referenced_globals().collect();
        assert_eq!(globals, vec![GlobalId::new(4)]);
    }

    #[test]
    fn test_retarget() {
        let mut br = InstKind::CondBr {
            cond: Value::int(1, 1),
            then_block: BlockId::new(1),
            else_block: BlockId::new(1),
        };
        br.retarget(BlockId::new(1), BlockId::new(3));
        assert_eq!(br.successors(), vec![BlockId::new(3), BlockId::new(3)]);
    }

    #[test]
    fn test_ordering_names() {
        assert_eq!(AtomicOrdering::Acquire.to_string(), "acquire");
        assert_eq!(AtomicOrdering::SeqCst.to_string(), "seq_cst");
        assert!(!AtomicOrdering::NotAtomic.is_atomic());
        assert_eq!(BinaryOp::LShr.to_string(), "lshr");
    }
}
