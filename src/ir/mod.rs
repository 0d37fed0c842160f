//! Host intermediate representation.
//!
//! The protection passes operate on a small, LLVM-shaped IR: a [`Module`] owns
//! [`Global`]s and [`Function`]s, functions own [`Block`]s and an instruction
//! arena, and every operand is a [`Value`]. This module provides exactly the
//! collaborator surface the passes rely on:
//!
//! - enumerating a function's instructions and operands
//! - telling globals, instructions and arguments apart
//! - inserting, replacing and splitting instructions and blocks
//! - creating globals with a chosen linkage and section
//! - atomic load/store orderings
//!
//! # Structure
//!
//! ```text
//! Module
//! ├── globals: arena of Option<Global>   (ids stay stable across erasure)
//! ├── functions: Vec<Function>
//! │   ├── blocks: Vec<Block>             (first block is the entry)
//! │   └── insts: arena of Instruction    (blocks hold InstId order)
//! ├── compiler_used: Vec<GlobalId>
//! └── target: TargetInfo
//! ```
//!
//! Constant initializers are value trees ([`Constant`]) rather than shared
//! objects, so "replacing a use" means rebuilding the tree that contains it.

mod block;
mod builder;
mod constant;
mod display;
mod function;
mod global;
mod instruction;
mod module;
mod types;

use std::fmt;

pub use block::Block;
pub use builder::{FunctionBuilder, InstructionBuilder, ModuleBuilder};
pub use constant::Constant;
pub use function::Function;
pub use global::{Global, GlobalFlags, Linkage};
pub use instruction::{AtomicOrdering, BinaryOp, CmpPredicate, InstKind, Instruction, Value};
pub use module::{GlobalUse, Module, TargetInfo};
pub use types::{IntWidth, IrType};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            /// Creates an id from a raw arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            /// Returns the raw arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Stable handle of a global in a [`Module`].
    GlobalId,
    "@g"
);
define_id!(
    /// Handle of a function in a [`Module`].
    FunctionId,
    "fn"
);
define_id!(
    /// Handle of a basic block inside a [`Function`].
    BlockId,
    "bb"
);
define_id!(
    /// Handle of an instruction inside a [`Function`]'s arena.
    InstId,
    "%"
);
