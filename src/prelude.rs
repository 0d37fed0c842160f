//! # ircloak Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! from the ircloak library. Import it to get quick access to the essential
//! types for building modules, protecting them and running the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ircloak operations
pub use crate::Error;

/// The result type used throughout ircloak
pub use crate::Result;

// ================================================================================================
// Host IR
// ================================================================================================

/// Module, function and global containers
pub use crate::ir::{Function, Global, GlobalFlags, Linkage, Module, TargetInfo};

/// Ids into the module arenas
pub use crate::ir::{BlockId, FunctionId, GlobalId, InstId};

/// Constants, types and operands
pub use crate::ir::{Constant, IntWidth, IrType, Value};

/// Instructions
pub use crate::ir::{AtomicOrdering, BinaryOp, CmpPredicate, InstKind, Instruction};

/// Builders for constructing IR
pub use crate::ir::{FunctionBuilder, InstructionBuilder, ModuleBuilder};

// ================================================================================================
// Pass Infrastructure
// ================================================================================================

/// Shared state, passes and the event log
pub use crate::compiler::{
    CompilerContext, Event, EventKind, EventLog, IrPass, PassScheduler, ProtectionStats,
};

// ================================================================================================
// Protection
// ================================================================================================

/// Module-level entry point and configuration
pub use crate::obfuscation::{
    FunctionOptions, ObfuscationEngine, ObfuscationResult, ProtectionConfig, Variant,
};

/// Per-function entry point and its result
pub use crate::obfuscation::{ConstantProtector, ProtectionOutcome, ProtectionRecord};

/// Key material
pub use crate::obfuscation::{FixedKeySource, KeySource, RngKeySource};

/// The two protection passes
pub use crate::obfuscation::{StackStringPass, StringEncryptionPass};

// ================================================================================================
// Emulation
// ================================================================================================

/// Reference interpreter
pub use crate::emulation::{EmulationLimits, Process, RtValue};
