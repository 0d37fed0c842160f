//! Reference interpreter for the host IR.
//!
//! The protection passes generate code whose correctness can only be judged
//! by running it: the decryption block must reproduce the plaintext, the guard
//! must make repeated and concurrent entries harmless, and the stack variant
//! must rebuild its buffer on every call. This module executes IR functions
//! directly so those properties can be checked end to end.
//!
//! # Key Components
//!
//! - [`Process`] - Executes functions of a module; `Sync`, so one process can
//!   be driven from several threads
//! - [`SharedMemory`] - Region-based memory with lazy global initialization
//! - [`EmulationLimits`] - Instruction budget and call depth limit
//! - [`RtValue`] / [`Pointer`] - Runtime values
//!
//! # Memory Model
//!
//! Every load and store is linearizable, so acquire/release pairs are always
//! honoured. Orderings are recorded in [`MemoryStats`] so tests can assert
//! that generated code actually uses them.
//!
//! # Example
//!
//! ```rust
//! use ircloak::emulation::{Process, RtValue};
//! use ircloak::ir::{IrType, ModuleBuilder, Value};
//!
//! let mut mb = ModuleBuilder::new("demo");
//! mb.function("seven", vec![], IrType::I32, |fb| {
//!     fb.ins().ret(Some(Value::int(32, 7)))?;
//!     Ok(())
//! })?;
//! let module = mb.finish();
//!
//! let process = Process::new(&module);
//! assert_eq!(process.call_by_name("seven", &[])?, RtValue::Int { bits: 32, value: 7 });
//! # Ok::<(), ircloak::Error>(())
//! ```

mod interpreter;
mod memory;

pub use interpreter::{EmulationLimits, Process};
pub use memory::{MemoryStats, Pointer, Region, RtValue, SharedMemory, POINTER_SIZE};
