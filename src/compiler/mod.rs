//! Pass infrastructure for module transformations.
//!
//! This module provides the layer between the host IR and the protection
//! passes:
//!
//! - [`crate::ir`] - Modules, globals, functions, instructions
//! - [`compiler`](self) - Pass trait, scheduler, shared context, event log
//! - [`crate::obfuscation`] - The protection passes and their engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext              State shared across functions      │
//! │    ├─ Guard table             (function -> decryption guard)     │
//! │    ├─ Shadow recipes          (buffer -> how to decrypt it)      │
//! │    ├─ Processed functions                                        │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler               One visit per pass and function     │
//! │    └─ Errors become events    (the function stays unprotected)   │
//! │                                                                  │
//! │  IrPass trait                Interface for all passes            │
//! │    ├─ run_on_function()       Per-function transformation        │
//! │    ├─ initialize()            One-time setup                     │
//! │    └─ finalize()              Cleanup after the module is done   │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod context;
mod events;
mod pass;
mod scheduler;

pub use context::CompilerContext;
pub use events::{Event, EventBuilder, EventKind, EventLog, ProtectionStats};
pub use pass::IrPass;
pub use scheduler::PassScheduler;
