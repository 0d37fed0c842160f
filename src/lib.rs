// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # ircloak
//!
//! Constant-data protection passes for an LLVM-shaped intermediate representation.
//!
//! `ircloak` rewrites functions so the literal data they embed (strings, byte
//! tables, tagged string wrappers) no longer exists in plaintext anywhere in the
//! module. The plaintext is recovered at runtime, either once per process from
//! an encrypted blob guarded by an atomic flag, or on every call into a stack
//! buffer.
//!
//! ## Features
//!
//! - **🔍 Dependency closure** - Follows globals through nested aggregates and tagged wrappers
//! - **🔐 At-rest encryption** - Per-element XOR keys baked into code, decrypted exactly once
//! - **🧵 Concurrency safe** - Acquire/release guard makes concurrent first calls harmless
//! - **📚 Stack strings** - Buffers rebuilt from masked immediates on every entry
//! - **🧹 Clean output** - Dead originals are erased, reruns are no-ops
//! - **🧪 Verifiable** - A reference interpreter runs the generated code
//!
//! ## Quick Start
//!
//! ```rust
//! use ircloak::prelude::*;
//!
//! let mut mb = ModuleBuilder::new("demo");
//! let hello = mb.global(Global::new(".str", Constant::c_string("Hello")));
//! let main = mb.function("main", vec![], IrType::I8, |fb| {
//!     let first = fb.ins().load(IrType::I8, Value::global(hello))?;
//!     fb.ins().ret(Some(first))?;
//!     Ok(())
//! })?;
//! let mut module = mb.finish();
//!
//! let engine = ObfuscationEngine::new(ProtectionConfig::default());
//! let result = engine.process_module(&mut module)?;
//! println!("{}", result.summary());
//!
//! // The generated code still produces the plaintext.
//! let process = Process::new(&module);
//! assert_eq!(process.call(main, &[])?.as_int()?, u64::from(b'H'));
//! # Ok::<(), ircloak::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - The host IR: types, constants, globals, instructions, builders, printer
//! - [`emulation`] - Reference interpreter used to check generated code by running it
//! - [`compiler`] - Pass trait, scheduler, compiler context and event log
//! - [`obfuscation`] - The protection engine and its two passes
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Configuration errors (a bad
//! probability or annotation) only abort the affected function; the
//! [`compiler::PassScheduler`] records them as error events and carries on.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use ircloak::prelude::*;
///
/// let config = ProtectionConfig::default().with_element_probability(50);
/// assert!(config.validate().is_ok());
/// ```
pub mod prelude;

pub mod compiler;
pub mod emulation;
pub mod ir;
pub mod obfuscation;

/// `ircloak` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ircloak` Error type
///
/// ```rust
/// use ircloak::{obfuscation::ProtectionConfig, Error};
///
/// let config = ProtectionConfig::default().with_element_probability(101);
/// assert!(matches!(config.validate(), Err(Error::InvalidProbability(101))));
/// ```
pub use error::Error;
