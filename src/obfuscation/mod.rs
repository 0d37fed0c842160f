//! Constant-data protection.
//!
//! This module rewrites functions so the plaintext of the constant data they
//! use no longer exists in the module. Two variants are available:
//!
//! - **At rest**: each raw global is replaced by an encrypted blob plus a
//!   shadow buffer. A block inserted at function entry decrypts the blob into
//!   the shadow buffer exactly once, guarded by an atomic status flag.
//! - **Stack**: each raw global is replaced by a local buffer rebuilt from
//!   XOR-masked immediates on every entry.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Closure  │──►│ Classifier │──►│ Encoder │──►│ Synthesizer │──►│ Use rewriter │
//! │ builder  │   │ (shapes)   │   │ (keys)  │   │ or stack    │   │ + cleanup    │
//! └──────────┘   └────────────┘   └─────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use ircloak::compiler::CompilerContext;
//! use ircloak::ir::{Constant, Global, IrType, ModuleBuilder, Value};
//! use ircloak::obfuscation::{ConstantProtector, FixedKeySource, FunctionOptions, Variant};
//!
//! let mut mb = ModuleBuilder::new("demo");
//! let s = mb.global(Global::new(".str", Constant::c_string("Hello")));
//! let main = mb.function("main", vec![], IrType::I8, |fb| {
//!     let v = fb.ins().load(IrType::I8, Value::global(s))?;
//!     fb.ins().ret(Some(v))?;
//!     Ok(())
//! })?;
//! let mut module = mb.finish();
//!
//! let ctx = CompilerContext::new();
//! let mut protector = ConstantProtector::new(FixedKeySource::new([1, 2, 3, 4, 5, 6]));
//! let outcome = protector.protect(&mut module, main, &FunctionOptions::new(Variant::AtRest), &ctx)?;
//! assert_eq!(outcome.records.len(), 1);
//! # Ok::<(), ircloak::Error>(())
//! ```

mod classify;
mod closure;
mod config;
mod encoder;
mod engine;
mod keys;
mod passes;
mod protect;
mod ptrauth;
mod record;
mod rewrite;
mod stack;
mod synth;

pub use classify::{
    Classification, Classifier, Ineligibility, Shape, Verdict, WRAPPER_CLASS_FIELD,
    WRAPPER_DATA_FIELD,
};
pub use closure::Closure;
pub use config::{
    validate_probability, FunctionOptions, ProtectionConfig, Variant, DEFAULT_WRAPPER_TYPE,
    PROBABILITY_ANNOTATION,
};
pub use encoder::{encodable, encode, EncodedData};
pub use engine::{ObfuscationEngine, ObfuscationResult};
pub use keys::{FixedKeySource, KeySource, RngKeySource};
pub use passes::{StackStringPass, StringEncryptionPass};
pub use protect::{ConstantProtector, ProtectionOutcome, BLOB_NAME, SHADOW_NAME, WRAPPER_NAME};
pub use ptrauth::{clone_record, detach_record, PtrauthFix, PTRAUTH_SECTION};
pub use record::{ProtectionRecord, ShadowRecipe};
pub use rewrite::{erase_dead, rewrite_uses, Replacement, RewriteSummary};
pub use stack::{materialize, StackItem};
pub use synth::{
    create_guard, insert_decryption_block, split_entry, EntrySplit, CONTINUATION_NAME,
    DECRYPT_BLOCK_NAME, GUARD_NAME,
};
