//! Decryption-block synthesis for the at-rest variant.
//!
//! The entry block is rewritten into three blocks:
//!
//! ```text
//!   A (entry)                 %LoadEncryptionStatus = load atomic i32 @guard acquire
//!   │                         %cmp = icmp eq %LoadEncryptionStatus, 0
//!   ├──── 0 ──► B             br %cmp, B, C
//!   │           StringDecryptionBB: ciphertext ^ key -> shadow, for every slot
//!   │           │             br C
//!   ▼           ▼
//!   C (PrecedingBlock)        store atomic i32 1, @guard release
//!                             ... original entry instructions ...
//! ```
//!
//! The release store in C runs on both paths. Any thread that observes the
//! guard as set through the acquire load therefore also observes the fully
//! written shadow buffers. A thread losing the race redoes the decryption,
//! which writes identical values.

use tracing::debug;

use crate::{
    ir::{
        AtomicOrdering, BlockId, CmpPredicate, Constant, Function, Global, GlobalFlags, GlobalId,
        InstKind, InstructionBuilder, IrType, Linkage, Module, Value,
    },
    obfuscation::record::ShadowRecipe,
    Result,
};

/// Symbol name of decryption guards.
pub const GUARD_NAME: &str = "StringEncryptionEncStatus";

/// Label of the inserted decryption block.
pub const DECRYPT_BLOCK_NAME: &str = "StringDecryptionBB";

/// Label of the continuation holding the original entry instructions.
pub const CONTINUATION_NAME: &str = "PrecedingBlock";

/// Alignment of the guard flag.
const GUARD_ALIGN: u32 = 4;

/// The blocks of a rewritten entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySplit {
    /// The original entry block, now only dispatching.
    pub head: BlockId,
    /// The inserted block, still without terminator.
    pub body: BlockId,
    /// The original entry instructions.
    pub continuation: BlockId,
}

/// Splits the entry of `function` and inserts an empty block `body_name`
/// between the head and the continuation.
///
/// The head keeps its branch to the continuation; callers replace it.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidIr`] for a function without body.
pub fn split_entry(function: &mut Function, body_name: &str) -> Result<EntrySplit> {
    let head = function
        .entry_block()
        .ok_or_else(|| invalid_ir!("{} has no entry block", function.name()))?;
    let continuation = function.split_block(head, 0, CONTINUATION_NAME)?;
    let body = function.create_block_before(body_name, continuation)?;
    Ok(EntrySplit {
        head,
        body,
        continuation,
    })
}

/// Adds a fresh decryption guard to the module.
pub fn create_guard(module: &mut Module) -> GlobalId {
    module.add_global(
        Global::new(GUARD_NAME, Constant::int(32, 0))
            .with_linkage(Linkage::Private)
            .with_constant(false)
            .with_align(GUARD_ALIGN)
            .with_flags(GlobalFlags::ARTIFACT | GlobalFlags::GUARD),
    )
}

/// Emits the decryption of one shadow buffer at the builder's position.
///
/// Only encrypted slots are touched; plaintext slots already hold their
/// final value in the buffer's initializer.
///
/// # Errors
///
/// Fails if an instruction cannot be emitted.
pub fn emit_decryption(
    builder: &mut InstructionBuilder<'_>,
    shadow: GlobalId,
    recipe: &ShadowRecipe,
) -> Result<usize> {
    let Some(blob) = recipe.blob else {
        return Ok(0);
    };
    let ty = recipe.width.ir_type();
    let bits = recipe.width.bits();

    let mut emitted = 0;
    for (index, offset) in recipe.encrypted_slots() {
        let src = builder.element_ptr(ty.clone(), Value::global(blob), offset as u64)?;
        let cipher = builder.load(ty.clone(), src)?;
        let plain = builder.xor(ty.clone(), cipher, Value::int(bits, recipe.keys[index]))?;
        let dst = builder.element_ptr(ty.clone(), Value::global(shadow), index as u64)?;
        builder.store(plain, dst)?;
        emitted += 1;
    }
    Ok(emitted)
}

/// Rewrites the entry of `function` so every buffer in `buffers` is decrypted
/// before the original instructions run, at most once per guard.
///
/// # Errors
///
/// Fails for a function without body or if the IR cannot be mutated.
pub fn insert_decryption_block(
    function: &mut Function,
    guard: GlobalId,
    buffers: &[(GlobalId, &ShadowRecipe)],
) -> Result<EntrySplit> {
    let split = split_entry(function, DECRYPT_BLOCK_NAME)?;

    // A: acquire-load the guard and skip decryption once it is set.
    let mut head = InstructionBuilder::at(function, split.head, 0);
    let status = head.named("LoadEncryptionStatus").load_atomic(
        IrType::I32,
        Value::global(guard),
        AtomicOrdering::Acquire,
        GUARD_ALIGN,
    )?;
    let pending = head.icmp(CmpPredicate::Eq, status, Value::int(32, 0))?;
    function.replace_terminator(
        split.head,
        InstKind::CondBr {
            cond: pending,
            then_block: split.body,
            else_block: split.continuation,
        },
    )?;

    // B: decrypt every buffer, then fall into C.
    let mut body = InstructionBuilder::at_end(function, split.body);
    let mut slots = 0;
    for (shadow, recipe) in buffers {
        slots += emit_decryption(&mut body, *shadow, recipe)?;
    }
    body.br(split.continuation)?;

    // C: publish the shadow buffers.
    InstructionBuilder::at(function, split.continuation, 0).store_atomic(
        Value::int(32, 1),
        Value::global(guard),
        AtomicOrdering::Release,
        GUARD_ALIGN,
    )?;

    debug!(
        function = function.name(),
        buffers = buffers.len(),
        slots,
        "decryption block inserted"
    );
    Ok(split)
}
