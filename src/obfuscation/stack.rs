//! Stack materialization.
//!
//! The stack variant keeps no ciphertext in the module. On every entry, an
//! inserted block allocates a local buffer per protected global and rebuilds
//! each element with a store of a random keystream value, a load of it, and
//! an XOR with the baked constant `keystream ^ value`. The plaintext itself
//! never appears as an immediate.

use tracing::debug;

use crate::{
    ir::{Function, GlobalId, InstKind, InstructionBuilder, IntWidth, IrType, Value},
    obfuscation::{
        keys::KeySource,
        synth::{split_entry, EntrySplit, DECRYPT_BLOCK_NAME},
    },
    Result,
};

/// A raw global to rebuild on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackItem {
    /// The global being replaced.
    pub original: GlobalId,
    /// Element width.
    pub width: IntWidth,
    /// Plaintext elements.
    pub elements: Vec<u64>,
}

/// Rewrites the entry of `function` to rebuild every item in a local buffer.
///
/// Returns the local buffer of each item, in input order.
///
/// # Errors
///
/// Fails for a function without body or if the IR cannot be mutated.
pub fn materialize<K: KeySource + ?Sized>(
    function: &mut Function,
    items: &[StackItem],
    keys: &mut K,
) -> Result<(EntrySplit, Vec<(GlobalId, Value)>)> {
    let split = split_entry(function, DECRYPT_BLOCK_NAME)?;
    function.replace_terminator(split.head, InstKind::Br { target: split.body })?;

    let mut builder = InstructionBuilder::at_end(function, split.body);
    let mut buffers = Vec::with_capacity(items.len());
    for item in items {
        let ty = item.width.ir_type();
        let bits = item.width.bits();
        let mask = item.width.mask();
        let buffer = builder.alloca(IrType::array(ty.clone(), item.elements.len()))?;

        for (index, &value) in item.elements.iter().enumerate() {
            let keystream = keys.key(item.width) & mask;
            let slot = builder.element_ptr(ty.clone(), buffer.clone(), index as u64)?;
            builder.store(Value::int(bits, keystream), slot.clone())?;
            let loaded = builder.load(ty.clone(), slot.clone())?;
            let plain = builder.xor(ty.clone(), loaded, Value::int(bits, keystream ^ (value & mask)))?;
            builder.store(plain, slot)?;
        }
        buffers.push((item.original, buffer));
    }
    builder.br(split.continuation)?;

    debug!(
        function = function.name(),
        buffers = buffers.len(),
        "stack materialization inserted"
    );
    Ok((split, buffers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::Process,
        ir::{BinaryOp, Constant, Global, ModuleBuilder},
        obfuscation::keys::FixedKeySource,
    };

    #[test]
    fn test_rebuilds_plaintext_without_storing_it() {
        let mut mb = ModuleBuilder::new("m");
        let raw = mb.global(Global::new(".str", Constant::data(16, vec![0x4142, 0x0043])));
        let f = mb
            .function("f", vec![], IrType::I16, |fb| {
                let second = fb
                    .ins()
                    .element_ptr(IrType::I16, Value::global(raw), 1)?;
                let v = fb.ins().load(IrType::I16, second)?;
                fb.ins().ret(Some(v))?;
                Ok(())
            })
            .unwrap();
        let mut module = mb.finish();

        let items = [StackItem {
            original: raw,
            width: IntWidth::W16,
            elements: vec![0x4142, 0x0043],
        }];
        let mut keys = FixedKeySource::new([0x1234, 0xbeef]);
        let function = module.function_mut(f).unwrap();
        let (split, buffers) = materialize(function, &items, &mut keys).unwrap();
        assert_eq!(buffers.len(), 1);

        // Every stored immediate differs from the plaintext.
        let body = function.block(split.body).unwrap();
        for id in body.insts() {
            match function.inst(*id).unwrap().kind() {
                InstKind::Store { value: Value::Const(c), .. } => {
                    assert!(*c != Constant::int(16, 0x4142) && *c != Constant::int(16, 0x0043));
                }
                InstKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Xor),
                _ => {}
            }
        }

        // Redirect the use by hand and run it.
        let (_, buffer) = &buffers[0];
        let use_site = function.block(split.continuation).unwrap().insts()[0];
        if let InstKind::ElementPtr { base, .. } = function.inst_mut(use_site).unwrap().kind_mut() {
            *base = buffer.clone();
        }
        function.verify().unwrap();

        let process = Process::new(&module);
        assert_eq!(process.call(f, &[]).unwrap().as_int().unwrap(), 0x0043);
    }
}
