//! Shared memory for the reference interpreter.
//!
//! Memory is a set of independent regions, one per global and one per stack
//! slot. Each region stores its contents as little-endian bytes plus a side
//! table of pointer-valued slots, since pointers have no byte encoding in the
//! host IR.
//!
//! # Thread Safety
//!
//! Regions live in a [`DashMap`], so several threads may execute code against
//! the same [`SharedMemory`]. Every load and store is performed under the
//! owning shard's lock and is therefore linearizable; acquire/release
//! orderings hold trivially and are only counted.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

use crate::{
    ir::{AtomicOrdering, Constant, GlobalId, IrType, Module},
    Error, Result,
};

/// Width of a pointer in bytes.
pub const POINTER_SIZE: usize = 8;

/// Identifies a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// Storage of a module global.
    Global(GlobalId),
    /// A stack slot created by `alloca`.
    Stack(u64),
}

/// A pointer into a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// Region the pointer refers to.
    pub region: Region,
    /// Byte offset inside the region.
    pub offset: usize,
}

impl Pointer {
    /// Pointer to the start of a global.
    #[must_use]
    pub const fn global(id: GlobalId) -> Self {
        Self {
            region: Region::Global(id),
            offset: 0,
        }
    }

    /// Returns the pointer advanced by `bytes`.
    #[must_use]
    pub const fn add(self, bytes: usize) -> Self {
        Self {
            region: self.region,
            offset: self.offset + bytes,
        }
    }
}

/// A runtime value produced by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtValue {
    /// Integer of the given width, zero-extended.
    Int {
        /// Bit width.
        bits: u32,
        /// Zero-extended value.
        value: u64,
    },
    /// Non-null pointer.
    Ptr(Pointer),
    /// Null pointer.
    Null,
    /// Result of a void function.
    Void,
}

impl RtValue {
    /// Returns the integer payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emulation`] if the value is not an integer.
    pub fn as_int(&self) -> Result<u64> {
        match self {
            RtValue::Int { value, .. } => Ok(*value),
            other => Err(Error::Emulation(format!("expected integer, found {other:?}"))),
        }
    }

    /// Returns the pointer payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emulation`] for null or non-pointer values.
    pub fn as_ptr(&self) -> Result<Pointer> {
        match self {
            RtValue::Ptr(ptr) => Ok(*ptr),
            RtValue::Null => Err(Error::Emulation("null pointer dereference".to_string())),
            other => Err(Error::Emulation(format!("expected pointer, found {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Storage {
    bytes: Vec<u8>,
    pointers: BTreeMap<usize, Pointer>,
}

impl Storage {
    fn zeroed(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            pointers: BTreeMap::new(),
        }
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.bytes.len() {
            return Err(Error::Emulation(format!(
                "access of {len} bytes at offset {offset} exceeds region of {} bytes",
                self.bytes.len()
            )));
        }
        Ok(())
    }

    fn clear_pointers(&mut self, offset: usize, len: usize) {
        self.pointers
            .retain(|at, _| *at + POINTER_SIZE <= offset || *at >= offset + len);
    }

    fn write_int(&mut self, offset: usize, size: usize, value: u64) -> Result<()> {
        self.check(offset, size)?;
        self.clear_pointers(offset, size);
        let le = value.to_le_bytes();
        for i in 0..size {
            self.bytes[offset + i] = le.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn read_int(&self, offset: usize, size: usize) -> Result<u64> {
        self.check(offset, size)?;
        let mut le = [0u8; 8];
        for (i, byte) in self.bytes[offset..offset + size].iter().take(8).enumerate() {
            le[i] = *byte;
        }
        Ok(u64::from_le_bytes(le))
    }

    fn write_ptr(&mut self, offset: usize, ptr: Option<Pointer>) -> Result<()> {
        self.write_int(offset, POINTER_SIZE, 0)?;
        if let Some(ptr) = ptr {
            self.pointers.insert(offset, ptr);
        }
        Ok(())
    }

    fn read_ptr(&self, offset: usize) -> Result<Option<Pointer>> {
        self.check(offset, POINTER_SIZE)?;
        Ok(self.pointers.get(&offset).copied())
    }

    /// Serializes a constant at `offset`, returning the number of bytes written.
    fn write_constant(&mut self, offset: usize, constant: &Constant) -> Result<usize> {
        match constant {
            Constant::Int { bits, value } => {
                let size = bits.div_ceil(8) as usize;
                self.write_int(offset, size, *value)?;
                Ok(size)
            }
            Constant::Null => {
                self.write_ptr(offset, None)?;
                Ok(POINTER_SIZE)
            }
            Constant::Zero(ty) => {
                let size = ty.size_in_bytes();
                self.check(offset, size)?;
                Ok(size)
            }
            Constant::Data { elem, elements } => {
                let size = elem.size_in_bytes();
                for (i, element) in elements.iter().enumerate() {
                    self.write_int(offset + i * size, size, *element)?;
                }
                Ok(size * elements.len())
            }
            Constant::Struct { fields, .. } => {
                let mut cursor = offset;
                for field in fields {
                    cursor += self.write_constant(cursor, field)?;
                }
                Ok(cursor - offset)
            }
            Constant::Array { elements, .. } => {
                let mut cursor = offset;
                for element in elements {
                    cursor += self.write_constant(cursor, element)?;
                }
                Ok(cursor - offset)
            }
            Constant::Global(_) | Constant::Cast(_) => {
                let target = constant.as_global().ok_or_else(|| {
                    Error::Emulation(format!("unsupported pointer constant {constant}"))
                })?;
                self.write_ptr(offset, Some(Pointer::global(target)))?;
                Ok(POINTER_SIZE)
            }
        }
    }
}

/// Counters describing memory traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Loads with acquire or stronger ordering.
    pub acquire_loads: u64,
    /// Stores with release or stronger ordering.
    pub release_stores: u64,
    /// All stores, atomic or not.
    pub stores: u64,
}

/// Memory shared by every thread of an emulated process.
#[derive(Debug, Default)]
pub struct SharedMemory {
    regions: DashMap<Region, Storage>,
    next_slot: AtomicU64,
    acquire_loads: AtomicU64,
    release_stores: AtomicU64,
    stores: AtomicU64,
}

impl SharedMemory {
    /// Creates empty memory. Global regions are materialized on first access.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&self, module: &Module, region: Region) -> Result<()> {
        if self.regions.contains_key(&region) {
            return Ok(());
        }
        let Region::Global(id) = region else {
            return Err(Error::Emulation(format!("access to freed stack slot {region:?}")));
        };
        let global = module.try_global(id)?;
        let mut storage = Storage::zeroed(global.value_type.size_in_bytes());
        if let Some(init) = &global.initializer {
            storage.write_constant(0, init)?;
        }
        self.regions.entry(region).or_insert(storage);
        Ok(())
    }

    /// Creates a zeroed stack slot large enough for `ty`.
    pub fn allocate(&self, ty: &IrType) -> Pointer {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let region = Region::Stack(slot);
        self.regions
            .insert(region, Storage::zeroed(ty.size_in_bytes()));
        Pointer { region, offset: 0 }
    }

    /// Releases a stack slot.
    pub fn free(&self, ptr: Pointer) {
        if matches!(ptr.region, Region::Stack(_)) {
            self.regions.remove(&ptr.region);
        }
    }

    /// Loads a value of type `ty` from `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emulation`] for out-of-bounds accesses and aggregate
    /// or float loads.
    pub fn load(
        &self,
        module: &Module,
        ptr: Pointer,
        ty: &IrType,
        ordering: AtomicOrdering,
    ) -> Result<RtValue> {
        self.ensure(module, ptr.region)?;
        if matches!(ordering, AtomicOrdering::Acquire | AtomicOrdering::SeqCst) {
            self.acquire_loads.fetch_add(1, Ordering::Relaxed);
        }
        let storage = self
            .regions
            .get(&ptr.region)
            .ok_or_else(|| Error::Emulation(format!("region {:?} vanished", ptr.region)))?;
        match ty {
            IrType::Int(bits) => {
                let value = storage.read_int(ptr.offset, ty.size_in_bytes())?;
                Ok(RtValue::Int {
                    bits: *bits,
                    value: mask(*bits, value),
                })
            }
            IrType::Ptr => Ok(storage
                .read_ptr(ptr.offset)?
                .map_or(RtValue::Null, RtValue::Ptr)),
            other => Err(Error::Emulation(format!("unsupported load of type {other}"))),
        }
    }

    /// Stores `value` at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emulation`] for out-of-bounds accesses and void values.
    pub fn store(
        &self,
        module: &Module,
        ptr: Pointer,
        value: RtValue,
        ordering: AtomicOrdering,
    ) -> Result<()> {
        self.ensure(module, ptr.region)?;
        {
            let mut storage = self
                .regions
                .get_mut(&ptr.region)
                .ok_or_else(|| Error::Emulation(format!("region {:?} vanished", ptr.region)))?;
            match value {
                RtValue::Int { bits, value } => {
                    storage.write_int(ptr.offset, bits.div_ceil(8) as usize, value)?;
                }
                RtValue::Ptr(target) => storage.write_ptr(ptr.offset, Some(target))?,
                RtValue::Null => storage.write_ptr(ptr.offset, None)?,
                RtValue::Void => {
                    return Err(Error::Emulation("store of void value".to_string()));
                }
            }
        }
        self.stores.fetch_add(1, Ordering::Relaxed);
        if matches!(ordering, AtomicOrdering::Release | AtomicOrdering::SeqCst) {
            self.release_stores.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns the current bytes of a region, materializing globals first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GlobalNotFound`] for unknown globals.
    pub fn snapshot(&self, module: &Module, region: Region) -> Result<Vec<u8>> {
        self.ensure(module, region)?;
        self.regions
            .get(&region)
            .map(|storage| storage.bytes.clone())
            .ok_or_else(|| Error::Emulation(format!("region {region:?} vanished")))
    }

    /// Returns `true` if the global has been touched by execution.
    #[must_use]
    pub fn is_materialized(&self, id: GlobalId) -> bool {
        self.regions.contains_key(&Region::Global(id))
    }

    /// Memory traffic counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            acquire_loads: self.acquire_loads.load(Ordering::Relaxed),
            release_stores: self.release_stores.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

/// Truncates `value` to `bits`.
#[must_use]
pub const fn mask(bits: u32, value: u64) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Global;

    #[test]
    fn test_global_materialization() {
        let mut module = Module::new("m");
        let g = module.add_global(Global::new("s", Constant::data(16, vec![0x1234, 0xabcd])));
        let memory = SharedMemory::new();

        assert!(!memory.is_materialized(g));
        let v = memory
            .load(&module, Pointer::global(g).add(2), &IrType::I16, AtomicOrdering::NotAtomic)
            .unwrap();
        assert_eq!(v, RtValue::Int { bits: 16, value: 0xabcd });
        assert_eq!(memory.snapshot(&module, Region::Global(g)).unwrap(), vec![0x34, 0x12, 0xcd, 0xab]);
    }

    #[test]
    fn test_pointer_slots() {
        let mut module = Module::new("m");
        let data = module.add_global(Global::new("d", Constant::c_string("x")));
        let holder = module.add_global(Global::new(
            "h",
            Constant::Struct {
                ty: IrType::anon_struct(vec![IrType::I32, IrType::Ptr]),
                fields: vec![Constant::int(32, 7), Constant::Global(data).cast()],
            },
        ));
        let memory = SharedMemory::new();
        let slot = Pointer::global(holder).add(4);

        let loaded = memory
            .load(&module, slot, &IrType::Ptr, AtomicOrdering::NotAtomic)
            .unwrap();
        assert_eq!(loaded, RtValue::Ptr(Pointer::global(data)));

        // Overwriting part of a pointer slot with integer bytes clears it.
        memory
            .store(&module, slot.add(4), RtValue::Int { bits: 8, value: 1 }, AtomicOrdering::NotAtomic)
            .unwrap();
        let loaded = memory
            .load(&module, slot, &IrType::Ptr, AtomicOrdering::NotAtomic)
            .unwrap();
        assert_eq!(loaded, RtValue::Null);
    }

    #[test]
    fn test_out_of_bounds_and_stats() {
        let module = Module::new("m");
        let memory = SharedMemory::new();
        let slot = memory.allocate(&IrType::I32);
        assert!(memory
            .store(&module, slot.add(2), RtValue::Int { bits: 32, value: 1 }, AtomicOrdering::Release)
            .is_err());
        memory
            .store(&module, slot, RtValue::Int { bits: 32, value: 1 }, AtomicOrdering::Release)
            .unwrap();
        assert_eq!(memory.stats().release_stores, 1);
        memory.free(slot);
        assert!(memory
            .load(&module, slot, &IrType::I32, AtomicOrdering::Acquire)
            .is_err());
    }
}
