//! Basic blocks.

use crate::ir::{BlockId, InstId};

/// A basic block: an ordered list of instruction ids ending in a terminator.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    name: String,
    insts: Vec<InstId>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: BlockId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            insts: Vec::new(),
        }
    }

    /// Returns the block id.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the block label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the block.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Instruction ids in execution order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// Mutable access to the instruction order.
    pub fn insts_mut(&mut self) -> &mut Vec<InstId> {
        &mut self.insts
    }

    /// Returns the last instruction id, which is the terminator in valid IR.
    #[must_use]
    pub fn last(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    /// Returns `true` if the block has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }
}
