//! Functions: block layout, instruction arena and CFG mutation primitives.
//!
//! # Structure
//!
//! ```text
//! Function
//! ├── blocks: Vec<Block>        // arena, indexed by BlockId
//! ├── layout: Vec<BlockId>      // program order, layout[0] is the entry
//! └── insts: Vec<Instruction>   // arena, indexed by InstId
//! ```
//!
//! Block ids and instruction ids are never reused, so handles taken before a
//! [`Function::split_block`] or [`Function::create_block_before`] stay valid.

use crate::{
    ir::{Block, BlockId, InstId, InstKind, Instruction, IrType, Linkage},
    Error, Result,
};

/// A function with an optional body.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    params: Vec<IrType>,
    ret: IrType,
    linkage: Linkage,
    annotations: Vec<String>,
    blocks: Vec<Block>,
    layout: Vec<BlockId>,
    insts: Vec<Instruction>,
}

impl Function {
    /// Creates a function without a body.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<IrType>, ret: IrType) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            linkage: Linkage::External,
            annotations: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
            insts: Vec::new(),
        }
    }

    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter types.
    #[must_use]
    pub fn params(&self) -> &[IrType] {
        &self.params
    }

    /// Return type.
    #[must_use]
    pub fn ret(&self) -> &IrType {
        &self.ret
    }

    /// Linkage of the function symbol.
    #[must_use]
    pub const fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// Sets the linkage of the function symbol.
    pub fn set_linkage(&mut self, linkage: Linkage) {
        self.linkage = linkage;
    }

    /// Annotation strings attached to the function (`strenc`, `strcry_prob=40`, ...).
    #[must_use]
    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    /// Attaches an annotation.
    pub fn annotate(&mut self, annotation: impl Into<String>) {
        self.annotations.push(annotation.into());
    }

    /// Returns `true` if the exact annotation is present.
    #[must_use]
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }

    /// Returns the value of a `key=value` annotation.
    #[must_use]
    pub fn annotation_value(&self, key: &str) -> Option<&str> {
        self.annotations.iter().find_map(|a| {
            a.split_once('=')
                .filter(|(k, _)| k.trim() == key)
                .map(|(_, v)| v.trim())
        })
    }

    /// Returns `true` if the function has no body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    /// Appends a new empty block to the layout.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(id, name));
        self.layout.push(id);
        id
    }

    /// Creates a new empty block placed directly before `before` in the layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockNotFound`] if `before` is not part of the layout.
    pub fn create_block_before(
        &mut self,
        name: impl Into<String>,
        before: BlockId,
    ) -> Result<BlockId> {
        let position = self.layout_position(before)?;
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(id, name));
        self.layout.insert(position, id);
        Ok(id)
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Block ids in program order.
    #[must_use]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Iterates blocks in program order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.layout.iter().map(|id| &self.blocks[id.index()])
    }

    /// Number of blocks in the layout.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Looks up a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// Looks up a block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.index())
    }

    /// Finds a block by label.
    #[must_use]
    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks().find(|b| b.name() == name).map(Block::id)
    }

    /// Looks up an instruction.
    #[must_use]
    pub fn inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index())
    }

    /// Looks up an instruction mutably.
    pub fn inst_mut(&mut self, id: InstId) -> Option<&mut Instruction> {
        self.insts.get_mut(id.index())
    }

    /// Iterates all placed instructions in program order.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &Instruction)> {
        self.blocks().flat_map(move |block| {
            block
                .insts()
                .iter()
                .map(move |id| (block.id(), &self.insts[id.index()]))
        })
    }

    /// Ids of all placed instructions in program order.
    #[must_use]
    pub fn instruction_ids(&self) -> Vec<InstId> {
        self.blocks()
            .flat_map(|block| block.insts().iter().copied())
            .collect()
    }

    /// Total number of placed instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks().map(Block::len).sum()
    }

    fn alloc_inst(&mut self, kind: InstKind, name: Option<String>) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(Instruction::new(id, kind, name));
        id
    }

    /// Appends an instruction at the end of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockNotFound`] if the block does not exist.
    pub fn push_inst(
        &mut self,
        block: BlockId,
        kind: InstKind,
        name: Option<String>,
    ) -> Result<InstId> {
        if self.block(block).is_none() {
            return Err(Error::BlockNotFound(block));
        }
        let id = self.alloc_inst(kind, name);
        self.blocks[block.index()].insts_mut().push(id);
        Ok(id)
    }

    /// Inserts an instruction at `position` inside `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockNotFound`] if the block does not exist, or
    /// [`Error::InvalidIr`] if `position` is past the end of the block.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        position: usize,
        kind: InstKind,
        name: Option<String>,
    ) -> Result<InstId> {
        let len = self.block(block).ok_or(Error::BlockNotFound(block))?.len();
        if position > len {
            return Err(invalid_ir!(
                "insert position {} out of range for block {} with {} instructions",
                position,
                block,
                len
            ));
        }
        let id = self.alloc_inst(kind, name);
        self.blocks[block.index()].insts_mut().insert(position, id);
        Ok(id)
    }

    /// Returns the terminator of a block, if the block ends with one.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = self.block(block)?.last()?;
        self.inst(last)
            .filter(|inst| inst.is_terminator())
            .map(Instruction::id)
    }

    /// Replaces the terminator of `block` with a new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIr`] if `kind` is not a terminator or the
    /// block does not end with one.
    pub fn replace_terminator(&mut self, block: BlockId, kind: InstKind) -> Result<InstId> {
        if !kind.is_terminator() {
            return Err(invalid_ir!("replacement for terminator of {} is not a terminator", block));
        }
        let old = self
            .terminator(block)
            .ok_or_else(|| invalid_ir!("block {} has no terminator", block))?;
        let id = self.alloc_inst(kind, None);
        let insts = self.blocks[block.index()].insts_mut();
        if let Some(last) = insts.last_mut() {
            debug_assert_eq!(*last, old);
            *last = id;
        }
        Ok(id)
    }

    /// Splits `block` before the instruction at `position`.
    ///
    /// Instructions from `position` on move into a new block named `name`
    /// placed right after `block` in the layout; `block` is terminated with
    /// an unconditional branch to the new block. Returns the new block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockNotFound`] if the block does not exist, or
    /// [`Error::InvalidIr`] if `position` is past the end of the block.
    pub fn split_block(
        &mut self,
        block: BlockId,
        position: usize,
        name: impl Into<String>,
    ) -> Result<BlockId> {
        let len = self.block(block).ok_or(Error::BlockNotFound(block))?.len();
        if position > len {
            return Err(invalid_ir!(
                "split position {} out of range for block {}",
                position,
                block
            ));
        }
        let layout_position = self.layout_position(block)?;

        let tail: Vec<InstId> = self.blocks[block.index()]
            .insts_mut()
            .drain(position..)
            .collect();

        let new_id = BlockId::new(self.blocks.len());
        let mut new_block = Block::new(new_id, name);
        *new_block.insts_mut() = tail;
        self.blocks.push(new_block);
        self.layout.insert(layout_position + 1, new_id);

        self.push_inst(block, InstKind::Br { target: new_id }, None)?;
        Ok(new_id)
    }

    fn layout_position(&self, block: BlockId) -> Result<usize> {
        self.layout
            .iter()
            .position(|id| *id == block)
            .ok_or(Error::BlockNotFound(block))
    }

    /// Predecessor blocks of `block`, in layout order.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.layout
            .iter()
            .copied()
            .filter(|id| {
                self.terminator(*id)
                    .and_then(|t| self.inst(t))
                    .is_some_and(|t| t.kind().successors().contains(&block))
            })
            .collect()
    }

    /// Checks structural well-formedness of the body.
    ///
    /// Every block must be non-empty, end with its only terminator, and branch
    /// only to blocks in the layout. Instruction operands must refer to placed
    /// instructions that produce values, and argument indices must be in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIr`] describing the first violation found.
    pub fn verify(&self) -> Result<()> {
        let placed: std::collections::HashSet<InstId> =
            self.instruction_ids().into_iter().collect();

        for block in self.blocks() {
            let Some(last) = block.last() else {
                return Err(invalid_ir!("{}: block {} is empty", self.name, block.name()));
            };
            for id in block.insts() {
                let inst = &self.insts[id.index()];
                if inst.is_terminator() != (*id == last) {
                    return Err(invalid_ir!(
                        "{}: block {} has a misplaced terminator",
                        self.name,
                        block.name()
                    ));
                }
                for target in inst.kind().successors() {
                    if !self.layout.contains(&target) {
                        return Err(invalid_ir!(
                            "{}: branch to unknown block {}",
                            self.name,
                            target
                        ));
                    }
                }
                for operand in inst.operands() {
                    match operand {
                        crate::ir::Value::Inst(def) => {
                            let produces = self
                                .inst(*def)
                                .is_some_and(|d| d.kind().has_result());
                            if !placed.contains(def) || !produces {
                                return Err(invalid_ir!(
                                    "{}: operand {} does not name a placed value",
                                    self.name,
                                    def
                                ));
                            }
                        }
                        crate::ir::Value::Arg(n) if *n >= self.params.len() => {
                            return Err(invalid_ir!(
                                "{}: argument {} out of range",
                                self.name,
                                n
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AtomicOrdering, Value};

    fn two_inst_function() -> (Function, BlockId) {
        let mut f = Function::new("f", vec![], IrType::Void);
        let entry = f.add_block("entry");
        f.push_inst(entry, InstKind::Alloca { ty: IrType::I32 }, None)
            .unwrap();
        f.push_inst(entry, InstKind::Ret { value: None }, None)
            .unwrap();
        (f, entry)
    }

    #[test]
    fn test_split_block_keeps_order() {
        let (mut f, entry) = two_inst_function();
        let tail = f.split_block(entry, 0, "tail").unwrap();

        assert_eq!(f.layout(), &[entry, tail]);
        assert_eq!(f.block(entry).unwrap().len(), 1);
        assert_eq!(f.block(tail).unwrap().len(), 2);
        assert!(matches!(
            f.inst(f.terminator(entry).unwrap()).unwrap().kind(),
            InstKind::Br { target } if *target == tail
        ));
        assert_eq!(f.predecessors(tail), vec![entry]);
        f.verify().unwrap();
    }

    #[test]
    fn test_create_block_before() {
        let (mut f, entry) = two_inst_function();
        let tail = f.split_block(entry, 0, "tail").unwrap();
        let mid = f.create_block_before("mid", tail).unwrap();
        assert_eq!(f.layout(), &[entry, mid, tail]);
        // The new block is empty until populated.
        assert!(f.verify().is_err());
        f.push_inst(mid, InstKind::Br { target: tail }, None).unwrap();
        f.replace_terminator(entry, InstKind::Br { target: mid })
            .unwrap();
        f.verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_dangling_operand() {
        let mut f = Function::new("f", vec![], IrType::Void);
        let entry = f.add_block("entry");
        f.push_inst(
            entry,
            InstKind::Store {
                value: Value::int(32, 1),
                ptr: Value::Inst(InstId::new(9)),
                ordering: AtomicOrdering::NotAtomic,
                align: 0,
            },
            None,
        )
        .unwrap();
        f.push_inst(entry, InstKind::Ret { value: None }, None)
            .unwrap();
        assert!(f.verify().is_err());
    }

    #[test]
    fn test_annotations() {
        let mut f = Function::new("f", vec![], IrType::Void);
        f.annotate("strenc");
        f.annotate("strcry_prob = 40");
        assert!(f.has_annotation("strenc"));
        assert_eq!(f.annotation_value("strcry_prob"), Some("40"));
        assert_eq!(f.annotation_value("missing"), None);
        assert!(f.is_declaration());
    }
}
