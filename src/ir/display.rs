//! Textual rendering of modules and functions.
//!
//! The format is LLVM-flavoured and meant for debugging and test failure
//! output; there is no parser for it. Globals are printed by id with their
//! symbol name in a trailing comment, because initializers refer to globals
//! by id.

use std::fmt;

use crate::ir::{Function, Global, InstKind, Instruction, Module};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name())?;
        if !self.target().triple.is_empty() {
            writeln!(f, "target triple = \"{}\"", self.target().triple)?;
        }
        for (id, global) in self.globals() {
            writeln!(f, "{id} = {global}")?;
        }
        if !self.compiler_used().is_empty() {
            let used: Vec<String> = self.compiler_used().iter().map(ToString::to_string).collect();
            writeln!(f, "compiler.used = [{}]", used.join(", "))?;
        }
        for (_, function) in self.functions() {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.linkage)?;
        if self.thread_local {
            f.write_str("thread_local ")?;
        }
        f.write_str(if self.is_constant { "constant " } else { "global " })?;
        match &self.initializer {
            Some(init) => write!(f, "{init}")?,
            None => write!(f, "{}", self.value_type)?,
        }
        if let Some(section) = &self.section {
            write!(f, ", section \"{section}\"")?;
        }
        if self.align != 0 {
            write!(f, ", align {}", self.align)?;
        }
        write!(f, " ; {}", self.name)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params()
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{ty} %arg{i}"))
            .collect();
        let keyword = if self.is_declaration() { "declare" } else { "define" };
        write!(
            f,
            "{keyword} {} {} @{}({})",
            self.linkage(),
            self.ret(),
            self.name(),
            params.join(", ")
        )?;
        for annotation in self.annotations() {
            write!(f, " #\"{annotation}\"")?;
        }
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for block in self.blocks() {
            writeln!(f, "{}:", block.name())?;
            for id in block.insts() {
                if let Some(inst) = self.inst(*id) {
                    writeln!(f, "  {}", DisplayInst(self, inst))?;
                }
            }
        }
        writeln!(f, "}}")
    }
}

struct DisplayInst<'a>(&'a Function, &'a Instruction);

impl DisplayInst<'_> {
    fn label(&self, block: crate::ir::BlockId) -> String {
        self.0
            .block(block)
            .map_or_else(|| block.to_string(), |b| format!("%{}", b.name()))
    }
}

impl fmt::Display for DisplayInst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inst = self.1;
        if inst.kind().has_result() {
            write!(f, "{}", inst.id())?;
            if let Some(name) = inst.name() {
                write!(f, " ({name})")?;
            }
            f.write_str(" = ")?;
        }
        match inst.kind() {
            InstKind::Alloca { ty } => write!(f, "alloca {ty}"),
            InstKind::Load {
                ty,
                ptr,
                ordering,
                align,
            } => {
                if ordering.is_atomic() {
                    write!(f, "load atomic {ty}, {ptr} {ordering}, align {align}")
                } else {
                    write!(f, "load {ty}, {ptr}")
                }
            }
            InstKind::Store {
                value,
                ptr,
                ordering,
                align,
            } => {
                if ordering.is_atomic() {
                    write!(f, "store atomic {value}, {ptr} {ordering}, align {align}")
                } else {
                    write!(f, "store {value}, {ptr}")
                }
            }
            InstKind::ElementPtr { elem, base, index } => {
                write!(f, "getelementptr {elem}, {base}, {index}")
            }
            InstKind::FieldPtr { ty, base, field } => {
                write!(f, "getelementptr {ty}, {base}, field {field}")
            }
            InstKind::Binary { op, ty, lhs, rhs } => write!(f, "{op} {ty} {lhs}, {rhs}"),
            InstKind::ICmp { pred, lhs, rhs } => write!(f, "icmp {pred} {lhs}, {rhs}"),
            InstKind::Call { callee, ret, args } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "call {ret} @{callee}({})", args.join(", "))
            }
            InstKind::Br { target } => write!(f, "br label {}", self.label(*target)),
            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            } => write!(
                f,
                "br {cond}, label {}, label {}",
                self.label(*then_block),
                self.label(*else_block)
            ),
            InstKind::Ret { value: Some(v) } => write!(f, "ret {v}"),
            InstKind::Ret { value: None } => f.write_str("ret void"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{AtomicOrdering, Constant, Global, IrType, ModuleBuilder, Value};

    #[test]
    fn test_print_module() {
        let mut mb = ModuleBuilder::new("m");
        let s = mb.global(Global::new(".str", Constant::c_string("Hi")));
        mb.function("f", vec![], IrType::I8, |fb| {
            let v = fb
                .ins()
                .named("status")
                .load_atomic(IrType::I8, Value::global(s), AtomicOrdering::Acquire, 1)?;
            fb.ins().ret(Some(v))?;
            Ok(())
        })
        .unwrap();
        let text = mb.finish().to_string();

        assert!(text.contains("@g0 = private constant [i8 72, i8 105, i8 0] ; .str"));
        assert!(text.contains("load atomic i8, ptr @g0 acquire, align 1"));
        assert!(text.contains("(status)"));
        assert!(text.contains("define external i8 @f()"));
    }
}
