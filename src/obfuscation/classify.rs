//! Global classification.
//!
//! [`Classifier::classify`] decides whether a global may be protected while
//! processing one function, and what shape its initializer has. It is a pure
//! function of the module: globals found inside the initializer are returned
//! in [`Classification::discovered`] for the closure builder to merge.

use std::collections::BTreeSet;

use strum::{Display, IntoStaticStr};

use crate::ir::{Constant, FunctionId, Global, GlobalId, IntWidth, Module};

/// Field of a tagged wrapper that points at its character data.
pub const WRAPPER_DATA_FIELD: usize = 2;

/// Field of a tagged wrapper holding the class pointer.
pub const WRAPPER_CLASS_FIELD: usize = 0;

/// Shape of an eligible global's initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Tagged wrapper struct whose data field points at `data`.
    Wrapper {
        /// The raw sequence the wrapper refers to.
        data: GlobalId,
    },
    /// Raw integer sequence. `None` for element widths the encoder rejects.
    Raw(Option<IntWidth>),
    /// Struct aggregate.
    Struct,
    /// Array aggregate of non-raw elements.
    Array,
    /// A (possibly cast) address of another global.
    Pointer,
    /// Anything else (scalars, floats, null pointers).
    Opaque,
}

/// Why a global was not eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Ineligibility {
    /// Declaration without initializer.
    NoInitializer,
    /// Lives in a section reserved for metadata or runtime objects.
    ReservedSection,
    /// Produced by an earlier protection run.
    Artifact,
    /// Visible outside of the module.
    Linkage,
    /// Used by other functions while sharing is conservative.
    Shared,
}

/// The verdict on one global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// May be protected.
    Eligible(Shape),
    /// Must be left alone.
    Ineligible(Ineligibility),
}

/// Verdict plus the globals the initializer refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Eligibility and shape.
    pub verdict: Verdict,
    /// Globals referenced by the initializer; empty for ineligible globals.
    pub discovered: BTreeSet<GlobalId>,
}

impl Classification {
    fn ineligible(reason: Ineligibility) -> Self {
        Self {
            verdict: Verdict::Ineligible(reason),
            discovered: BTreeSet::new(),
        }
    }

    /// Returns the shape of an eligible global.
    #[must_use]
    pub fn shape(&self) -> Option<Shape> {
        match self.verdict {
            Verdict::Eligible(shape) => Some(shape),
            Verdict::Ineligible(_) => None,
        }
    }
}

/// Classifies globals on behalf of one function.
pub struct Classifier<'a> {
    module: &'a Module,
    function: FunctionId,
    permissive: bool,
    wrapper_type: &'a str,
}

impl<'a> Classifier<'a> {
    /// Creates a classifier for `function`.
    #[must_use]
    pub fn new(
        module: &'a Module,
        function: FunctionId,
        permissive: bool,
        wrapper_type: &'a str,
    ) -> Self {
        Self {
            module,
            function,
            permissive,
            wrapper_type,
        }
    }

    /// Checks eligibility without looking at the shape.
    ///
    /// # Errors
    ///
    /// Returns the first reason the global cannot be protected.
    pub fn eligibility(&self, global: &Global, id: GlobalId) -> Result<(), Ineligibility> {
        if global.initializer.is_none() {
            return Err(Ineligibility::NoInitializer);
        }
        if is_reserved(global) {
            return Err(Ineligibility::ReservedSection);
        }
        if global.is_artifact() {
            return Err(Ineligibility::Artifact);
        }
        if !global.linkage.is_local() {
            return Err(Ineligibility::Linkage);
        }
        if !self.permissive && !self.is_confined(id) {
            return Err(Ineligibility::Shared);
        }
        Ok(())
    }

    /// Uses of `id` resolve to this function only.
    fn is_confined(&self, id: GlobalId) -> bool {
        self.module
            .functions_using(id)
            .is_some_and(|users| users.iter().all(|f| *f == self.function))
    }

    /// Classifies a global. Unknown ids are reported as declarations.
    #[must_use]
    pub fn classify(&self, id: GlobalId) -> Classification {
        let Some(global) = self.module.global(id) else {
            return Classification::ineligible(Ineligibility::NoInitializer);
        };
        if let Err(reason) = self.eligibility(global, id) {
            return Classification::ineligible(reason);
        }
        let Some(init) = global.initializer.as_ref() else {
            return Classification::ineligible(Ineligibility::NoInitializer);
        };

        let mut discovered = BTreeSet::new();
        init.for_each_global(&mut |g| {
            if g != id {
                discovered.insert(g);
            }
        });

        Classification {
            verdict: Verdict::Eligible(self.shape_of(init)),
            discovered,
        }
    }

    fn shape_of(&self, init: &Constant) -> Shape {
        match init.strip_casts() {
            Constant::Struct { ty, fields } if ty.struct_name() == Some(self.wrapper_type) => fields
                .get(WRAPPER_DATA_FIELD)
                .and_then(Constant::as_global)
                .map_or(Shape::Struct, |data| Shape::Wrapper { data }),
            Constant::Data { elem, .. } if elem.is_integer() => {
                Shape::Raw(elem.int_bits().and_then(IntWidth::from_bits))
            }
            Constant::Struct { .. } => Shape::Struct,
            Constant::Array { .. } => Shape::Array,
            Constant::Global(_) => Shape::Pointer,
            _ => Shape::Opaque,
        }
    }
}

/// Metadata, Objective-C runtime structures and anything the runtime parses.
fn is_reserved(global: &Global) -> bool {
    let section = global.section_name();
    section.starts_with("llvm.")
        || (section.contains("__objc") && !section.contains("array"))
        || global.name.contains("OBJC")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GlobalFlags, IrType, Linkage, ModuleBuilder, Value};

    struct Fixture {
        module: Module,
        f: FunctionId,
        g: FunctionId,
        raw: GlobalId,
        shared: GlobalId,
        wrapper: GlobalId,
        table: GlobalId,
    }

    fn wrapper_type() -> IrType {
        IrType::named_struct(
            "struct.__NSConstantString_tag",
            vec![IrType::Ptr, IrType::I32, IrType::Ptr, IrType::I64],
        )
    }

    fn fixture() -> Fixture {
        let mut mb = ModuleBuilder::new("m");
        let class = mb.global(Global::declaration("__CFConstantStringClassReference", IrType::Ptr));
        let raw = mb.global(Global::new(".str", Constant::c_string("hello")));
        let shared = mb.global(Global::new(".str.shared", Constant::c_string("both")));
        let wrapper = mb.global(Global::new(
            "_unnamed_cfstring_",
            Constant::Struct {
                ty: wrapper_type(),
                fields: vec![
                    Constant::Global(class),
                    Constant::int(32, 1992),
                    Constant::Global(raw).cast(),
                    Constant::int(64, 5),
                ],
            },
        ));
        let table = mb.global(Global::new(
            "table",
            Constant::Array {
                elem: IrType::Ptr,
                elements: vec![Constant::Global(shared), Constant::Null],
            },
        ));
        let f = mb
            .function("f", vec![], IrType::Ptr, |fb| {
                fb.ins().load(IrType::Ptr, Value::global(table))?;
                fb.ins().ret(Some(Value::global(wrapper)))?;
                Ok(())
            })
            .unwrap();
        let g = mb
            .function("g", vec![], IrType::Ptr, |fb| {
                fb.ins().ret(Some(Value::global(shared)))?;
                Ok(())
            })
            .unwrap();
        Fixture {
            module: mb.finish(),
            f,
            g,
            raw,
            shared,
            wrapper,
            table,
        }
    }

    #[test]
    fn test_shapes() {
        let fx = fixture();
        let classifier = Classifier::new(&fx.module, fx.f, false, "struct.__NSConstantString_tag");

        let wrapper = classifier.classify(fx.wrapper);
        assert_eq!(wrapper.shape(), Some(Shape::Wrapper { data: fx.raw }));
        assert!(wrapper.discovered.contains(&fx.raw));
        assert_eq!(wrapper.discovered.len(), 2);

        assert_eq!(
            classifier.classify(fx.raw).shape(),
            Some(Shape::Raw(Some(IntWidth::W8)))
        );
        let table = classifier.classify(fx.table);
        assert_eq!(table.shape(), Some(Shape::Array));
        assert_eq!(table.discovered, BTreeSet::from([fx.shared]));
    }

    #[test]
    fn test_sharing_rules() {
        let fx = fixture();
        let conservative = Classifier::new(&fx.module, fx.f, false, "x");
        assert_eq!(
            conservative.classify(fx.shared).verdict,
            Verdict::Ineligible(Ineligibility::Shared)
        );
        let permissive = Classifier::new(&fx.module, fx.g, true, "x");
        assert!(permissive.classify(fx.shared).shape().is_some());
    }

    #[test]
    fn test_ineligible_reasons() {
        let mut fx = fixture();
        let classifier_reason = |module: &Module, id| {
            Classifier::new(module, FunctionId::new(0), true, "x")
                .classify(id)
                .verdict
        };

        fx.module.global_mut(fx.raw).unwrap().linkage = Linkage::External;
        assert_eq!(
            classifier_reason(&fx.module, fx.raw),
            Verdict::Ineligible(Ineligibility::Linkage)
        );

        fx.module.global_mut(fx.raw).unwrap().flags = GlobalFlags::ARTIFACT;
        assert_eq!(
            classifier_reason(&fx.module, fx.raw),
            Verdict::Ineligible(Ineligibility::Artifact)
        );

        let meta = fx
            .module
            .add_global(Global::new("meta", Constant::c_string("x")).with_section("llvm.metadata"));
        assert_eq!(
            classifier_reason(&fx.module, meta),
            Verdict::Ineligible(Ineligibility::ReservedSection)
        );
        let objc = fx.module.add_global(
            Global::new("sel", Constant::c_string("x")).with_section("__DATA,__objc_selrefs"),
        );
        assert_eq!(
            classifier_reason(&fx.module, objc),
            Verdict::Ineligible(Ineligibility::ReservedSection)
        );
        let objc_array = fx.module.add_global(
            Global::new("arr", Constant::c_string("x")).with_section("__DATA,__objc_arraydata"),
        );
        assert!(matches!(
            classifier_reason(&fx.module, objc_array),
            Verdict::Eligible(Shape::Raw(_))
        ));
        assert_eq!(Ineligibility::ReservedSection.to_string(), "reserved-section");
    }
}
