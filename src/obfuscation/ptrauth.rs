//! Signed-pointer records of rewritten wrappers.
//!
//! On targets with pointer authentication, the class field of a tagged
//! wrapper refers to a record in the `llvm.ptrauth` section whose address
//! discriminator is the wrapper itself:
//!
//! ```text
//! @wrapper = { ptr @record, i32 flags, ptr @data, i64 len }
//! @record  = { ptr @class, i32 key, i64 ptrtoint(@wrapper), i64 disc }   section "llvm.ptrauth"
//! ```
//!
//! A rewritten wrapper needs its own record pointing back at it. The two
//! originals reference each other, so the old record is detached once the
//! old wrapper has no other users, letting cleanup erase both.

use tracing::debug;

use crate::{
    ir::{Constant, GlobalFlags, GlobalId, GlobalUse, Module},
    obfuscation::classify::WRAPPER_CLASS_FIELD,
    Result,
};

/// Section holding signed-pointer records.
pub const PTRAUTH_SECTION: &str = "llvm.ptrauth";

/// Record field holding the address discriminator.
pub const ADDRESS_DISCRIMINATOR_FIELD: usize = 2;

const RECORD_ALIGN: u32 = 8;

/// A record cloned for a rewritten wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtrauthFix {
    /// The wrapper that was replaced.
    pub old_wrapper: GlobalId,
    /// The record signing the old wrapper.
    pub old_record: GlobalId,
    /// The record signing the new wrapper.
    pub new_record: GlobalId,
}

fn struct_field(init: &Constant, field: usize) -> Option<&Constant> {
    match init.strip_casts() {
        Constant::Struct { fields, .. } => fields.get(field),
        _ => None,
    }
}

fn with_field(init: &Constant, field: usize, value: Constant) -> Option<Constant> {
    match init.strip_casts() {
        Constant::Struct { ty, fields } if field < fields.len() => {
            let mut fields = fields.clone();
            fields[field] = value;
            Some(Constant::Struct {
                ty: ty.clone(),
                fields,
            })
        }
        _ => None,
    }
}

/// Gives `new_wrapper` its own signed-pointer record, if `old_wrapper` had one.
///
/// Returns `None` when the wrapper's class field is not a record signing the
/// old wrapper.
///
/// # Errors
///
/// Returns [`crate::Error::GlobalNotFound`] if a wrapper does not exist.
pub fn clone_record(
    module: &mut Module,
    old_wrapper: GlobalId,
    new_wrapper: GlobalId,
) -> Result<Option<PtrauthFix>> {
    let wrapper_init = module
        .try_global(new_wrapper)?
        .initializer
        .clone()
        .ok_or_else(|| invalid_ir!("rewritten wrapper {} has no initializer", new_wrapper))?;
    let Some(class_field) = struct_field(&wrapper_init, WRAPPER_CLASS_FIELD) else {
        return Ok(None);
    };
    let Some(old_record) = class_field.as_global() else {
        return Ok(None);
    };

    let record = module.try_global(old_record)?;
    let signs_old = record.section_name() == PTRAUTH_SECTION
        && record
            .initializer
            .as_ref()
            .and_then(|init| struct_field(init, ADDRESS_DISCRIMINATOR_FIELD))
            .is_some_and(|disc| disc.references(old_wrapper));
    if !signs_old {
        return Ok(None);
    }

    let mut cloned = record.clone();
    let Some(record_init) = cloned.initializer.as_ref() else {
        return Ok(None);
    };
    let discriminator = struct_field(record_init, ADDRESS_DISCRIMINATOR_FIELD)
        .and_then(|disc| disc.replace_globals(&|g| (g == old_wrapper).then_some(new_wrapper)));
    cloned.initializer = discriminator
        .and_then(|disc| with_field(record_init, ADDRESS_DISCRIMINATOR_FIELD, disc));
    if cloned.initializer.is_none() {
        return Ok(None);
    }
    cloned.flags |= GlobalFlags::ARTIFACT;
    cloned.align = RECORD_ALIGN;
    let new_record = module.add_global(cloned);

    let new_class = class_field
        .replace_globals(&|g| (g == old_record).then_some(new_record))
        .unwrap_or(Constant::Global(new_record));
    if let Some(global) = module.global_mut(new_wrapper) {
        global.initializer = with_field(&wrapper_init, WRAPPER_CLASS_FIELD, new_class);
    }

    debug!(record = %old_record, clone = %new_record, "signed-pointer record cloned");
    Ok(Some(PtrauthFix {
        old_wrapper,
        old_record,
        new_record,
    }))
}

/// Breaks the cycle between the old wrapper and its record once the record
/// is the wrapper's only user, so both can be erased.
///
/// Returns `true` if the record was detached.
pub fn detach_record(module: &mut Module, fix: &PtrauthFix) -> bool {
    let only_record = module
        .global_users(fix.old_wrapper)
        .iter()
        .all(|u| *u == GlobalUse::Initializer(fix.old_record));
    if !only_record {
        return false;
    }

    let Some(record) = module.global_mut(fix.old_record) else {
        return false;
    };
    let detached = record.initializer.as_ref().and_then(|init| {
        with_field(init, ADDRESS_DISCRIMINATOR_FIELD, Constant::int(64, 0))
    });
    match detached {
        Some(init) => {
            record.initializer = Some(init);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Global, IrType};

    fn record_type() -> IrType {
        IrType::anon_struct(vec![IrType::Ptr, IrType::I32, IrType::I64, IrType::I64])
    }

    fn wrapper_type() -> IrType {
        IrType::named_struct("w", vec![IrType::Ptr, IrType::I32, IrType::Ptr, IrType::I64])
    }

    #[test]
    fn test_clone_and_detach() {
        let mut module = Module::new("m");
        let class = module.add_global(Global::declaration("class", IrType::Ptr));
        let data = module.add_global(Global::new(".str", Constant::c_string("x")));
        let shadow = module.add_global(Global::new("DecryptSpace", Constant::c_string("y")));
        let old_wrapper = module.add_global(Global::new("w", Constant::Null));
        let record = module.add_global(
            Global::new(
                "class.ptrauth",
                Constant::Struct {
                    ty: record_type(),
                    fields: vec![
                        Constant::Global(class),
                        Constant::int(32, 2),
                        Constant::Global(old_wrapper).cast(),
                        Constant::int(64, 0),
                    ],
                },
            )
            .with_section(PTRAUTH_SECTION),
        );
        let wrapper_init = |data| Constant::Struct {
            ty: wrapper_type(),
            fields: vec![
                Constant::Global(record),
                Constant::int(32, 1992),
                Constant::Global(data),
                Constant::int(64, 1),
            ],
        };
        module.global_mut(old_wrapper).unwrap().initializer = Some(wrapper_init(data));
        let new_wrapper = module.add_global(Global::new("DecryptSpaceObjC", wrapper_init(shadow)));

        let fix = clone_record(&mut module, old_wrapper, new_wrapper)
            .unwrap()
            .unwrap();
        let new_record = module.global(fix.new_record).unwrap();
        assert_eq!(new_record.section_name(), PTRAUTH_SECTION);
        assert!(new_record.is_artifact());
        let init = new_record.initializer.as_ref().unwrap();
        assert_eq!(
            struct_field(init, ADDRESS_DISCRIMINATOR_FIELD),
            Some(&Constant::Global(new_wrapper).cast())
        );
        let wrapper = module.global(new_wrapper).unwrap().initializer.as_ref().unwrap();
        assert_eq!(
            struct_field(wrapper, WRAPPER_CLASS_FIELD),
            Some(&Constant::Global(fix.new_record))
        );

        assert!(detach_record(&mut module, &fix));
        assert_eq!(module.use_count(old_wrapper), 0);
        assert!(!module
            .global(record)
            .unwrap()
            .initializer
            .as_ref()
            .unwrap()
            .references(old_wrapper));
    }

    #[test]
    fn test_unsigned_class_is_ignored() {
        let mut module = Module::new("m");
        let class = module.add_global(Global::declaration("class", IrType::Ptr));
        let init = Constant::Struct {
            ty: wrapper_type(),
            fields: vec![Constant::Global(class), Constant::int(32, 0), Constant::Null, Constant::int(64, 0)],
        };
        let old = module.add_global(Global::new("w", init.clone()));
        let new = module.add_global(Global::new("w2", init));
        assert_eq!(clone_record(&mut module, old, new).unwrap(), None);
    }
}
