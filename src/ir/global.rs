//! Module-scoped global variables.

use bitflags::bitflags;
use strum::{Display, EnumString};

use crate::ir::{Constant, IrType};

/// Linkage visibility of a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Linkage {
    /// Visible to other modules.
    External,
    /// Only visible inside the module, not even in the symbol table.
    Private,
    /// Only visible inside the module.
    Internal,
    /// Merged with same-named definitions at link time.
    #[strum(serialize = "linkonce")]
    LinkOnce,
    /// May be overridden by a strong definition.
    Weak,
    /// Tentative definition.
    Common,
}

impl Linkage {
    /// Returns `true` for linkages invisible outside of the module.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Private | Self::Internal)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    /// Bookkeeping flags attached to a global.
    pub struct GlobalFlags: u32 {
        /// The global was produced by a protection pass (blob, shadow buffer,
        /// rewritten wrapper). Never eligible for protection again.
        const ARTIFACT = 0x0001;
        /// The global is a per-function decryption guard.
        const GUARD = 0x0002;
    }
}

/// A global variable.
#[derive(Debug, Clone)]
pub struct Global {
    /// Symbol name (unique within the module).
    pub name: String,
    /// Type of the stored value.
    pub value_type: IrType,
    /// Linkage visibility.
    pub linkage: Linkage,
    /// Object file section, if any.
    pub section: Option<String>,
    /// Initializer; `None` for declarations.
    pub initializer: Option<Constant>,
    /// Whether the storage is immutable.
    pub is_constant: bool,
    /// Whether the storage is thread local.
    pub thread_local: bool,
    /// Alignment in bytes (0 = natural).
    pub align: u32,
    /// Bookkeeping flags.
    pub flags: GlobalFlags,
}

impl Global {
    /// Creates a private constant global with the given initializer.
    #[must_use]
    pub fn new(name: impl Into<String>, initializer: Constant) -> Self {
        Self {
            name: name.into(),
            value_type: initializer.ty(),
            linkage: Linkage::Private,
            section: None,
            initializer: Some(initializer),
            is_constant: true,
            thread_local: false,
            align: 0,
            flags: GlobalFlags::empty(),
        }
    }

    /// Creates an external declaration without initializer.
    #[must_use]
    pub fn declaration(name: impl Into<String>, value_type: IrType) -> Self {
        Self {
            name: name.into(),
            value_type,
            linkage: Linkage::External,
            section: None,
            initializer: None,
            is_constant: false,
            thread_local: false,
            align: 0,
            flags: GlobalFlags::empty(),
        }
    }

    /// Sets the linkage.
    #[must_use]
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Sets the section.
    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Sets the constness.
    #[must_use]
    pub fn with_constant(mut self, is_constant: bool) -> Self {
        self.is_constant = is_constant;
        self
    }

    /// Sets the bookkeeping flags.
    #[must_use]
    pub fn with_flags(mut self, flags: GlobalFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the alignment.
    #[must_use]
    pub fn with_align(mut self, align: u32) -> Self {
        self.align = align;
        self
    }

    /// Returns the section name or an empty string.
    #[must_use]
    pub fn section_name(&self) -> &str {
        self.section.as_deref().unwrap_or("")
    }

    /// Returns `true` if the global was produced by a protection pass.
    #[must_use]
    pub fn is_artifact(&self) -> bool {
        self.flags.contains(GlobalFlags::ARTIFACT)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_linkage_names() {
        assert_eq!(Linkage::Private.to_string(), "private");
        assert_eq!(Linkage::from_str("linkonce").ok(), Some(Linkage::LinkOnce));
        assert!(Linkage::Internal.is_local());
        assert!(!Linkage::Weak.is_local());
    }

    #[test]
    fn test_new_global_infers_type() {
        let global = Global::new(".str", Constant::c_string("hi"));
        assert_eq!(global.value_type, IrType::array(IrType::I8, 3));
        assert!(global.is_constant);
        assert!(!global.is_artifact());
    }
}
