//! Constant value trees used for global initializers and immediate operands.

use std::fmt;

use crate::ir::{GlobalId, IrType};

/// A constant value.
///
/// Initializers are trees: aggregates nest other constants, and
/// [`Constant::Global`] leaves refer to other globals by id. Pointer casts are
/// modelled by [`Constant::Cast`] and are transparent for classification,
/// see [`Constant::strip_casts`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Integer of `bits` width; `value` holds the zero-extended bit pattern.
    Int {
        /// Bit width.
        bits: u32,
        /// Zero-extended value.
        value: u64,
    },
    /// Null pointer.
    Null,
    /// All-zero value of the given type (`zeroinitializer`).
    Zero(IrType),
    /// Raw element sequence (byte strings, UTF-16 strings, integer tables, ...).
    ///
    /// Float elements are stored as their bit patterns.
    Data {
        /// Element type.
        elem: IrType,
        /// Element bit patterns, zero-extended to 64 bits.
        elements: Vec<u64>,
    },
    /// Structure aggregate.
    Struct {
        /// Struct type.
        ty: IrType,
        /// Member values.
        fields: Vec<Constant>,
    },
    /// Array aggregate with non-raw elements.
    Array {
        /// Element type.
        elem: IrType,
        /// Element values.
        elements: Vec<Constant>,
    },
    /// Address of a global.
    Global(GlobalId),
    /// Pointer cast of another constant (bitcast / zero-offset GEP).
    Cast(Box<Constant>),
}

impl Constant {
    /// Creates an integer constant, truncating `value` to `bits`.
    #[must_use]
    pub fn int(bits: u32, value: u64) -> Self {
        let value = if bits >= 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        };
        Constant::Int { bits, value }
    }

    /// Creates an `i8` array from a byte string.
    #[must_use]
    pub fn bytes(data: &[u8]) -> Self {
        Constant::Data {
            elem: IrType::I8,
            elements: data.iter().map(|b| u64::from(*b)).collect(),
        }
    }

    /// Creates a NUL-terminated `i8` array from a string.
    #[must_use]
    pub fn c_string(text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self::bytes(&data)
    }

    /// Creates a raw integer sequence of the given element bit width.
    #[must_use]
    pub fn data(bits: u32, elements: Vec<u64>) -> Self {
        Constant::Data {
            elem: IrType::Int(bits),
            elements,
        }
    }

    /// Wraps this constant in a pointer cast.
    #[must_use]
    pub fn cast(self) -> Self {
        Constant::Cast(Box::new(self))
    }

    /// Peels all pointer cast wrappers.
    #[must_use]
    pub fn strip_casts(&self) -> &Constant {
        let mut current = self;
        while let Constant::Cast(inner) = current {
            current = inner;
        }
        current
    }

    /// Returns the referenced global if this constant is a (possibly cast)
    /// global address.
    #[must_use]
    pub fn as_global(&self) -> Option<GlobalId> {
        match self.strip_casts() {
            Constant::Global(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the type of this constant.
    ///
    /// Global addresses and casts are pointers.
    #[must_use]
    pub fn ty(&self) -> IrType {
        match self {
            Constant::Int { bits, .. } => IrType::Int(*bits),
            Constant::Null | Constant::Global(_) | Constant::Cast(_) => IrType::Ptr,
            Constant::Zero(ty) | Constant::Struct { ty, .. } => ty.clone(),
            Constant::Data { elem, elements } => IrType::array(elem.clone(), elements.len()),
            Constant::Array { elem, elements } => IrType::array(elem.clone(), elements.len()),
        }
    }

    /// Returns `true` if the constant is entirely zero / null.
    ///
    /// Such initializers carry no information worth protecting.
    #[must_use]
    pub fn is_null_value(&self) -> bool {
        match self {
            Constant::Int { value, .. } => *value == 0,
            Constant::Null | Constant::Zero(_) => true,
            Constant::Data { elements, .. } => elements.iter().all(|e| *e == 0),
            Constant::Struct { fields, .. } => fields.iter().all(Constant::is_null_value),
            Constant::Array { elements, .. } => elements.iter().all(Constant::is_null_value),
            Constant::Global(_) => false,
            Constant::Cast(inner) => inner.is_null_value(),
        }
    }

    /// Calls `f` for every global referenced anywhere in the tree.
    pub fn for_each_global(&self, f: &mut impl FnMut(GlobalId)) {
        match self {
            Constant::Global(id) => f(*id),
            Constant::Cast(inner) => inner.for_each_global(f),
            Constant::Struct { fields, .. } => {
                for field in fields {
                    field.for_each_global(f);
                }
            }
            Constant::Array { elements, .. } => {
                for element in elements {
                    element.for_each_global(f);
                }
            }
            Constant::Int { .. } | Constant::Null | Constant::Zero(_) | Constant::Data { .. } => {}
        }
    }

    /// Returns `true` if `global` is referenced anywhere in the tree.
    #[must_use]
    pub fn references(&self, global: GlobalId) -> bool {
        let mut found = false;
        self.for_each_global(&mut |id| found |= id == global);
        found
    }

    /// Returns a copy of the tree with every reference to a key of `map`
    /// redirected to the corresponding value. Cast wrappers are preserved.
    ///
    /// Returns `None` when nothing was replaced.
    #[must_use]
    pub fn replace_globals(&self, map: &impl Fn(GlobalId) -> Option<GlobalId>) -> Option<Constant> {
        match self {
            Constant::Global(id) => map(*id).map(Constant::Global),
            Constant::Cast(inner) => inner.replace_globals(map).map(Constant::cast),
            Constant::Struct { ty, fields } => {
                replace_all(fields, map).map(|fields| Constant::Struct {
                    ty: ty.clone(),
                    fields,
                })
            }
            Constant::Array { elem, elements } => {
                replace_all(elements, map).map(|elements| Constant::Array {
                    elem: elem.clone(),
                    elements,
                })
            }
            Constant::Int { .. } | Constant::Null | Constant::Zero(_) | Constant::Data { .. } => {
                None
            }
        }
    }
}

fn replace_all(
    items: &[Constant],
    map: &impl Fn(GlobalId) -> Option<GlobalId>,
) -> Option<Vec<Constant>> {
    let replaced: Vec<Option<Constant>> = items.iter().map(|c| c.replace_globals(map)).collect();
    if replaced.iter().all(Option::is_none) {
        return None;
    }

    Some(
        replaced
            .into_iter()
            .zip(items)
            .map(|(new, old)| new.unwrap_or_else(|| old.clone()))
            .collect(),
    )
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { bits, value } => write!(f, "i{bits} {value}"),
            Constant::Null => f.write_str("ptr null"),
            Constant::Zero(ty) => write!(f, "{ty} zeroinitializer"),
            Constant::Data { elem, elements } => {
                if *elem == IrType::I8 && elements.iter().all(|e| (0x20..0x7f).contains(e)) {
                    let text: String = elements.iter().map(|e| char::from(*e as u8)).collect();
                    return write!(f, "c\"{text}\"");
                }
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{elem} {e}")?;
                }
                write!(f, "]")
            }
            Constant::Struct { ty, fields } => {
                write!(f, "{ty} {{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(" }")
            }
            Constant::Array { elem, elements } => {
                write!(f, "[{} x {elem}] [", elements.len())?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
            Constant::Global(id) => write!(f, "ptr {id}"),
            Constant::Cast(inner) => write!(f, "cast ({inner})"),
        }
    }
}
