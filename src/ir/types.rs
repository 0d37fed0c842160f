//! IR value types and integer element widths.

use std::fmt;

use strum::{Display, EnumIter};

/// Type of an IR value, global or constant.
///
/// Layout is packed: integers occupy `ceil(bits / 8)` bytes, pointers 8 bytes,
/// and aggregates are the plain concatenation of their members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    /// No value (function results only).
    Void,
    /// Integer of arbitrary bit width.
    Int(u32),
    /// IEEE float of the given bit width.
    Float(u32),
    /// Opaque pointer.
    Ptr,
    /// Fixed-length array.
    Array {
        /// Element type.
        elem: Box<IrType>,
        /// Number of elements.
        len: usize,
    },
    /// Structure, optionally named.
    Struct {
        /// Type name (e.g. `struct.__NSConstantString_tag`).
        name: Option<String>,
        /// Member types in declaration order.
        fields: Vec<IrType>,
    },
}

impl IrType {
    /// 8-bit integer.
    pub const I8: IrType = IrType::Int(8);
    /// 16-bit integer.
    pub const I16: IrType = IrType::Int(16);
    /// 32-bit integer.
    pub const I32: IrType = IrType::Int(32);
    /// 64-bit integer.
    pub const I64: IrType = IrType::Int(64);
    /// 1-bit boolean.
    pub const I1: IrType = IrType::Int(1);

    /// Creates an array type.
    #[must_use]
    pub fn array(elem: IrType, len: usize) -> Self {
        IrType::Array {
            elem: Box::new(elem),
            len,
        }
    }

    /// Creates a named struct type.
    #[must_use]
    pub fn named_struct(name: impl Into<String>, fields: Vec<IrType>) -> Self {
        IrType::Struct {
            name: Some(name.into()),
            fields,
        }
    }

    /// Creates an anonymous struct type.
    #[must_use]
    pub fn anon_struct(fields: Vec<IrType>) -> Self {
        IrType::Struct { name: None, fields }
    }

    /// Size of the type in bytes under the packed layout.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        match self {
            IrType::Void => 0,
            IrType::Int(bits) | IrType::Float(bits) => (*bits as usize).div_ceil(8),
            IrType::Ptr => 8,
            IrType::Array { elem, len } => elem.size_in_bytes() * len,
            IrType::Struct { fields, .. } => fields.iter().map(IrType::size_in_bytes).sum(),
        }
    }

    /// Byte offset of struct member `field`, or `None` if this is not a struct
    /// or the member does not exist.
    #[must_use]
    pub fn field_offset(&self, field: usize) -> Option<usize> {
        match self {
            IrType::Struct { fields, .. } if field < fields.len() => {
                Some(fields[..field].iter().map(IrType::size_in_bytes).sum())
            }
            _ => None,
        }
    }

    /// Returns the bit width if this is an integer type.
    #[must_use]
    pub fn int_bits(&self) -> Option<u32> {
        match self {
            IrType::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    /// Returns `true` for integer types.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, IrType::Int(_))
    }

    /// Returns the struct name, if this is a named struct.
    #[must_use]
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            IrType::Struct { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => f.write_str("void"),
            IrType::Int(bits) => write!(f, "i{bits}"),
            IrType::Float(32) => f.write_str("float"),
            IrType::Float(64) => f.write_str("double"),
            IrType::Float(bits) => write!(f, "f{bits}"),
            IrType::Ptr => f.write_str("ptr"),
            IrType::Array { elem, len } => write!(f, "[{len} x {elem}]"),
            IrType::Struct {
                name: Some(name), ..
            } => write!(f, "%{name}"),
            IrType::Struct { name: None, fields } => {
                f.write_str("{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

/// Integer element widths the protection passes can transform.
///
/// Raw sequences with any other element width are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum IntWidth {
    /// 8-bit elements (byte strings).
    #[strum(serialize = "i8")]
    W8,
    /// 16-bit elements (UTF-16 strings).
    #[strum(serialize = "i16")]
    W16,
    /// 32-bit elements.
    #[strum(serialize = "i32")]
    W32,
    /// 64-bit elements.
    #[strum(serialize = "i64")]
    W64,
}

impl IntWidth {
    /// Maps a bit count to a supported width.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::W8),
            16 => Some(Self::W16),
            32 => Some(Self::W32),
            64 => Some(Self::W64),
            _ => None,
        }
    }

    /// Number of bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// Number of bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Mask selecting the low `bits()` bits of a `u64`.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::W64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    /// The IR integer type of this width.
    #[must_use]
    pub const fn ir_type(self) -> IrType {
        IrType::Int(self.bits())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_packed_layout() {
        let wrapper = IrType::named_struct(
            "struct.__NSConstantString_tag",
            vec![IrType::Ptr, IrType::I32, IrType::Ptr, IrType::I64],
        );
        assert_eq!(wrapper.size_in_bytes(), 28);
        assert_eq!(wrapper.field_offset(2), Some(12));
        assert_eq!(wrapper.field_offset(4), None);
        assert_eq!(IrType::array(IrType::I16, 5).size_in_bytes(), 10);
        assert_eq!(IrType::I1.size_in_bytes(), 1);
    }

    #[test]
    fn test_int_width_masks() {
        for width in IntWidth::iter() {
            assert_eq!(IntWidth::from_bits(width.bits()), Some(width));
            assert_eq!(width.mask().count_ones(), width.bits());
        }
        assert_eq!(IntWidth::from_bits(24), None);
        assert_eq!(IntWidth::W16.to_string(), "i16");
    }

    #[test]
    fn test_type_display() {
        assert_eq!(IrType::array(IrType::I8, 6).to_string(), "[6 x i8]");
        assert_eq!(
            IrType::anon_struct(vec![IrType::Ptr, IrType::I32]).to_string(),
            "{ ptr, i32 }"
        );
    }
}
