//! Datatype queries shared by the rest of the crate.
//!
//! [`DType`] is the datatype model of `h5composites-format`; this module
//! adds class queries and helpers through the [`DTypeExt`] extension trait.

use h5composites_format::datatype::{CompoundMember, Datatype, VlenKind};
use h5composites_format::type_builders::CompoundTypeBuilder;

use crate::error::{Error, Result};

/// An HDF5 datatype.
pub type DType = Datatype;

/// HDF5 datatype class, as the HDF5 library reports it.
///
/// Variable-length strings report [`DTypeClass::String`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DTypeClass {
    Integer,
    Float,
    String,
    Bitfield,
    Opaque,
    Compound,
    Enum,
    VarLen,
    Array,
}

/// Extra queries on [`DType`].
pub trait DTypeExt {
    fn class(&self) -> DTypeClass;

    /// One unsigned byte holding a single bit.
    fn is_bool(&self) -> bool;

    /// Integer or floating point, but not a boolean.
    fn is_numeric(&self) -> bool;

    /// Equal to one of the native integer or float types.
    fn is_native_numeric(&self) -> bool;

    /// Fixed or variable-length string.
    fn is_string(&self) -> bool;

    /// Anything but strings, compounds, sequences and arrays.
    fn is_atomic(&self) -> bool;

    /// Base type of an enumeration, sequence or array.
    fn super_type(&self) -> Option<&DType>;

    fn array_dims(&self) -> Option<&[u32]>;

    /// Number of base elements in an array.
    fn array_len(&self) -> Option<u64>;

    fn members(&self) -> &[CompoundMember];

    fn member_names(&self) -> Vec<&str> {
        self.members().iter().map(|m| m.name.as_str()).collect()
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        self.members().iter().position(|m| m.name == name)
    }

    fn member_named(&self, name: &str) -> Option<&CompoundMember> {
        self.members().iter().find(|m| m.name == name)
    }

    fn size(&self) -> usize;
}

impl DTypeExt for Datatype {
    fn class(&self) -> DTypeClass {
        match self {
            Datatype::FixedPoint { .. } => DTypeClass::Integer,
            Datatype::FloatingPoint { .. } => DTypeClass::Float,
            Datatype::String { .. } => DTypeClass::String,
            Datatype::BitField { .. } => DTypeClass::Bitfield,
            Datatype::Opaque { .. } => DTypeClass::Opaque,
            Datatype::Compound { .. } => DTypeClass::Compound,
            Datatype::Enumeration { .. } => DTypeClass::Enum,
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => DTypeClass::String,
            Datatype::VariableLength { .. } => DTypeClass::VarLen,
            Datatype::Array { .. } => DTypeClass::Array,
        }
    }

    fn is_bool(&self) -> bool {
        matches!(
            self,
            Datatype::FixedPoint {
                size: 1,
                signed: false,
                bit_precision: 1,
                ..
            }
        )
    }

    fn is_numeric(&self) -> bool {
        matches!(self.class(), DTypeClass::Integer | DTypeClass::Float) && !self.is_bool()
    }

    fn is_native_numeric(&self) -> bool {
        native_numeric_types().iter().any(|t| t == self)
    }

    fn is_string(&self) -> bool {
        self.class() == DTypeClass::String
    }

    fn is_atomic(&self) -> bool {
        !matches!(
            self.class(),
            DTypeClass::String | DTypeClass::Compound | DTypeClass::VarLen | DTypeClass::Array
        )
    }

    fn super_type(&self) -> Option<&DType> {
        match self {
            Datatype::Enumeration { base_type, .. }
            | Datatype::Array { base_type, .. }
            | Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type,
            } => Some(base_type),
            _ => None,
        }
    }

    fn array_dims(&self) -> Option<&[u32]> {
        match self {
            Datatype::Array { dimensions, .. } => Some(dimensions),
            _ => None,
        }
    }

    fn array_len(&self) -> Option<u64> {
        self.array_dims()
            .map(|d| d.iter().map(|&v| v as u64).product())
    }

    fn members(&self) -> &[CompoundMember] {
        match self {
            Datatype::Compound { members, .. } => members,
            _ => &[],
        }
    }

    fn size(&self) -> usize {
        self.type_size() as usize
    }
}

/// Native numeric types in the order used to pick common super types.
pub fn native_numeric_types() -> [DType; 10] {
    [
        DType::native_i8(),
        DType::native_u8(),
        DType::native_u16(),
        DType::native_i16(),
        DType::native_i32(),
        DType::native_u32(),
        DType::native_u64(),
        DType::native_i64(),
        DType::native_f32(),
        DType::native_f64(),
    ]
}

/// Compound whose members follow each other without padding.
pub fn packed_compound<'a, I>(members: I) -> DType
where
    I: IntoIterator<Item = (&'a str, DType)>,
{
    let mut builder = CompoundTypeBuilder::new();
    for (name, dtype) in members {
        builder.push(name, dtype);
    }
    builder.build()
}

/// Rebuild a compound with its members packed in their current order.
pub fn pack(dtype: &DType) -> Result<DType> {
    if dtype.class() != DTypeClass::Compound {
        return Err(Error::DType("Only compound types can be packed".into()));
    }
    Ok(packed_compound(
        dtype
            .members()
            .iter()
            .map(|m| (m.name.as_str(), m.datatype.clone())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(DType::native_i32().class(), DTypeClass::Integer);
        assert_eq!(DType::variable_string().class(), DTypeClass::String);
        assert_eq!(DType::vlen(DType::native_u8()).class(), DTypeClass::VarLen);
        assert!(DType::native_bool().is_bool());
        assert!(!DType::native_bool().is_numeric());
        assert!(DType::native_f32().is_native_numeric());
        assert!(!DType::native_bitfield(2).is_numeric());
    }

    #[test]
    fn compound_queries() {
        let dt = packed_compound([("x", DType::native_u8()), ("y", DType::native_f64())]);
        assert_eq!(dt.member_names(), ["x", "y"]);
        assert_eq!(dt.member_index("y"), Some(1));
        assert_eq!(dt.member_named("y").map(|m| m.byte_offset), Some(1));
        assert_eq!(dt.size(), 9);
        assert!(pack(&DType::native_u8()).is_err());
    }
}
