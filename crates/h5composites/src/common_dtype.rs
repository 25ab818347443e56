//! The smallest datatype every value of several datatypes converts to.

use std::collections::HashSet;

use h5composites_format::datatype::Datatype;
use h5composites_format::type_builders::EnumTypeBuilder;

use crate::dtype::{native_numeric_types, packed_compound, DType, DTypeClass, DTypeExt};
use crate::enum_utils::enum_names;
use crate::error::{Error, Result};

/// Bits a numeric type spends on its value, exponent and sign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AtomInfo {
    /// Integer bits excluding the sign, or the stored mantissa bits.
    value_bits: u32,
    exponent_bits: u32,
    signed: bool,
}

impl AtomInfo {
    fn of(dtype: &DType) -> Option<AtomInfo> {
        match dtype {
            Datatype::FixedPoint {
                bit_precision,
                signed,
                ..
            } => Some(AtomInfo {
                value_bits: (*bit_precision as u32).saturating_sub(u32::from(*signed)),
                exponent_bits: 0,
                signed: *signed,
            }),
            Datatype::FloatingPoint {
                exponent_size,
                mantissa_size,
                ..
            } => Some(AtomInfo {
                value_bits: *mantissa_size as u32,
                exponent_bits: *exponent_size as u32,
                signed: true,
            }),
            _ => None,
        }
    }

    fn merge(self, other: AtomInfo) -> AtomInfo {
        AtomInfo {
            value_bits: self.value_bits.max(other.value_bits),
            exponent_bits: self.exponent_bits.max(other.exponent_bits),
            signed: self.signed || other.signed,
        }
    }

    /// Every field at least as large as in `other`.
    fn covers(&self, other: &AtomInfo) -> bool {
        self.value_bits >= other.value_bits
            && self.exponent_bits >= other.exponent_bits
            && (self.signed || !other.signed)
    }
}

fn mismatch(what: &str) -> Error {
    Error::DType(what.to_owned())
}

/// First native integer or float type holding every value of `dtypes`.
pub fn common_numeric_dtype(dtypes: &[DType]) -> Result<DType> {
    let mut info = AtomInfo::default();
    for dtype in dtypes {
        let atom = AtomInfo::of(dtype)
            .ok_or_else(|| mismatch("Non-numeric type passed to numeric super type search"))?;
        info = info.merge(atom);
    }
    native_numeric_types()
        .into_iter()
        .find(|candidate| AtomInfo::of(candidate).is_some_and(|c| c.covers(&info)))
        .ok_or_else(|| mismatch("No native data type large enough exists!"))
}

fn common_bitfield(dtypes: &[DType]) -> Result<DType> {
    let precision = dtypes
        .iter()
        .map(|d| match d {
            Datatype::BitField { bit_precision, .. } => *bit_precision,
            _ => 0,
        })
        .max()
        .unwrap_or(0);
    [1u32, 2, 4, 8]
        .into_iter()
        .find(|bytes| bytes * 8 >= precision as u32)
        .map(DType::native_bitfield)
        .ok_or_else(|| {
            Error::DType(format!(
                "Bitfield precision {precision} cannot fit into any bitfield type"
            ))
        })
}

fn common_string(dtypes: &[DType]) -> DType {
    let mut longest = 0;
    for dtype in dtypes {
        match dtype {
            Datatype::String { size, .. } => longest = longest.max(*size),
            _ => return DType::variable_string(),
        }
    }
    DType::fixed_string(longest)
}

fn supers(dtypes: &[DType]) -> Vec<DType> {
    dtypes
        .iter()
        .filter_map(|d| d.super_type().cloned())
        .collect()
}

fn common_array(dtypes: &[DType]) -> Result<DType> {
    let dims = dtypes[0].array_dims().unwrap_or(&[]);
    if dtypes.iter().any(|d| d.array_dims() != Some(dims)) {
        return Err(mismatch("Array dimensions do not match"));
    }
    Ok(DType::array(common_dtype(&supers(dtypes))?, dims))
}

fn common_compound(dtypes: &[DType]) -> Result<DType> {
    let first = &dtypes[0];
    let names: HashSet<&str> = first.member_names().into_iter().collect();
    for dtype in &dtypes[1..] {
        let other: HashSet<&str> = dtype.member_names().into_iter().collect();
        if other != names {
            return Err(mismatch("Compound element names do not match"));
        }
    }
    let mut members = Vec::with_capacity(names.len());
    for name in first.member_names() {
        let types: Vec<DType> = dtypes
            .iter()
            .filter_map(|d| d.member_named(name))
            .map(|m| m.datatype.clone())
            .collect();
        members.push((name, common_dtype(&types)?));
    }
    Ok(packed_compound(members))
}

fn common_enum(dtypes: &[DType]) -> Result<DType> {
    let base = common_numeric_dtype(&supers(dtypes))?;
    let mut seen: Vec<&str> = Vec::new();
    for dtype in dtypes {
        for name in enum_names(dtype)? {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    Ok(seen
        .iter()
        .enumerate()
        .fold(EnumTypeBuilder::new(base), |b, (i, name)| {
            b.value(name, i as i64)
        })
        .build())
}

/// The common super type of `dtypes`.
///
/// Numbers widen to the first native type covering all of them, strings
/// to the longest (or variable) length, and compounds, arrays and
/// sequences recurse into their members. Enumerations take the union of
/// their names, numbered in order of first appearance.
pub fn common_dtype(dtypes: &[DType]) -> Result<DType> {
    let Some(first) = dtypes.first() else {
        return Err(mismatch("Cannot find the common type of no types"));
    };
    if dtypes.iter().all(|d| d == first) {
        return Ok(first.clone());
    }
    let class = first.class();
    let numeric = |c: DTypeClass| matches!(c, DTypeClass::Integer | DTypeClass::Float);
    if numeric(class) {
        if dtypes.iter().any(|d| !numeric(d.class())) {
            return Err(mismatch("Data type classes do not match"));
        }
        return common_numeric_dtype(dtypes);
    }
    if dtypes.iter().any(|d| d.class() != class) {
        return Err(mismatch("Data type classes do not match"));
    }
    match class {
        DTypeClass::Bitfield => common_bitfield(dtypes),
        DTypeClass::String => Ok(common_string(dtypes)),
        DTypeClass::Array => common_array(dtypes),
        DTypeClass::Compound => common_compound(dtypes),
        DTypeClass::VarLen => Ok(DType::vlen(common_dtype(&supers(dtypes))?)),
        DTypeClass::Enum => common_enum(dtypes),
        _ => Err(mismatch("Unexpected data type received")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(types: &[DType]) -> DType {
        common_dtype(types).unwrap()
    }

    #[test]
    fn numbers_widen_to_native_types() {
        assert_eq!(common(&[DType::native_u8(), DType::native_i8()]), DType::native_i16());
        assert_eq!(common(&[DType::native_u16(), DType::native_u32()]), DType::native_u32());
        assert_eq!(common(&[DType::native_i32(), DType::native_f32()]), DType::native_f64());
        assert_eq!(common(&[DType::native_bool(), DType::native_u8()]), DType::native_u8());
        let err = common_dtype(&[DType::native_u64(), DType::native_i8()]).unwrap_err();
        assert_eq!(err.to_string(), "No native data type large enough exists!");
    }

    #[test]
    fn strings_and_bitfields() {
        assert_eq!(
            common(&[DType::fixed_string(3), DType::fixed_string(7)]),
            DType::fixed_string(7)
        );
        assert_eq!(
            common(&[DType::fixed_string(3), DType::variable_string()]),
            DType::variable_string()
        );
        assert_eq!(
            common(&[DType::native_bitfield(1), DType::native_bitfield(4)]),
            DType::native_bitfield(4)
        );
    }

    #[test]
    fn compounds_match_by_name() {
        let a = packed_compound([("x", DType::native_i16()), ("y", DType::fixed_string(2))]);
        let b = packed_compound([("y", DType::fixed_string(5)), ("x", DType::native_u8())]);
        assert_eq!(
            common(&[a.clone(), b]),
            packed_compound([("x", DType::native_i16()), ("y", DType::fixed_string(5))])
        );
        let c = packed_compound([("x", DType::native_i16())]);
        let err = common_dtype(&[a, c]).unwrap_err();
        assert_eq!(err.to_string(), "Compound element names do not match");
    }

    #[test]
    fn arrays_and_sequences() {
        let a = DType::array(DType::native_u8(), &[3]);
        let b = DType::array(DType::native_f32(), &[3]);
        assert_eq!(common(&[a.clone(), b]), DType::array(DType::native_f32(), &[3]));
        let c = DType::array(DType::native_u8(), &[4]);
        assert!(common_dtype(&[a, c]).is_err());
        assert_eq!(
            common(&[DType::vlen(DType::native_u8()), DType::vlen(DType::native_u16())]),
            DType::vlen(DType::native_u16())
        );
    }

    #[test]
    fn enums_union_names() {
        let a = EnumTypeBuilder::new(DType::native_u8())
            .value("B", 5)
            .value("A", 6)
            .build();
        let b = EnumTypeBuilder::new(DType::native_i16())
            .value("C", 0)
            .value("A", 1)
            .build();
        let merged = common(&[a, b]);
        assert_eq!(enum_names(&merged).unwrap(), ["B", "A", "C"]);
        assert_eq!(merged.super_type(), Some(&DType::native_i16()));
    }

    #[test]
    fn classes_must_agree() {
        let err = common_dtype(&[DType::native_u8(), DType::fixed_string(1)]).unwrap_err();
        assert_eq!(err.to_string(), "Data type classes do not match");
    }
}
