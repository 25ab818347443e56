//! Comparing how much information two atomic datatypes can hold.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use h5composites_format::datatype::{Datatype, MantissaNormalization};

use crate::dtype::{DType, DTypeClass, DTypeExt};

/// Result of comparing the precision of two datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrecisionOrder {
    /// Every value of the left type is representable in the right one.
    Less,
    Equivalent,
    /// Every value of the right type is representable in the left one.
    Greater,
    /// Each side holds values the other cannot.
    Unordered,
}

impl From<Ordering> for PrecisionOrder {
    fn from(o: Ordering) -> Self {
        match o {
            Ordering::Less => PrecisionOrder::Less,
            Ordering::Equal => PrecisionOrder::Equivalent,
            Ordering::Greater => PrecisionOrder::Greater,
        }
    }
}

/// Value bits of an integer, excluding the sign bit, and signedness.
pub(crate) fn int_precision(dtype: &DType) -> Option<(u32, bool)> {
    match dtype {
        Datatype::FixedPoint {
            bit_precision,
            signed,
            ..
        } => Some((
            (*bit_precision as u32).saturating_sub(u32::from(*signed)),
            *signed,
        )),
        _ => None,
    }
}

/// Exponent bits and mantissa bits, counting an implied leading bit.
pub(crate) fn float_precision(dtype: &DType) -> Option<(u32, u32)> {
    match dtype {
        Datatype::FloatingPoint {
            exponent_size,
            mantissa_size,
            normalization,
            ..
        } => {
            let implied = u32::from(*normalization == MantissaNormalization::Implied);
            Some((*exponent_size as u32, *mantissa_size as u32 + implied))
        }
        _ => None,
    }
}

fn string_length(dtype: &DType) -> u64 {
    match dtype {
        Datatype::String { size, .. } => *size as u64,
        _ => u64::MAX,
    }
}

fn bit_precision(dtype: &DType) -> u16 {
    match dtype {
        Datatype::BitField { bit_precision, .. } => *bit_precision,
        _ => 0,
    }
}

fn enum_name_set(dtype: &DType) -> BTreeSet<&str> {
    match dtype {
        Datatype::Enumeration { members, .. } => members.iter().map(|m| m.name.as_str()).collect(),
        _ => BTreeSet::new(),
    }
}

fn compare_ints(lhs: (u32, bool), rhs: (u32, bool)) -> PrecisionOrder {
    let ((lp, ls), (rp, rs)) = (lhs, rhs);
    match (ls, rs) {
        (true, true) | (false, false) => lp.cmp(&rp).into(),
        // a signed type can hold an unsigned one only with more value bits
        (true, false) => {
            if lp < rp {
                PrecisionOrder::Unordered
            } else {
                PrecisionOrder::Greater
            }
        }
        (false, true) => {
            if lp <= rp {
                PrecisionOrder::Less
            } else {
                PrecisionOrder::Unordered
            }
        }
    }
}

fn combine(a: Ordering, b: Ordering) -> PrecisionOrder {
    match (a, b) {
        (x, y) if x == y => x.into(),
        (Ordering::Equal, y) => y.into(),
        (x, Ordering::Equal) => x.into(),
        _ => PrecisionOrder::Unordered,
    }
}

/// Compare the precision of two datatypes.
///
/// Integers and floats compare with each other. Strings compare by
/// length with variable-length strings the largest, bitfields by
/// precision, enumerations by inclusion of their name sets. Any other
/// pairing has no order.
pub fn compare_precision(lhs: &DType, rhs: &DType) -> Option<PrecisionOrder> {
    use DTypeClass::*;
    let order = match (lhs.class(), rhs.class()) {
        (Integer, Integer) => compare_ints(int_precision(lhs)?, int_precision(rhs)?),
        (Float, Float) => {
            let (le, lm) = float_precision(lhs)?;
            let (re, rm) = float_precision(rhs)?;
            combine(le.cmp(&re), lm.cmp(&rm))
        }
        (Integer, Float) => {
            let (lp, _) = int_precision(lhs)?;
            let (_, rm) = float_precision(rhs)?;
            if lp > rm {
                PrecisionOrder::Unordered
            } else {
                PrecisionOrder::Less
            }
        }
        (Float, Integer) => {
            let (_, lm) = float_precision(lhs)?;
            let (rp, _) = int_precision(rhs)?;
            if rp > lm {
                PrecisionOrder::Unordered
            } else {
                PrecisionOrder::Greater
            }
        }
        (String, String) => string_length(lhs).cmp(&string_length(rhs)).into(),
        (Bitfield, Bitfield) => bit_precision(lhs).cmp(&bit_precision(rhs)).into(),
        (Enum, Enum) => {
            let l = enum_name_set(lhs);
            let r = enum_name_set(rhs);
            match (l.is_subset(&r), r.is_subset(&l)) {
                (true, true) => PrecisionOrder::Equivalent,
                (true, false) => PrecisionOrder::Less,
                (false, true) => PrecisionOrder::Greater,
                (false, false) => PrecisionOrder::Unordered,
            }
        }
        _ => return None,
    };
    Some(order)
}
