//! Rules for combining scalar values found in several files.
//!
//! A [`MergeFactory`] maps the [`TypeId`] of a scalar dataset to the rule
//! that merges its values. Untagged scalars use [`require_match`]; the
//! wrapper types [`Plus`], [`Multiplies`], [`BitOr`] and [`BitAnd`] tag a
//! value with an element-wise rule.
//!
//! ```no_run
//! use h5composites::merge::{MergeFactory, Plus};
//! use h5composites::traits::to_buffer;
//! use h5composites::type_register::{HasTypeId, TypeRegister};
//!
//! let mut register = TypeRegister::new();
//! let factory = MergeFactory::with_defaults(&mut register).unwrap();
//! let id = Plus::<u32>::registered_id(&register).unwrap();
//! let (a, b) = (to_buffer(&2u32).unwrap(), to_buffer(&5u8).unwrap());
//! let sum = factory.merge(id, &[a.view(), b.view()]).unwrap();
//! assert_eq!(sum.view().read::<u32>().unwrap(), 7);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use h5composites_format::datatype::{Datatype, DatatypeByteOrder};

use crate::buffer::{H5Buffer, H5BufferConstView, H5BufferView};
use crate::common_dtype::common_dtype;
use crate::conversion::{convert, read_number, write_number, Number};
use crate::dtype::{DType, DTypeClass, DTypeExt};
use crate::error::{Error, Result};
use crate::printing::display;
use crate::traits::{BufferRead, BufferWrite, H5DType, StaticH5DType};
use crate::type_register::{HasTypeId, TypeId, TypeRegister};

/// Combines the values of one scalar across inputs.
pub type MergeRule = Arc<dyn Fn(&[H5BufferConstView<'_>]) -> Result<H5Buffer> + Send + Sync>;

/// Registry of merge rules by type id.
#[derive(Clone)]
pub struct MergeFactory {
    rules: BTreeMap<TypeId, MergeRule>,
}

impl Default for MergeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeFactory {
    /// A factory knowing only [`require_match`] for untagged values.
    pub fn new() -> Self {
        let mut rules: BTreeMap<TypeId, MergeRule> = BTreeMap::new();
        rules.insert(TypeId::NULL, Arc::new(require_match));
        Self { rules }
    }

    /// A factory with the rules of the wrapper types, registering their
    /// names in `register` where missing.
    pub fn with_defaults(register: &mut TypeRegister) -> Result<Self> {
        let mut factory = Self::new();
        factory.add_default::<Plus<()>>(register, ElementOp::Sum)?;
        factory.add_default::<Multiplies<()>>(register, ElementOp::Product)?;
        factory.add_default::<BitOr<()>>(register, ElementOp::BitOr)?;
        factory.add_default::<BitAnd<()>>(register, ElementOp::BitAnd)?;
        Ok(factory)
    }

    fn add_default<T: HasTypeId>(&mut self, register: &mut TypeRegister, op: ElementOp) -> Result<()> {
        let id = match register.id_of(T::type_name()) {
            Ok(id) => id,
            Err(_) => register.register_type(T::type_name())?,
        };
        self.register_rule(id, move |buffers: &[H5BufferConstView<'_>]| fold(op, buffers));
        Ok(())
    }

    /// Add a rule for `id`. Returns false, keeping the old rule, if `id`
    /// already has one.
    pub fn register_rule<F>(&mut self, id: TypeId, rule: F) -> bool
    where
        F: Fn(&[H5BufferConstView<'_>]) -> Result<H5Buffer> + Send + Sync + 'static,
    {
        if self.rules.contains_key(&id) {
            return false;
        }
        self.rules.insert(id, Arc::new(rule));
        true
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.rules.contains_key(&id)
    }

    pub fn retrieve(&self, id: TypeId) -> Option<MergeRule> {
        self.rules.get(&id).cloned()
    }

    /// Merge `buffers` with the rule of `id`.
    pub fn merge(&self, id: TypeId, buffers: &[H5BufferConstView<'_>]) -> Result<H5Buffer> {
        let rule = self
            .rules
            .get(&id)
            .ok_or_else(|| Error::Merge(format!("No merge rule registered for type ID {id}")))?;
        rule(buffers)
    }
}

impl fmt::Debug for MergeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeFactory")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Whether two buffers hold the same type and the same value. Strings
/// and sequences compare by content, not by heap location.
pub fn match_buffers(lhs: &H5BufferConstView<'_>, rhs: &H5BufferConstView<'_>) -> Result<bool> {
    if lhs.dtype() != rhs.dtype() {
        return Ok(false);
    }
    match lhs.dtype().class() {
        DTypeClass::String => Ok(lhs.string_bytes()? == rhs.string_bytes()?),
        DTypeClass::Compound | DTypeClass::Array | DTypeClass::VarLen => {
            let (l, r) = (lhs.children()?, rhs.children()?);
            if l.len() != r.len() {
                return Ok(false);
            }
            for (a, b) in l.iter().zip(&r) {
                if !match_buffers(a, b)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(lhs.bytes() == rhs.bytes()),
    }
}

/// The common value of `buffers`, failing unless all of them match.
pub fn require_match(buffers: &[H5BufferConstView<'_>]) -> Result<H5Buffer> {
    let Some((first, rest)) = buffers.split_first() else {
        return Err(Error::Merge("Cannot merge 0 values".into()));
    };
    for other in rest {
        if !match_buffers(first, other)? {
            return Err(Error::Merge("Mismatch in merged values".into()));
        }
    }
    first.to_buffer()
}

/// Element-wise sum of `buffers` in their common type.
pub fn sum_into(buffers: &[H5BufferConstView<'_>]) -> Result<H5Buffer> {
    fold(ElementOp::Sum, buffers)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementOp {
    Sum,
    Product,
    BitOr,
    BitAnd,
}

impl ElementOp {
    fn verb(self) -> &'static str {
        match self {
            ElementOp::Sum => "sum",
            ElementOp::Product => "multiply",
            ElementOp::BitOr => "bitwise-or",
            ElementOp::BitAnd => "bitwise-and",
        }
    }

    fn is_bitwise(self) -> bool {
        matches!(self, ElementOp::BitOr | ElementOp::BitAnd)
    }

    fn apply_numbers(self, lhs: Number, rhs: Number) -> Result<Number> {
        match (self, lhs, rhs) {
            (ElementOp::Sum, Number::Int(a), Number::Int(b)) => Ok(Number::Int(a.saturating_add(b))),
            (ElementOp::Product, Number::Int(a), Number::Int(b)) => {
                Ok(Number::Int(a.saturating_mul(b)))
            }
            (ElementOp::BitOr, Number::Int(a), Number::Int(b)) => Ok(Number::Int(a | b)),
            (ElementOp::BitAnd, Number::Int(a), Number::Int(b)) => Ok(Number::Int(a & b)),
            (ElementOp::Sum, a, b) => Ok(Number::Float(a.as_f64() + b.as_f64())),
            (ElementOp::Product, a, b) => Ok(Number::Float(a.as_f64() * b.as_f64())),
            (op, _, _) => Err(Error::Merge(format!(
                "Cannot {} floating point types!",
                op.verb()
            ))),
        }
    }

    fn apply_bits(self, lhs: u64, rhs: u64) -> Result<u64> {
        match self {
            ElementOp::BitOr => Ok(lhs | rhs),
            ElementOp::BitAnd => Ok(lhs & rhs),
            op => Err(Error::Merge(format!("Cannot {} bitfield types!", op.verb()))),
        }
    }
}

fn bitfield_order(dtype: &DType) -> Option<DatatypeByteOrder> {
    match dtype {
        Datatype::BitField { size, byte_order, .. } if *size <= 8 => Some(*byte_order),
        _ => None,
    }
}

fn read_bits(bytes: &[u8], order: DatatypeByteOrder) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    if order == DatatypeByteOrder::BigEndian {
        raw[..bytes.len()].reverse();
    }
    u64::from_le_bytes(raw)
}

fn write_bits(out: &mut [u8], value: u64, order: DatatypeByteOrder) {
    let n = out.len();
    out.copy_from_slice(&value.to_le_bytes()[..n]);
    if order == DatatypeByteOrder::BigEndian {
        out.reverse();
    }
}

/// Combine `src` into `acc`; both hold the same type.
fn combine_into(op: ElementOp, acc: &mut H5BufferView<'_>, src: &H5BufferConstView<'_>) -> Result<()> {
    let dtype = acc.dtype();
    match dtype.class() {
        DTypeClass::Integer | DTypeClass::Float => {
            let unsupported = || Error::DType(format!("Unsupported numeric type {}", display(dtype)));
            let lhs = read_number(dtype, acc.bytes()).ok_or_else(unsupported)?;
            let rhs = read_number(dtype, src.bytes()).ok_or_else(unsupported)?;
            let value = op.apply_numbers(lhs, rhs)?;
            write_number(dtype, acc.bytes_mut(), value).ok_or_else(unsupported)
        }
        DTypeClass::Bitfield if op.is_bitwise() => {
            let order = bitfield_order(dtype)
                .ok_or_else(|| Error::DType(format!("Unsupported bitfield {}", display(dtype))))?;
            let value = op.apply_bits(read_bits(acc.bytes(), order), read_bits(src.bytes(), order))?;
            write_bits(acc.bytes_mut(), value, order);
            Ok(())
        }
        DTypeClass::String => Err(Error::Merge(format!("Cannot {} string types!", op.verb()))),
        DTypeClass::Compound => {
            for index in 0..dtype.members().len() {
                combine_into(op, &mut acc.member_mut(index)?, &src.member(index)?)?;
            }
            Ok(())
        }
        DTypeClass::Array => {
            for index in 0..dtype.array_len().unwrap_or(0) as usize {
                combine_into(op, &mut acc.element_mut(index)?, &src.element(index)?)?;
            }
            Ok(())
        }
        _ => Err(Error::Merge(format!(
            "Cannot {} values of type {}",
            op.verb(),
            display(dtype)
        ))),
    }
}

/// Fold `buffers` with `op` in their common type.
fn fold(op: ElementOp, buffers: &[H5BufferConstView<'_>]) -> Result<H5Buffer> {
    let Some((first, rest)) = buffers.split_first() else {
        return Err(Error::Merge("Cannot merge 0 values".into()));
    };
    let dtypes: Vec<DType> = buffers.iter().map(|b| b.dtype().clone()).collect();
    let common = common_dtype(&dtypes)?;
    let mut acc = convert(first, &common)?;
    for other in rest {
        let converted = convert(other, &common)?;
        combine_into(op, &mut acc.view_mut(), &converted.view())?;
    }
    Ok(acc)
}

macro_rules! merge_wrapper {
    ($(#[$doc:meta])* $name:ident, $type_name:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
        pub struct $name<T>(pub T);

        impl<T> $name<T> {
            pub fn into_inner(self) -> T {
                self.0
            }
        }

        impl<T> std::ops::Deref for $name<T> {
            type Target = T;

            fn deref(&self) -> &T {
                &self.0
            }
        }

        impl<T> HasTypeId for $name<T> {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        impl<T: H5DType> H5DType for $name<T> {
            fn h5_dtype(&self) -> DType {
                self.0.h5_dtype()
            }
        }

        impl<T: StaticH5DType> StaticH5DType for $name<T> {
            fn static_h5_dtype() -> DType {
                T::static_h5_dtype()
            }
        }

        impl<T: BufferWrite> BufferWrite for $name<T> {
            fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
                self.0.write_native(view)
            }
        }

        impl<T: BufferRead> BufferRead for $name<T> {
            fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
                T::read_buffer(view).map($name)
            }
        }
    };
}

merge_wrapper!(
    /// A value merged by adding up its elements.
    Plus,
    "H5Composites::Plus"
);
merge_wrapper!(
    /// A value merged by multiplying its elements.
    Multiplies,
    "H5Composites::Multiplies"
);
merge_wrapper!(
    /// An integer or bitfield value merged with bitwise or.
    BitOr,
    "H5Composites::BitOr"
);
merge_wrapper!(
    /// An integer or bitfield value merged with bitwise and.
    BitAnd,
    "H5Composites::BitAnd"
);
