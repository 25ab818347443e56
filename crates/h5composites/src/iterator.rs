//! Depth-first walk over nested datatypes.
//!
//! A [`DTypeIterator`] visits every member of a compound in order, then
//! stops on a [`ElemType::CompoundClose`] for that compound before moving
//! on to the compound's next sibling. The walk ends with
//! [`ElemType::End`], whose offset is the size of the root type.
//!
//! ```
//! use h5composites::iterator::{DTypeIterator, ElemType};
//! use h5composites::traits::StaticH5DType;
//!
//! let dtype = <(i32, (f64, bool))>::static_h5_dtype();
//! let mut iter = DTypeIterator::new(&dtype);
//! let mut seen = Vec::new();
//! while iter.elem_type() != ElemType::End {
//!     seen.push((iter.elem_type(), iter.full_name(".")));
//!     iter.advance();
//! }
//! assert_eq!(seen[4], (ElemType::Boolean, "element1.element1".to_string()));
//! ```

use std::collections::VecDeque;
use std::fmt;

use h5composites_format::datatype::Datatype;

use crate::dtype::{DType, DTypeClass, DTypeExt};
use crate::error::{Error, Result};

/// What the iterator currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    Boolean,
    Integer,
    Float,
    Bitfield,
    String,
    Enum,
    Array,
    Variable,
    Opaque,
    Compound,
    CompoundClose,
    End,
}

impl ElemType {
    pub fn of(dtype: &DType) -> ElemType {
        if dtype.is_bool() {
            return ElemType::Boolean;
        }
        match dtype.class() {
            DTypeClass::Integer => ElemType::Integer,
            DTypeClass::Float => ElemType::Float,
            DTypeClass::String => ElemType::String,
            DTypeClass::Bitfield => ElemType::Bitfield,
            DTypeClass::Opaque => ElemType::Opaque,
            DTypeClass::Compound => ElemType::Compound,
            DTypeClass::Enum => ElemType::Enum,
            DTypeClass::VarLen => ElemType::Variable,
            DTypeClass::Array => ElemType::Array,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemType::Boolean => "Boolean",
            ElemType::Integer => "Integer",
            ElemType::Float => "Float",
            ElemType::Bitfield => "Bitfield",
            ElemType::String => "String",
            ElemType::Enum => "Enum",
            ElemType::Array => "Array",
            ElemType::Variable => "Variable",
            ElemType::Opaque => "Opaque",
            ElemType::Compound => "Compound",
            ElemType::CompoundClose => "CompoundClose",
            ElemType::End => "End",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry<'a> {
    dtype: &'a DType,
    name: &'a str,
    offset: u64,
}

/// Walks a datatype depth-first. Each level of the stack is the queue of
/// not yet visited members of one compound; its front is the element
/// currently visited at that level.
#[derive(Debug, Clone)]
pub struct DTypeIterator<'a> {
    root: &'a DType,
    stack: Vec<VecDeque<Entry<'a>>>,
    elem: ElemType,
}

impl<'a> DTypeIterator<'a> {
    pub fn new(root: &'a DType) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(Entry {
            dtype: root,
            name: "",
            offset: 0,
        });
        Self {
            root,
            stack: vec![queue],
            elem: ElemType::of(root),
        }
    }

    pub fn elem_type(&self) -> ElemType {
        self.elem
    }

    /// The compound closed by the current `CompoundClose`.
    fn closed(&self) -> Option<&Entry<'a>> {
        let n = self.stack.len();
        if n < 2 {
            return None;
        }
        self.stack[n - 2].front()
    }

    fn current(&self) -> Option<&Entry<'a>> {
        match self.elem {
            ElemType::End => None,
            ElemType::CompoundClose => self.closed(),
            _ => self.stack.last().and_then(VecDeque::front),
        }
    }

    /// Re-derive the state from the top of the stack after a pop.
    fn settle(&mut self) {
        self.elem = match self.stack.last().and_then(VecDeque::front) {
            Some(entry) => ElemType::of(entry.dtype),
            None if self.stack.len() <= 1 => ElemType::End,
            None => ElemType::CompoundClose,
        };
    }

    /// Move to the next element.
    pub fn advance(&mut self) {
        match self.elem {
            ElemType::End => {}
            ElemType::Compound => {
                let members: VecDeque<Entry<'a>> = self
                    .current()
                    .map(|e| e.dtype.members())
                    .unwrap_or(&[])
                    .iter()
                    .map(|m| Entry {
                        dtype: &m.datatype,
                        name: m.name.as_str(),
                        offset: m.byte_offset,
                    })
                    .collect();
                self.stack.push(members);
                self.settle();
            }
            ElemType::CompoundClose => {
                self.stack.pop();
                if let Some(top) = self.stack.last_mut() {
                    top.pop_front();
                }
                self.settle();
            }
            _ => {
                if let Some(top) = self.stack.last_mut() {
                    top.pop_front();
                }
                self.settle();
            }
        }
    }

    /// Skip the remaining members of the innermost open compound and stop
    /// on its `CompoundClose`. At the top level this moves to `End`.
    pub fn skip_to_compound_close(&mut self) {
        match self.elem {
            ElemType::End => {}
            ElemType::CompoundClose => {}
            _ => {
                if let Some(top) = self.stack.last_mut() {
                    top.clear();
                }
                self.settle();
            }
        }
    }

    /// Datatype of the current element; the compound itself on
    /// `CompoundClose` and `None` at the end.
    pub fn dtype(&self) -> Option<&'a DType> {
        self.current().map(|e| e.dtype)
    }

    /// Member name of the current element; empty for the root.
    pub fn name(&self) -> &'a str {
        self.current().map_or("", |e| e.name)
    }

    /// Names from the root down to the current element.
    pub fn nested_names(&self) -> Vec<&'a str> {
        let depth = match self.elem {
            ElemType::End => 0,
            ElemType::CompoundClose => self.stack.len() - 1,
            _ => self.stack.len(),
        };
        self.stack[..depth]
            .iter()
            .filter_map(VecDeque::front)
            .map(|e| e.name)
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub fn full_name(&self, sep: &str) -> String {
        self.nested_names().join(sep)
    }

    /// Nesting depth; the root is at depth 0.
    pub fn depth(&self) -> usize {
        match self.elem {
            ElemType::End => 0,
            ElemType::CompoundClose => self.stack.len() - 2,
            _ => self.stack.len() - 1,
        }
    }

    /// Offset within the enclosing compound. On `CompoundClose` this is
    /// the end of the closed compound, at `End` the size of the root.
    pub fn offset(&self) -> u64 {
        match self.elem {
            ElemType::End => self.root.type_size() as u64,
            ElemType::CompoundClose => self
                .closed()
                .map_or(0, |e| e.offset + e.dtype.type_size() as u64),
            _ => self.current().map_or(0, |e| e.offset),
        }
    }

    /// Offset from the start of the root type.
    pub fn nested_offset(&self) -> u64 {
        match self.elem {
            ElemType::End => self.root.type_size() as u64,
            ElemType::CompoundClose => {
                let base: u64 = self
                    .stack
                    .iter()
                    .filter_map(VecDeque::front)
                    .map(|e| e.offset)
                    .sum();
                base + self.closed().map_or(0, |e| e.dtype.type_size() as u64)
            }
            _ => self
                .stack
                .iter()
                .filter_map(VecDeque::front)
                .map(|e| e.offset)
                .sum(),
        }
    }
}

impl<'a> DTypeIterator<'a> {
    fn typed(&self, wanted: ElemType, what: &str) -> Result<&'a DType> {
        match self.dtype() {
            Some(dtype) if self.elem == wanted => Ok(dtype),
            _ => Err(Error::DType(format!("Element type {} is not {what}", self.elem))),
        }
    }

    pub fn int_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::Integer, "an integer")
    }

    pub fn float_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::Float, "a float")
    }

    pub fn string_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::String, "a string")
    }

    pub fn enum_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::Enum, "an enum")
    }

    pub fn array_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::Array, "an array")
    }

    pub fn compound_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::Compound, "a compound")
    }

    pub fn varlen_dtype(&self) -> Result<&'a DType> {
        self.typed(ElemType::Variable, "a variable length type")
    }

    /// Native bitfield of the current bitfield's size.
    pub fn bitfield_dtype(&self) -> Result<DType> {
        let dtype = self.typed(ElemType::Bitfield, "a bitfield")?;
        Ok(DType::native_bitfield(dtype.type_size()))
    }

    pub fn has_numeric_dtype(&self) -> bool {
        matches!(self.elem, ElemType::Integer | ElemType::Float)
            && self.dtype().is_some_and(|d| d.is_numeric())
    }

    /// Native integer or float type matching the current element, which
    /// may be stored in another byte order.
    pub fn numeric_dtype(&self) -> Result<DType> {
        self.dtype()
            .filter(|_| self.has_numeric_dtype())
            .and_then(native_numeric)
            .ok_or_else(|| {
                Error::DType(format!(
                    "Element type {} does not have a native numeric type",
                    self.elem
                ))
            })
    }

    pub fn has_predefined_dtype(&self) -> bool {
        self.has_numeric_dtype() || matches!(self.elem, ElemType::Boolean | ElemType::Bitfield)
    }

    /// Native type of a numeric, boolean or bitfield element.
    pub fn predefined_dtype(&self) -> Result<DType> {
        match self.elem {
            ElemType::Boolean => Ok(DType::native_bool()),
            ElemType::Bitfield => self.bitfield_dtype(),
            _ if self.has_numeric_dtype() => self.numeric_dtype(),
            _ => Err(Error::DType(format!(
                "Element type {} does not have a native predefined type",
                self.elem
            ))),
        }
    }
}

fn native_numeric(dtype: &DType) -> Option<DType> {
    let native = match dtype {
        Datatype::FixedPoint { size, signed, .. } => match (size, signed) {
            (1, true) => DType::native_i8(),
            (1, false) => DType::native_u8(),
            (2, true) => DType::native_i16(),
            (2, false) => DType::native_u16(),
            (4, true) => DType::native_i32(),
            (4, false) => DType::native_u32(),
            (8, true) => DType::native_i64(),
            (8, false) => DType::native_u64(),
            _ => return None,
        },
        Datatype::FloatingPoint { size: 4, .. } => DType::native_f32(),
        Datatype::FloatingPoint { size: 8, .. } => DType::native_f64(),
        _ => return None,
    };
    Some(native)
}
