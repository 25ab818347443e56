//! Human-readable datatype descriptions.
//!
//! The compact form fits on one line: `{id: u16, name: string[*]}`. The
//! expanded form puts each compound member on its own line, optionally
//! prefixed with its byte offset from the start of the type.

use std::fmt::{self, Write};

use h5composites_format::datatype::{Datatype, VlenKind};

use crate::dtype::{DType, DTypeExt};
use crate::iterator::{DTypeIterator, ElemType};

/// Layout options for [`print_dtype`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintOptions {
    /// Everything on one line.
    pub compact: bool,
    /// Prefix each line with the byte offset (expanded form only).
    pub print_offset: bool,
    /// Width the offsets are right-aligned to.
    pub pad_offset: usize,
    pub indent_width: usize,
    /// Enumerations with more names print as `enum`.
    pub max_enum_names: usize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            compact: false,
            print_offset: false,
            pad_offset: 4,
            indent_width: 4,
            max_enum_names: 4,
        }
    }
}

impl PrintOptions {
    pub fn compact() -> Self {
        Self {
            compact: true,
            ..Self::default()
        }
    }
}

fn write_atomic<W: Write>(dtype: &DType, out: &mut W, opts: &PrintOptions) -> fmt::Result {
    if dtype.is_bool() {
        return out.write_str("bool");
    }
    match dtype {
        Datatype::FixedPoint { size, signed, .. } => {
            write!(out, "{}{}", if *signed { 'i' } else { 'u' }, size * 8)
        }
        Datatype::FloatingPoint { size, .. } => write!(out, "f{}", size * 8),
        Datatype::BitField { size, .. } => write!(out, "b{}", size * 8),
        Datatype::String { size, .. } => write!(out, "string[{size}]"),
        Datatype::Opaque { size, .. } => write!(out, "opaque[{size}]"),
        Datatype::Enumeration { members, .. } => {
            if members.is_empty() || members.len() > opts.max_enum_names {
                out.write_str("enum")
            } else {
                let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                out.write_str(&names.join("|"))
            }
        }
        Datatype::VariableLength {
            kind: VlenKind::String { .. },
            ..
        } => out.write_str("string[*]"),
        Datatype::VariableLength { base_type, .. } => {
            print_dtype(base_type, out, &PrintOptions::compact())?;
            out.write_str("[*]")
        }
        Datatype::Array {
            base_type,
            dimensions,
        } => {
            print_dtype(base_type, out, &PrintOptions::compact())?;
            for d in dimensions {
                write!(out, "[{d}]")?;
            }
            Ok(())
        }
        Datatype::Compound { .. } => print_dtype(dtype, out, opts),
    }
}

fn line_prefix<W: Write>(
    out: &mut W,
    offset: u64,
    depth: usize,
    newline: bool,
    opts: &PrintOptions,
) -> fmt::Result {
    if newline {
        out.write_char('\n')?;
    }
    if opts.print_offset {
        write!(out, "{:>width$}", offset, width = opts.pad_offset)?;
        write!(out, "{:width$}", "", width = opts.indent_width)?;
    }
    write!(out, "{:width$}", "", width = depth * opts.indent_width)
}

fn longest_member_name(dtype: &DType) -> usize {
    dtype
        .members()
        .iter()
        .map(|m| m.name.len())
        .max()
        .unwrap_or(0)
}

/// Write a description of `dtype` to `out`.
pub fn print_dtype<W: Write>(dtype: &DType, out: &mut W, opts: &PrintOptions) -> fmt::Result {
    if ElemType::of(dtype) != ElemType::Compound {
        return write_atomic(dtype, out, opts);
    }
    let expanded = !opts.compact;
    let mut iter = DTypeIterator::new(dtype);
    // name widths of the open compounds
    let mut widths: Vec<usize> = Vec::new();
    let mut first = true;
    loop {
        match iter.elem_type() {
            ElemType::End => return Ok(()),
            ElemType::CompoundClose => {
                if expanded {
                    line_prefix(out, iter.nested_offset(), iter.depth(), true, opts)?;
                }
                out.write_char('}')?;
                widths.pop();
                first = false;
            }
            elem => {
                let depth = iter.depth();
                if expanded {
                    line_prefix(out, iter.nested_offset(), depth, depth > 0, opts)?;
                } else if !first {
                    out.write_str(", ")?;
                }
                if depth > 0 {
                    let width = if expanded {
                        widths.last().copied().unwrap_or(0)
                    } else {
                        0
                    };
                    write!(out, "{:>width$}: ", iter.name(), width = width)?;
                }
                match iter.dtype() {
                    Some(member) if elem == ElemType::Compound => {
                        out.write_char('{')?;
                        widths.push(longest_member_name(member));
                        first = true;
                    }
                    Some(member) => {
                        write_atomic(member, out, opts)?;
                        first = false;
                    }
                    None => {}
                }
            }
        }
        iter.advance();
    }
}

/// Description of `dtype` with the given options.
pub fn to_string(dtype: &DType, opts: &PrintOptions) -> String {
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = print_dtype(dtype, &mut out, opts);
    out
}

/// Compact [`fmt::Display`] adapter for a datatype.
#[derive(Debug, Clone, Copy)]
pub struct DTypeDisplay<'a> {
    dtype: &'a DType,
    opts: PrintOptions,
}

impl fmt::Display for DTypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        print_dtype(self.dtype, f, &self.opts)
    }
}

pub fn display(dtype: &DType) -> DTypeDisplay<'_> {
    DTypeDisplay {
        dtype,
        opts: PrintOptions::compact(),
    }
}

pub fn display_with(dtype: &DType, opts: PrintOptions) -> DTypeDisplay<'_> {
    DTypeDisplay { dtype, opts }
}
