//! Checking and performing conversions between datatypes.
//!
//! [`check_conversion`] reports, member by member, what a conversion from
//! one datatype to another would lose. [`convert`] performs it:
//!
//! * numbers convert between every integer and float type, clamping to
//!   the target's range; any non-zero value becomes `true`,
//! * enumerations map by member name,
//! * fixed-length and variable-length strings convert into each other,
//!   truncating to fixed lengths,
//! * compounds match members by name; members missing from the source
//!   are zero, members missing from the target are dropped,
//! * arrays with the same number of elements and sequences convert
//!   element by element.
//!
//! Conversions run under [`ConversionCriteria::default()`] unless a
//! `*_with_criteria` variant is used: narrowing is allowed, while reordered
//! arrays and discarded or unknown compound members are rejected.

use std::collections::BTreeMap;
use std::fmt::Write;

use h5composites_format::datatype::{Datatype, DatatypeByteOrder, StringPadding, VlenKind};
use h5composites_format::vl_data::{make_slot, read_slot, slot_payload, VlenHeap};

use crate::buffer::{ElementBlock, H5Buffer, H5BufferConstView, H5BufferView};
use crate::dtype::{DType, DTypeClass, DTypeExt};
use crate::enum_utils::{encode_enum_value, enum_name_of_raw, enum_value_of};
use crate::error::{Error, Result};
use crate::precision::{compare_precision, PrecisionOrder};
use crate::printing::display;
use tracing::debug;

// ---- checking ----

/// One datatype pair found while checking a conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionEntry {
    /// Dotted member path, empty for the top-level type.
    pub path: String,
    pub src: DType,
    pub tgt: DType,
}

/// Everything a conversion would lose or cannot do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionStatus {
    pub impossible: Vec<ConversionEntry>,
    pub narrowing: Vec<ConversionEntry>,
    /// Arrays with the same element count but different dimensions.
    pub reordered_arrays: Vec<ConversionEntry>,
    /// Source members the target does not have.
    pub discarded_members: Vec<String>,
    /// Target members the source does not have.
    pub unknown_members: Vec<String>,
}

/// Which kinds of loss a conversion may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionCriteria {
    pub allow_narrowing: bool,
    pub allow_reordered_arrays: bool,
    pub allow_discarded_members: bool,
    pub allow_unknown_members: bool,
}

impl Default for ConversionCriteria {
    fn default() -> Self {
        Self {
            allow_narrowing: true,
            allow_reordered_arrays: false,
            allow_discarded_members: false,
            allow_unknown_members: false,
        }
    }
}

impl ConversionStatus {
    pub fn is_possible(&self) -> bool {
        self.impossible.is_empty()
    }

    /// No loss of any kind.
    pub fn is_lossless(&self) -> bool {
        *self == ConversionStatus::default()
    }

    pub fn allowed(&self, criteria: &ConversionCriteria) -> bool {
        self.is_possible()
            && (criteria.allow_narrowing || self.narrowing.is_empty())
            && (criteria.allow_reordered_arrays || self.reordered_arrays.is_empty())
            && (criteria.allow_discarded_members || self.discarded_members.is_empty())
            && (criteria.allow_unknown_members || self.unknown_members.is_empty())
    }

    /// Report of every non-empty category, one section each.
    pub fn message(&self) -> String {
        let mut out = String::new();
        let pairs = [
            ("Impossible conversions:", &self.impossible),
            ("Narrowing conversions:", &self.narrowing),
            ("Reordered arrays:", &self.reordered_arrays),
        ];
        for (title, entries) in pairs {
            if entries.is_empty() {
                continue;
            }
            out.push_str(title);
            out.push('\n');
            for e in entries {
                let _ = writeln!(out, "\t{}: {} -> {}", e.path, display(&e.src), display(&e.tgt));
            }
        }
        let names = [
            ("Discarded compound data members:", &self.discarded_members),
            ("Unknown compound data members:", &self.unknown_members),
        ];
        for (title, list) in names {
            if list.is_empty() {
                continue;
            }
            out.push_str(title);
            out.push('\n');
            for name in list {
                let _ = writeln!(out, "\t{name}");
            }
        }
        out
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}.{name}")
    }
}

fn entry(path: &str, src: &DType, tgt: &DType) -> ConversionEntry {
    ConversionEntry {
        path: path.to_owned(),
        src: src.clone(),
        tgt: tgt.clone(),
    }
}

fn is_precision_class(class: DTypeClass) -> bool {
    matches!(
        class,
        DTypeClass::Integer
            | DTypeClass::Float
            | DTypeClass::String
            | DTypeClass::Bitfield
            | DTypeClass::Enum
    )
}

fn check_into(src: &DType, tgt: &DType, path: &str, status: &mut ConversionStatus) {
    if src == tgt {
        return;
    }
    let (sc, tc) = (src.class(), tgt.class());
    if sc == DTypeClass::Opaque || tc == DTypeClass::Opaque {
        if sc != tc || src.size() != tgt.size() {
            status.impossible.push(entry(path, src, tgt));
        }
        return;
    }
    if is_precision_class(sc) && is_precision_class(tc) {
        match compare_precision(tgt, src) {
            None => status.impossible.push(entry(path, src, tgt)),
            Some(PrecisionOrder::Less | PrecisionOrder::Unordered) => {
                status.narrowing.push(entry(path, src, tgt))
            }
            Some(_) => {}
        }
        return;
    }
    if sc != tc {
        status.impossible.push(entry(path, src, tgt));
        return;
    }
    match (src, tgt) {
        (Datatype::Compound { members: sm, .. }, Datatype::Compound { members: tm, .. }) => {
            let source: BTreeMap<&str, &DType> =
                sm.iter().map(|m| (m.name.as_str(), &m.datatype)).collect();
            let target: BTreeMap<&str, &DType> =
                tm.iter().map(|m| (m.name.as_str(), &m.datatype)).collect();
            for (name, s) in &source {
                match target.get(name) {
                    Some(t) => check_into(s, t, &join_path(path, name), status),
                    None => status.discarded_members.push(join_path(path, name)),
                }
            }
            for name in target.keys().filter(|n| !source.contains_key(*n)) {
                status.unknown_members.push(join_path(path, name));
            }
        }
        (Datatype::Array { base_type: sb, .. }, Datatype::Array { base_type: tb, .. }) => {
            if src.array_len() != tgt.array_len() {
                status.impossible.push(entry(path, src, tgt));
                return;
            }
            if src.array_dims() != tgt.array_dims() {
                status.reordered_arrays.push(entry(path, src, tgt));
            }
            check_into(sb, tb, &join_path(path, "ARRDATA"), status);
        }
        (
            Datatype::VariableLength { base_type: sb, .. },
            Datatype::VariableLength { base_type: tb, .. },
        ) => check_into(sb, tb, &join_path(path, "ARRDATA"), status),
        _ => status.impossible.push(entry(path, src, tgt)),
    }
}

/// Report what converting `src` data to `tgt` would lose.
pub fn check_conversion(src: &DType, tgt: &DType) -> ConversionStatus {
    let mut status = ConversionStatus::default();
    check_into(src, tgt, "", &mut status);
    status
}

pub fn can_convert(src: &DType, tgt: &DType, allow_narrowing: bool) -> bool {
    let criteria = ConversionCriteria {
        allow_narrowing,
        ..ConversionCriteria::default()
    };
    check_conversion(src, tgt).allowed(&criteria)
}

/// Fail with the full report when the conversion breaks `criteria`.
pub fn check(src: &DType, tgt: &DType, criteria: &ConversionCriteria) -> Result<()> {
    let status = check_conversion(src, tgt);
    if status.allowed(criteria) {
        Ok(())
    } else {
        Err(Error::DType(status.message()))
    }
}

// ---- numbers ----

/// An integer or float value read from a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Int(v) => v == 0,
            Number::Float(v) => v == 0.0,
        }
    }
}

fn ordered(bytes: &[u8], order: DatatypeByteOrder) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if order == DatatypeByteOrder::BigEndian {
        out.reverse();
    }
    out
}

/// Decode an integer or float; `None` for other classes and unsupported
/// sizes.
pub(crate) fn read_number(dtype: &DType, bytes: &[u8]) -> Option<Number> {
    match dtype {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
            ..
        } if *size as usize <= 8 && bytes.len() >= *size as usize => {
            let n = *size as usize;
            let le = ordered(&bytes[..n], *byte_order);
            let mut raw = [0u8; 8];
            raw[..n].copy_from_slice(&le);
            if *signed && n > 0 && le[n - 1] & 0x80 != 0 {
                for b in &mut raw[n..] {
                    *b = 0xFF;
                }
                Some(Number::Int(i64::from_le_bytes(raw) as i128))
            } else {
                Some(Number::Int(u64::from_le_bytes(raw) as i128))
            }
        }
        Datatype::FloatingPoint {
            size: 4,
            byte_order,
            ..
        } if bytes.len() >= 4 => {
            let le = ordered(&bytes[..4], *byte_order);
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&le);
            Some(Number::Float(f32::from_le_bytes(raw) as f64))
        }
        Datatype::FloatingPoint {
            size: 8,
            byte_order,
            ..
        } if bytes.len() >= 8 => {
            let le = ordered(&bytes[..8], *byte_order);
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&le);
            Some(Number::Float(f64::from_le_bytes(raw)))
        }
        _ => None,
    }
}

fn int_range(size: usize, signed: bool) -> (i128, i128) {
    let bits = (size * 8) as u32;
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

/// Encode `value` into `out`, clamping to the range of `dtype`.
pub(crate) fn write_number(dtype: &DType, out: &mut [u8], value: Number) -> Option<()> {
    if dtype.is_bool() {
        out[0] = u8::from(!value.is_zero());
        return Some(());
    }
    match dtype {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
            ..
        } if (1..=8).contains(size) => {
            let n = *size as usize;
            let (lo, hi) = int_range(n, *signed);
            let v = match value {
                Number::Int(v) => v.clamp(lo, hi),
                Number::Float(f) if f.is_nan() => 0,
                Number::Float(f) => {
                    if f <= lo as f64 {
                        lo
                    } else if f >= hi as f64 {
                        hi
                    } else {
                        f as i128
                    }
                }
            };
            let le = v.to_le_bytes();
            out[..n].copy_from_slice(&ordered(&le[..n], *byte_order));
            Some(())
        }
        Datatype::FloatingPoint {
            size: 4,
            byte_order,
            ..
        } => {
            let le = (value.as_f64() as f32).to_le_bytes();
            out[..4].copy_from_slice(&ordered(&le, *byte_order));
            Some(())
        }
        Datatype::FloatingPoint {
            size: 8,
            byte_order,
            ..
        } => {
            let le = value.as_f64().to_le_bytes();
            out[..8].copy_from_slice(&ordered(&le, *byte_order));
            Some(())
        }
        _ => None,
    }
}

// ---- conversion ----

fn string_bytes<'a>(dtype: &'a DType, data: &'a [u8], heap: &'a VlenHeap) -> Result<&'a [u8]> {
    H5BufferConstView::new(dtype, data, heap)?.string_bytes()
}

fn write_string(dtype: &DType, out: &mut [u8], heap: &mut VlenHeap, bytes: &[u8]) -> Result<()> {
    match dtype {
        Datatype::String { padding, .. } => {
            out.fill(if *padding == StringPadding::SpacePad { b' ' } else { 0 });
            let n = bytes.len().min(out.len());
            out[..n].copy_from_slice(&bytes[..n]);
        }
        _ => {
            let slot = make_slot(heap, bytes.len() as u64, bytes.to_vec());
            out.copy_from_slice(&slot);
        }
    }
    Ok(())
}

fn convert_raw(
    src_t: &DType,
    src: &[u8],
    src_heap: &VlenHeap,
    tgt_t: &DType,
    out: &mut [u8],
    out_heap: &mut VlenHeap,
) -> Result<()> {
    let fail = || Error::InvalidConversion {
        src: src_t.clone(),
        tgt: tgt_t.clone(),
    };
    if src_t == tgt_t {
        let data = h5composites_format::vl_data::copy_elements(src_t, src, src_heap, out_heap)?;
        out.copy_from_slice(&data);
        return Ok(());
    }
    let (sc, tc) = (src_t.class(), tgt_t.class());
    let numeric = |c| matches!(c, DTypeClass::Integer | DTypeClass::Float);
    if numeric(sc) && numeric(tc) {
        let value = read_number(src_t, src).ok_or_else(fail)?;
        return write_number(tgt_t, out, value).ok_or_else(fail);
    }
    match (src_t, tgt_t) {
        (Datatype::Enumeration { .. }, Datatype::Enumeration { .. }) => {
            let name = enum_name_of_raw(src_t, src)?;
            let value = enum_value_of(tgt_t, name).map_err(|_| fail())?;
            encode_enum_value(value, out);
            Ok(())
        }
        (Datatype::BitField { .. }, Datatype::BitField { .. }) => {
            out.fill(0);
            let n = src.len().min(out.len());
            out[..n].copy_from_slice(&src[..n]);
            Ok(())
        }
        (Datatype::Opaque { size: a, .. }, Datatype::Opaque { size: b, .. }) if a == b => {
            out.copy_from_slice(src);
            Ok(())
        }
        _ if sc == DTypeClass::String && tc == DTypeClass::String => {
            let bytes = string_bytes(src_t, src, src_heap)?;
            write_string(tgt_t, out, out_heap, bytes)
        }
        (Datatype::Compound { .. }, Datatype::Compound { members, .. }) => {
            for m in members {
                let t0 = m.byte_offset as usize;
                let Some(sm) = src_t.member_named(&m.name) else {
                    out[t0..t0 + m.datatype.size()].fill(0);
                    continue;
                };
                let s0 = sm.byte_offset as usize;
                convert_raw(
                    &sm.datatype,
                    &src[s0..s0 + sm.datatype.size()],
                    src_heap,
                    &m.datatype,
                    &mut out[t0..t0 + m.datatype.size()],
                    out_heap,
                )?;
            }
            Ok(())
        }
        (Datatype::Array { base_type: sb, .. }, Datatype::Array { base_type: tb, .. })
            if src_t.array_len() == tgt_t.array_len() =>
        {
            let (ss, ts) = (sb.size(), tb.size());
            for i in 0..src_t.array_len().unwrap_or(0) as usize {
                convert_raw(
                    sb,
                    &src[i * ss..(i + 1) * ss],
                    src_heap,
                    tb,
                    &mut out[i * ts..(i + 1) * ts],
                    out_heap,
                )?;
            }
            Ok(())
        }
        (
            Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type: sb,
            },
            Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type: tb,
            },
        ) => {
            let (count, _) = read_slot(src)?;
            let payload = slot_payload(src_heap, src)?;
            let (ss, ts) = (sb.size(), tb.size());
            let n = count as usize;
            if payload.len() < n * ss {
                return Err(fail());
            }
            let mut converted = vec![0u8; n * ts];
            for i in 0..n {
                convert_raw(
                    sb,
                    &payload[i * ss..(i + 1) * ss],
                    src_heap,
                    tb,
                    &mut converted[i * ts..(i + 1) * ts],
                    out_heap,
                )?;
            }
            let slot = make_slot(out_heap, count, converted);
            out.copy_from_slice(&slot);
            Ok(())
        }
        _ => Err(fail()),
    }
}

/// Fail with [`Error::InvalidConversion`] when converting `src` to `tgt`
/// breaks `criteria`.
fn require_allowed(src: &DType, tgt: &DType, criteria: &ConversionCriteria) -> Result<()> {
    if src == tgt {
        return Ok(());
    }
    let status = check_conversion(src, tgt);
    if status.allowed(criteria) {
        return Ok(());
    }
    debug!(
        src = %crate::printing::display(src),
        tgt = %crate::printing::display(tgt),
        "rejected conversion:\n{}",
        status.message()
    );
    Err(Error::InvalidConversion {
        src: src.clone(),
        tgt: tgt.clone(),
    })
}

/// Convert `src` into the existing contents of `dst`, under the default
/// [`ConversionCriteria`].
pub fn convert_into(src: &H5BufferConstView<'_>, dst: &mut H5BufferView<'_>) -> Result<()> {
    convert_into_with_criteria(src, dst, &ConversionCriteria::default())
}

pub fn convert_into_with_criteria(
    src: &H5BufferConstView<'_>,
    dst: &mut H5BufferView<'_>,
    criteria: &ConversionCriteria,
) -> Result<()> {
    let target = dst.dtype();
    require_allowed(src.dtype(), target, criteria)?;
    let (out, heap) = dst.parts_mut();
    convert_raw(src.dtype(), src.bytes(), src.heap(), target, out, heap)
}

/// A new buffer holding `src` converted to `target`, under the default
/// [`ConversionCriteria`].
pub fn convert(src: &H5BufferConstView<'_>, target: &DType) -> Result<H5Buffer> {
    convert_with_criteria(src, target, &ConversionCriteria::default())
}

pub fn convert_with_criteria(
    src: &H5BufferConstView<'_>,
    target: &DType,
    criteria: &ConversionCriteria,
) -> Result<H5Buffer> {
    let mut out = H5Buffer::new(target.clone());
    convert_into_with_criteria(src, &mut out.view_mut(), criteria)?;
    Ok(out)
}

/// Convert every element of a block.
pub fn convert_block(block: &ElementBlock, target: &DType) -> Result<ElementBlock> {
    if block.dtype() == target {
        return Ok(block.clone());
    }
    require_allowed(block.dtype(), target, &ConversionCriteria::default())?;
    let size = target.size();
    let mut data = vec![0u8; block.len() * size];
    let mut heap = VlenHeap::new();
    for (i, element) in block.iter().enumerate() {
        convert_raw(
            element.dtype(),
            element.bytes(),
            element.heap(),
            target,
            &mut data[i * size..(i + 1) * size],
            &mut heap,
        )?;
    }
    ElementBlock::new(target.clone(), block.len(), data, heap)
}
