//! HDF5 Datatype message (message type 0x0003).
//!
//! Covers the classes h5composites stores: fixed-point, floating-point,
//! string, bitfield, opaque, compound, enumeration, variable-length and
//! array. Parsing accepts every message version the HDF5 library writes
//! for these classes. Serialization uses version 1 for atomic classes and
//! version 3 for compound, enumeration and array types.

#[cfg(not(feature = "std"))]
use alloc::{borrow::ToOwned, boxed::Box, string::String, vec, vec::Vec};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// How the most significant mantissa bit is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MantissaNormalization {
    /// No normalization.
    None,
    /// The MSB of the mantissa is always set and stored.
    MsbSet,
    /// The MSB of the mantissa is always set and not stored (IEEE 754).
    Implied,
}

/// What a variable-length type holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VlenKind {
    /// A sequence of base-type elements.
    Sequence,
    /// A string of characters.
    String {
        padding: StringPadding,
        charset: CharacterSet,
    },
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u64,
    /// Member datatype.
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// Raw value bytes (length = base type size).
    pub value: Vec<u8>,
}

/// Parsed HDF5 datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// Class 0: integers.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: floating point numbers.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        bit_offset: u16,
        bit_precision: u16,
        sign_location: u8,
        normalization: MantissaNormalization,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 3: fixed-length strings.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4: bit fields.
    BitField {
        size: u32,
        byte_order: DatatypeByteOrder,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 5: uninterpreted bytes with an ASCII tag.
    Opaque { size: u32, tag: String },
    /// Class 6: struct-like records.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 8: named integer values.
    Enumeration {
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9: variable-length sequences and strings.
    VariableLength {
        kind: VlenKind,
        base_type: Box<Datatype>,
    },
    /// Class 10: fixed-size multi-dimensional arrays.
    Array {
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

/// Size of a variable-length slot, both in memory and in files.
pub const VLEN_SLOT_SIZE: u32 = 16;

fn ensure_len(data: &[u8], offset: usize, needed: usize) -> Result<(), FormatError> {
    if offset + needed > data.len() {
        Err(FormatError::UnexpectedEof {
            expected: offset + needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

fn parse_string_padding(val: u8) -> Result<StringPadding, FormatError> {
    match val {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(FormatError::InvalidStringPadding(val)),
    }
}

fn padding_bits(padding: StringPadding) -> u8 {
    match padding {
        StringPadding::NullTerminate => 0,
        StringPadding::NullPad => 1,
        StringPadding::SpacePad => 2,
    }
}

fn parse_charset(val: u8) -> Result<CharacterSet, FormatError> {
    match val {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(FormatError::InvalidCharacterSet(val)),
    }
}

fn charset_bits(charset: CharacterSet) -> u8 {
    match charset {
        CharacterSet::Ascii => 0,
        CharacterSet::Utf8 => 1,
    }
}

fn byte_order_bit(order: DatatypeByteOrder) -> u8 {
    match order {
        DatatypeByteOrder::LittleEndian => 0,
        DatatypeByteOrder::BigEndian => 1,
    }
}

/// Read a null-terminated name starting at `offset`.
/// Returns the name and the bytes consumed including the terminator.
fn read_name(data: &[u8], offset: usize) -> Result<(String, usize), FormatError> {
    let remaining = data.get(offset..).ok_or(FormatError::UnexpectedEof {
        expected: offset,
        available: data.len(),
    })?;
    let nul = remaining
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::UnexpectedEof {
            expected: offset + remaining.len() + 1,
            available: data.len(),
        })?;
    let name = core::str::from_utf8(&remaining[..nul])
        .map_err(|_| FormatError::InvalidUtf8)?
        .to_owned();
    Ok((name, nul + 1))
}

fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// Bytes used to store member offsets in a version 3 compound of `size` bytes.
fn member_offset_width(size: u32) -> usize {
    match size {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn read_le(data: &[u8], offset: usize, nbytes: usize) -> Result<u64, FormatError> {
    ensure_len(data, offset, nbytes)?;
    Ok(data[offset..offset + nbytes]
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

fn header(class: u8, version: u8, bits: [u8; 3], size: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[0] = (class & 0x0F) | (version << 4);
    buf[1..4].copy_from_slice(&bits);
    LittleEndian::write_u32(&mut buf[4..8], size);
    buf
}

impl Datatype {
    /// Parse a datatype message.
    ///
    /// Returns `(Datatype, bytes_consumed)` so members can be parsed
    /// recursively.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize), FormatError> {
        ensure_len(data, 0, 8)?;
        let class_id = data[0] & 0x0F;
        let version = data[0] >> 4;
        let (bf0, bf1) = (data[1], data[2]);
        let size = LittleEndian::read_u32(&data[4..8]);
        let mut pos = 8;

        let byte_order = if bf0 & 0x01 == 0 {
            DatatypeByteOrder::LittleEndian
        } else {
            DatatypeByteOrder::BigEndian
        };

        match class_id {
            0 => {
                ensure_len(data, pos, 4)?;
                let dt = Datatype::FixedPoint {
                    size,
                    byte_order,
                    signed: bf0 & 0x08 != 0,
                    bit_offset: LittleEndian::read_u16(&data[pos..]),
                    bit_precision: LittleEndian::read_u16(&data[pos + 2..]),
                };
                Ok((dt, pos + 4))
            }
            1 => {
                ensure_len(data, pos, 12)?;
                if bf0 & 0x40 != 0 {
                    return Err(FormatError::UnsupportedFeature("VAX floating point order"));
                }
                let normalization = match (bf0 >> 4) & 0x03 {
                    0 => MantissaNormalization::None,
                    1 => MantissaNormalization::MsbSet,
                    _ => MantissaNormalization::Implied,
                };
                let p = &data[pos..pos + 12];
                let dt = Datatype::FloatingPoint {
                    size,
                    byte_order,
                    bit_offset: LittleEndian::read_u16(&p[0..2]),
                    bit_precision: LittleEndian::read_u16(&p[2..4]),
                    sign_location: bf1,
                    normalization,
                    exponent_location: p[4],
                    exponent_size: p[5],
                    mantissa_location: p[6],
                    mantissa_size: p[7],
                    exponent_bias: LittleEndian::read_u32(&p[8..12]),
                };
                Ok((dt, pos + 12))
            }
            3 => {
                let padding = parse_string_padding(bf0 & 0x0F)?;
                let charset = parse_charset((bf0 >> 4) & 0x0F)?;
                Ok((
                    Datatype::String {
                        size,
                        padding,
                        charset,
                    },
                    pos,
                ))
            }
            4 => {
                ensure_len(data, pos, 4)?;
                let dt = Datatype::BitField {
                    size,
                    byte_order,
                    bit_offset: LittleEndian::read_u16(&data[pos..]),
                    bit_precision: LittleEndian::read_u16(&data[pos + 2..]),
                };
                Ok((dt, pos + 4))
            }
            5 => {
                let tag_len = bf0 as usize;
                ensure_len(data, pos, tag_len)?;
                let raw = &data[pos..pos + tag_len];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let tag = core::str::from_utf8(&raw[..end])
                    .map_err(|_| FormatError::InvalidUtf8)?
                    .to_owned();
                Ok((Datatype::Opaque { size, tag }, pos + pad8(tag_len)))
            }
            6 => {
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    let (name, used) = read_name(data, pos)?;
                    let member = match version {
                        3 => {
                            pos += used;
                            let width = member_offset_width(size);
                            let byte_offset = read_le(data, pos, width)?;
                            pos += width;
                            let (datatype, consumed) = Datatype::parse(&data[pos..])?;
                            pos += consumed;
                            CompoundMember {
                                name,
                                byte_offset,
                                datatype,
                            }
                        }
                        1 | 2 => {
                            pos += pad8(used);
                            let byte_offset = read_le(data, pos, 4)?;
                            pos += 4;
                            let mut dims = Vec::new();
                            if version == 1 {
                                // rank(1) reserved(3) permutation(4) reserved(4) dims(4x4)
                                ensure_len(data, pos, 28)?;
                                let rank = data[pos] as usize;
                                for d in 0..rank.min(4) {
                                    let at = pos + 12 + 4 * d;
                                    dims.push(LittleEndian::read_u32(&data[at..at + 4]));
                                }
                                pos += 28;
                            }
                            let (mut datatype, consumed) = Datatype::parse(&data[pos..])?;
                            pos += consumed;
                            if !dims.is_empty() {
                                datatype = Datatype::Array {
                                    base_type: Box::new(datatype),
                                    dimensions: dims,
                                };
                            }
                            CompoundMember {
                                name,
                                byte_offset,
                                datatype,
                            }
                        }
                        _ => {
                            return Err(FormatError::InvalidDatatypeVersion {
                                class: class_id,
                                version,
                            })
                        }
                    };
                    members.push(member);
                }
                Ok((Datatype::Compound { size, members }, pos))
            }
            8 => {
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let (base_type, consumed) = Datatype::parse(&data[pos..])?;
                pos += consumed;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    let (name, used) = read_name(data, pos)?;
                    pos += if version >= 3 { used } else { pad8(used) };
                    names.push(name);
                }
                let width = base_type.type_size() as usize;
                ensure_len(data, pos, width * count)?;
                let members = names
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| EnumMember {
                        name,
                        value: data[pos + i * width..pos + (i + 1) * width].to_vec(),
                    })
                    .collect();
                pos += width * count;
                Ok((
                    Datatype::Enumeration {
                        base_type: Box::new(base_type),
                        members,
                    },
                    pos,
                ))
            }
            9 => {
                let kind = if bf0 & 0x0F == 1 {
                    VlenKind::String {
                        padding: parse_string_padding((bf0 >> 4) & 0x0F)?,
                        charset: parse_charset(bf1 & 0x0F)?,
                    }
                } else {
                    VlenKind::Sequence
                };
                let (base_type, consumed) = Datatype::parse(&data[pos..])?;
                Ok((
                    Datatype::VariableLength {
                        kind,
                        base_type: Box::new(base_type),
                    },
                    pos + consumed,
                ))
            }
            10 => {
                ensure_len(data, pos, 1)?;
                let rank = data[pos] as usize;
                pos += match version {
                    2 => 4,
                    3 => 1,
                    _ => {
                        return Err(FormatError::InvalidDatatypeVersion {
                            class: class_id,
                            version,
                        })
                    }
                };
                ensure_len(data, pos, rank * 4)?;
                let dimensions = (0..rank)
                    .map(|d| LittleEndian::read_u32(&data[pos + 4 * d..]))
                    .collect();
                pos += rank * 4;
                if version == 2 {
                    // permutation indices, always the identity
                    pos += rank * 4;
                }
                let (base_type, consumed) = Datatype::parse(data.get(pos..).unwrap_or(&[]))?;
                Ok((
                    Datatype::Array {
                        base_type: Box::new(base_type),
                        dimensions,
                    },
                    pos + consumed,
                ))
            }
            2 | 7 => Err(FormatError::UnsupportedFeature(if class_id == 2 {
                "time datatype"
            } else {
                "reference datatype"
            })),
            _ => Err(FormatError::InvalidDatatypeClass(class_id)),
        }
    }

    /// Serialize to datatype message bytes.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let bf0 = byte_order_bit(*byte_order) | if *signed { 0x08 } else { 0 };
                let mut buf = header(0, 1, [bf0, 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::FloatingPoint {
                size,
                byte_order,
                bit_offset,
                bit_precision,
                sign_location,
                normalization,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                let norm = match normalization {
                    MantissaNormalization::None => 0,
                    MantissaNormalization::MsbSet => 1,
                    MantissaNormalization::Implied => 2,
                };
                let bf0 = byte_order_bit(*byte_order) | (norm << 4);
                let mut buf = header(1, 1, [bf0, *sign_location, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf.extend_from_slice(&[
                    *exponent_location,
                    *exponent_size,
                    *mantissa_location,
                    *mantissa_size,
                ]);
                buf.extend_from_slice(&exponent_bias.to_le_bytes());
                buf
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = padding_bits(*padding) | (charset_bits(*charset) << 4);
                header(3, 1, [bf0, 0, 0], *size)
            }
            Datatype::BitField {
                size,
                byte_order,
                bit_offset,
                bit_precision,
            } => {
                let mut buf = header(4, 1, [byte_order_bit(*byte_order), 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::Opaque { size, tag } => {
                let padded = pad8(tag.len() + 1).min(0xF8);
                let mut buf = header(5, 1, [padded as u8, 0, 0], *size);
                let mut tag_bytes = vec![0u8; padded];
                let n = tag.len().min(padded - 1);
                tag_bytes[..n].copy_from_slice(&tag.as_bytes()[..n]);
                buf.extend_from_slice(&tag_bytes);
                buf
            }
            Datatype::Compound { size, members } => {
                let [lo, hi] = (members.len() as u16).to_le_bytes();
                let mut buf = header(6, 3, [lo, hi, 0], *size);
                let width = member_offset_width(*size);
                for m in members {
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.push(0);
                    buf.extend_from_slice(&m.byte_offset.to_le_bytes()[..width]);
                    buf.extend_from_slice(&m.datatype.serialize());
                }
                buf
            }
            Datatype::Enumeration { base_type, members } => {
                let [lo, hi] = (members.len() as u16).to_le_bytes();
                let mut buf = header(8, 3, [lo, hi, 0], base_type.type_size());
                buf.extend_from_slice(&base_type.serialize());
                for m in members {
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.push(0);
                }
                for m in members {
                    buf.extend_from_slice(&m.value);
                }
                buf
            }
            Datatype::VariableLength { kind, base_type } => {
                let (bf0, bf1) = match kind {
                    VlenKind::Sequence => (0, 0),
                    VlenKind::String { padding, charset } => {
                        (0x01 | (padding_bits(*padding) << 4), charset_bits(*charset))
                    }
                };
                let mut buf = header(9, 1, [bf0, bf1, 0], VLEN_SLOT_SIZE);
                buf.extend_from_slice(&base_type.serialize());
                buf
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let mut buf = header(10, 3, [0, 0, 0], self.type_size());
                buf.push(dimensions.len() as u8);
                for d in dimensions {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                buf.extend_from_slice(&base_type.serialize());
                buf
            }
        }
    }

    /// Size in bytes of one element of this type.
    pub fn type_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. } => *size,
            Datatype::Enumeration { base_type, .. } => base_type.type_size(),
            Datatype::VariableLength { .. } => VLEN_SLOT_SIZE,
            Datatype::Array {
                base_type,
                dimensions,
            } => base_type.type_size() * dimensions.iter().product::<u32>(),
        }
    }

    /// HDF5 class id of this type.
    pub fn class_id(&self) -> u8 {
        match self {
            Datatype::FixedPoint { .. } => 0,
            Datatype::FloatingPoint { .. } => 1,
            Datatype::String { .. } => 3,
            Datatype::BitField { .. } => 4,
            Datatype::Opaque { .. } => 5,
            Datatype::Compound { .. } => 6,
            Datatype::Enumeration { .. } => 8,
            Datatype::VariableLength { .. } => 9,
            Datatype::Array { .. } => 10,
        }
    }

    /// True for variable-length strings.
    pub fn is_variable_string(&self) -> bool {
        matches!(
            self,
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            }
        )
    }

    /// True if any part of this type is stored out-of-line.
    pub fn contains_vlen(&self) -> bool {
        match self {
            Datatype::VariableLength { .. } => true,
            Datatype::Compound { members, .. } => {
                members.iter().any(|m| m.datatype.contains_vlen())
            }
            Datatype::Array { base_type, .. } => base_type.contains_vlen(),
            _ => false,
        }
    }

    // ---- Native constructors ----

    fn native_int(size: u32, signed: bool) -> Datatype {
        Datatype::FixedPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    pub fn native_i8() -> Datatype {
        Self::native_int(1, true)
    }
    pub fn native_i16() -> Datatype {
        Self::native_int(2, true)
    }
    pub fn native_i32() -> Datatype {
        Self::native_int(4, true)
    }
    pub fn native_i64() -> Datatype {
        Self::native_int(8, true)
    }
    pub fn native_u8() -> Datatype {
        Self::native_int(1, false)
    }
    pub fn native_u16() -> Datatype {
        Self::native_int(2, false)
    }
    pub fn native_u32() -> Datatype {
        Self::native_int(4, false)
    }
    pub fn native_u64() -> Datatype {
        Self::native_int(8, false)
    }

    /// Booleans: one unsigned byte with a single bit of precision.
    pub fn native_bool() -> Datatype {
        Datatype::FixedPoint {
            size: 1,
            byte_order: DatatypeByteOrder::LittleEndian,
            signed: false,
            bit_offset: 0,
            bit_precision: 1,
        }
    }

    pub fn native_f32() -> Datatype {
        Datatype::FloatingPoint {
            size: 4,
            byte_order: DatatypeByteOrder::LittleEndian,
            bit_offset: 0,
            bit_precision: 32,
            sign_location: 31,
            normalization: MantissaNormalization::Implied,
            exponent_location: 23,
            exponent_size: 8,
            mantissa_location: 0,
            mantissa_size: 23,
            exponent_bias: 127,
        }
    }

    pub fn native_f64() -> Datatype {
        Datatype::FloatingPoint {
            size: 8,
            byte_order: DatatypeByteOrder::LittleEndian,
            bit_offset: 0,
            bit_precision: 64,
            sign_location: 63,
            normalization: MantissaNormalization::Implied,
            exponent_location: 52,
            exponent_size: 11,
            mantissa_location: 0,
            mantissa_size: 52,
            exponent_bias: 1023,
        }
    }

    /// Bitfield of `size` bytes using every bit.
    pub fn native_bitfield(size: u32) -> Datatype {
        Datatype::BitField {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    /// Null-terminated ASCII string of `size` bytes.
    pub fn fixed_string(size: u32) -> Datatype {
        Datatype::String {
            size,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
        }
    }

    /// Variable-length UTF-8 string.
    pub fn variable_string() -> Datatype {
        Datatype::VariableLength {
            kind: VlenKind::String {
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Utf8,
            },
            base_type: Box::new(Self::native_u8()),
        }
    }

    /// Variable-length sequence of `base`.
    pub fn vlen(base: Datatype) -> Datatype {
        Datatype::VariableLength {
            kind: VlenKind::Sequence,
            base_type: Box::new(base),
        }
    }

    /// Array of `base` with the given dimensions.
    pub fn array(base: Datatype, dimensions: &[u32]) -> Datatype {
        Datatype::Array {
            base_type: Box::new(base),
            dimensions: dimensions.to_vec(),
        }
    }

    /// Opaque block of `size` bytes.
    pub fn opaque(size: u32, tag: &str) -> Datatype {
        Datatype::Opaque {
            size,
            tag: tag.to_owned(),
        }
    }
}
