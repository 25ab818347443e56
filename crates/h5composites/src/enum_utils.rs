//! Enumeration datatypes: names, values and the [`H5Enum`] trait.

use h5composites_format::datatype::{Datatype, EnumMember};
use h5composites_format::vl_data::VlenHeap;

use crate::buffer::{H5Buffer, H5BufferConstView, H5BufferView};
use crate::dtype::{DType, DTypeExt};
use crate::error::{Error, Result};

/// A fieldless Rust enum stored as an HDF5 enumeration.
///
/// Usually derived with `#[derive(H5Enum)]`.
pub trait H5Enum: Sized + Copy {
    fn static_h5_dtype() -> DType;

    fn to_name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

fn enum_members(dtype: &DType) -> Result<(&DType, &[EnumMember])> {
    match dtype {
        Datatype::Enumeration { base_type, members } => Ok((base_type, members)),
        other => Err(Error::DType(format!(
            "{} is not an enumeration",
            crate::printing::display(other)
        ))),
    }
}

/// Names of an enumeration in definition order.
pub fn enum_names(dtype: &DType) -> Result<Vec<&str>> {
    Ok(enum_members(dtype)?
        .1
        .iter()
        .map(|m| m.name.as_str())
        .collect())
}

/// Decode an enum member's raw bytes into an integer.
pub fn decode_enum_value(base: &DType, raw: &[u8]) -> i64 {
    let signed = matches!(base, Datatype::FixedPoint { signed: true, .. });
    let mut bytes = [0u8; 8];
    let n = raw.len().min(8);
    bytes[..n].copy_from_slice(&raw[..n]);
    if signed && n > 0 && n < 8 && raw[n - 1] & 0x80 != 0 {
        for b in &mut bytes[n..] {
            *b = 0xFF;
        }
    }
    i64::from_le_bytes(bytes)
}

/// Value of the member called `name`.
pub fn enum_value_of(dtype: &DType, name: &str) -> Result<i64> {
    let (base, members) = enum_members(dtype)?;
    members
        .iter()
        .find(|m| m.name == name)
        .map(|m| decode_enum_value(base, &m.value))
        .ok_or_else(|| Error::DType(format!("'{name}' is not a member of the enumeration")))
}

/// A value of the enumeration `dtype` holding the member `name`, in the
/// enumeration's own base type.
pub fn enum_buffer(dtype: &DType, name: &str) -> Result<H5Buffer> {
    let (_, members) = enum_members(dtype)?;
    let member = members
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| Error::DType(format!("'{name}' is not a member of the enumeration")))?;
    H5Buffer::from_parts(dtype.clone(), member.value.clone(), VlenHeap::new())
}

/// Name of the member whose raw bytes are `raw`.
pub fn enum_name_of_raw<'a>(dtype: &'a DType, raw: &[u8]) -> Result<&'a str> {
    let (base, members) = enum_members(dtype)?;
    let width = base.size();
    members
        .iter()
        .find(|m| m.value.as_slice() == raw.get(..width).unwrap_or(raw))
        .map(|m| m.name.as_str())
        .ok_or_else(|| {
            Error::DType(format!(
                "Value {} is not a member of the enumeration",
                decode_enum_value(base, raw)
            ))
        })
}

/// Name of the member with integer value `value`.
pub fn enum_name_of(dtype: &DType, value: i64) -> Result<&str> {
    let (base, members) = enum_members(dtype)?;
    members
        .iter()
        .find(|m| decode_enum_value(base, &m.value) == value)
        .map(|m| m.name.as_str())
        .ok_or_else(|| Error::DType(format!("Value {value} is not a member of the enumeration")))
}

/// Encode `value` into `out`, whose length is the base type's size.
pub fn encode_enum_value(value: i64, out: &mut [u8]) {
    let bytes = value.to_le_bytes();
    let n = out.len().min(8);
    out[..n].copy_from_slice(&bytes[..n]);
    let fill = if value < 0 { 0xFF } else { 0 };
    for b in &mut out[n..] {
        *b = fill;
    }
}

/// Write an [`H5Enum`] value into a buffer of any enumeration type that
/// knows its name.
pub fn write_enum<E: H5Enum>(value: &E, view: &mut H5BufferView<'_>) -> Result<()> {
    let name = value.to_name();
    let number = enum_value_of(view.dtype(), name)?;
    encode_enum_value(number, view.bytes_mut());
    Ok(())
}

/// Read an [`H5Enum`] value from any enumeration buffer, matching by name.
pub fn read_enum<E: H5Enum>(view: &H5BufferConstView<'_>) -> Result<E> {
    let name = enum_name_of_raw(view.dtype(), view.bytes())?;
    E::from_name(name).ok_or_else(|| Error::InvalidConversion {
        src: view.dtype().clone(),
        tgt: E::static_h5_dtype(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5composites_format::type_builders::EnumTypeBuilder;

    fn colours() -> DType {
        EnumTypeBuilder::new(DType::native_i8())
            .value("RED", -1)
            .value("GREEN", 4)
            .value("BLUE", 9)
            .build()
    }

    #[test]
    fn names_and_values() {
        let dt = colours();
        assert_eq!(enum_names(&dt).unwrap(), ["RED", "GREEN", "BLUE"]);
        assert_eq!(enum_value_of(&dt, "RED").unwrap(), -1);
        assert_eq!(enum_name_of(&dt, 9).unwrap(), "BLUE");
        assert_eq!(enum_name_of_raw(&dt, &[4]).unwrap(), "GREEN");
        assert!(enum_value_of(&dt, "PINK").is_err());
        assert!(enum_names(&DType::native_i8()).is_err());
    }

    #[test]
    fn encoding_sign_extends() {
        let mut out = [0u8; 2];
        encode_enum_value(-2, &mut out);
        assert_eq!(out, [0xFE, 0xFF]);
        assert_eq!(decode_enum_value(&DType::native_i16(), &out), -2);
        assert_eq!(decode_enum_value(&DType::native_u16(), &out), 0xFFFE);
    }
}
