//! HDF5 Attribute message (message type 0x000C).
//!
//! `raw_data` holds the value exactly as stored in the file, so
//! variable-length members are still global heap references here.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::superblock::ensure_len;

/// A parsed attribute message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub raw_data: Vec<u8>,
}

fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

fn extract_name(raw: &[u8]) -> Result<String, FormatError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    core::str::from_utf8(&raw[..end])
        .map(String::from)
        .map_err(|_| FormatError::InvalidUtf8)
}

impl AttributeMessage {
    /// Parse a version 1, 2 or 3 attribute message.
    pub fn parse(data: &[u8], length_size: u8) -> Result<AttributeMessage, FormatError> {
        ensure_len(data, 0, 8)?;
        let version = data[0];
        let flags = data[1];
        if !(1..=3).contains(&version) {
            return Err(FormatError::InvalidAttributeVersion(version));
        }
        if version > 1 && flags & 0x03 != 0 {
            return Err(FormatError::UnsupportedFeature("shared attribute messages"));
        }

        let name_size = u16::from_le_bytes([data[2], data[3]]) as usize;
        let datatype_size = u16::from_le_bytes([data[4], data[5]]) as usize;
        let dataspace_size = u16::from_le_bytes([data[6], data[7]]) as usize;
        // v1 pads every field to 8 bytes; v3 adds a name encoding byte
        let step = |n: usize| if version == 1 { pad8(n) } else { n };
        let mut pos = if version == 3 { 9 } else { 8 };

        ensure_len(data, pos, name_size)?;
        let name = extract_name(&data[pos..pos + name_size])?;
        pos += step(name_size);

        ensure_len(data, pos, datatype_size)?;
        let (datatype, _) = Datatype::parse(&data[pos..pos + datatype_size])?;
        pos += step(datatype_size);

        ensure_len(data, pos, dataspace_size)?;
        let dataspace = Dataspace::parse(&data[pos..pos + dataspace_size], length_size)?;
        pos += step(dataspace_size);

        let n_bytes = dataspace.num_elements() as usize * datatype.type_size() as usize;
        ensure_len(data, pos, n_bytes)?;
        Ok(AttributeMessage {
            name,
            datatype,
            dataspace,
            raw_data: data[pos..pos + n_bytes].to_vec(),
        })
    }

    /// Serialize as a version 3 message with a UTF-8 name.
    pub fn serialize(&self) -> Vec<u8> {
        let dt = self.datatype.serialize();
        let ds = self.dataspace.serialize();
        let name_len = self.name.len() + 1;

        let mut buf = Vec::with_capacity(9 + name_len + dt.len() + ds.len() + self.raw_data.len());
        buf.push(3);
        buf.push(0);
        buf.extend_from_slice(&(name_len as u16).to_le_bytes());
        buf.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&dt);
        buf.extend_from_slice(&ds);
        buf.extend_from_slice(&self.raw_data);
        buf
    }
}
