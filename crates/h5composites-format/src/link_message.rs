//! HDF5 Link (0x0006) and Link Info (0x0002) messages.
//!
//! Groups are written with compact link storage: one Link Info message
//! without heap or index addresses, followed by one Link message per child.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::error::FormatError;
use crate::superblock::{ensure_len, is_undefined, read_sized};

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Object header address in this file.
    Hard { address: u64 },
    /// Path to another object in this file.
    Soft { path: String },
    /// Object in another file.
    External { filename: String, path: String },
}

/// A parsed Link message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    pub target: LinkTarget,
    pub creation_order: Option<u64>,
}

fn utf8(bytes: &[u8]) -> Result<String, FormatError> {
    core::str::from_utf8(bytes)
        .map(String::from)
        .map_err(|_| FormatError::InvalidUtf8)
}

fn read_short_string(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, FormatError> {
    ensure_len(data, *pos, 2)?;
    let len = u16::from_le_bytes([data[*pos], data[*pos + 1]]) as usize;
    *pos += 2;
    ensure_len(data, *pos, len)?;
    let out = data[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

impl LinkMessage {
    /// A hard link to the object header at `address`.
    pub fn hard(name: &str, address: u64) -> Self {
        LinkMessage {
            name: String::from(name),
            target: LinkTarget::Hard { address },
            creation_order: None,
        }
    }

    /// Parse a Link message. `offset_size` sizes hard link addresses.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkMessage, FormatError> {
        ensure_len(data, 0, 2)?;
        if data[0] != 1 {
            return Err(FormatError::InvalidLinkVersion(data[0]));
        }
        let flags = data[1];
        let mut pos = 2;

        let link_type = if flags & 0x08 != 0 {
            ensure_len(data, pos, 1)?;
            pos += 1;
            data[pos - 1]
        } else {
            0
        };
        let creation_order = if flags & 0x04 != 0 {
            let v = read_sized(data, pos, 8)?;
            pos += 8;
            Some(v)
        } else {
            None
        };
        if flags & 0x10 != 0 {
            // name character set; names are decoded as UTF-8 either way
            ensure_len(data, pos, 1)?;
            pos += 1;
        }

        let width = 1u8 << (flags & 0x03);
        let name_len = read_sized(data, pos, width)? as usize;
        pos += width as usize;
        ensure_len(data, pos, name_len)?;
        let name = utf8(&data[pos..pos + name_len])?;
        pos += name_len;

        let target = match link_type {
            0 => LinkTarget::Hard {
                address: read_sized(data, pos, offset_size)?,
            },
            1 => LinkTarget::Soft {
                path: utf8(&read_short_string(data, &mut pos)?)?,
            },
            64 => {
                let raw = read_short_string(data, &mut pos)?;
                // flags byte, then two null-terminated strings
                let mut parts = raw.get(1..).unwrap_or(&[]).split(|&b| b == 0);
                let filename = utf8(parts.next().unwrap_or(&[]))?;
                let path = utf8(parts.next().unwrap_or(&[]))?;
                LinkTarget::External { filename, path }
            }
            other => return Err(FormatError::InvalidLinkType(other)),
        };

        Ok(LinkMessage {
            name,
            target,
            creation_order,
        })
    }

    /// Serialize with 8-byte addresses and a UTF-8 name.
    pub fn serialize(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let (size_bits, width) = match name.len() {
            0..=0xFF => (0u8, 1usize),
            0x100..=0xFFFF => (1, 2),
            _ => (2, 4),
        };
        let link_type = match self.target {
            LinkTarget::Hard { .. } => None,
            LinkTarget::Soft { .. } => Some(1u8),
            LinkTarget::External { .. } => Some(64u8),
        };

        let mut flags = size_bits | 0x10;
        if self.creation_order.is_some() {
            flags |= 0x04;
        }
        if link_type.is_some() {
            flags |= 0x08;
        }

        let mut buf = Vec::with_capacity(16 + name.len());
        buf.push(1);
        buf.push(flags);
        if let Some(t) = link_type {
            buf.push(t);
        }
        if let Some(co) = self.creation_order {
            buf.extend_from_slice(&co.to_le_bytes());
        }
        buf.push(1);
        buf.extend_from_slice(&(name.len() as u64).to_le_bytes()[..width]);
        buf.extend_from_slice(name);

        match &self.target {
            LinkTarget::Hard { address } => buf.extend_from_slice(&address.to_le_bytes()),
            LinkTarget::Soft { path } => {
                buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
                buf.extend_from_slice(path.as_bytes());
            }
            LinkTarget::External { filename, path } => {
                let len = 1 + filename.len() + 1 + path.len() + 1;
                buf.extend_from_slice(&(len as u16).to_le_bytes());
                buf.push(0);
                buf.extend_from_slice(filename.as_bytes());
                buf.push(0);
                buf.extend_from_slice(path.as_bytes());
                buf.push(0);
            }
        }
        buf
    }
}

/// Link Info message. Only compact storage is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfoMessage {
    /// Fractal heap address when links are stored densely.
    pub fractal_heap_address: Option<u64>,
}

impl LinkInfoMessage {
    pub fn compact() -> Self {
        LinkInfoMessage {
            fractal_heap_address: None,
        }
    }

    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkInfoMessage, FormatError> {
        ensure_len(data, 0, 2)?;
        if data[0] != 0 {
            return Err(FormatError::InvalidLinkVersion(data[0]));
        }
        let mut pos = 2;
        if data[1] & 0x01 != 0 {
            pos += 8;
        }
        let heap = read_sized(data, pos, offset_size)?;
        Ok(LinkInfoMessage {
            fractal_heap_address: (!is_undefined(heap, offset_size)).then_some(heap),
        })
    }

    /// Whether links live in a fractal heap rather than in Link messages.
    pub fn is_dense(&self) -> bool {
        self.fractal_heap_address.is_some()
    }

    /// Serialize: version 0, no creation order, undefined heap and index.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8, 0u8];
        buf.extend_from_slice(&self.fractal_heap_address.unwrap_or(u64::MAX).to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_link_round_trip() {
        let link = LinkMessage::hard("dataset_one", 0x1234);
        let parsed = LinkMessage::parse(&link.serialize(), 8).unwrap();
        assert_eq!(parsed, link);
    }

    #[test]
    fn soft_and_external_links() {
        for target in [
            LinkTarget::Soft {
                path: String::from("/a/b"),
            },
            LinkTarget::External {
                filename: String::from("other.h5"),
                path: String::from("/data"),
            },
        ] {
            let link = LinkMessage {
                name: String::from("alias"),
                target,
                creation_order: Some(3),
            };
            assert_eq!(LinkMessage::parse(&link.serialize(), 8).unwrap(), link);
        }
    }

    #[test]
    fn long_names_use_wider_length_field() {
        let name: String = core::iter::repeat('x').take(300).collect();
        let link = LinkMessage::hard(&name, 8);
        let bytes = link.serialize();
        assert_eq!(bytes[1] & 0x03, 1);
        assert_eq!(LinkMessage::parse(&bytes, 8).unwrap().name, name);
    }

    #[test]
    fn minimal_hard_link_with_four_byte_offsets() {
        // version, flags=0, name len 1, "g", 4-byte address
        let bytes = [1u8, 0, 1, b'g', 0x10, 0, 0, 0];
        let link = LinkMessage::parse(&bytes, 4).unwrap();
        assert_eq!(link.name, "g");
        assert_eq!(link.target, LinkTarget::Hard { address: 0x10 });
    }

    #[test]
    fn invalid_link_type() {
        let bytes = [1u8, 0x08, 7, 1, b'g'];
        assert_eq!(
            LinkMessage::parse(&bytes, 8),
            Err(FormatError::InvalidLinkType(7))
        );
    }

    #[test]
    fn link_info_compact() {
        let info = LinkInfoMessage::compact();
        let bytes = info.serialize();
        assert_eq!(bytes.len(), 18);
        let parsed = LinkInfoMessage::parse(&bytes, 8).unwrap();
        assert!(!parsed.is_dense());
    }

    #[test]
    fn link_info_dense_detected() {
        let mut bytes = vec![0u8, 0];
        bytes.extend_from_slice(&0x400u64.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(LinkInfoMessage::parse(&bytes, 8).unwrap().is_dense());
    }
}
