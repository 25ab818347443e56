//! Object header parsing (versions 1 and 2).
//!
//! Continuation blocks are followed so `messages` holds every non-NIL
//! message of the object, in file order.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::jenkins_lookup3;
use crate::error::FormatError;
use crate::message_type::MessageType;
use crate::superblock::{ensure_len, read_sized};

pub(crate) const OHDR_SIGNATURE: [u8; 4] = *b"OHDR";
const OCHK_SIGNATURE: [u8; 4] = *b"OCHK";

/// Upper bound on continuation blocks followed for one object.
const MAX_CONTINUATIONS: usize = 4096;

/// One message of an object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMessage {
    pub msg_type: MessageType,
    pub flags: u8,
    pub data: Vec<u8>,
}

/// A parsed object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Header version (1 or 2).
    pub version: u8,
    pub messages: Vec<HeaderMessage>,
}

/// A continuation block still to be read.
struct Pending {
    address: usize,
    length: usize,
}

impl ObjectHeader {
    /// Parse the object header at `offset`.
    pub fn parse(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<ObjectHeader, FormatError> {
        ensure_len(data, offset, 4)?;
        let v2 = data[offset..offset + 4] == OHDR_SIGNATURE;
        let mut messages = Vec::new();
        let mut pending = Vec::new();

        let creation_order = if v2 {
            Self::parse_v2_prefix(data, offset, &mut messages, &mut pending, offset_size, length_size)?
        } else {
            Self::parse_v1_prefix(data, offset, &mut messages, &mut pending, offset_size, length_size)?;
            false
        };

        let mut followed = 0;
        while let Some(block) = pending.pop() {
            followed += 1;
            if followed > MAX_CONTINUATIONS {
                return Err(FormatError::UnsupportedFeature("object header continuation loop"));
            }
            ensure_len(data, block.address, block.length)?;
            if v2 {
                let start = block.address;
                let end = start + block.length;
                if block.length < 8 || data[start..start + 4] != OCHK_SIGNATURE {
                    return Err(FormatError::InvalidObjectHeaderSignature);
                }
                verify_checksum(data, start, end - 4)?;
                Self::parse_v2_messages(
                    data,
                    start + 4,
                    end - 4,
                    creation_order,
                    &mut messages,
                    &mut pending,
                    offset_size,
                    length_size,
                )?;
            } else {
                Self::parse_v1_messages(
                    data,
                    block.address,
                    block.address + block.length,
                    usize::MAX,
                    &mut messages,
                    &mut pending,
                    offset_size,
                    length_size,
                )?;
            }
        }

        Ok(ObjectHeader {
            version: if v2 { 2 } else { 1 },
            messages,
        })
    }

    /// Messages of the given type, in order.
    pub fn messages_of(&self, msg_type: MessageType) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.msg_type == msg_type)
    }

    /// First message of the given type.
    pub fn find(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages_of(msg_type).next()
    }

    fn parse_v1_prefix(
        data: &[u8],
        offset: usize,
        messages: &mut Vec<HeaderMessage>,
        pending: &mut Vec<Pending>,
        offset_size: u8,
        length_size: u8,
    ) -> Result<(), FormatError> {
        // version(1) reserved(1) count(2) refcount(4) size(4) padding(4)
        ensure_len(data, offset, 16)?;
        let version = data[offset];
        if version != 1 {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }
        let count = LittleEndian::read_u16(&data[offset + 2..]) as usize;
        let size = LittleEndian::read_u32(&data[offset + 8..]) as usize;
        let start = offset + 16;
        ensure_len(data, start, size)?;
        Self::parse_v1_messages(
            data,
            start,
            start + size,
            count,
            messages,
            pending,
            offset_size,
            length_size,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_v1_messages(
        data: &[u8],
        mut pos: usize,
        end: usize,
        max_count: usize,
        messages: &mut Vec<HeaderMessage>,
        pending: &mut Vec<Pending>,
        offset_size: u8,
        length_size: u8,
    ) -> Result<(), FormatError> {
        let mut seen = 0;
        while pos + 8 <= end && seen < max_count {
            let raw_type = LittleEndian::read_u16(&data[pos..]);
            let size = LittleEndian::read_u16(&data[pos + 2..]) as usize;
            let flags = data[pos + 4];
            pos += 8;
            if pos + size > end {
                return Err(FormatError::UnexpectedEof {
                    expected: pos + size,
                    available: end,
                });
            }
            Self::push_message(
                MessageType::from_u16(raw_type),
                flags,
                &data[pos..pos + size],
                messages,
                pending,
                offset_size,
                length_size,
            )?;
            pos += size;
            seen += 1;
        }
        Ok(())
    }

    /// Returns whether messages carry a creation order field.
    fn parse_v2_prefix(
        data: &[u8],
        offset: usize,
        messages: &mut Vec<HeaderMessage>,
        pending: &mut Vec<Pending>,
        offset_size: u8,
        length_size: u8,
    ) -> Result<bool, FormatError> {
        ensure_len(data, offset, 6)?;
        let version = data[offset + 4];
        if version != 2 {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }
        let flags = data[offset + 5];
        let mut pos = offset + 6;
        if flags & 0x20 != 0 {
            // access, modification, change and birth times
            pos += 16;
        }
        if flags & 0x10 != 0 {
            // attribute phase change thresholds
            pos += 4;
        }
        let width = 1u8 << (flags & 0x03);
        let chunk_size = read_sized(data, pos, width)? as usize;
        pos += width as usize;

        let end = pos + chunk_size;
        ensure_len(data, end, 4)?;
        verify_checksum(data, offset, end)?;

        let creation_order = flags & 0x04 != 0;
        Self::parse_v2_messages(
            data,
            pos,
            end,
            creation_order,
            messages,
            pending,
            offset_size,
            length_size,
        )?;
        Ok(creation_order)
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_v2_messages(
        data: &[u8],
        mut pos: usize,
        end: usize,
        creation_order: bool,
        messages: &mut Vec<HeaderMessage>,
        pending: &mut Vec<Pending>,
        offset_size: u8,
        length_size: u8,
    ) -> Result<(), FormatError> {
        let prefix = if creation_order { 6 } else { 4 };
        // a remainder smaller than a message prefix is a gap
        while pos + prefix <= end {
            let raw_type = data[pos] as u16;
            let size = LittleEndian::read_u16(&data[pos + 1..]) as usize;
            let flags = data[pos + 3];
            pos += prefix;
            if pos + size > end {
                return Err(FormatError::UnexpectedEof {
                    expected: pos + size,
                    available: end,
                });
            }
            Self::push_message(
                MessageType::from_u16(raw_type),
                flags,
                &data[pos..pos + size],
                messages,
                pending,
                offset_size,
                length_size,
            )?;
            pos += size;
        }
        Ok(())
    }

    fn push_message(
        msg_type: MessageType,
        flags: u8,
        body: &[u8],
        messages: &mut Vec<HeaderMessage>,
        pending: &mut Vec<Pending>,
        offset_size: u8,
        length_size: u8,
    ) -> Result<(), FormatError> {
        match msg_type {
            MessageType::Nil => {}
            MessageType::ObjectHeaderContinuation => {
                let address = read_sized(body, 0, offset_size)? as usize;
                let length = read_sized(body, offset_size as usize, length_size)? as usize;
                // reversed on pop, so insert at the front to keep file order
                pending.insert(0, Pending { address, length });
            }
            MessageType::Unknown(_) if flags & 0x08 != 0 => {
                return Err(FormatError::UnsupportedFeature(
                    "object header message that must be understood",
                ));
            }
            _ => messages.push(HeaderMessage {
                msg_type,
                flags,
                data: body.to_vec(),
            }),
        }
        Ok(())
    }
}

fn verify_checksum(data: &[u8], start: usize, end: usize) -> Result<(), FormatError> {
    ensure_len(data, end, 4)?;
    let stored = LittleEndian::read_u32(&data[end..end + 4]);
    let computed = jenkins_lookup3(&data[start..end]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_header_writer::ObjectHeaderWriter;

    fn v1_header(messages: &[(u16, &[u8])]) -> Vec<u8> {
        let body: Vec<u8> = messages
            .iter()
            .flat_map(|(ty, data)| {
                let mut m = Vec::new();
                m.extend_from_slice(&ty.to_le_bytes());
                m.extend_from_slice(&(data.len() as u16).to_le_bytes());
                m.extend_from_slice(&[0; 4]);
                m.extend_from_slice(data);
                m
            })
            .collect();
        let mut buf = vec![1, 0];
        buf.extend_from_slice(&(messages.len() as u16).to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn v1_messages_are_collected() {
        let bytes = v1_header(&[(0x0001, &[7u8; 8]), (0x0000, &[0u8; 8]), (0x0003, &[9u8; 16])]);
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.version, 1);
        assert_eq!(hdr.messages.len(), 2);
        assert_eq!(hdr.messages[0].msg_type, MessageType::Dataspace);
        assert_eq!(hdr.messages[1].data, [9u8; 16]);
    }

    #[test]
    fn v1_continuation_is_followed() {
        let mut cont = Vec::new();
        cont.extend_from_slice(&0u64.to_le_bytes()); // patched below
        cont.extend_from_slice(&16u64.to_le_bytes());
        let mut bytes = v1_header(&[(0x0010, &cont)]);
        let block_addr = bytes.len() as u64;
        // continuation block: one Datatype message with 8 bytes
        bytes.extend_from_slice(&0x0003u16.to_le_bytes());
        bytes.extend_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&[5u8; 8]);
        bytes[24..32].copy_from_slice(&block_addr.to_le_bytes());

        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.messages.len(), 1);
        assert_eq!(hdr.messages[0].msg_type, MessageType::Datatype);
        assert_eq!(hdr.messages[0].data, [5u8; 8]);
    }

    #[test]
    fn v2_checksum_is_verified() {
        let mut writer = ObjectHeaderWriter::new();
        writer.add_message(MessageType::Dataspace, vec![1, 2, 3]).unwrap();
        let mut bytes = writer.serialize();
        assert!(ObjectHeader::parse(&bytes, 0, 8, 8).is_ok());
        bytes[8] ^= 0x01;
        assert!(matches!(
            ObjectHeader::parse(&bytes, 0, 8, 8),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn v2_continuation_block() {
        // OCHK block with one LinkInfo message, placed after the header
        let mut writer = ObjectHeaderWriter::new();
        let mut cont = Vec::new();
        cont.extend_from_slice(&0u64.to_le_bytes());
        cont.extend_from_slice(&0u64.to_le_bytes());
        writer
            .add_message(MessageType::ObjectHeaderContinuation, cont)
            .unwrap();
        let header_len = writer.serialize().len();

        let mut block = OCHK_SIGNATURE.to_vec();
        block.push(0x02);
        block.extend_from_slice(&2u16.to_le_bytes());
        block.push(0);
        block.extend_from_slice(&[0xAB, 0xCD]);
        let sum = jenkins_lookup3(&block);
        block.extend_from_slice(&sum.to_le_bytes());

        let mut writer = ObjectHeaderWriter::new();
        let mut cont = Vec::new();
        cont.extend_from_slice(&(header_len as u64).to_le_bytes());
        cont.extend_from_slice(&(block.len() as u64).to_le_bytes());
        writer
            .add_message(MessageType::ObjectHeaderContinuation, cont)
            .unwrap();
        let mut bytes = writer.serialize();
        assert_eq!(bytes.len(), header_len);
        bytes.extend_from_slice(&block);

        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.messages.len(), 1);
        assert_eq!(hdr.messages[0].msg_type, MessageType::LinkInfo);
        assert_eq!(hdr.messages[0].data, [0xAB, 0xCD]);
    }

    #[test]
    fn unknown_required_message_is_rejected() {
        let bytes = v1_header(&[(0x0042, &[0u8; 8])]);
        let mut patched = bytes.clone();
        patched[16 + 4] = 0x08;
        assert!(ObjectHeader::parse(&bytes, 0, 8, 8).is_ok());
        assert!(matches!(
            ObjectHeader::parse(&patched, 0, 8, 8),
            Err(FormatError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn bad_v1_version() {
        let mut bytes = v1_header(&[]);
        bytes[0] = 3;
        assert_eq!(
            ObjectHeader::parse(&bytes, 0, 8, 8),
            Err(FormatError::InvalidObjectHeaderVersion(3))
        );
    }
}
