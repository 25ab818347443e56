//! Version 2 object header writer.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::checksum::jenkins_lookup3;
use crate::error::FormatError;
use crate::message_type::MessageType;
use crate::object_header::OHDR_SIGNATURE;

/// Message flag: the message is constant.
pub const MSG_FLAG_CONSTANT: u8 = 0x01;

/// Collects messages and serializes them as a single-chunk "OHDR" header.
#[derive(Debug, Default)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>,
}

impl ObjectHeaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message with flags 0.
    pub fn add_message(&mut self, msg_type: MessageType, data: Vec<u8>) -> Result<(), FormatError> {
        self.add_message_with_flags(msg_type, data, 0)
    }

    /// Add a message with explicit message flags.
    pub fn add_message_with_flags(
        &mut self,
        msg_type: MessageType,
        data: Vec<u8>,
        flags: u8,
    ) -> Result<(), FormatError> {
        if data.len() > u16::MAX as usize {
            return Err(FormatError::UnsupportedFeature(
                "object header messages larger than 64 KiB",
            ));
        }
        self.messages.push((msg_type, data, flags));
        Ok(())
    }

    /// Size of the serialized header in bytes.
    pub fn serialized_len(&self) -> usize {
        let body = self.body_len();
        6 + Self::size_width(body) + body + 4
    }

    fn body_len(&self) -> usize {
        self.messages.iter().map(|(_, d, _)| 4 + d.len()).sum()
    }

    fn size_width(body: usize) -> usize {
        match body {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 4,
        }
    }

    /// Serialize: signature, version, flags, chunk size, messages, checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.body_len();
        let width = Self::size_width(body);
        let mut buf = Vec::with_capacity(self.serialized_len());
        buf.extend_from_slice(&OHDR_SIGNATURE);
        buf.push(2);
        buf.push(match width {
            1 => 0x00,
            2 => 0x01,
            _ => 0x02,
        });
        buf.extend_from_slice(&(body as u64).to_le_bytes()[..width]);
        for (msg_type, data, flags) in &self.messages {
            buf.push(msg_type.to_u16() as u8);
            buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
            buf.push(*flags);
            buf.extend_from_slice(data);
        }
        let checksum = jenkins_lookup3(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_header::ObjectHeader;

    #[test]
    fn empty_header() {
        let writer = ObjectHeaderWriter::new();
        let bytes = writer.serialize();
        assert_eq!(bytes.len(), writer.serialized_len());
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.version, 2);
        assert!(hdr.messages.is_empty());
    }

    #[test]
    fn messages_keep_order_and_flags() {
        let mut writer = ObjectHeaderWriter::new();
        writer.add_message(MessageType::Dataspace, vec![1, 2, 3, 4]).unwrap();
        writer
            .add_message_with_flags(MessageType::Datatype, vec![5, 6], MSG_FLAG_CONSTANT)
            .unwrap();
        let hdr = ObjectHeader::parse(&writer.serialize(), 0, 8, 8).unwrap();
        assert_eq!(hdr.messages.len(), 2);
        assert_eq!(hdr.messages[0].msg_type, MessageType::Dataspace);
        assert_eq!(hdr.messages[1].flags, MSG_FLAG_CONSTANT);
        assert_eq!(hdr.find(MessageType::Datatype).unwrap().data, [5, 6]);
    }

    #[test]
    fn chunk_size_width_grows() {
        for (payload, width) in [(100usize, 1usize), (300, 2), (70_000 / 2, 2)] {
            let mut writer = ObjectHeaderWriter::new();
            writer.add_message(MessageType::Attribute, vec![0xAA; payload]).unwrap();
            let bytes = writer.serialize();
            assert_eq!(bytes.len(), 6 + width + 4 + payload + 4);
            let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
            assert_eq!(hdr.messages[0].data.len(), payload);
        }
        let mut writer = ObjectHeaderWriter::new();
        for _ in 0..3 {
            writer.add_message(MessageType::Attribute, vec![1; 30_000]).unwrap();
        }
        let hdr = ObjectHeader::parse(&writer.serialize(), 0, 8, 8).unwrap();
        assert_eq!(hdr.messages.len(), 3);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut writer = ObjectHeaderWriter::new();
        assert!(writer
            .add_message(MessageType::Attribute, vec![0; 70_000])
            .is_err());
    }
}
