//! File signature detection and the version 2/3 superblock.
//!
//! Only the self-checksummed superblock layouts are supported; files that
//! start with a v0/v1 superblock are rejected with
//! [`FormatError::UnsupportedSuperblockVersion`].

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::jenkins_lookup3;
use crate::error::FormatError;

/// The 8-byte HDF5 magic signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Size in bytes of a serialized v3 superblock with 8-byte addresses.
pub const SUPERBLOCK_V3_SIZE: usize = 48;

/// Search for the HDF5 signature at offset 0, 512, 1024, 2048, ...
pub fn find_signature(data: &[u8]) -> Result<usize, FormatError> {
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        if data[offset..offset + 8] == HDF5_SIGNATURE {
            return Ok(offset);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Err(FormatError::SignatureNotFound)
}

/// A parsed version 2 or 3 superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (2 or 3).
    pub version: u8,
    /// Size of file addresses in bytes.
    pub offset_size: u8,
    /// Size of lengths in bytes.
    pub length_size: u8,
    /// File consistency flags.
    pub consistency_flags: u8,
    /// Absolute base address, usually the signature offset.
    pub base_address: u64,
    /// Superblock extension object header address, or undefined.
    pub extension_address: u64,
    /// End-of-file address.
    pub eof_address: u64,
    /// Root group object header address.
    pub root_group_address: u64,
}

pub(crate) fn ensure_len(data: &[u8], offset: usize, needed: usize) -> Result<(), FormatError> {
    match offset.checked_add(needed) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            expected: offset.saturating_add(needed),
            available: data.len(),
        }),
    }
}

/// Read a little-endian unsigned value of 1, 2, 4 or 8 bytes.
pub(crate) fn read_sized(data: &[u8], pos: usize, size: u8) -> Result<u64, FormatError> {
    ensure_len(data, pos, size as usize)?;
    let s = &data[pos..pos + size as usize];
    Ok(match size {
        1 => s[0] as u64,
        2 => LittleEndian::read_u16(s) as u64,
        4 => LittleEndian::read_u32(s) as u64,
        8 => LittleEndian::read_u64(s),
        _ => return Err(FormatError::InvalidOffsetSize(size)),
    })
}

/// Whether `addr` is the all-ones "undefined address" for this offset size.
pub(crate) fn is_undefined(addr: u64, offset_size: u8) -> bool {
    match offset_size {
        2 => addr == 0xFFFF,
        4 => addr == 0xFFFF_FFFF,
        _ => addr == u64::MAX,
    }
}

fn validate_sizes(offset_size: u8, length_size: u8) -> Result<(), FormatError> {
    if !matches!(offset_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidOffsetSize(offset_size));
    }
    if !matches!(length_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidLengthSize(length_size));
    }
    Ok(())
}

impl Superblock {
    /// Superblock for a freshly written file with 8-byte addresses.
    pub fn new_v3(root_group_address: u64, eof_address: u64) -> Self {
        Superblock {
            version: 3,
            offset_size: 8,
            length_size: 8,
            consistency_flags: 0,
            base_address: 0,
            extension_address: u64::MAX,
            eof_address,
            root_group_address,
        }
    }

    /// Parse the superblock that follows the signature at `signature_offset`.
    pub fn parse(data: &[u8], signature_offset: usize) -> Result<Superblock, FormatError> {
        let d = &data[signature_offset.min(data.len())..];
        ensure_len(d, 0, 12)?;
        if d[..8] != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }
        let version = d[8];
        if version != 2 && version != 3 {
            return Err(FormatError::UnsupportedSuperblockVersion(version));
        }
        let offset_size = d[9];
        let length_size = d[10];
        validate_sizes(offset_size, length_size)?;
        let consistency_flags = d[11];

        let os = offset_size as usize;
        let body_end = 12 + 4 * os;
        ensure_len(d, 0, body_end + 4)?;
        let stored = LittleEndian::read_u32(&d[body_end..body_end + 4]);
        let computed = jenkins_lookup3(&d[..body_end]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                expected: stored,
                computed,
            });
        }

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            consistency_flags,
            base_address: read_sized(d, 12, offset_size)?,
            extension_address: read_sized(d, 12 + os, offset_size)?,
            eof_address: read_sized(d, 12 + 2 * os, offset_size)?,
            root_group_address: read_sized(d, 12 + 3 * os, offset_size)?,
        })
    }

    /// Serialize with 8-byte addresses, including the trailing checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_V3_SIZE);
        buf.extend_from_slice(&HDF5_SIGNATURE);
        buf.push(self.version);
        buf.push(8);
        buf.push(8);
        buf.push(self.consistency_flags);
        for addr in [
            self.base_address,
            self.extension_address,
            self.eof_address,
            self.root_group_address,
        ] {
            buf.extend_from_slice(&addr.to_le_bytes());
        }
        let checksum = jenkins_lookup3(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_at_power_of_two_offsets() {
        for offset in [0usize, 512, 1024, 4096] {
            let mut data = vec![0u8; offset + 64];
            data[offset..offset + 8].copy_from_slice(&HDF5_SIGNATURE);
            assert_eq!(find_signature(&data), Ok(offset));
        }
    }

    #[test]
    fn signature_missing() {
        let mut data = vec![0u8; 2048];
        // Not at a valid offset
        data[100..108].copy_from_slice(&HDF5_SIGNATURE);
        assert_eq!(find_signature(&data), Err(FormatError::SignatureNotFound));
        assert_eq!(find_signature(&[]), Err(FormatError::SignatureNotFound));
    }

    #[test]
    fn v3_serialize_then_parse() {
        let sb = Superblock::new_v3(48, 4096);
        let bytes = sb.serialize();
        assert_eq!(bytes.len(), SUPERBLOCK_V3_SIZE);
        let parsed = Superblock::parse(&bytes, 0).unwrap();
        assert_eq!(parsed, sb);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let mut bytes = Superblock::new_v3(48, 100).serialize();
        bytes[30] ^= 0xFF;
        assert!(matches!(
            Superblock::parse(&bytes, 0),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn legacy_versions_are_rejected() {
        let mut bytes = Superblock::new_v3(48, 100).serialize();
        bytes[8] = 0;
        assert_eq!(
            Superblock::parse(&bytes, 0),
            Err(FormatError::UnsupportedSuperblockVersion(0))
        );
    }

    #[test]
    fn truncated_superblock() {
        let bytes = Superblock::new_v3(48, 100).serialize();
        assert!(matches!(
            Superblock::parse(&bytes[..20], 0),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
