//! HDF5 Data Layout message (message type 0x0008).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::error::FormatError;
use crate::superblock::{ensure_len, is_undefined, read_sized};

/// Where the raw data of a dataset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Raw data stored inside the message.
    Compact { data: Vec<u8> },
    /// One block at `address`; `None` when nothing has been allocated.
    Contiguous { address: Option<u64>, size: u64 },
    /// Fixed-size chunks indexed by a version 1 B-tree.
    ///
    /// `chunk_dimensions` has one entry per dataset axis followed by the
    /// element size in bytes.
    Chunked {
        chunk_dimensions: Vec<u32>,
        btree_address: Option<u64>,
    },
}

fn defined(addr: u64, offset_size: u8) -> Option<u64> {
    (!is_undefined(addr, offset_size)).then_some(addr)
}

impl DataLayout {
    /// Parse a version 3 or 4 layout message.
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout, FormatError> {
        ensure_len(data, 0, 2)?;
        let version = data[0];
        let class = data[1];
        if !matches!(version, 3 | 4) {
            return Err(FormatError::InvalidLayoutVersion(version));
        }
        let pos = 2;
        match class {
            0 => {
                ensure_len(data, pos, 2)?;
                let n = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
                ensure_len(data, pos + 2, n)?;
                Ok(DataLayout::Compact {
                    data: data[pos + 2..pos + 2 + n].to_vec(),
                })
            }
            1 => {
                let address = read_sized(data, pos, offset_size)?;
                let size = read_sized(data, pos + offset_size as usize, length_size)?;
                Ok(DataLayout::Contiguous {
                    address: defined(address, offset_size),
                    size,
                })
            }
            2 if version == 3 => {
                ensure_len(data, pos, 1)?;
                let rank = data[pos] as usize;
                let address = read_sized(data, pos + 1, offset_size)?;
                let mut p = pos + 1 + offset_size as usize;
                ensure_len(data, p, rank * 4)?;
                let mut chunk_dimensions = Vec::with_capacity(rank);
                for _ in 0..rank {
                    chunk_dimensions.push(u32::from_le_bytes([
                        data[p],
                        data[p + 1],
                        data[p + 2],
                        data[p + 3],
                    ]));
                    p += 4;
                }
                Ok(DataLayout::Chunked {
                    chunk_dimensions,
                    btree_address: defined(address, offset_size),
                })
            }
            2 => Err(FormatError::UnsupportedFeature("version 4 chunk indexing")),
            3 => Err(FormatError::UnsupportedFeature("virtual datasets")),
            _ => Err(FormatError::InvalidLayoutClass(class)),
        }
    }

    /// Serialize as a version 3 message with 8-byte addresses and lengths.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![3u8];
        match self {
            DataLayout::Compact { data } => {
                buf.push(0);
                buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
                buf.extend_from_slice(data);
            }
            DataLayout::Contiguous { address, size } => {
                buf.push(1);
                buf.extend_from_slice(&address.unwrap_or(u64::MAX).to_le_bytes());
                buf.extend_from_slice(&size.to_le_bytes());
            }
            DataLayout::Chunked {
                chunk_dimensions,
                btree_address,
            } => {
                buf.push(2);
                buf.push(chunk_dimensions.len() as u8);
                buf.extend_from_slice(&btree_address.unwrap_or(u64::MAX).to_le_bytes());
                for d in chunk_dimensions {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_round_trips() {
        for layout in [
            DataLayout::Compact {
                data: vec![1, 2, 3],
            },
            DataLayout::Contiguous {
                address: Some(0x800),
                size: 64,
            },
            DataLayout::Contiguous {
                address: None,
                size: 0,
            },
            DataLayout::Chunked {
                chunk_dimensions: vec![16, 4, 8],
                btree_address: Some(0x1000),
            },
        ] {
            assert_eq!(DataLayout::parse(&layout.serialize(), 8, 8).unwrap(), layout);
        }
    }

    #[test]
    fn v4_chunked_is_unsupported() {
        let bytes = [4u8, 2, 0, 1, 8, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            DataLayout::parse(&bytes, 8, 8),
            Err(FormatError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn v4_contiguous_is_read() {
        let mut bytes = vec![4u8, 1];
        bytes.extend_from_slice(&0x40u64.to_le_bytes());
        bytes.extend_from_slice(&12u64.to_le_bytes());
        assert_eq!(
            DataLayout::parse(&bytes, 8, 8).unwrap(),
            DataLayout::Contiguous {
                address: Some(0x40),
                size: 12
            }
        );
    }

    #[test]
    fn bad_version_and_class() {
        assert_eq!(
            DataLayout::parse(&[2, 1], 8, 8),
            Err(FormatError::InvalidLayoutVersion(2))
        );
        assert_eq!(
            DataLayout::parse(&[3, 7], 8, 8),
            Err(FormatError::InvalidLayoutClass(7))
        );
    }
}
