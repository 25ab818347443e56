//! HDF5 Dataspace message (message type 0x0001).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::error::FormatError;
use crate::superblock::{ensure_len, read_sized};

/// Marker for an unlimited maximum dimension.
pub const UNLIMITED: u64 = u64::MAX;

/// Shape class of a dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// A single element.
    Scalar,
    /// An N-dimensional array.
    Simple,
    /// No elements at all.
    Null,
}

/// Parsed dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    /// Current extent (empty for scalar and null spaces).
    pub dimensions: Vec<u64>,
    /// Maximum extent, if stored. [`UNLIMITED`] marks unbounded axes.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn scalar() -> Self {
        Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    pub fn simple(dimensions: &[u64], max_dimensions: Option<&[u64]>) -> Self {
        Dataspace {
            space_type: DataspaceType::Simple,
            dimensions: dimensions.to_vec(),
            max_dimensions: max_dimensions.map(|m| m.to_vec()),
        }
    }

    /// Parse a version 1 or 2 dataspace message.
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        ensure_len(data, 0, 4)?;
        let version = data[0];
        let rank = data[1] as usize;
        let flags = data[2];

        let (space_type, mut pos) = match version {
            1 => {
                ensure_len(data, 0, 8)?;
                let st = if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                };
                (st, 8)
            }
            2 => {
                let st = match data[3] {
                    0 => DataspaceType::Scalar,
                    1 => DataspaceType::Simple,
                    2 => DataspaceType::Null,
                    _ => return Err(FormatError::InvalidDataspaceVersion(version)),
                };
                (st, 4)
            }
            _ => return Err(FormatError::InvalidDataspaceVersion(version)),
        };

        let ls = length_size as usize;
        let read_dims = |pos: &mut usize| -> Result<Vec<u64>, FormatError> {
            let mut dims = Vec::with_capacity(rank);
            for _ in 0..rank {
                dims.push(read_sized(data, *pos, length_size)?);
                *pos += ls;
            }
            Ok(dims)
        };
        let dimensions = read_dims(&mut pos)?;
        let max_dimensions = if flags & 0x01 != 0 {
            Some(read_dims(&mut pos)?)
        } else {
            None
        };

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    /// Serialize as a version 2 message with 8-byte lengths.
    pub fn serialize(&self) -> Vec<u8> {
        let rank = self.dimensions.len();
        let mut buf = Vec::with_capacity(4 + 16 * rank);
        buf.push(2);
        buf.push(rank as u8);
        buf.push(if self.max_dimensions.is_some() { 0x01 } else { 0 });
        buf.push(match self.space_type {
            DataspaceType::Scalar => 0,
            DataspaceType::Simple => 1,
            DataspaceType::Null => 2,
        });
        for d in &self.dimensions {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        if let Some(max) = &self.max_dimensions {
            for d in max {
                buf.extend_from_slice(&d.to_le_bytes());
            }
        }
        buf
    }

    /// Total number of elements. Scalar = 1, Null = 0.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self.dimensions.iter().product(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_message(dims: &[u64], max: Option<&[u64]>) -> Vec<u8> {
        let mut buf = vec![1, dims.len() as u8, max.is_some() as u8, 0, 0, 0, 0, 0];
        for d in dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        if let Some(max) = max {
            for d in max {
                buf.extend_from_slice(&d.to_le_bytes());
            }
        }
        buf
    }

    #[test]
    fn parse_v1_with_max_dims() {
        let msg = v1_message(&[4, 5], Some(&[UNLIMITED, 5]));
        let ds = Dataspace::parse(&msg, 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Simple);
        assert_eq!(ds.dimensions, [4, 5]);
        assert_eq!(ds.max_dimensions, Some(vec![UNLIMITED, 5]));
        assert_eq!(ds.num_elements(), 20);
    }

    #[test]
    fn parse_v1_rank_zero_is_scalar() {
        let ds = Dataspace::parse(&v1_message(&[], None), 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Scalar);
        assert_eq!(ds.num_elements(), 1);
    }

    #[test]
    fn v2_serialize_then_parse() {
        for ds in [
            Dataspace::scalar(),
            Dataspace::simple(&[0], Some(&[UNLIMITED])),
            Dataspace::simple(&[3, 2, 7], None),
            Dataspace {
                space_type: DataspaceType::Null,
                dimensions: Vec::new(),
                max_dimensions: None,
            },
        ] {
            assert_eq!(Dataspace::parse(&ds.serialize(), 8).unwrap(), ds);
        }
    }

    #[test]
    fn four_byte_lengths() {
        let mut msg = vec![2, 1, 0, 1];
        msg.extend_from_slice(&9u32.to_le_bytes());
        let ds = Dataspace::parse(&msg, 4).unwrap();
        assert_eq!(ds.dimensions, [9]);
    }

    #[test]
    fn bad_version_and_truncation() {
        assert_eq!(
            Dataspace::parse(&[3, 0, 0, 0], 8),
            Err(FormatError::InvalidDataspaceVersion(3))
        );
        assert!(matches!(
            Dataspace::parse(&[2, 2, 0, 1, 0, 0], 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
