//! Global heap collections ("GCOL", version 1).
//!
//! Variable-length data lives in global heap objects. A collection is at
//! least [`MIN_COLLECTION_SIZE`] bytes; unused space at the end is
//! described by a free-space object with index 0.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::superblock::{ensure_len, read_sized};

const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Smallest collection the HDF5 library accepts.
pub const MIN_COLLECTION_SIZE: usize = 4096;

const COLLECTION_HEADER: usize = 16;
const OBJECT_HEADER: usize = 16;

fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

/// A parsed global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    pub address: u64,
    /// `(index, data)` of every live object.
    pub objects: Vec<(u16, Vec<u8>)>,
}

impl GlobalHeapCollection {
    pub fn parse(file_data: &[u8], address: u64, length_size: u8) -> Result<Self, FormatError> {
        let offset = address as usize;
        let ls = length_size as usize;
        ensure_len(file_data, offset, 8 + ls)?;
        if file_data[offset..offset + 4] != GCOL_SIGNATURE {
            return Err(FormatError::InvalidGlobalHeapSignature);
        }
        let version = file_data[offset + 4];
        if version != 1 {
            return Err(FormatError::InvalidGlobalHeapVersion(version));
        }
        let size = read_sized(file_data, offset + 8, length_size)? as usize;
        ensure_len(file_data, offset, size)?;
        let end = offset + size;

        let mut objects = Vec::new();
        let mut pos = offset + 8 + ls;
        while pos + 8 + ls <= end {
            let index = LittleEndian::read_u16(&file_data[pos..]);
            if index == 0 {
                break;
            }
            let obj_size = read_sized(file_data, pos + 8, length_size)? as usize;
            pos += 8 + ls;
            ensure_len(file_data, pos, obj_size)?;
            objects.push((index, file_data[pos..pos + obj_size].to_vec()));
            pos += pad8(obj_size);
        }
        Ok(GlobalHeapCollection { address, objects })
    }

    pub fn object(&self, index: u32) -> Result<&[u8], FormatError> {
        self.objects
            .iter()
            .find(|(i, _)| *i as u32 == index)
            .map(|(_, d)| d.as_slice())
            .ok_or(FormatError::GlobalHeapObjectNotFound {
                collection: self.address,
                index,
            })
    }
}

/// Reference to an object queued in a [`GlobalHeapWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRef {
    /// Position of the collection in write order.
    pub collection: usize,
    /// 1-based object index inside the collection.
    pub index: u16,
}

/// Packs objects into collections before their addresses are known.
#[derive(Debug, Default)]
pub struct GlobalHeapWriter {
    collections: Vec<Vec<Vec<u8>>>,
}

fn content_size(objects: &[Vec<u8>]) -> usize {
    COLLECTION_HEADER
        + objects
            .iter()
            .map(|o| OBJECT_HEADER + pad8(o.len()))
            .sum::<usize>()
}

impl GlobalHeapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an object and return where it will live.
    pub fn insert(&mut self, data: Vec<u8>) -> HeapRef {
        let needed = OBJECT_HEADER + pad8(data.len());
        let fits = self.collections.last().is_some_and(|c| {
            c.len() < u16::MAX as usize && content_size(c) + needed <= MIN_COLLECTION_SIZE
        });
        if !fits {
            self.collections.push(Vec::new());
        }
        let collection = self.collections.len() - 1;
        let objects = &mut self.collections[collection];
        objects.push(data);
        HeapRef {
            collection,
            index: objects.len() as u16,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Byte size of each collection.
    pub fn collection_sizes(&self) -> Vec<u64> {
        self.collections
            .iter()
            .map(|c| content_size(c).max(MIN_COLLECTION_SIZE) as u64)
            .collect()
    }

    /// Total bytes of all collections.
    pub fn total_size(&self) -> u64 {
        self.collection_sizes().iter().sum()
    }

    /// Collection addresses when the first one starts at `base`.
    pub fn addresses(&self, base: u64) -> Vec<u64> {
        let mut addr = base;
        self.collection_sizes()
            .into_iter()
            .map(|size| {
                let here = addr;
                addr += size;
                here
            })
            .collect()
    }

    /// Serialize every collection back to back.
    pub fn serialize(&self) -> Vec<u8> {
        let sizes = self.collection_sizes();
        let mut buf = Vec::with_capacity(sizes.iter().sum::<u64>() as usize);
        for (objects, size) in self.collections.iter().zip(sizes) {
            let start = buf.len();
            buf.extend_from_slice(&GCOL_SIGNATURE);
            buf.extend_from_slice(&[1, 0, 0, 0]);
            buf.extend_from_slice(&size.to_le_bytes());
            for (i, data) in objects.iter().enumerate() {
                buf.extend_from_slice(&((i + 1) as u16).to_le_bytes());
                buf.extend_from_slice(&1u16.to_le_bytes());
                buf.extend_from_slice(&[0; 4]);
                buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
                buf.extend_from_slice(data);
                buf.resize(buf.len() + pad8(data.len()) - data.len(), 0);
            }
            let used = buf.len() - start;
            let free = size as usize - used;
            if free >= OBJECT_HEADER {
                buf.extend_from_slice(&[0; 8]);
                buf.extend_from_slice(&(free as u64).to_le_bytes());
            }
            buf.resize(start + size as usize, 0);
        }
        buf
    }
}

/// Decode the file form of a vlen slot: `(length, collection address, index)`.
pub fn read_heap_id(slot: &[u8]) -> Result<(u32, u64, u32), FormatError> {
    ensure_len(slot, 0, 16)?;
    Ok((
        LittleEndian::read_u32(&slot[0..4]),
        LittleEndian::read_u64(&slot[4..12]),
        LittleEndian::read_u32(&slot[12..16]),
    ))
}

/// Encode the file form of a vlen slot.
pub fn write_heap_id(length: u32, collection: u64, index: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&length.to_le_bytes());
    out[4..12].copy_from_slice(&collection.to_le_bytes());
    out[12..16].copy_from_slice(&index.to_le_bytes());
    out
}

/// Lazily parsed collections of a file, keyed by address.
#[derive(Debug, Default)]
pub struct GlobalHeapCache {
    collections: Vec<GlobalHeapCollection>,
}

impl GlobalHeapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch object `index` of the collection at `address`.
    pub fn get(
        &mut self,
        file_data: &[u8],
        address: u64,
        index: u32,
        length_size: u8,
    ) -> Result<Vec<u8>, FormatError> {
        let pos = match self.collections.iter().position(|c| c.address == address) {
            Some(pos) => pos,
            None => {
                let parsed = GlobalHeapCollection::parse(file_data, address, length_size)?;
                self.collections.push(parsed);
                self.collections.len() - 1
            }
        };
        Ok(self.collections[pos].object(index)?.to_vec())
    }
}
