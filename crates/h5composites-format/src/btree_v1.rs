//! Version 1 B-trees indexing raw data chunks (node type 1).
//!
//! Each key holds the chunk size in bytes, a filter mask and the chunk's
//! element offset along every dimension plus a trailing zero for the
//! element-size dimension. Nodes are written at full capacity
//! (`2 * CHUNK_BTREE_K` entries) so readers that load fixed-size nodes
//! find every byte they expect.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::superblock::{ensure_len, is_undefined, read_sized};

/// Half the maximum number of entries in a chunk B-tree node.
pub const CHUNK_BTREE_K: usize = 32;

const MAX_ENTRIES: usize = 2 * CHUNK_BTREE_K;

/// Location and extent of one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Element offset of the chunk along each dataset dimension.
    pub offsets: Vec<u64>,
    /// Stored size in bytes.
    pub size: u32,
    /// File address of the chunk data.
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkKey {
    size: u32,
    filter_mask: u32,
    offsets: Vec<u64>,
}

impl ChunkKey {
    fn of(record: &ChunkRecord) -> Self {
        ChunkKey {
            size: record.size,
            filter_mask: 0,
            offsets: record.offsets.clone(),
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.filter_mask.to_le_bytes());
        for o in &self.offsets {
            buf.extend_from_slice(&o.to_le_bytes());
        }
        buf.extend_from_slice(&0u64.to_le_bytes());
    }
}

/// Serialized size of one key for a dataset of `rank` dimensions.
fn key_size(rank: usize) -> usize {
    8 + 8 * (rank + 1)
}

/// Serialized size of one node.
pub fn node_size(rank: usize) -> usize {
    8 + 16 + MAX_ENTRIES * 8 + (MAX_ENTRIES + 1) * key_size(rank)
}

/// Number of nodes on each level, leaves first.
fn level_counts(n_chunks: usize) -> Vec<usize> {
    let mut counts = Vec::new();
    if n_chunks == 0 {
        return counts;
    }
    let mut n = n_chunks;
    loop {
        n = n.div_ceil(MAX_ENTRIES);
        counts.push(n);
        if n == 1 {
            break;
        }
    }
    counts
}

/// Total bytes of a tree indexing `n_chunks` chunks (0 when empty).
pub fn chunk_btree_size(n_chunks: usize, rank: usize) -> usize {
    level_counts(n_chunks).iter().sum::<usize>() * node_size(rank)
}

/// Serialize a tree for `chunks`, placing the root at `base_address`.
///
/// `chunks` must be sorted by offset in row-major order and
/// `chunk_dims` gives the chunk extent used for the final key.
pub fn build_chunk_btree(chunks: &[ChunkRecord], chunk_dims: &[u64], base_address: u64) -> Vec<u8> {
    let rank = chunk_dims.len();
    let counts = level_counts(chunks.len());
    if counts.is_empty() {
        return Vec::new();
    }
    let nsize = node_size(rank) as u64;

    // first node index of each level, with the root level first in the file
    let mut level_start = vec![0usize; counts.len()];
    let mut acc = 0;
    for level in (0..counts.len()).rev() {
        level_start[level] = acc;
        acc += counts[level];
    }
    let addr_of = |level: usize, i: usize| base_address + (level_start[level] + i) as u64 * nsize;

    let end_key = {
        let last = &chunks[chunks.len() - 1];
        ChunkKey {
            size: 0,
            filter_mask: 0,
            offsets: last
                .offsets
                .iter()
                .zip(chunk_dims)
                .map(|(o, d)| o + d)
                .collect(),
        }
    };

    // (first key, children addresses and keys) of every node per level
    let mut levels: Vec<Vec<(Vec<ChunkKey>, Vec<u64>)>> = Vec::with_capacity(counts.len());
    let leaf_nodes = chunks
        .chunks(MAX_ENTRIES)
        .map(|group| {
            (
                group.iter().map(ChunkKey::of).collect::<Vec<_>>(),
                group.iter().map(|c| c.address).collect::<Vec<_>>(),
            )
        })
        .collect::<Vec<_>>();
    levels.push(leaf_nodes);
    for level in 1..counts.len() {
        let below = &levels[level - 1];
        let nodes = below
            .chunks(MAX_ENTRIES)
            .enumerate()
            .map(|(n, group)| {
                let keys = group.iter().map(|(k, _)| k[0].clone()).collect();
                let children = (0..group.len())
                    .map(|i| addr_of(level - 1, n * MAX_ENTRIES + i))
                    .collect();
                (keys, children)
            })
            .collect();
        levels.push(nodes);
    }

    let mut buf = Vec::with_capacity(chunk_btree_size(chunks.len(), rank));
    for level in (0..levels.len()).rev() {
        let nodes = &levels[level];
        for (i, (keys, children)) in nodes.iter().enumerate() {
            let start = buf.len();
            buf.extend_from_slice(b"TREE");
            buf.push(1);
            buf.push(level as u8);
            buf.extend_from_slice(&(children.len() as u16).to_le_bytes());
            let left = if i == 0 { u64::MAX } else { addr_of(level, i - 1) };
            let right = if i + 1 == nodes.len() {
                u64::MAX
            } else {
                addr_of(level, i + 1)
            };
            buf.extend_from_slice(&left.to_le_bytes());
            buf.extend_from_slice(&right.to_le_bytes());
            for (key, child) in keys.iter().zip(children) {
                key.write(&mut buf);
                buf.extend_from_slice(&child.to_le_bytes());
            }
            let closing = nodes
                .get(i + 1)
                .map(|(k, _)| k[0].clone())
                .unwrap_or_else(|| end_key.clone());
            closing.write(&mut buf);
            buf.resize(start + nsize as usize, 0);
        }
    }
    buf
}

/// Collect every chunk reachable from the node at `address`.
///
/// `dimensionality` is the layout message's rank, one more than the
/// dataset rank.
pub fn collect_chunks(
    file_data: &[u8],
    address: u64,
    dimensionality: usize,
    offset_size: u8,
) -> Result<Vec<ChunkRecord>, FormatError> {
    let mut out = Vec::new();
    let mut stack = vec![(address, u8::MAX)];
    while let Some((addr, expected_level)) = stack.pop() {
        if is_undefined(addr, offset_size) {
            continue;
        }
        let pos = addr as usize;
        let os = offset_size as usize;
        ensure_len(file_data, pos, 8 + 2 * os)?;
        if &file_data[pos..pos + 4] != b"TREE" {
            return Err(FormatError::InvalidBTreeSignature);
        }
        let node_type = file_data[pos + 4];
        if node_type != 1 {
            return Err(FormatError::InvalidBTreeNodeType(node_type));
        }
        let level = file_data[pos + 5];
        if expected_level != u8::MAX && level != expected_level {
            return Err(FormatError::InvalidBTreeNodeType(node_type));
        }
        let entries = LittleEndian::read_u16(&file_data[pos + 6..]) as usize;
        let ksize = 8 + 8 * dimensionality;
        let mut p = pos + 8 + 2 * os;
        ensure_len(file_data, p, entries * (ksize + os) + ksize)?;

        let mut children = Vec::with_capacity(entries);
        for _ in 0..entries {
            let size = LittleEndian::read_u32(&file_data[p..]);
            let offsets = (0..dimensionality.saturating_sub(1))
                .map(|d| LittleEndian::read_u64(&file_data[p + 8 + 8 * d..]))
                .collect::<Vec<_>>();
            p += ksize;
            let child = read_sized(file_data, p, offset_size)?;
            p += os;
            children.push((offsets, size, child));
        }

        if level == 0 {
            out.extend(children.into_iter().map(|(offsets, size, address)| ChunkRecord {
                offsets,
                size,
                address,
            }));
        } else {
            // reversed so chunks come out in key order
            for (_, _, child) in children.into_iter().rev() {
                stack.push((child, level - 1));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize, chunk: u64) -> Vec<ChunkRecord> {
        (0..n)
            .map(|i| ChunkRecord {
                offsets: vec![i as u64 * chunk],
                size: 32,
                address: 0x10_0000 + i as u64 * 32,
            })
            .collect()
    }

    #[test]
    fn empty_tree_has_no_nodes() {
        assert_eq!(chunk_btree_size(0, 1), 0);
        assert!(build_chunk_btree(&[], &[4], 0).is_empty());
    }

    #[test]
    fn single_leaf() {
        let chunks = records(3, 4);
        let base = 0x200;
        let tree = build_chunk_btree(&chunks, &[4], base);
        assert_eq!(tree.len(), chunk_btree_size(3, 1));
        let mut file = vec![0u8; base as usize];
        file.extend_from_slice(&tree);
        assert_eq!(collect_chunks(&file, base, 2, 8).unwrap(), chunks);
    }

    #[test]
    fn two_levels_keep_order() {
        let chunks = records(200, 8);
        let base = 64;
        let tree = build_chunk_btree(&chunks, &[8], base);
        // four leaves plus a root
        assert_eq!(tree.len(), 5 * node_size(1));
        let mut file = vec![0u8; base as usize];
        file.extend_from_slice(&tree);
        assert_eq!(&file[base as usize + 5..base as usize + 6], &[1]);
        assert_eq!(collect_chunks(&file, base, 2, 8).unwrap(), chunks);
    }

    #[test]
    fn multi_dimensional_offsets() {
        let chunks = vec![
            ChunkRecord {
                offsets: vec![0, 0],
                size: 16,
                address: 1000,
            },
            ChunkRecord {
                offsets: vec![0, 2],
                size: 16,
                address: 1016,
            },
            ChunkRecord {
                offsets: vec![2, 0],
                size: 16,
                address: 1032,
            },
        ];
        let tree = build_chunk_btree(&chunks, &[2, 2], 0);
        assert_eq!(collect_chunks(&tree, 0, 3, 8).unwrap(), chunks);
    }

    #[test]
    fn wrong_signature_and_type() {
        let mut tree = build_chunk_btree(&records(1, 1), &[1], 0);
        tree[4] = 0;
        assert_eq!(
            collect_chunks(&tree, 0, 2, 8),
            Err(FormatError::InvalidBTreeNodeType(0))
        );
        tree[0] = b'X';
        assert_eq!(
            collect_chunks(&tree, 0, 2, 8),
            Err(FormatError::InvalidBTreeSignature)
        );
    }
}
